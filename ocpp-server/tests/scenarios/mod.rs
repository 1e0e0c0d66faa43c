pub mod call_error;
pub mod concurrency;
pub mod connection_lost;
pub mod hooks;
