#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("station {0} is not connected")]
    NotConnected(String),
    #[error("failed to send frame: {0}")]
    Send(String),
}

/// Outbound half of the station connections. Framing, TLS and the socket
/// itself live behind this trait.
#[async_trait::async_trait]
pub trait StationTransport: Send + Sync + 'static {
    async fn send_text(&self, station_id: &str, frame: String) -> Result<(), TransportError>;
    async fn send_binary(&self, station_id: &str, frame: Vec<u8>) -> Result<(), TransportError>;
}
