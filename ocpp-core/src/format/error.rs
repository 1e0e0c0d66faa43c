/// Failures that never travel over the wire as a `CallError` but are raised
/// locally by whoever is waiting for a reply.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenericError {
    Timeout,
    ConnectionLost,
    General,
    ParsingError,
}

impl std::fmt::Display for GenericError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GenericError::Timeout => "Timeout",
            GenericError::ConnectionLost => "ConnectionLost",
            GenericError::General => "General",
            GenericError::ParsingError => "ParsingError",
        };
        write!(f, "{s}")
    }
}

/// Error code of a failed call: either the code carried by a `CallError`
/// frame or one produced locally.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub enum OcppError<T> {
    Protocol(T),
    Other(GenericError),
}

impl<T> OcppError<T> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, OcppError::Other(GenericError::Timeout))
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, OcppError::Other(GenericError::ConnectionLost))
    }
}

impl<T> From<GenericError> for OcppError<T> {
    fn from(value: GenericError) -> Self {
        OcppError::Other(value)
    }
}

impl<T: std::fmt::Display> std::fmt::Display for OcppError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcppError::Protocol(t) => write!(f, "{t}"),
            OcppError::Other(t) => write!(f, "{t}"),
        }
    }
}
