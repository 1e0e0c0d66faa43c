/// Error codes a station may put in a `CallError` frame.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolError {
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
    NotImplemented,
    NotSupported,
}

impl ProtocolError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolError::InternalError => "InternalError",
            ProtocolError::ProtocolError => "ProtocolError",
            ProtocolError::SecurityError => "SecurityError",
            ProtocolError::FormationViolation => "FormationViolation",
            ProtocolError::PropertyConstraintViolation => "PropertyConstraintViolation",
            ProtocolError::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ProtocolError::TypeConstraintViolation => "TypeConstraintViolation",
            ProtocolError::GenericError => "GenericError",
            ProtocolError::NotImplemented => "NotImplemented",
            ProtocolError::NotSupported => "NotSupported",
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProtocolError {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown protocol error code: {s}"))
    }
}
