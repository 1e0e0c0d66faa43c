#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Call {
    pub unique_id: String,
    pub action: String,
    pub payload: serde_json::Value,
}

impl Call {
    pub fn new<T: serde::Serialize>(
        unique_id: impl Into<String>,
        action: impl Into<String>,
        payload: T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            unique_id: unique_id.into(),
            action: action.into(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct CallResult {
    pub unique_id: String,
    pub payload: serde_json::Value,
}

impl CallResult {
    pub fn new<T: serde::Serialize>(unique_id: String, payload: T) -> Self {
        Self {
            unique_id,
            payload: serde_json::json!(payload),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct CallError<T> {
    pub unique_id: String,
    pub error_code: T,
    pub error_description: String,
    pub error_details: serde_json::Value,
}

impl<T> CallError<T> {
    pub fn new(unique_id: String, error_code: T) -> Self {
        Self {
            unique_id,
            error_code,
            error_description: String::new(),
            error_details: serde_json::json!({}),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = description.into();
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error_details = details;
        self
    }
}
