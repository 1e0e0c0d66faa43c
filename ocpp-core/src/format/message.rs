use serde_json::Value;

use super::frame::{Call, CallError, CallResult};

const CALL: u64 = 2;
const CALL_RESULT: u64 = 3;
const CALL_ERROR: u64 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Invalid {
    pub message_type: Option<u64>,
    pub unique_id: Option<String>,
    pub message: String,
    pub err_msg: String,
}

impl Invalid {
    /// Whether the broken frame claimed to answer an earlier call. Only such
    /// frames share their unique id with a request sent from this side.
    pub fn is_response(&self) -> bool {
        matches!(self.message_type, Some(CALL_RESULT) | Some(CALL_ERROR))
    }
}

impl std::fmt::Display for Invalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.unique_id {
            Some(id) => write!(f, "{} (unique_id: {})", self.err_msg, id),
            None => write!(f, "{}", self.err_msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallResponse<T> {
    CallResult(CallResult),
    CallError(CallError<T>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OcppMessage<T> {
    Call(Call),
    CallResponse(CallResponse<T>),
    Invalid(Invalid),
}

pub trait EncodeDecode {
    fn encode(&self) -> String;
}

impl<T> CallResponse<T> {
    pub fn unique_id(&self) -> &str {
        match self {
            CallResponse::CallResult(t) => &t.unique_id,
            CallResponse::CallError(t) => &t.unique_id,
        }
    }
}

fn invalid<T>(
    message_type: Option<u64>,
    unique_id: Option<String>,
    message: &str,
    err_msg: impl Into<String>,
) -> OcppMessage<T> {
    OcppMessage::Invalid(Invalid {
        message_type,
        unique_id,
        message: message.to_string(),
        err_msg: err_msg.into(),
    })
}

impl<T: serde::de::DeserializeOwned> OcppMessage<T> {
    /// Splits an OCPP-J text frame into call, call result or call error.
    /// Frames that do not follow the envelope come back as `Invalid`, keeping
    /// the unique id when it could be read so the sender can be answered.
    pub fn decode(message: &str) -> OcppMessage<T> {
        let arr = match serde_json::from_str::<Value>(message) {
            Ok(Value::Array(arr)) => arr,
            Ok(_) => return invalid(None, None, message, "Expected JSON array"),
            Err(e) => return invalid(None, None, message, format!("JSON parse error: {}", e)),
        };

        let message_type = arr.first().and_then(Value::as_u64);
        let unique_id = match arr.get(1).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => return invalid(message_type, None, message, "Missing unique id"),
        };
        let mut fields = arr.into_iter().skip(2);

        match (message_type, fields.len()) {
            (Some(CALL), 2) => match (fields.next(), fields.next()) {
                (Some(Value::String(action)), Some(payload)) => OcppMessage::Call(Call {
                    unique_id,
                    action,
                    payload,
                }),
                _ => invalid(message_type, Some(unique_id), message, "Invalid Call structure"),
            },
            (Some(CALL_RESULT), 1) => match fields.next() {
                Some(payload) => OcppMessage::CallResponse(CallResponse::CallResult(CallResult {
                    unique_id,
                    payload,
                })),
                None => invalid(message_type, Some(unique_id), message, "Invalid CallResult structure"),
            },
            (Some(CALL_ERROR), 3) => {
                let error_code = fields.next().map(serde_json::from_value::<T>);
                match (error_code, fields.next(), fields.next()) {
                    (
                        Some(Ok(error_code)),
                        Some(Value::String(error_description)),
                        Some(error_details),
                    ) => OcppMessage::CallResponse(CallResponse::CallError(CallError {
                        unique_id,
                        error_code,
                        error_description,
                        error_details,
                    })),
                    _ => invalid(message_type, Some(unique_id), message, "Invalid CallError structure"),
                }
            }
            _ => invalid(message_type, Some(unique_id), message, "Unknown or malformed message"),
        }
    }
}

impl EncodeDecode for Call {
    fn encode(&self) -> String {
        Value::Array(vec![
            CALL.into(),
            self.unique_id.clone().into(),
            self.action.clone().into(),
            self.payload.clone(),
        ])
        .to_string()
    }
}

impl EncodeDecode for CallResult {
    fn encode(&self) -> String {
        Value::Array(vec![
            CALL_RESULT.into(),
            self.unique_id.clone().into(),
            self.payload.clone(),
        ])
        .to_string()
    }
}

impl<T: ToString> EncodeDecode for CallError<T> {
    fn encode(&self) -> String {
        Value::Array(vec![
            CALL_ERROR.into(),
            self.unique_id.clone().into(),
            self.error_code.to_string().into(),
            self.error_description.clone().into(),
            self.error_details.clone(),
        ])
        .to_string()
    }
}

impl<T: ToString> EncodeDecode for CallResponse<T> {
    fn encode(&self) -> String {
        match self {
            CallResponse::CallResult(t) => t.encode(),
            CallResponse::CallError(t) => t.encode(),
        }
    }
}
