use serde::{Deserialize, Serialize};

/// Error body returned by the upload endpoint on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
        }
    }

    /// Server message, with the underlying cause appended when present.
    pub fn describe(&self) -> String {
        match &self.error {
            Some(cause) if !cause.is_empty() => format!("{}: {cause}", self.message),
            _ => self.message.clone(),
        }
    }
}
