//! Bridge error types.

/// Errors reported by the Endpoint library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("call rejected ({code}): {message}")]
    Rejected { code: i32, message: String },
}

impl BridgeError {
    pub fn rejected(code: i32, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }
}
