use thiserror::Error;

/// None of these is fatal: callers log or surface them and carry on.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid {0}")]
    Validation(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("{0}")]
    State(String),

    #[error("resource unavailable: {0}")]
    Resource(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
