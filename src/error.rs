use thiserror::Error;

/// Caller-facing error taxonomy for the engine operations.
///
/// Transport and per-message parse failures never surface here: the stream
/// connector records them in its health state and keeps retrying. Everything
/// an operation can return to its caller falls into one of these buckets, so
/// an HTTP layer can map them onto status codes without inspecting strings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Caller-supplied parameters are missing or invalid. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// The referenced order/position id does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The entity exists but is not in a state that permits the operation,
    /// e.g. canceling a filled order or closing a closed position.
    #[error("{0}")]
    StateConflict(String),

    /// Not enough buffered history for the requested window/lookback/horizon.
    #[error("{0}")]
    InsufficientData(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::StateConflict(msg.into())
    }

    pub fn insufficient(msg: impl Into<String>) -> Self {
        CoreError::InsufficientData(msg.into())
    }
}
