use thiserror::Error;

/// Errors produced by backends and by the backend registry.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("invalid backend configuration: {0}")]
    Config(String),

    #[error("backend is not connected")]
    NotConnected,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Wire-level failure talking to the remote side.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("backend {0} registered more than once")]
    DuplicateBackend(String),
}

impl BackendError {
    /// Whether this is the distinguished "unsupported operation" signal.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, BackendError::Unsupported(_))
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => BackendError::NotFound(err.to_string()),
            _ => BackendError::Io(err.to_string()),
        }
    }
}
