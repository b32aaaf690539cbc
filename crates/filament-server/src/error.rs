//! Error types for the HTTP front-end.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use filament_core::BackendError;
use serde::Serialize;
use tracing::warn;

/// Application-level errors. Bodies never carry backend details.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error("Authentication required")]
    Unauthorized { realm: String },

    #[error("Session not found")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("Invalid path")]
    InvalidPath,

    #[error("Not a directory")]
    NotADirectory,

    #[error("Archive format not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Storage error")]
    Storage(#[source] BackendError),

    #[error("Internal error")]
    Internal(String),
}

impl From<BackendError> for FrontendError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(_) => FrontendError::NotFound,
            BackendError::InvalidPath(_) => FrontendError::InvalidPath,
            other => FrontendError::Storage(other),
        }
    }
}

impl IntoResponse for FrontendError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            code: &'static str,
        }

        let (status, code) = match &self {
            FrontendError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            FrontendError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            FrontendError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            FrontendError::InvalidPath => (StatusCode::BAD_REQUEST, "INVALID_PATH"),
            FrontendError::NotADirectory => (StatusCode::CONFLICT, "NOT_A_DIRECTORY"),
            FrontendError::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "NOT_IMPLEMENTED"),
            FrontendError::Storage(e) => {
                warn!("Storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
            }
            FrontendError::Internal(e) => {
                warn!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = ErrorBody {
            error: self.to_string(),
            code,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let FrontendError::Unauthorized { realm } = &self {
            let challenge = format!("Basic realm=\"{}\"", realm.replace('"', "\\\""));
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, FrontendError>;
