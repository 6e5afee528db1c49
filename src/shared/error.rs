//! Usage: Unified application error model (kind + message, HTTP-mappable).

use std::sync::Arc;

pub type AppResult<T> = Result<T, AppError>;

/// Coarse failure taxonomy. The HTTP layer maps each kind to a status code;
/// the OAuth engine branches on the persistence kinds to label the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    PersistSecrets,
    PersistState,
    Upstream,
    NeedReauth,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn persist_secrets(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PersistSecrets, message)
    }

    pub fn persist_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PersistState, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn need_reauth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NeedReauth, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        let message = value.to_string();
        AppError::with_source(ErrorKind::Internal, message, value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        let message = value.to_string();
        AppError::with_source(ErrorKind::Internal, message, value)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        let message = value.to_string();
        AppError::with_source(ErrorKind::Upstream, message, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shows_message_only() {
        let err = AppError::validation("id is required");
        assert_eq!(err.to_string(), "id is required");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn io_errors_become_internal() {
        let err: AppError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("disk full"));
    }
}
