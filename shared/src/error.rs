use thiserror::Error;

/// Typed failure of a manage action. Each kind maps to exactly one HTTP status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManageError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InternalServerError(String),
}

impl ManageError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ManageError::Unauthorized(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ManageError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ManageError::NotFound(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ManageError::InternalServerError(message.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ManageError::Unauthorized(_) => 401,
            ManageError::BadRequest(_) => 400,
            ManageError::NotFound(_) => 404,
            ManageError::InternalServerError(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ManageError::Unauthorized(_) => "Unauthorized",
            ManageError::BadRequest(_) => "BadRequest",
            ManageError::NotFound(_) => "NotFound",
            ManageError::InternalServerError(_) => "InternalServerError",
        }
    }

    /// Client-safe message
    pub fn message(&self) -> &str {
        match self {
            ManageError::Unauthorized(msg)
            | ManageError::BadRequest(msg)
            | ManageError::NotFound(msg)
            | ManageError::InternalServerError(msg) => msg,
        }
    }
}
