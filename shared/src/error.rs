use lambda_http::http::StatusCode;

use crate::files::FileStoreError;
use crate::store::StoreError;

/// Coarse classification of every failure a service operation can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Dependency,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("file store failure: {0}")]
    FileStore(#[from] FileStoreError),
    #[error("credential hashing failure: {0}")]
    Credentials(String),
    #[error("response encoding failure: {0}")]
    Encoding(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Authorization(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Authentication(_) => ErrorKind::Authentication,
            AppError::Authorization(_) => ErrorKind::Authorization,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Store(_)
            | AppError::FileStore(_)
            | AppError::Credentials(_)
            | AppError::Encoding(_) => ErrorKind::Dependency,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Dependency => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the caller. Dependency failures are
    /// reported generically; the detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Dependency => "Internal server error.".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
