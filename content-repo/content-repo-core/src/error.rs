use crate::path::Path;

/// Errors surfaced by repository operations.
///
/// Everything except `Internal` is an expected, caller-facing condition.
/// `Internal` wraps collaborator failures and broken invariants and should
/// be treated as a bug signal.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("resource not found: {0}")]
    NotFound(Path),
    #[error("authentication required")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("repository is read-only")]
    ReadOnly,
    #[error("resource is locked: {0}")]
    Locked(Path),
    #[error("resource already exists: {0}")]
    Overwrite(Path),
    #[error("illegal operation: {0}")]
    IllegalOperation(String),
    #[error("failed dependency: {0}")]
    FailedDependency(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn illegal(msg: impl Into<String>) -> Self {
        RepositoryError::IllegalOperation(msg.into())
    }

    /// Whether the error is an authorization outcome rather than a
    /// structural or internal failure.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            RepositoryError::Unauthenticated
                | RepositoryError::Forbidden
                | RepositoryError::ReadOnly
        )
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Internal(err.into())
    }
}

pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;
