//! GitOps-specific error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;

/// Error categories surfaced to callers of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    ValidationError,
    UnsupportedKindError,
    ConflictError,
    TransientNetworkError,
    ConfigurationError,
    LockContentionError,
    NotFound,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ParseError => "parse_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::UnsupportedKindError => "unsupported_kind_error",
            ErrorKind::ConflictError => "conflict_error",
            ErrorKind::TransientNetworkError => "transient_network_error",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::LockContentionError => "lock_contention_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during GitOps operations.
#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("Failed to parse YAML in '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to serialize YAML: {0}")]
    Serialize(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported resource kind: {0}")]
    UnsupportedKind(String),

    #[error("Conflict on '{path}': {message}")]
    Conflict { path: String, message: String },

    #[error("Git host network error: {0}")]
    TransientNetwork(String),

    #[error("Git host request timed out after {0}s")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Fabric '{0}' is busy: another sync or ingestion holds the lock")]
    LockContention(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Git host authentication failed: {0}")]
    Auth(String),

    #[error("Git host returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Cluster API error: {0}")]
    Cluster(String),

    #[error("File operation failed on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Record store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),
}

impl From<serde_yaml::Error> for GitOpsError {
    fn from(err: serde_yaml::Error) -> Self {
        GitOpsError::Parse {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl GitOpsError {
    /// Builds an I/O error bound to the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GitOpsError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GitOpsError::TransientNetwork(_) | GitOpsError::Timeout(_)
        )
    }

    /// Maps the error onto its caller-facing category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitOpsError::Parse { .. } | GitOpsError::Serialize(_) => ErrorKind::ParseError,
            GitOpsError::Validation(_) | GitOpsError::PathTraversal(_) => {
                ErrorKind::ValidationError
            }
            GitOpsError::UnsupportedKind(_) => ErrorKind::UnsupportedKindError,
            GitOpsError::Conflict { .. } | GitOpsError::AlreadyExists(_) => {
                ErrorKind::ConflictError
            }
            GitOpsError::TransientNetwork(_) | GitOpsError::Timeout(_) => {
                ErrorKind::TransientNetworkError
            }
            GitOpsError::Configuration(_) | GitOpsError::Auth(_) => ErrorKind::ConfigurationError,
            GitOpsError::LockContention(_) => ErrorKind::LockContentionError,
            GitOpsError::NotFound(_) => ErrorKind::NotFound,
            GitOpsError::Http { .. }
            | GitOpsError::Cluster(_)
            | GitOpsError::Io { .. }
            | GitOpsError::Database(_) => ErrorKind::Internal,
        }
    }
}

/// Classifies an HTTP status from the git host into an error variant.
///
/// 5xx and 429 are transient; 401/403 are auth failures; 404 is not-found;
/// 409/412/422 are optimistic-concurrency conflicts.
pub fn classify_http_status(status: u16, path: &str, body: &str) -> GitOpsError {
    let message = truncate_body(body);
    match status {
        401 | 403 => GitOpsError::Auth(message),
        404 => GitOpsError::NotFound(path.to_string()),
        409 | 412 | 422 => GitOpsError::Conflict {
            path: path.to_string(),
            message,
        },
        429 | 500..=599 => GitOpsError::TransientNetwork(format!("HTTP {}: {}", status, message)),
        _ => GitOpsError::Http { status, message },
    }
}

/// Maximum length for error bodies kept in messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}

/// Result type for GitOps operations.
pub type Result<T> = std::result::Result<T, GitOpsError>;
