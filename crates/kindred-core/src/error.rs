//! Error types for kindred operations.
//!
//! Every failure the engine can hit maps onto one variant here. Callers that
//! need to decide whether to retry should use [`KindredError::is_retryable`]
//! rather than matching on variants.

use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for kindred operations.
pub type KindredResult<T> = Result<T, KindredError>;

/// Main error type for all kindred operations.
#[derive(Error, Debug)]
pub enum KindredError {
    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        details: HashMap<String, String>,
    },

    /// A referenced record does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String, code: ErrorCode },

    /// The activity repository failed.
    #[error("Repository error: {message}")]
    Repository {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// SQLite operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The generation collaborator failed.
    #[error("Generation error: {message}")]
    Generation {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A bounded call did not finish in time.
    #[error("Timed out after {after_ms}ms: {operation}")]
    Timeout { operation: String, after_ms: u64 },

    /// A write collided with an existing record (for example a second reply).
    #[error("Conflict: {message}")]
    Conflict { message: String, code: ErrorCode },

    /// An operation was requested in a scheduler state that does not allow it.
    #[error("Operation '{operation}' not allowed while scheduler is {state}")]
    InvalidState { operation: String, state: String },

    /// The background job scheduler failed.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,
    ValMissingField,

    // Lookup (NF_xxx)
    NfUser,
    NfEntry,

    // Repository (REPO_xxx)
    RepoUnavailable,
    RepoOperationFailed,

    // Database (DB_xxx)
    DbOperationFailed,

    // Generation (GEN_xxx)
    GenFailed,
    GenEmptyResponse,

    // Network (NET_xxx)
    NetTimeout,

    // Conflict (CONF_xxx)
    ConfDuplicateReply,

    // State (STATE_xxx)
    StateInvalid,

    // Configuration (CFG_xxx)
    CfgInvalid,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValMissingField => "VAL_002",
            ErrorCode::NfUser => "NF_001",
            ErrorCode::NfEntry => "NF_002",
            ErrorCode::RepoUnavailable => "REPO_001",
            ErrorCode::RepoOperationFailed => "REPO_002",
            ErrorCode::DbOperationFailed => "DB_001",
            ErrorCode::GenFailed => "GEN_001",
            ErrorCode::GenEmptyResponse => "GEN_002",
            ErrorCode::NetTimeout => "NET_001",
            ErrorCode::ConfDuplicateReply => "CONF_001",
            ErrorCode::StateInvalid => "STATE_001",
            ErrorCode::CfgInvalid => "CFG_001",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl KindredError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            details: HashMap::new(),
        }
    }

    /// Create a validation error for a missing field.
    pub fn missing_field(field: impl Into<String>) -> Self {
        let field = field.into();
        let mut details = HashMap::new();
        details.insert("field".to_string(), field.clone());
        Self::Validation {
            message: format!("Missing required field '{}'", field),
            code: ErrorCode::ValMissingField,
            details,
        }
    }

    /// Create a not found error for a user.
    pub fn user_not_found(user_id: impl AsRef<str>) -> Self {
        Self::NotFound {
            message: format!("User '{}' not found", user_id.as_ref()),
            code: ErrorCode::NfUser,
        }
    }

    /// Create a not found error for a journal entry.
    pub fn entry_not_found(entry_id: impl AsRef<str>) -> Self {
        Self::NotFound {
            message: format!("Journal entry '{}' not found", entry_id.as_ref()),
            code: ErrorCode::NfEntry,
        }
    }

    /// Create a repository error.
    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository {
            message: message.into(),
            code: ErrorCode::RepoOperationFailed,
            source: None,
        }
    }

    /// Create a repository-unavailable error.
    pub fn repository_unavailable(message: impl Into<String>) -> Self {
        Self::Repository {
            message: message.into(),
            code: ErrorCode::RepoUnavailable,
            source: None,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create a generation error.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            code: ErrorCode::GenFailed,
            source: None,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    /// Create a duplicate reply conflict.
    pub fn duplicate_reply(entry_id: impl AsRef<str>) -> Self {
        Self::Conflict {
            message: format!("A reply already exists for entry '{}'", entry_id.as_ref()),
            code: ErrorCode::ConfDuplicateReply,
        }
    }

    /// Create an invalid scheduler state error.
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } => *code,
            Self::NotFound { code, .. } => *code,
            Self::Repository { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::Generation { code, .. } => *code,
            Self::Conflict { code, .. } => *code,
            Self::Timeout { .. } => ErrorCode::NetTimeout,
            Self::InvalidState { .. } => ErrorCode::StateInvalid,
            Self::Configuration(_) => ErrorCode::CfgInvalid,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether the failure is transient and the work should be tried again
    /// on a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Repository { .. }
                | Self::Database { .. }
                | Self::Generation { .. }
                | Self::Timeout { .. }
                | Self::Io(_)
        )
    }

    /// Whether this is the duplicate-reply conflict raised by a repository.
    pub fn is_duplicate_reply(&self) -> bool {
        matches!(
            self,
            Self::Conflict {
                code: ErrorCode::ConfDuplicateReply,
                ..
            }
        )
    }
}

impl From<rusqlite::Error> for KindredError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for KindredError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}
