//! Repository error model and retry helpers
//!
//! Domain repositories classify failures so the message router can tell a
//! recoverable duplicate from a reportable missing entity, and retry only
//! what retrying can fix.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use thiserror::Error;

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database connection error
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryExecution(String),

    /// Entity not found
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Conflict (e.g., duplicate natural key)
    #[error("Conflict error: {0}")]
    Conflict(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepositoryError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Connection(_) | RepositoryError::Timeout(_) => true,
            RepositoryError::Database(e) => {
                // Check SQLx error for retryable conditions
                matches!(
                    e,
                    sqlx::Error::PoolTimedOut
                        | sqlx::Error::PoolClosed
                        | sqlx::Error::Io(_)
                        | sqlx::Error::Tls(_)
                )
            },
            _ => false,
        }
    }

    /// Check if this is a conflict error (duplicate natural key)
    pub fn is_conflict(&self) -> bool {
        match self {
            RepositoryError::Conflict(_) => true,
            RepositoryError::Database(e) => {
                // PostgreSQL unique violation error code is 23505
                if let sqlx::Error::Database(db_err) = e {
                    db_err.code().map_or(false, |code| code == "23505")
                } else {
                    false
                }
            },
            _ => false,
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepositoryError::NotFound(_) | RepositoryError::Database(sqlx::Error::RowNotFound)
        )
    }
}

/// Convert repository errors to application errors
impl From<RepositoryError> for crate::error::Error {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => crate::error::Error::NotFound(msg),
            RepositoryError::Timeout(msg) => crate::error::Error::Timeout(msg),
            _ => crate::error::Error::database(err.to_string()),
        }
    }
}

/// Retry configuration for repository operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the initial backoff
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set the maximum backoff
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_backoff_ms),
            max_interval: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }
}

/// Run a repository operation with exponential backoff on retryable errors
///
/// Conflicts and missing entities are permanent; only connection-level
/// failures are retried.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> RepositoryResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = RepositoryResult<T>>,
{
    backoff::future::retry(config.backoff(), || async {
        match operation().await {
            Ok(value) => Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "Retrying database operation");
                Err(backoff::Error::transient(e))
            },
            Err(e) => Err(backoff::Error::permanent(e)),
        }
    })
    .await
}
