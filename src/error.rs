//! Error types for SQLSight

use thiserror::Error;

/// Result type alias using SQLSight's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SQLSight
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM API error
    #[error("LLM API error: {0}")]
    Llm(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Saga state store error
    #[error("State store error: {0}")]
    StateStore(String),

    /// Message bus error
    #[error("Bus error: {0}")]
    Bus(String),

    /// No healthy tool server registered for a role
    #[error("No live tool for role '{0}'")]
    NoLiveTool(String),

    /// The generated statement failed the read-only safety gate
    #[error("UnsafeStatement: {0}")]
    UnsafeStatement(String),

    /// Stage 1 finished without producing a SQL statement
    #[error("SqlNotProduced: the model did not emit a SQL statement")]
    SqlNotProduced,

    /// SQL execution failed against the tenant database
    #[error("ExecutionFailed: {0}")]
    ExecutionFailed(String),

    /// The tool loop hit its iteration bound
    #[error("IterationBudgetExceeded: loop stopped after {0} iterations")]
    IterationBudgetExceeded(u32),

    /// The tool loop exceeded its wall-clock budget
    #[error("LoopTimeout: loop exceeded its wall-clock budget")]
    LoopTimeout,

    /// The saga exceeded its overall deadline
    #[error("SagaDeadline: saga exceeded its deadline")]
    SagaDeadline,

    /// The tenant knowledge-base collection is empty
    #[error("NoContextAvailable: the knowledge base has no content for this tenant")]
    NoContextAvailable,

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is transient and worth a redelivery or a new tool pick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::StateStore(_)
                | Error::Bus(_)
                | Error::NoLiveTool(_)
                | Error::RateLimit(_)
                | Error::Timeout(_)
                | Error::Database(_)
        )
    }

    /// Check if error is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::Unauthorized(_)
        )
    }

    /// Short machine-readable name used as the saga's `error_message` prefix
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnsafeStatement(_) => "UnsafeStatement",
            Error::SqlNotProduced => "SqlNotProduced",
            Error::ExecutionFailed(_) => "ExecutionFailed",
            Error::IterationBudgetExceeded(_) => "IterationBudgetExceeded",
            Error::LoopTimeout => "LoopTimeout",
            Error::NoLiveTool(_) => "NoLiveTool",
            Error::SagaDeadline => "SagaDeadline",
            Error::NoContextAvailable => "NoContextAvailable",
            Error::StateStore(_) => "StateStoreUnavailable",
            Error::Bus(_) => "BusUnavailable",
            _ => "Internal",
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::NoLiveTool("database".into()).is_retryable());
        assert!(Error::Bus("publish failed".into()).is_retryable());
        assert!(!Error::SqlNotProduced.is_retryable());
        assert!(!Error::UnsafeStatement("DELETE".into()).is_retryable());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::SqlNotProduced.kind(), "SqlNotProduced");
        assert_eq!(Error::LoopTimeout.kind(), "LoopTimeout");
        assert_eq!(Error::SagaDeadline.kind(), "SagaDeadline");
        assert_eq!(Error::Internal("x".into()).kind(), "Internal");
    }
}
