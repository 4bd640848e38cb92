use thiserror::Error;

/// Main error type for the trading service
#[derive(Error, Debug)]
pub enum ScoopError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Contention-class rejection from the brokerage (HTTP 403/429),
    /// typically two processes racing on token issuance.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structured failure from the brokerage response envelope.
    #[error("Brokerage API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Invalid quote: {0}")]
    InvalidQuote(String),

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A queued brokerage call did not complete within the wait bound.
    #[error("Queued call timed out: {key}")]
    QueueTimeout { key: String },

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ScoopError {
    /// Whether this error is the contention class worth retrying
    /// during token issuance.
    pub fn is_contention(&self) -> bool {
        matches!(self, ScoopError::RateLimited(_))
    }
}

/// Result type alias for ScoopError
pub type Result<T> = std::result::Result<T, ScoopError>;
