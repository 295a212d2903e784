use thiserror::Error;

/// Application-wide error types for Sift.
#[derive(Error, Debug)]
pub enum AppError {
    /// Connection-level failure talking to a page or service.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The target answered 403/503, which is how anti-bot layers refuse us.
    #[error("Blocked by anti-bot protection (HTTP {status})")]
    AntiBotBlock { status: u16 },

    /// The page loaded but has no `<body>` to read.
    #[error("Body not found")]
    BodyMissing,

    /// Browser automation failed (launch, tab, CDP command).
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// Every scrape attempt was used up.
    #[error("Scraping failed after {attempts} attempts: {last_error}")]
    ScrapeExhausted { attempts: u32, last_error: String },

    /// The extraction service answered with a server fault.
    #[error("Extraction service fault (HTTP {status_code}): {message}")]
    ExtractionRemoteFault { status_code: u16, message: String },

    /// The extraction service refused the request; retrying will not help.
    #[error("Extraction service rejected request (HTTP {status_code}): {message}")]
    ExtractionRejected { status_code: u16, message: String },

    /// HTML cleanup failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    /// Extracted fields do not satisfy the product schema.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A unique key collided in the product store.
    #[error("Unique constraint violation")]
    UniqueViolation,

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Operation timed out.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Message broker operation failed.
    #[error("Broker error: {0}")]
    BrokerError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkError(_)
                | AppError::AntiBotBlock { .. }
                | AppError::BodyMissing
                | AppError::BrowserError(_)
                | AppError::Timeout(_)
                | AppError::ExtractionRemoteFault { .. }
        )
    }
}
