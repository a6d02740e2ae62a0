// src/domain/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Market data error: {0}")]
    Data(#[from] DataError),

    #[error("Position store error: {0}")]
    Store(#[from] StoreError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Unknown(s)
    }
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Session expired, re-authentication required")]
    AuthExpired,

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Broker call timed out after {0}ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Order failed: {0}")]
    OrderFailed(String),
}

impl BrokerError {
    /// Whether a retry could plausibly succeed. Rejections and expired
    /// sessions never become valid by waiting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::RateLimited(_) | BrokerError::Timeout(_) | BrokerError::Transport(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("No data available for: {0}")]
    Unavailable(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Stream subscription error: {0}")]
    Subscription(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient data for analysis: {0}")]
    InsufficientData(String),

    #[error("Indicator calculation error: {0}")]
    IndicatorCalculation(String),
}

// Result type aliases for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type BrokerResult<T> = Result<T, BrokerError>;
pub type DataResult<T> = Result<T, DataError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type AnalysisResult<T> = Result<T, AnalysisError>;
