//! Error types for the telemetry pipeline

use thiserror::Error;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Admission rejected by the rate limiter
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    /// Broadcast scope error
    #[error("Channel scope error: {0}")]
    Scope(#[from] ScopeError),

    /// Delivery to a single connection failed
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Rejection returned when an identifier has used up its window.
///
/// This is the only error that crosses the pipeline boundary. It carries no
/// internal detail and is safe to show to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RateLimitExceeded {
    /// Stable machine-readable code, always `rate_limit`
    pub code: &'static str,

    /// Human-readable rejection message
    pub message: String,

    /// Seconds until the window allows another request
    pub retry_after_secs: u64,
}

impl RateLimitExceeded {
    /// Machine-readable code carried by every rejection
    pub const CODE: &'static str = "rate_limit";

    /// Create a rejection for the given window
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            code: Self::CODE,
            message: format!(
                "Too many requests: limit of {} per {}s reached, retry later",
                limit, window_secs
            ),
            retry_after_secs: window_secs,
        }
    }
}

/// Shared rate-limit store errors
///
/// Internal to the rate limiter: every variant results in a local fallback.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store could not be reached
    #[error("Shared store unavailable: {0}")]
    Unavailable(String),

    /// Store did not answer within the I/O timeout
    #[error("Shared store timed out after {0}ms")]
    Timeout(u64),

    /// Store answered with something unexpected
    #[error("Shared store protocol error: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
            StoreError::Unavailable(e.to_string())
        } else if e.is_timeout() {
            StoreError::Timeout(0)
        } else {
            StoreError::Protocol(e.to_string())
        }
    }
}

/// Per-connection delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Peer has gone away
    #[error("Connection closed")]
    Closed,

    /// Outbound buffer stayed full for the whole send timeout
    #[error("Send timed out after {0}ms")]
    Timeout(u64),
}

/// Alert sink delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Sink can no longer accept events
    #[error("Alert sink closed")]
    Closed,

    /// Sink rejected or failed to store the event
    #[error("Alert delivery failed: {0}")]
    Failed(String),
}

/// Broadcast scope errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// A tenant-scoped broadcast was attempted without a tenant id
    #[error("Tenant-scoped broadcast on channel '{0}' requires a tenant id")]
    MissingTenant(&'static str),

    /// A tenant id was supplied on a channel that has no tenant index
    #[error("Channel '{0}' is not tenant-scoped")]
    NotTenantScoped(&'static str),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
