use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the ad pipeline
#[derive(Error, Debug)]
pub enum AdError {
    #[error("Failed to parse VAST XML: {0}")]
    XmlParseError(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("No network connection")]
    NoInternet,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("No usable ads in response")]
    EmptyResult,

    #[error("Cache entry serialization failed: {0}")]
    CacheCodec(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl AdError {
    /// Whether a failed operation is worth retrying.
    ///
    /// Transport-level failures (timeouts, refused connections, missing
    /// connectivity, non-2xx pixel responses) are transient; malformed XML
    /// and empty ad responses are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdError::IoError(_)
                | AdError::NetworkError(_)
                | AdError::NoInternet
                | AdError::Timeout(_)
                | AdError::HttpStatus(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AdError>;
