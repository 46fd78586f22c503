use std::path::PathBuf;
use std::time::Duration;

/// The display the selected rendition will be shown on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        // 1080p leanback panel
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Current network transport, used to derive the bandwidth budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTransport {
    Wifi,
    Other,
}

impl NetworkTransport {
    /// Bandwidth budget for ad renditions on this transport.
    pub fn max_bitrate_kbps(self) -> u32 {
        match self {
            NetworkTransport::Wifi => 8000,
            NetworkTransport::Other => 2000,
        }
    }
}

/// Configuration for the media selector.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Accepted MIME types, most preferred first
    pub preferred_mime_types: Vec<String>,
    pub display: DisplayConfig,
    pub max_bitrate_kbps: u32,
}

impl SelectorConfig {
    pub fn for_transport(transport: NetworkTransport) -> Self {
        Self {
            max_bitrate_kbps: transport.max_bitrate_kbps(),
            ..Self::default()
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            preferred_mime_types: vec![
                "video/mp4".to_string(),
                "video/webm".to_string(),
                "application/x-mpegURL".to_string(),
            ],
            display: DisplayConfig::default(),
            max_bitrate_kbps: NetworkTransport::Wifi.max_bitrate_kbps(),
        }
    }
}

/// Retry and concurrency knobs shared by the tracker and tracking manager.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// HTTP attempts per pixel before giving up
    pub retry_attempts: u32,
    /// Base delay for backoff between attempts
    pub retry_delay: Duration,
    /// Maximum simultaneous tracking dispatches
    pub max_concurrent: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            max_concurrent: 5,
        }
    }
}

/// Configuration for the ad cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a cached parse result stays valid
    pub expiration: Duration,
    /// Directory for persisted entries; `None` keeps the cache memory-only
    pub dir: Option<PathBuf>,
    /// Total on-disk budget in bytes; `None` means unbounded
    pub max_size_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(24 * 60 * 60),
            dir: None,
            max_size_bytes: None,
        }
    }
}

/// Top-level configuration for one ad pipeline instance.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub selector: SelectorConfig,
    pub tracking: TrackingConfig,
    pub cache: CacheConfig,
}
