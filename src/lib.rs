pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod net;
pub mod parser;
pub mod pipeline;
pub mod playback;
pub mod selector;
pub mod sequence;
pub mod tracker;
pub mod tracking;

pub use cache::AdCache;
pub use config::{CacheConfig, DisplayConfig, NetworkTransport, PipelineConfig, SelectorConfig, TrackingConfig};
pub use diagnostics::{ErrorEntry, ErrorLog, ErrorStats};
pub use error::{AdError, Result};
pub use model::{Ad, MediaFile};
pub use net::{AlwaysOnline, Connectivity, HttpFetch, ReqwestFetcher};
pub use parser::VastParser;
pub use pipeline::AdPipeline;
pub use playback::{PlaybackOrchestrator, PlaybackState, PlayerEngine, PlayerError, PlayerEvent, PrepareOptions};
pub use selector::MediaSelector;
pub use sequence::AdSequenceManager;
pub use tracker::EventTracker;
pub use tracking::TrackingManager;
