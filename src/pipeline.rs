use crate::cache::AdCache;
use crate::config::PipelineConfig;
use crate::diagnostics::ErrorLog;
use crate::error::Result;
use crate::net::{AlwaysOnline, Connectivity, HttpFetch, ReqwestFetcher};
use crate::parser::VastParser;
use crate::playback::{PlaybackOrchestrator, PlayerEngine};
use crate::selector::MediaSelector;
use crate::sequence::AdSequenceManager;
use crate::tracker::EventTracker;
use crate::tracking::TrackingManager;
use std::sync::Arc;

/// Composition root for one ad pipeline instance.
///
/// Constructs every component once and passes references explicitly; there
/// is no global state anywhere in the crate.
pub struct AdPipeline {
    pub errors: Arc<ErrorLog>,
    pub cache: Arc<AdCache>,
    pub parser: Arc<VastParser>,
    pub selector: Arc<MediaSelector>,
    pub tracker: Arc<EventTracker>,
    pub tracking: Arc<TrackingManager>,
    pub sequence: Arc<AdSequenceManager>,
}

impl AdPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_collaborators(config, Arc::new(ReqwestFetcher::new()?), Arc::new(AlwaysOnline))
    }

    /// Builds the pipeline around injected fetch and connectivity
    /// collaborators.
    pub fn with_collaborators(
        config: PipelineConfig,
        fetcher: Arc<dyn HttpFetch>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self> {
        let errors = Arc::new(ErrorLog::new());
        let cache = Arc::new(AdCache::new(config.cache.clone()));
        let parser = Arc::new(VastParser::new(
            fetcher,
            Arc::clone(&cache),
            Arc::clone(&errors),
        ));
        let selector = Arc::new(MediaSelector::new(config.selector.clone()));
        let tracker = Arc::new(EventTracker::new(
            connectivity,
            Arc::clone(&errors),
            &config.tracking,
        )?);
        let tracking = Arc::new(TrackingManager::new(
            Arc::clone(&tracker),
            Arc::clone(&cache),
            Arc::clone(&errors),
            &config.tracking,
        ));
        let sequence = Arc::new(AdSequenceManager::new(
            Arc::clone(&parser),
            Arc::clone(&selector),
            Arc::clone(&tracking),
        ));

        Ok(Self {
            errors,
            cache,
            parser,
            selector,
            tracker,
            tracking,
            sequence,
        })
    }

    /// Builds a playback orchestrator over the given engine, sharing this
    /// pipeline's tracking manager.
    pub fn orchestrator(&self, engine: Arc<dyn PlayerEngine>) -> PlaybackOrchestrator {
        PlaybackOrchestrator::new(engine, Arc::clone(&self.tracking))
    }
}
