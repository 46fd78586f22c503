use crate::model::{
    Ad, EVENT_COMPLETE, EVENT_FIRST_QUARTILE, EVENT_MIDPOINT, EVENT_START, EVENT_THIRD_QUARTILE,
};
use crate::tracking::TrackingManager;
use log::{debug, error, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Poll interval for playback progress and quartile detection.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Poll interval while waiting for an in-flight release to finish.
const RELEASE_POLL: Duration = Duration::from_millis(100);

/// The external video-player engine driven by the orchestrator.
///
/// Decode and render are out of scope; the engine only exposes the control
/// surface and playhead. State changes and errors flow back in through
/// [`PlaybackOrchestrator::handle_event`].
pub trait PlayerEngine: Send + Sync {
    fn set_media(&self, url: &str);
    fn prepare(&self);
    fn play(&self);
    fn stop(&self);
    fn clear_media(&self);
    fn seek_to_default_position(&self);
    fn release(&self);
    fn position_ms(&self) -> u64;
    fn duration_ms(&self) -> u64;
}

/// Engine error classification, mirroring the recoverable cases the
/// orchestrator knows how to handle in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    NetworkConnectionFailed,
    NetworkTimeout,
    BehindLiveWindow,
    Other(String),
}

/// Inbound player-engine events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Ready,
    Ended,
    Error(PlayerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Preparing,
    Ready,
    Playing,
    Ended,
    Error,
}

/// What to play and how it sits in the ad pod.
#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    pub ad: Option<Ad>,
    pub ad_number: u32,
    pub total_ads: u32,
    pub part_of_sequence: bool,
}

struct PlaybackContext {
    url: String,
    ad: Option<Ad>,
    ad_number: u32,
    total_ads: u32,
    part_of_sequence: bool,
}

type ProgressFn = Box<dyn Fn(u64, u64, u32, u32) + Send + Sync>;
type ReadyFn = Box<dyn Fn(bool) + Send + Sync>;
type EndedFn = Box<dyn Fn() + Send + Sync>;

/// Drives the player engine through prepare/ready/progress/ended/error for
/// each ad, wiring state transitions to tracking calls.
///
/// Lifecycle events fire at most once per ad id: guard sets are keyed by ad
/// id (never by playback attempt), survive duplicate engine callbacks and
/// error-triggered re-prepares, and are cleared on completion or release.
pub struct PlaybackOrchestrator {
    engine: Arc<dyn PlayerEngine>,
    tracking: Arc<TrackingManager>,
    state: Mutex<PlaybackState>,
    current: Mutex<Option<PlaybackContext>>,
    tracked: Mutex<HashMap<String, HashSet<String>>>,
    progress_task: Mutex<Option<JoinHandle<()>>>,
    releasing: AtomicBool,
    progress_interval: Duration,
    progress_cb: Mutex<Option<ProgressFn>>,
    ready_cb: Mutex<Option<ReadyFn>>,
    ended_cb: Mutex<Option<EndedFn>>,
}

impl PlaybackOrchestrator {
    pub fn new(engine: Arc<dyn PlayerEngine>, tracking: Arc<TrackingManager>) -> Self {
        Self {
            engine,
            tracking,
            state: Mutex::new(PlaybackState::Idle),
            current: Mutex::new(None),
            tracked: Mutex::new(HashMap::new()),
            progress_task: Mutex::new(None),
            releasing: AtomicBool::new(false),
            progress_interval: PROGRESS_INTERVAL,
            progress_cb: Mutex::new(None),
            ready_cb: Mutex::new(None),
            ended_cb: Mutex::new(None),
        }
    }

    /// Overrides the progress/quartile poll interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn set_progress_callback(&self, cb: ProgressFn) {
        *self.progress_cb.lock().unwrap() = Some(cb);
    }

    pub fn set_ready_callback(&self, cb: ReadyFn) {
        *self.ready_cb.lock().unwrap() = Some(cb);
    }

    pub fn set_ended_callback(&self, cb: EndedFn) {
        *self.ended_cb.lock().unwrap() = Some(cb);
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock().unwrap()
    }

    /// Configures the engine with new media and starts preparation.
    ///
    /// If a release is in flight, waits for it to finish rather than racing
    /// it.
    pub async fn prepare(&self, url: &str, opts: PrepareOptions) {
        while self.releasing.load(Ordering::Acquire) {
            tokio::time::sleep(RELEASE_POLL).await;
        }

        debug!(
            "Preparing playback - ad {}/{}, part_of_sequence: {}",
            opts.ad_number, opts.total_ads, opts.part_of_sequence
        );
        self.stop_progress();

        *self.current.lock().unwrap() = Some(PlaybackContext {
            url: url.to_string(),
            ad: opts.ad,
            ad_number: opts.ad_number,
            total_ads: opts.total_ads,
            part_of_sequence: opts.part_of_sequence,
        });
        *self.state.lock().unwrap() = PlaybackState::Preparing;

        self.engine.stop();
        self.engine.clear_media();
        self.engine.set_media(url);
        self.engine.prepare();
    }

    /// Feeds one engine event into the state machine.
    pub fn handle_event(self: &Arc<Self>, event: PlayerEvent) {
        match event {
            PlayerEvent::Ready => self.on_ready(),
            PlayerEvent::Ended => self.on_ended(),
            PlayerEvent::Error(e) => self.on_error(e),
        }
    }

    fn on_ready(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            // Engines re-emit ready states; only act on the first
            if *state != PlaybackState::Preparing {
                return;
            }
            *state = PlaybackState::Ready;
        }

        debug!("Video ready to play");
        self.engine.play();
        *self.state.lock().unwrap() = PlaybackState::Playing;

        if let Some(ad) = self.current_ad() {
            if self.mark_tracked(&ad.id, EVENT_START) {
                self.tracking.start_tracking(&ad);
            }
        }
        self.start_progress();

        if let Some(cb) = self.ready_cb.lock().unwrap().as_ref() {
            cb(true);
        }
    }

    fn on_ended(self: &Arc<Self>) {
        *self.state.lock().unwrap() = PlaybackState::Ended;
        debug!("Video playback ended");
        self.stop_progress();

        let part_of_sequence = self
            .current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|c| c.part_of_sequence);

        if let Some(ad) = self.current_ad() {
            if self.mark_tracked(&ad.id, EVENT_COMPLETE) {
                self.tracking.track_event(&ad, EVENT_COMPLETE);
            }
            self.clear_tracked_events(&ad.id);
            // The ad is done; a later release must not cancel its completion
            if let Some(context) = self.current.lock().unwrap().as_mut() {
                context.ad = None;
            }
        }

        if let Some(cb) = self.ended_cb.lock().unwrap().as_ref() {
            cb();
        }

        // Between pod entries the engine is reused; otherwise give it back
        if !part_of_sequence {
            self.release();
        }
    }

    fn on_error(self: &Arc<Self>, player_error: PlayerError) {
        error!("Player error: {player_error:?}");
        *self.state.lock().unwrap() = PlaybackState::Error;
        self.stop_progress();

        if let Some(cb) = self.ready_cb.lock().unwrap().as_ref() {
            cb(false);
        }

        match player_error {
            PlayerError::NetworkConnectionFailed | PlayerError::NetworkTimeout => {
                self.engine.prepare();
            }
            PlayerError::BehindLiveWindow => {
                self.engine.seek_to_default_position();
                self.engine.prepare();
            }
            PlayerError::Other(reason) => {
                warn!("Unrecoverable player error, full reset: {reason}");
                self.engine.stop();
                self.engine.clear_media();
                if let Some(url) = self
                    .current
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|c| c.url.clone())
                {
                    self.engine.set_media(&url);
                }
                self.engine.prepare();
            }
        }
        *self.state.lock().unwrap() = PlaybackState::Preparing;
    }

    fn start_progress(self: &Arc<Self>) {
        self.stop_progress();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.progress_interval).await;

                let duration = this.engine.duration_ms();
                let position = this.engine.position_ms().min(duration);

                let (ad, ad_number, total_ads) = {
                    let current = this.current.lock().unwrap();
                    match current.as_ref() {
                        Some(c) => (c.ad.clone(), c.ad_number, c.total_ads),
                        None => break,
                    }
                };

                if let Some(cb) = this.progress_cb.lock().unwrap().as_ref() {
                    cb(position, duration, ad_number, total_ads);
                }

                if let Some(ad) = ad {
                    if duration > 0 {
                        let percentage = position * 100 / duration;
                        this.fire_quartiles(&ad, percentage);
                    }
                }
            }
        });
        *self.progress_task.lock().unwrap() = Some(task);
    }

    fn fire_quartiles(&self, ad: &Ad, percentage: u64) {
        if percentage >= 25 && self.mark_tracked(&ad.id, EVENT_FIRST_QUARTILE) {
            self.tracking.track_quartile(ad, EVENT_FIRST_QUARTILE);
        }
        if percentage >= 50 && self.mark_tracked(&ad.id, EVENT_MIDPOINT) {
            self.tracking.track_quartile(ad, EVENT_MIDPOINT);
        }
        if percentage >= 75 && self.mark_tracked(&ad.id, EVENT_THIRD_QUARTILE) {
            self.tracking.track_quartile(ad, EVENT_THIRD_QUARTILE);
        }
    }

    fn stop_progress(&self) {
        if let Some(task) = self.progress_task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn current_ad(&self) -> Option<Ad> {
        self.current.lock().unwrap().as_ref().and_then(|c| c.ad.clone())
    }

    /// Records that `event` fired for `ad_id`; returns true only the first
    /// time.
    fn mark_tracked(&self, ad_id: &str, event: &str) -> bool {
        self.tracked
            .lock()
            .unwrap()
            .entry(ad_id.to_string())
            .or_default()
            .insert(event.to_string())
    }

    /// Drops the once-only guard state for an ad, e.g. when its tracking is
    /// cancelled.
    pub fn clear_tracked_events(&self, ad_id: &str) {
        self.tracked.lock().unwrap().remove(ad_id);
    }

    /// Releases the player engine. Idempotent: concurrent and duplicate
    /// calls are no-ops.
    pub fn release(&self) {
        if self.releasing.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.current.lock().unwrap().is_none() {
            // Nothing acquired since the last release
            self.releasing.store(false, Ordering::Release);
            return;
        }

        self.stop_progress();
        if let Some(ad) = self.current_ad() {
            self.tracking.cancel_tracking(&ad.id);
        }
        self.tracked.lock().unwrap().clear();
        self.engine.stop();
        self.engine.clear_media();
        self.engine.release();

        *self.current.lock().unwrap() = None;
        *self.state.lock().unwrap() = PlaybackState::Idle;
        self.releasing.store(false, Ordering::Release);
    }
}

impl Drop for PlaybackOrchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.progress_task.lock().unwrap().take() {
            task.abort();
        }
    }
}
