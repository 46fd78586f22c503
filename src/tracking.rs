use crate::cache::AdCache;
use crate::config::TrackingConfig;
use crate::diagnostics::ErrorLog;
use crate::error::Result;
use crate::model::{Ad, EVENT_COMPLETE, EVENT_START};
use crate::tracker::EventTracker;
use log::error;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;

/// Grace period between firing the `complete` pixel and tearing down
/// request-scoped state, so the request gets issued first.
const COMPLETE_GRACE: Duration = Duration::from_millis(100);

struct Job {
    generation: u64,
    ad_id: String,
    handle: JoinHandle<()>,
}

/// Coordinates concurrent tracking operations per ad.
///
/// Wraps [`EventTracker`] with a semaphore so a burst of simultaneous ad
/// events cannot overwhelm the network stack, and with its own
/// retry-with-backoff layer governing dispatch. The tracker's retry governs
/// the HTTP attempt; the two compose rather than replace each other.
pub struct TrackingManager {
    tracker: Arc<EventTracker>,
    cache: Arc<AdCache>,
    errors: Arc<ErrorLog>,
    semaphore: Arc<Semaphore>,
    active: Arc<Mutex<HashMap<String, Job>>>,
    generation: AtomicU64,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl TrackingManager {
    pub fn new(
        tracker: Arc<EventTracker>,
        cache: Arc<AdCache>,
        errors: Arc<ErrorLog>,
        config: &TrackingConfig,
    ) -> Self {
        Self {
            tracker,
            cache,
            errors,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            active: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
        }
    }

    /// Fires the named tracking event for an ad, if the ad carries a URL
    /// for it.
    pub fn track_event(&self, ad: &Ad, event_type: &str) {
        let Some(url) = ad.tracking_url(event_type).map(str::to_string) else {
            return;
        };
        let event_type = event_type.to_string();
        self.dispatch(
            format!("event_{}_{event_type}", ad.id),
            ad.id.clone(),
            move |tracker, ad_id| tracker.try_track_event(&url, &event_type, ad_id),
            None,
        );
    }

    pub fn track_quartile(&self, ad: &Ad, quartile: &str) {
        let Some(url) = ad.tracking_url(quartile).map(str::to_string) else {
            return;
        };
        let quartile = quartile.to_string();
        self.dispatch(
            format!("quartile_{}_{quartile}", ad.id),
            ad.id.clone(),
            move |tracker, ad_id| tracker.try_track_event(&url, &quartile, ad_id),
            None,
        );
    }

    /// Fires the impression and `start` pixels that open an ad's tracking
    /// session.
    pub fn start_tracking(&self, ad: &Ad) {
        let ad = ad.clone();
        self.dispatch(
            format!("start_{}", ad.id),
            ad.id.clone(),
            move |tracker, _| {
                tracker.track_impression(&ad);
                if let Some(url) = ad.tracking_url(EVENT_START) {
                    tracker.try_track_event(url, EVENT_START, &ad.id)?;
                }
                Ok(())
            },
            None,
        );
    }

    /// Fires the `complete` pixel, then clears the ad cache after a short
    /// grace delay. The cache is request-scoped, not cross-session.
    pub fn complete_tracking(&self, ad: &Ad) {
        let ad = ad.clone();
        let cache = Arc::clone(&self.cache);
        self.dispatch(
            format!("complete_{}", ad.id),
            ad.id.clone(),
            move |tracker, _| {
                if let Some(url) = ad.tracking_url(EVENT_COMPLETE) {
                    tracker.try_track_event(url, EVENT_COMPLETE, &ad.id)?;
                }
                Ok(())
            },
            Some(Box::new(move || {
                cache.clear();
            })),
        );
    }

    /// Spawns one semaphore-gated dispatch job under `key`, superseding any
    /// live job with the same key. `after` runs once the dispatch settles,
    /// following the grace delay.
    fn dispatch<F>(
        &self,
        key: String,
        ad_id: String,
        op: F,
        after: Option<Box<dyn FnOnce() + Send>>,
    ) where
        F: Fn(&EventTracker, &str) -> Result<()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let tracker = Arc::clone(&self.tracker);
        let errors = Arc::clone(&self.errors);
        let semaphore = Arc::clone(&self.semaphore);
        let active = Arc::clone(&self.active);
        let retry_attempts = self.retry_attempts;
        let retry_delay = self.retry_delay;
        let job_key = key.clone();
        let job_ad_id = ad_id.clone();
        let (registered_tx, registered_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let _ = registered_rx.await;

            // Bounded concurrency gate; closed only on shutdown
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };

            let mut delay = retry_delay;
            for attempt in 0..retry_attempts {
                match op(&tracker, &ad_id) {
                    Ok(()) => break,
                    Err(e) => {
                        error!(
                            "Dispatch attempt {}/{retry_attempts} for {job_key} failed: {e}",
                            attempt + 1
                        );
                        if attempt + 1 == retry_attempts {
                            errors.log_error(&e, Some(&ad_id), Some("dispatch"));
                        } else {
                            tokio::time::sleep(delay).await;
                            delay *= 2;
                        }
                    }
                }
            }

            if let Some(after) = after {
                tokio::time::sleep(COMPLETE_GRACE).await;
                after();
            }

            let mut active = active.lock().unwrap();
            if active.get(&job_key).is_some_and(|j| j.generation == generation) {
                active.remove(&job_key);
            }
        });

        {
            let mut active = self.active.lock().unwrap();
            let job = Job {
                generation,
                ad_id: job_ad_id,
                handle,
            };
            if let Some(prev) = active.insert(key, job) {
                prev.handle.abort();
            }
        }
        // Job runs only once its entry is visible, so a fast completion
        // cannot race the insert and leave a dead entry
        let _ = registered_tx.send(());
    }

    /// Cancels every active job belonging to `ad_id`, in both the dispatch
    /// and HTTP layers. Idempotent.
    pub fn cancel_tracking(&self, ad_id: &str) {
        self.active.lock().unwrap().retain(|_, job| {
            if job.ad_id == ad_id {
                job.handle.abort();
                false
            } else {
                true
            }
        });
        self.tracker.cancel_tracking(ad_id);
    }

    /// Cancels everything and clears the request-scoped cache.
    pub fn cancel_all_tracking(&self) {
        {
            let mut active = self.active.lock().unwrap();
            for (_, job) in active.drain() {
                job.handle.abort();
            }
        }
        self.tracker.cancel_all();
        self.cache.clear();
    }

    /// Number of live dispatch jobs (HTTP-layer jobs not included).
    pub fn active_jobs(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}

impl Drop for TrackingManager {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap();
        for (_, job) in active.drain() {
            job.handle.abort();
        }
    }
}
