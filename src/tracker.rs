use crate::config::TrackingConfig;
use crate::diagnostics::ErrorLog;
use crate::error::{AdError, Result};
use crate::model::Ad;
use crate::net::Connectivity;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Job {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Fires tracking pixels for ad lifecycle events.
///
/// Every call spawns one asynchronous attempt loop keyed by
/// `{event}_{adId}`; starting a new call for the same key cancels the prior
/// one, so at most one pixel is ever in flight per event and ad. Failures
/// are retried with backoff and ultimately swallowed: playback is never
/// blocked on telemetry.
pub struct EventTracker {
    client: reqwest::Client,
    connectivity: Arc<dyn Connectivity>,
    errors: Arc<ErrorLog>,
    retry_attempts: u32,
    retry_delay: std::time::Duration,
    jobs: Arc<Mutex<HashMap<String, Job>>>,
    generation: AtomicU64,
}

impl EventTracker {
    pub fn new(
        connectivity: Arc<dyn Connectivity>,
        errors: Arc<ErrorLog>,
        config: &TrackingConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(crate::net::HTTP_TIMEOUT)
            .timeout(crate::net::HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            connectivity,
            errors,
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        })
    }

    pub fn track_event(&self, url: &str, event_type: &str, ad_id: &str) {
        self.fire_pixel(url, &format!("{event_type}_{ad_id}"), ad_id);
    }

    /// Validating variant used by the tracking manager's dispatch-retry
    /// layer.
    pub fn try_track_event(&self, url: &str, event_type: &str, ad_id: &str) -> Result<()> {
        url::Url::parse(url)?;
        self.track_event(url, event_type, ad_id);
        Ok(())
    }

    pub fn track_impression(&self, ad: &Ad) {
        if !ad.impression_url.is_empty() {
            self.fire_pixel(&ad.impression_url, &format!("impression_{}", ad.id), &ad.id);
        }
    }

    pub fn track_click(&self, ad: &Ad) {
        if let Some(url) = &ad.click_tracking {
            self.fire_pixel(url, &format!("click_{}", ad.id), &ad.id);
        }
    }

    pub fn track_quartile(&self, ad: &Ad, quartile: &str) {
        if let Some(url) = ad.tracking_url(quartile) {
            self.track_event(url, quartile, &ad.id);
        }
    }

    fn fire_pixel(&self, url: &str, job_key: &str, ad_id: &str) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (registered_tx, registered_rx) = oneshot::channel();
        let handle = self.spawn_attempt_loop(
            url.to_string(),
            job_key.to_string(),
            ad_id.to_string(),
            generation,
            registered_rx,
        );

        // Most-recent-intent-wins: a new job supersedes any live one
        {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(prev) = jobs.insert(job_key.to_string(), Job { generation, handle }) {
                prev.handle.abort();
            }
        }
        // The attempt loop holds until its entry is visible in the map, so a
        // fast completion cannot race the insert and leave a dead entry
        let _ = registered_tx.send(());
    }

    fn spawn_attempt_loop(
        &self,
        url: String,
        job_key: String,
        ad_id: String,
        generation: u64,
        registered: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let client = self.client.clone();
        let connectivity = Arc::clone(&self.connectivity);
        let errors = Arc::clone(&self.errors);
        let jobs = Arc::clone(&self.jobs);
        let retry_attempts = self.retry_attempts;
        let retry_delay = self.retry_delay;

        tokio::spawn(async move {
            let _ = registered.await;

            let mut last_error: Option<AdError> = None;
            let mut attempt = 0u32;

            while attempt < retry_attempts {
                // Connectivity is polled, not pushed; a disconnected check
                // consumes an attempt without touching the HTTP layer
                if !connectivity.is_connected() {
                    warn!("No network connection, delaying tracking attempt for {job_key}");
                    last_error = Some(AdError::NoInternet);
                    tokio::time::sleep(retry_delay).await;
                    attempt += 1;
                    continue;
                }

                let result = match client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => Ok(()),
                    Ok(response) => Err(AdError::HttpStatus(response.status().as_u16())),
                    Err(e) => Err(AdError::NetworkError(e)),
                };

                match result {
                    Ok(()) => {
                        debug!("Successfully tracked event: {job_key}");
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        error!("Error tracking event {job_key} ({attempt}/{retry_attempts}): {e}");
                        last_error = Some(e);
                        if attempt < retry_attempts - 1 {
                            tokio::time::sleep(retry_delay * (attempt + 1)).await;
                        }
                        attempt += 1;
                    }
                }
            }

            if let Some(e) = last_error {
                error!("Failed to track event {job_key} after {retry_attempts} attempts: {e}");
                errors.log_error(&e, Some(&ad_id), Some("tracking"));
            }

            // Remove only our own entry; a superseding job may have taken
            // the key already
            let mut jobs = jobs.lock().unwrap();
            if jobs.get(&job_key).is_some_and(|j| j.generation == generation) {
                jobs.remove(&job_key);
            }
        })
    }

    /// Cancels every active job keyed to `ad_id`. Safe to call repeatedly.
    pub fn cancel_tracking(&self, ad_id: &str) {
        let suffix = format!("_{ad_id}");
        self.jobs.lock().unwrap().retain(|key, job| {
            if key.ends_with(&suffix) {
                job.handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }

    /// Number of live tracking jobs.
    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl Drop for EventTracker {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
