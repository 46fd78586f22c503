use crate::model::Ad;
use crate::parser::VastParser;
use crate::selector::MediaSelector;
use crate::tracking::TrackingManager;
use log::{debug, error};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct SequenceState {
    ads: Vec<Ad>,
    current_index: usize,
    total_ads: usize,
}

/// Orders the ads of one pre-roll pod and tracks the playback cursor.
pub struct AdSequenceManager {
    parser: Arc<VastParser>,
    selector: Arc<MediaSelector>,
    tracking: Arc<TrackingManager>,
    state: Mutex<SequenceState>,
}

impl AdSequenceManager {
    pub fn new(
        parser: Arc<VastParser>,
        selector: Arc<MediaSelector>,
        tracking: Arc<TrackingManager>,
    ) -> Self {
        Self {
            parser,
            selector,
            tracking,
            state: Mutex::new(SequenceState::default()),
        }
    }

    /// Fetches and parses the pod at `vast_url`, keeping only ads with a
    /// selectable media file. Returns whether any playable ads remain; a
    /// fetch/parse failure reports "no ads available" rather than an error.
    pub async fn prepare_ad_sequence(&self, vast_url: &str, tile_id: &str) -> bool {
        self.reset();
        debug!("Preparing ad sequence for tile {tile_id} from {vast_url}");

        let ads = match self.parser.parse_url(vast_url, tile_id).await {
            Ok(ads) => ads,
            Err(e) => {
                error!("Error preparing ad sequence: {e}");
                return false;
            }
        };

        let mut playable: Vec<Ad> = ads
            .into_iter()
            .filter(|ad| self.selector.select_best(ad).is_some())
            .collect();
        playable.sort_by_key(|ad| ad.sequence);

        let mut state = self.state.lock().unwrap();
        state.total_ads = playable.len();
        state.ads = playable;
        state.current_index = 0;
        state.total_ads > 0
    }

    pub fn current_ad(&self) -> Option<Ad> {
        let state = self.state.lock().unwrap();
        state.ads.get(state.current_index).cloned()
    }

    /// Best media URL for the ad under the cursor.
    pub fn current_video_url(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        let ad = state.ads.get(state.current_index)?;
        self.selector.select_best(ad).map(|m| m.url.clone())
    }

    pub fn has_next_ad(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.total_ads > 0 && state.current_index < state.total_ads - 1
    }

    pub fn is_last_ad(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.total_ads > 0 && state.current_index == state.total_ads - 1
    }

    /// Advances the cursor; returns false (cursor unchanged) when already on
    /// the last ad.
    pub fn move_to_next_ad(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.total_ads > 0 && state.current_index < state.total_ads - 1 {
            state.current_index += 1;
            true
        } else {
            false
        }
    }

    /// Delegates completion bookkeeping for the current ad to the tracking
    /// manager.
    pub fn complete_current_ad(&self) {
        if let Some(ad) = self.current_ad() {
            self.tracking.complete_tracking(&ad);
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        *state = SequenceState::default();
    }

    pub fn current_index(&self) -> usize {
        self.state.lock().unwrap().current_index
    }

    pub fn total_ads(&self) -> usize {
        self.state.lock().unwrap().total_ads
    }
}
