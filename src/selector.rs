use crate::config::SelectorConfig;
use crate::model::{Ad, MediaFile};
use log::{debug, warn};

/// Picks the best rendition of an ad for the current display and bandwidth
/// budget.
///
/// Pure function of the ad and the configuration; the only side effect is
/// logging.
pub struct MediaSelector {
    config: SelectorConfig,
}

impl MediaSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Returns the highest-scoring rendition.
    ///
    /// `None` only when the ad has no media files at all. When every
    /// candidate is filtered out, the first one is returned unfiltered so a
    /// playable URL is never silently withheld.
    pub fn select_best<'a>(&self, ad: &'a Ad) -> Option<&'a MediaFile> {
        let mut best: Option<(&MediaFile, i32)> = None;
        for media in &ad.media_files {
            let Some(score) = self.score(media) else {
                continue;
            };
            // Stable max: strictly-greater keeps the first of equal scores
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((media, score));
            }
        }

        match best {
            Some((media, score)) => {
                debug!(
                    "Selected media file: {} {}x{} @{}kbps (score: {score})",
                    media.mime_type, media.width, media.height, media.bitrate_kbps
                );
                Some(media)
            }
            None => {
                if !ad.media_files.is_empty() {
                    warn!("No suitable media files for ad {}", ad.id);
                }
                ad.media_files.first()
            }
        }
    }

    /// Lowest-bitrate mp4 rendition, for constrained startup paths.
    pub fn select_lowest_bitrate<'a>(&self, ad: &'a Ad) -> Option<&'a MediaFile> {
        ad.media_files
            .iter()
            .filter(|m| m.mime_type == "video/mp4")
            .min_by_key(|m| m.bitrate_kbps)
    }

    fn score(&self, media: &MediaFile) -> Option<i32> {
        let rank = self
            .config
            .preferred_mime_types
            .iter()
            .position(|t| *t == media.mime_type)?;

        if !self.dimensions_fit(media.width, media.height) {
            return None;
        }
        if media.bitrate_kbps > self.config.max_bitrate_kbps {
            return None;
        }

        let mut score = (self.config.preferred_mime_types.len() - rank) as i32 * 100;
        score += self.resolution_closeness(media.width, media.height);
        score += self.bitrate_closeness(media.bitrate_kbps);
        if media.delivery == "progressive" {
            score += 50;
        }
        Some(score)
    }

    /// Renditions more than 20% larger than the display waste bandwidth.
    fn dimensions_fit(&self, width: u32, height: u32) -> bool {
        let max_width = self.config.display.width * 12 / 10;
        let max_height = self.config.display.height * 12 / 10;
        width <= max_width && height <= max_height
    }

    fn resolution_closeness(&self, width: u32, height: u32) -> i32 {
        let width_diff = self.config.display.width.abs_diff(width) as i32;
        let height_diff = self.config.display.height.abs_diff(height) as i32;
        (1000 - (width_diff + height_diff) / 2).max(0)
    }

    fn bitrate_closeness(&self, bitrate_kbps: u32) -> i32 {
        let pct = (bitrate_kbps as u64 * 100 / self.config.max_bitrate_kbps.max(1) as u64) as i32;
        pct.min(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisplayConfig;
    use crate::model::AdBuilder;

    fn ad_with(media_files: Vec<MediaFile>) -> Ad {
        AdBuilder {
            id: "ad1".to_string(),
            media_files,
            ..AdBuilder::default()
        }
        .build()
        .unwrap()
    }

    fn media(mime: &str, bitrate: u32, width: u32, height: u32, delivery: &str) -> MediaFile {
        MediaFile {
            url: format!("http://x/{mime}-{bitrate}-{width}x{height}"),
            bitrate_kbps: bitrate,
            width,
            height,
            mime_type: mime.to_string(),
            delivery: delivery.to_string(),
        }
    }

    fn selector() -> MediaSelector {
        MediaSelector::new(SelectorConfig {
            display: DisplayConfig {
                width: 1920,
                height: 1080,
            },
            max_bitrate_kbps: 8000,
            ..SelectorConfig::default()
        })
    }

    #[test]
    fn no_media_files_returns_none() {
        assert!(selector().select_best(&ad_with(vec![])).is_none());
    }

    #[test]
    fn prefers_resolution_close_to_display() {
        let ad = ad_with(vec![
            media("video/mp4", 2000, 640, 360, "progressive"),
            media("video/mp4", 2000, 1920, 1080, "progressive"),
        ]);
        let best = selector().select_best(&ad).unwrap();
        assert_eq!(best.width, 1920);
    }

    #[test]
    fn rejects_oversized_renditions() {
        let ad = ad_with(vec![
            media("video/mp4", 2000, 3840, 2160, "progressive"),
            media("video/mp4", 2000, 1280, 720, "progressive"),
        ]);
        let best = selector().select_best(&ad).unwrap();
        assert_eq!(best.width, 1280);
    }

    #[test]
    fn rejects_bitrate_over_budget() {
        let ad = ad_with(vec![
            media("video/mp4", 9000, 1920, 1080, "progressive"),
            media("video/mp4", 4000, 1920, 1080, "progressive"),
        ]);
        let best = selector().select_best(&ad).unwrap();
        assert_eq!(best.bitrate_kbps, 4000);
    }

    #[test]
    fn rejects_unlisted_mime_types() {
        let ad = ad_with(vec![
            media("video/x-flv", 2000, 1920, 1080, "progressive"),
            media("video/webm", 2000, 1920, 1080, "progressive"),
        ]);
        let best = selector().select_best(&ad).unwrap();
        assert_eq!(best.mime_type, "video/webm");
    }

    #[test]
    fn progressive_delivery_breaks_near_ties() {
        let ad = ad_with(vec![
            media("video/mp4", 2000, 1920, 1080, "streaming"),
            media("video/mp4", 2000, 1920, 1080, "progressive"),
        ]);
        let best = selector().select_best(&ad).unwrap();
        assert_eq!(best.delivery, "progressive");
    }

    #[test]
    fn all_rejected_falls_back_to_first() {
        let first = media("video/x-flv", 2000, 1920, 1080, "progressive");
        let ad = ad_with(vec![
            first.clone(),
            media("video/x-ms-wmv", 2000, 1920, 1080, "progressive"),
        ]);
        assert_eq!(selector().select_best(&ad), Some(&first));
    }

    #[test]
    fn equal_scores_keep_first_encountered() {
        let a = media("video/mp4", 2000, 1280, 720, "progressive");
        let mut b = a.clone();
        b.url = "http://x/second".to_string();
        let ad = ad_with(vec![a.clone(), b]);
        assert_eq!(selector().select_best(&ad).unwrap().url, a.url);
    }

    #[test]
    fn lowest_bitrate_picks_cheapest_mp4() {
        let ad = ad_with(vec![
            media("video/webm", 100, 640, 360, "progressive"),
            media("video/mp4", 800, 1280, 720, "progressive"),
            media("video/mp4", 300, 640, 360, "progressive"),
        ]);
        let best = selector().select_lowest_bitrate(&ad).unwrap();
        assert_eq!(best.bitrate_kbps, 300);
    }
}
