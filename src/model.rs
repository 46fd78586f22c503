use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known tracking event names from the VAST linear tracking set.
pub const EVENT_START: &str = "start";
pub const EVENT_FIRST_QUARTILE: &str = "firstQuartile";
pub const EVENT_MIDPOINT: &str = "midpoint";
pub const EVENT_THIRD_QUARTILE: &str = "thirdQuartile";
pub const EVENT_COMPLETE: &str = "complete";

/// One parsed advertisement creative.
///
/// Immutable after construction; built from streamed XML events by
/// [`AdBuilder`] and only materialized when the `id` attribute is non-empty.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Ad {
    /// The ad ID (always non-empty)
    pub id: String,

    /// The ad sequence number (for ad pods); 0 when absent or non-numeric
    pub sequence: u32,

    /// The ad system name (e.g. "SpringServe")
    pub ad_system: String,

    /// The ad title
    pub ad_title: String,

    /// Impression tracking URL
    pub impression_url: String,

    /// The creative ID
    pub creative_id: String,

    /// Raw duration text (e.g. "00:00:15")
    pub duration: String,

    /// Playable renditions, in document order
    pub media_files: Vec<MediaFile>,

    /// Tracking event name -> pixel URL
    pub tracking_events: HashMap<String, String>,

    /// The click-through destination URL
    pub click_through: Option<String>,

    /// The click tracking pixel URL
    pub click_tracking: Option<String>,

    /// Vendor extension values keyed by "{type}_{childTag}"
    pub extensions: HashMap<String, String>,

    /// The VAST version of the enclosing document
    pub vast_version: Option<String>,
}

impl Ad {
    /// URL registered for a tracking event, if any.
    pub fn tracking_url(&self, event: &str) -> Option<&str> {
        self.tracking_events.get(event).map(String::as_str)
    }
}

/// One playable rendition of an ad creative.
///
/// Zero values mean "unknown", not errors.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct MediaFile {
    /// The media file URL (always non-empty)
    pub url: String,

    /// The media file bitrate in kbps
    pub bitrate_kbps: u32,

    /// The media file width in pixels
    pub width: u32,

    /// The media file height in pixels
    pub height: u32,

    /// The media file MIME type (e.g. "video/mp4")
    pub mime_type: String,

    /// The delivery method ("progressive" or "streaming")
    pub delivery: String,
}

/// Accumulates fields for the ad currently open between `<Ad>` and `</Ad>`.
#[derive(Debug, Default)]
pub struct AdBuilder {
    pub id: String,
    pub sequence: u32,
    pub ad_system: String,
    pub ad_title: String,
    pub impression_url: String,
    pub creative_id: String,
    pub duration: String,
    pub media_files: Vec<MediaFile>,
    pub tracking_events: HashMap<String, String>,
    pub click_through: Option<String>,
    pub click_tracking: Option<String>,
    pub extensions: HashMap<String, String>,
    pub vast_version: Option<String>,
}

impl AdBuilder {
    /// Finalizes the builder. An ad without an id is not a valid ad and
    /// yields `None`.
    pub fn build(self) -> Option<Ad> {
        if self.id.is_empty() {
            return None;
        }
        Some(Ad {
            id: self.id,
            sequence: self.sequence,
            ad_system: self.ad_system,
            ad_title: self.ad_title,
            impression_url: self.impression_url,
            creative_id: self.creative_id,
            duration: self.duration,
            media_files: self.media_files,
            tracking_events: self.tracking_events,
            click_through: self.click_through,
            click_tracking: self.click_tracking,
            extensions: self.extensions,
            vast_version: self.vast_version,
        })
    }
}
