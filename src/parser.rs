use crate::cache::AdCache;
use crate::diagnostics::ErrorLog;
use crate::error::{AdError, Result};
use crate::model::{Ad, AdBuilder, MediaFile};
use crate::net::HttpFetch;
use log::{debug, info, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::str::from_utf8;
use std::sync::Arc;
use std::time::Duration;

/// Hard deadline wrapping fetch + parse of one VAST document.
pub const FETCH_DEADLINE: Duration = Duration::from_secs(10);

/// Parse a VAST XML string into a list of ads, sorted by sequence number.
///
/// The scan is deliberately flat and tolerant: one ad builder is active
/// between an `<Ad>` start tag and its end tag, recognized tags fill it in
/// wherever they appear, and everything else is ignored. An ad without an
/// `id` attribute is dropped rather than failing the document.
pub fn parse_str(xml: &str) -> Result<Vec<Ad>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut ads: Vec<Ad> = Vec::new();
    let mut current: Option<AdBuilder> = None;
    let mut vast_version: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"VAST" => {
                    vast_version = attr_value(e, b"version");
                    debug!("Found VAST tag with version: {vast_version:?}");
                }
                b"Ad" => {
                    let mut builder = AdBuilder::default();
                    builder.id = attr_value(e, b"id").unwrap_or_default();
                    builder.sequence = attr_value(e, b"sequence")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    builder.vast_version = vast_version.clone();
                    debug!(
                        "Started parsing Ad id: {}, sequence: {}",
                        builder.id, builder.sequence
                    );
                    current = Some(builder);
                }
                b"AdSystem" => {
                    let text = read_text(&mut reader)?;
                    if let Some(ad) = current.as_mut() {
                        ad.ad_system = text;
                    }
                }
                b"AdTitle" => {
                    let text = read_text(&mut reader)?;
                    if let Some(ad) = current.as_mut() {
                        ad.ad_title = text;
                    }
                }
                b"Impression" => {
                    let text = read_text(&mut reader)?;
                    if let Some(ad) = current.as_mut() {
                        ad.impression_url = text;
                    }
                }
                b"Creative" => {
                    // Attribute only; the creative's children flow through
                    // the same flat scan
                    if let Some(ad) = current.as_mut() {
                        ad.creative_id = attr_value(e, b"id").unwrap_or_default();
                    }
                }
                b"Duration" => {
                    let text = read_text(&mut reader)?;
                    if let Some(ad) = current.as_mut() {
                        ad.duration = text;
                    }
                }
                b"MediaFile" => {
                    let media_file = read_media_file(&mut reader, e)?;
                    if let (Some(ad), Some(media_file)) = (current.as_mut(), media_file) {
                        debug!("Added MediaFile: {}", media_file.url);
                        ad.media_files.push(media_file);
                    }
                }
                b"Tracking" => {
                    let event = attr_value(e, b"event");
                    let url = read_text(&mut reader)?;
                    if let Some(ad) = current.as_mut() {
                        match event {
                            Some(event) if !event.is_empty() && !url.is_empty() => {
                                debug!("Added tracking - event: {event}");
                                ad.tracking_events.insert(event, url);
                            }
                            _ => {}
                        }
                    }
                }
                b"ClickThrough" => {
                    let url = read_text(&mut reader)?;
                    if let Some(ad) = current.as_mut() {
                        if !url.is_empty() {
                            ad.click_through = Some(url);
                        }
                    }
                }
                b"ClickTracking" => {
                    let url = read_text(&mut reader)?;
                    if let Some(ad) = current.as_mut() {
                        if !url.is_empty() {
                            ad.click_tracking = Some(url);
                        }
                    }
                }
                b"Extension" => {
                    let ext_type = attr_value(e, b"type");
                    match (current.as_mut(), ext_type) {
                        (Some(ad), Some(ext_type)) => {
                            read_extension(&mut reader, &ext_type, &mut ad.extensions)?;
                        }
                        _ => skip_element(&mut reader, b"Extension")?,
                    }
                }
                _ => (),
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Ad" => {
                if let Some(builder) = current.take() {
                    match builder.build() {
                        Some(ad) => {
                            debug!("Completed parsing Ad: {}", ad.id);
                            ads.push(ad);
                        }
                        None => warn!("Dropped ad with empty id"),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AdError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    debug!("Completed XML parsing. Total ads parsed: {}", ads.len());
    ads.sort_by_key(|ad| ad.sequence);
    Ok(ads)
}

/// Helper to read an attribute value from a start tag
fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == name {
            if let Ok(value) = from_utf8(&attr.value) {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Helper to read the text content of the current element, unwrapping CDATA
fn read_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                let raw = e.unescape()?.into_owned();
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    text = strip_cdata(trimmed).to_string();
                }
            }
            Ok(Event::CData(e)) => {
                if let Ok(value) = from_utf8(&e) {
                    text = value.trim().to_string();
                }
            }
            Ok(Event::End(_)) => break,
            Ok(Event::Eof) => {
                return Err(AdError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(AdError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(text)
}

/// Strips a literal `<![CDATA[...]]>` wrapper that survived escaping
fn strip_cdata(text: &str) -> &str {
    text.strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .map(str::trim)
        .unwrap_or(text)
}

/// Reads a MediaFile element. Non-numeric numeric attributes default to 0;
/// a media file with an empty URL is dropped.
fn read_media_file(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Option<MediaFile>> {
    let bitrate_kbps = attr_value(start, b"bitrate")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let width = attr_value(start, b"width")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let height = attr_value(start, b"height")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mime_type = attr_value(start, b"type").unwrap_or_default();
    let delivery = attr_value(start, b"delivery").unwrap_or_default();

    let url = read_text(reader)?;
    if url.is_empty() {
        return Ok(None);
    }

    Ok(Some(MediaFile {
        url,
        bitrate_kbps,
        width,
        height,
        mime_type,
        delivery,
    }))
}

/// Reads every child of an Extension element into
/// `extensions["{type}_{childTag}"]`.
fn read_extension(
    reader: &mut Reader<&[u8]>,
    ext_type: &str,
    extensions: &mut std::collections::HashMap<String, String>,
) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let child = from_utf8(e.name().as_ref())
                    .unwrap_or_default()
                    .to_string();
                let value = read_text(reader)?;
                if !value.is_empty() {
                    debug!("Added extension: {ext_type}_{child}");
                    extensions.insert(format!("{ext_type}_{child}"), value);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Extension" => break,
            Ok(Event::Eof) => {
                return Err(AdError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(AdError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Helper to skip an element and all its children
fn skip_element(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<()> {
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(ref e)) => {
                if depth == 0 && e.name().as_ref() == name {
                    break;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => {
                return Err(AdError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(AdError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// VAST parser with a fetch entry point and cache fallback.
pub struct VastParser {
    fetcher: Arc<dyn HttpFetch>,
    cache: Arc<AdCache>,
    errors: Arc<ErrorLog>,
}

impl VastParser {
    pub fn new(fetcher: Arc<dyn HttpFetch>, cache: Arc<AdCache>, errors: Arc<ErrorLog>) -> Self {
        Self {
            fetcher,
            cache,
            errors,
        }
    }

    /// Parses a VAST document in memory.
    pub fn parse_str(&self, xml: &str) -> Result<Vec<Ad>> {
        parse_str(xml)
    }

    /// Fetches and parses the VAST document at `vast_url`, caching the
    /// result under `tile_id`.
    ///
    /// On fetch or parse failure a still-valid cached entry for the tile is
    /// served instead; only when none exists does the failure propagate.
    pub async fn parse_url(&self, vast_url: &str, tile_id: &str) -> Result<Vec<Ad>> {
        debug!("Fetching VAST for tile {tile_id} from {vast_url}");

        let result = match tokio::time::timeout(FETCH_DEADLINE, self.fetcher.fetch(vast_url)).await
        {
            // A well-formed document with zero usable ads is a failure too
            Ok(Ok(body)) => parse_str(&body).and_then(|ads| {
                if ads.is_empty() {
                    Err(AdError::EmptyResult)
                } else {
                    Ok(ads)
                }
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AdError::Timeout(FETCH_DEADLINE)),
        };

        match result {
            Ok(ads) => {
                info!("Parsed and cached {} VAST ads for tile {tile_id}", ads.len());
                self.cache.put(tile_id, ads.clone());
                Ok(ads)
            }
            Err(e) => {
                self.errors.log_error(&e, None, Some("parse_url"));
                if let Some(cached) = self.cache.get(tile_id) {
                    info!("Serving cached VAST ads for tile {tile_id}");
                    return Ok(cached);
                }
                Err(e)
            }
        }
    }
}
