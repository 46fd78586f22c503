use std::sync::Arc;
use std::time::Duration;

use vast_pipeline::config::{CacheConfig, PipelineConfig, TrackingConfig};
use vast_pipeline::net::{AlwaysOnline, ReqwestFetcher};
use vast_pipeline::pipeline::AdPipeline;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const THREE_AD_POD: &str = r#"<VAST version="3.0">
  <Ad id="ad-2" sequence="2">
    <MediaFiles>
      <MediaFile type="video/mp4" bitrate="1200" width="1280" height="720" delivery="progressive">http://x/2.mp4</MediaFile>
    </MediaFiles>
  </Ad>
  <Ad id="ad-1" sequence="1">
    <MediaFiles>
      <MediaFile type="video/mp4" bitrate="800" width="1280" height="720" delivery="progressive">http://x/1.mp4</MediaFile>
    </MediaFiles>
  </Ad>
  <Ad id="ad-3" sequence="3">
    <MediaFiles>
      <MediaFile type="video/mp4" bitrate="600" width="1280" height="720" delivery="progressive">http://x/3.mp4</MediaFile>
    </MediaFiles>
  </Ad>
  <Ad id="ad-no-media" sequence="4"></Ad>
</VAST>"#;

fn pipeline() -> AdPipeline {
    let config = PipelineConfig {
        tracking: TrackingConfig {
            retry_delay: Duration::from_millis(10),
            ..TrackingConfig::default()
        },
        cache: CacheConfig {
            expiration: Duration::from_secs(60),
            ..CacheConfig::default()
        },
        ..PipelineConfig::default()
    };
    AdPipeline::with_collaborators(
        config,
        Arc::new(ReqwestFetcher::new().unwrap()),
        Arc::new(AlwaysOnline),
    )
    .unwrap()
}

async fn vast_server(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vast.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn walks_a_three_ad_pod_in_sequence_order() {
    let server = vast_server(THREE_AD_POD).await;
    let pipeline = pipeline();
    let sequence = &pipeline.sequence;

    let prepared = sequence
        .prepare_ad_sequence(&format!("{}/vast.xml", server.uri()), "tile-1")
        .await;
    assert!(prepared);

    // The ad without media files is excluded from the pod
    assert_eq!(sequence.total_ads(), 3);
    assert_eq!(sequence.current_ad().unwrap().id, "ad-1");
    assert_eq!(
        sequence.current_video_url().as_deref(),
        Some("http://x/1.mp4")
    );
    assert!(sequence.has_next_ad());
    assert!(!sequence.is_last_ad());

    assert!(sequence.move_to_next_ad());
    assert_eq!(sequence.current_ad().unwrap().id, "ad-2");
    assert!(!sequence.is_last_ad());

    assert!(sequence.move_to_next_ad());
    assert_eq!(sequence.current_ad().unwrap().id, "ad-3");
    assert!(sequence.is_last_ad());

    // Already on the last ad: the cursor stays put
    assert!(!sequence.move_to_next_ad());
    assert_eq!(sequence.current_ad().unwrap().id, "ad-3");
}

#[tokio::test]
async fn failed_fetch_reports_no_ads_available() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vast.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let pipeline = pipeline();
    let prepared = pipeline
        .sequence
        .prepare_ad_sequence(&format!("{}/vast.xml", server.uri()), "tile-1")
        .await;
    assert!(!prepared);
    assert!(pipeline.sequence.current_ad().is_none());
}

#[tokio::test]
async fn serves_cached_ads_when_refetch_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vast.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(THREE_AD_POD))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/vast.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let pipeline = pipeline();
    let url = format!("{}/vast.xml", server.uri());

    assert!(pipeline.sequence.prepare_ad_sequence(&url, "tile-1").await);

    // Second fetch hits the 500 but the cached pod still serves
    assert!(pipeline.sequence.prepare_ad_sequence(&url, "tile-1").await);
    assert_eq!(pipeline.sequence.total_ads(), 3);
}

#[tokio::test]
async fn empty_pod_reports_no_ads() {
    let server = vast_server(r#"<VAST version="3.0"></VAST>"#).await;
    let pipeline = pipeline();
    let prepared = pipeline
        .sequence
        .prepare_ad_sequence(&format!("{}/vast.xml", server.uri()), "tile-1")
        .await;
    assert!(!prepared);

    // A well-formed but adless document is recorded as a non-retryable failure
    let stats = pipeline.errors.stats();
    assert_eq!(stats.total_errors, 1);
    let last = stats.last_error.unwrap();
    assert!(!last.retryable);
    assert_eq!(last.message, "No usable ads in response");
}

#[tokio::test]
async fn reset_clears_the_cursor_and_pod() {
    let server = vast_server(THREE_AD_POD).await;
    let pipeline = pipeline();
    let url = format!("{}/vast.xml", server.uri());

    assert!(pipeline.sequence.prepare_ad_sequence(&url, "tile-1").await);
    pipeline.sequence.move_to_next_ad();
    pipeline.sequence.reset();

    assert_eq!(pipeline.sequence.total_ads(), 0);
    assert_eq!(pipeline.sequence.current_index(), 0);
    assert!(pipeline.sequence.current_ad().is_none());
    assert!(!pipeline.sequence.has_next_ad());
    assert!(!pipeline.sequence.is_last_ad());
}
