use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use vast_pipeline::config::{PipelineConfig, TrackingConfig};
use vast_pipeline::model::{Ad, AdBuilder};
use vast_pipeline::net::{AlwaysOnline, ReqwestFetcher};
use vast_pipeline::pipeline::AdPipeline;
use vast_pipeline::playback::{
    PlaybackOrchestrator, PlaybackState, PlayerEngine, PlayerError, PlayerEvent, PrepareOptions,
};

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct FakeEngine {
    position: AtomicU64,
    duration: AtomicU64,
    prepare_calls: AtomicU32,
    play_calls: AtomicU32,
    stop_calls: AtomicU32,
    clear_calls: AtomicU32,
    seek_calls: AtomicU32,
    release_calls: AtomicU32,
    media: Mutex<Vec<String>>,
}

impl PlayerEngine for FakeEngine {
    fn set_media(&self, url: &str) {
        self.media.lock().unwrap().push(url.to_string());
    }
    fn prepare(&self) {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn play(&self) {
        self.play_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn clear_media(&self) {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn seek_to_default_position(&self) {
        self.seek_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn release(&self) {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn position_ms(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }
    fn duration_ms(&self) -> u64 {
        self.duration.load(Ordering::SeqCst)
    }
}

fn tracked_ad(id: &str, server: &MockServer) -> Ad {
    let mut tracking_events = HashMap::new();
    for event in ["start", "firstQuartile", "midpoint", "thirdQuartile", "complete"] {
        tracking_events.insert(event.to_string(), format!("{}/{event}", server.uri()));
    }
    AdBuilder {
        id: id.to_string(),
        impression_url: format!("{}/impression", server.uri()),
        tracking_events,
        ..AdBuilder::default()
    }
    .build()
    .unwrap()
}

async fn pixel_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn orchestrator(engine: Arc<FakeEngine>) -> Arc<PlaybackOrchestrator> {
    let config = PipelineConfig {
        tracking: TrackingConfig {
            retry_delay: Duration::from_millis(10),
            ..TrackingConfig::default()
        },
        ..PipelineConfig::default()
    };
    let pipeline = AdPipeline::with_collaborators(
        config,
        Arc::new(ReqwestFetcher::new().unwrap()),
        Arc::new(AlwaysOnline),
    )
    .unwrap();
    Arc::new(
        pipeline
            .orchestrator(engine)
            .with_progress_interval(Duration::from_millis(10)),
    )
}

async fn count_requests(server: &MockServer, suffix: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().ends_with(suffix))
        .count()
}

#[tokio::test]
async fn duplicate_ready_fires_start_exactly_once() {
    let server = pixel_server().await;
    let engine = Arc::new(FakeEngine::default());
    let orchestrator = orchestrator(Arc::clone(&engine));

    let ad = tracked_ad("ad1", &server);
    orchestrator
        .prepare(
            "http://x/video.mp4",
            PrepareOptions {
                ad: Some(ad),
                ad_number: 1,
                total_ads: 1,
                part_of_sequence: true,
            },
        )
        .await;
    assert_eq!(orchestrator.state(), PlaybackState::Preparing);

    orchestrator.handle_event(PlayerEvent::Ready);
    orchestrator.handle_event(PlayerEvent::Ready);
    assert_eq!(orchestrator.state(), PlaybackState::Playing);
    assert_eq!(engine.play_calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count_requests(&server, "/start").await, 1);
    assert_eq!(count_requests(&server, "/impression").await, 1);
}

#[tokio::test]
async fn quartiles_fire_once_as_playback_crosses_thresholds() {
    let server = pixel_server().await;
    let engine = Arc::new(FakeEngine::default());
    engine.duration.store(1000, Ordering::SeqCst);
    let orchestrator = orchestrator(Arc::clone(&engine));

    let progress_seen = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&progress_seen);
    orchestrator.set_progress_callback(Box::new(move |_, duration, ad_number, total| {
        assert_eq!(duration, 1000);
        assert_eq!(ad_number, 2);
        assert_eq!(total, 3);
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    let ad = tracked_ad("ad1", &server);
    orchestrator
        .prepare(
            "http://x/video.mp4",
            PrepareOptions {
                ad: Some(ad),
                ad_number: 2,
                total_ads: 3,
                part_of_sequence: true,
            },
        )
        .await;
    orchestrator.handle_event(PlayerEvent::Ready);

    engine.position.store(300, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.position.store(600, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.position.store(900, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(count_requests(&server, "/firstQuartile").await, 1);
    assert_eq!(count_requests(&server, "/midpoint").await, 1);
    assert_eq!(count_requests(&server, "/thirdQuartile").await, 1);
    assert!(progress_seen.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn ended_fires_complete_and_releases_outside_a_sequence() {
    let server = pixel_server().await;
    let engine = Arc::new(FakeEngine::default());
    let orchestrator = orchestrator(Arc::clone(&engine));

    let ended = Arc::new(AtomicU32::new(0));
    let ended_count = Arc::clone(&ended);
    orchestrator.set_ended_callback(Box::new(move || {
        ended_count.fetch_add(1, Ordering::SeqCst);
    }));

    let ad = tracked_ad("ad1", &server);
    orchestrator
        .prepare(
            "http://x/video.mp4",
            PrepareOptions {
                ad: Some(ad),
                ad_number: 1,
                total_ads: 1,
                part_of_sequence: false,
            },
        )
        .await;
    orchestrator.handle_event(PlayerEvent::Ready);
    orchestrator.handle_event(PlayerEvent::Ended);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(count_requests(&server, "/complete").await, 1);
    assert_eq!(ended.load(Ordering::SeqCst), 1);
    assert_eq!(engine.release_calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn ended_keeps_the_engine_between_pod_entries() {
    let server = pixel_server().await;
    let engine = Arc::new(FakeEngine::default());
    let orchestrator = orchestrator(Arc::clone(&engine));

    let ad = tracked_ad("ad1", &server);
    orchestrator
        .prepare(
            "http://x/video.mp4",
            PrepareOptions {
                ad: Some(ad),
                ad_number: 1,
                total_ads: 2,
                part_of_sequence: true,
            },
        )
        .await;
    orchestrator.handle_event(PlayerEvent::Ready);
    orchestrator.handle_event(PlayerEvent::Ended);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.release_calls.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.state(), PlaybackState::Ended);
}

#[tokio::test]
async fn network_error_retries_prepare_in_place() {
    let engine = Arc::new(FakeEngine::default());
    let orchestrator = orchestrator(Arc::clone(&engine));

    let ready_flags = Arc::new(Mutex::new(Vec::new()));
    let flags = Arc::clone(&ready_flags);
    orchestrator.set_ready_callback(Box::new(move |ok| {
        flags.lock().unwrap().push(ok);
    }));

    orchestrator
        .prepare("http://x/video.mp4", PrepareOptions::default())
        .await;
    assert_eq!(engine.prepare_calls.load(Ordering::SeqCst), 1);

    orchestrator.handle_event(PlayerEvent::Error(PlayerError::NetworkTimeout));
    assert_eq!(engine.prepare_calls.load(Ordering::SeqCst), 2);
    assert_eq!(orchestrator.state(), PlaybackState::Preparing);
    assert_eq!(*ready_flags.lock().unwrap(), vec![false]);
}

#[tokio::test]
async fn behind_live_window_seeks_to_default_before_retrying() {
    let engine = Arc::new(FakeEngine::default());
    let orchestrator = orchestrator(Arc::clone(&engine));

    orchestrator
        .prepare("http://x/video.mp4", PrepareOptions::default())
        .await;
    orchestrator.handle_event(PlayerEvent::Error(PlayerError::BehindLiveWindow));

    assert_eq!(engine.seek_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.prepare_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_error_resets_the_same_media_in_full() {
    let engine = Arc::new(FakeEngine::default());
    let orchestrator = orchestrator(Arc::clone(&engine));

    orchestrator
        .prepare("http://x/video.mp4", PrepareOptions::default())
        .await;
    orchestrator.handle_event(PlayerEvent::Error(PlayerError::Other("decoder".into())));

    // Full reset re-sets the same media item before preparing again
    assert_eq!(*engine.media.lock().unwrap(), vec![
        "http://x/video.mp4".to_string(),
        "http://x/video.mp4".to_string()
    ]);
    assert_eq!(engine.prepare_calls.load(Ordering::SeqCst), 2);
    assert_eq!(orchestrator.state(), PlaybackState::Preparing);
}

#[tokio::test]
async fn release_is_idempotent() {
    let engine = Arc::new(FakeEngine::default());
    let orchestrator = orchestrator(Arc::clone(&engine));

    orchestrator
        .prepare("http://x/video.mp4", PrepareOptions::default())
        .await;
    orchestrator.release();
    orchestrator.release();

    assert_eq!(engine.release_calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.state(), PlaybackState::Idle);
}
