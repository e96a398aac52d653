use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use runa_album_bridge::dom::{InMemoryDom, IntervalClock};
use runa_album_bridge::domain::Coordinate;
use runa_album_bridge::error::RunaError;
use runa_album_bridge::headless::{HEADLESS_CLASS_PREFIX, HeadlessRuntime};
use runa_album_bridge::map::{MapController, MapOptions, ShowMapRequest};
use runa_album_bridge::tokens::TokenSource;

#[derive(Clone, Default)]
struct MockTokens {
    calls: Arc<AtomicUsize>,
    fail_first: bool,
}

#[async_trait]
impl TokenSource for MockTokens {
    async fn fetch_token(&self) -> Result<String, RunaError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_first && call == 0 {
            return Err(RunaError::TokenStatus {
                status: 503,
                message: "token service unavailable".to_string(),
            });
        }
        Ok("pk.headless".to_string())
    }
}

fn options() -> MapOptions {
    MapOptions {
        style: "mapbox://styles/mapbox/light-v9".to_string(),
        container_wait: Duration::from_millis(5000),
    }
}

fn controller(
    runtime: HeadlessRuntime,
    dom: &InMemoryDom,
    tokens: MockTokens,
) -> MapController<HeadlessRuntime, InMemoryDom, IntervalClock, MockTokens> {
    MapController::new(
        runtime,
        dom.clone(),
        IntervalClock::new(Duration::from_millis(16)),
        tokens,
        options(),
    )
}

fn request(view: &str, coords: &[(f64, f64)]) -> ShowMapRequest {
    ShowMapRequest {
        view: view.parse().unwrap(),
        coordinates: coords
            .iter()
            .map(|(lon, lat)| Coordinate::new(*lon, *lat).unwrap())
            .collect(),
    }
}

#[tokio::test]
async fn show_map_mounts_with_album_panel_settings() {
    let dom = InMemoryDom::new();
    dom.attach_container("map-rome");
    let runtime = HeadlessRuntime::new(dom.clone());
    let controller = controller(runtime.clone(), &dom, MockTokens::default());

    let handle = controller
        .show_map(
            None,
            request("rome", &[(12.49, 41.89), (2.35, 48.86)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(handle.view().as_str(), "rome");
    let records = runtime.mount_records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.container, "map-rome");
    assert_eq!(record.token, "pk.headless");
    assert_eq!(record.config.style, "mapbox://styles/mapbox/light-v9");
    assert_eq!(record.config.zoom, 13.0);
    assert_eq!(record.config.min_zoom, 2.0);
    assert_eq!(record.config.max_zoom, 10.0);
    assert!(!record.config.interactive);
    assert_eq!(record.markers.len(), 2);

    let (bounds, fit) = record.fitted.unwrap();
    assert_eq!(bounds.west, 2.35);
    assert_eq!(bounds.east, 12.49);
    assert_eq!(bounds.south, 41.89);
    assert_eq!(bounds.north, 48.86);
    assert_eq!(fit.padding.top, 65.0);
    assert_eq!(fit.padding.bottom, 50.0);
    assert_eq!(fit.padding.left, 50.0);
    assert_eq!(fit.padding.right, 50.0);
    assert!(!fit.linear);
    assert_eq!(fit.max_zoom, 10.0);
}

#[tokio::test]
async fn second_view_replaces_the_first() {
    let dom = InMemoryDom::new();
    dom.attach_container("map-rome");
    dom.attach_container("map-paris");
    let runtime = HeadlessRuntime::new(dom.clone());
    let controller = controller(runtime.clone(), &dom, MockTokens::default());
    let cancel = CancellationToken::new();

    let first = controller
        .show_map(None, request("rome", &[(12.49, 41.89)]), &cancel)
        .await
        .unwrap();
    let second = controller
        .show_map(Some(first), request("paris", &[(2.35, 48.86)]), &cancel)
        .await
        .unwrap();

    assert_eq!(second.view().as_str(), "paris");
    assert_eq!(runtime.mount_count(), 2);
    assert_eq!(runtime.live_mounts(), 1);
    assert!(runtime.mount_records()[0].torn_down);
    // Only the live instance's canvas and marker remain attached.
    assert_eq!(dom.classed_count(HEADLESS_CLASS_PREFIX), 2);
}

#[tokio::test]
async fn sweep_catches_nodes_a_leaky_teardown_left_behind() {
    let dom = InMemoryDom::new();
    dom.attach_container("map-rome");
    dom.attach_container("map-paris");
    let runtime = HeadlessRuntime::leaky(dom.clone());
    let controller = controller(runtime.clone(), &dom, MockTokens::default());
    let cancel = CancellationToken::new();

    let first = controller
        .show_map(None, request("rome", &[(12.49, 41.89)]), &cancel)
        .await
        .unwrap();
    assert_eq!(dom.classed_count(HEADLESS_CLASS_PREFIX), 2);

    let _second = controller
        .show_map(Some(first), request("paris", &[(2.35, 48.86)]), &cancel)
        .await
        .unwrap();

    assert_eq!(runtime.live_mounts(), 1);
    assert_eq!(dom.classed_count(HEADLESS_CLASS_PREFIX), 2);
}

#[tokio::test]
async fn retire_without_prior_sweeps_stale_nodes() {
    let dom = InMemoryDom::new();
    dom.attach_classed("runamap-canvas");
    let runtime = HeadlessRuntime::new(dom.clone());
    let controller = controller(runtime, &dom, MockTokens::default());

    controller.retire(None).await.unwrap();
    assert_eq!(dom.classed_count(HEADLESS_CLASS_PREFIX), 0);
}

#[tokio::test(start_paused = true)]
async fn show_map_waits_for_a_late_container() {
    let dom = InMemoryDom::new();
    let runtime = HeadlessRuntime::new(dom.clone());
    let controller = controller(runtime.clone(), &dom, MockTokens::default());

    let attacher = {
        let dom = dom.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            dom.attach_container("map-rome");
        })
    };

    let handle = controller
        .show_map(
            None,
            request("rome", &[(12.49, 41.89)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    attacher.await.unwrap();

    assert_eq!(handle.view().as_str(), "rome");
    assert_eq!(runtime.mount_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn show_map_fails_when_the_container_never_appears() {
    let dom = InMemoryDom::new();
    let runtime = HeadlessRuntime::new(dom.clone());
    let controller = controller(runtime.clone(), &dom, MockTokens::default());

    let err = controller
        .show_map(
            None,
            request("ghost", &[(12.49, 41.89)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_matches!(err, RunaError::ContainerUnresolved(id) if id == "map-ghost");
    assert_eq!(runtime.mount_count(), 0);
}

#[tokio::test]
async fn token_failure_mounts_nothing_and_is_retried() {
    let dom = InMemoryDom::new();
    dom.attach_container("map-rome");
    let runtime = HeadlessRuntime::new(dom.clone());
    let tokens = MockTokens {
        calls: Arc::new(AtomicUsize::new(0)),
        fail_first: true,
    };
    let controller = controller(runtime.clone(), &dom, tokens.clone());
    let cancel = CancellationToken::new();

    let err = controller
        .show_map(None, request("rome", &[(12.49, 41.89)]), &cancel)
        .await
        .unwrap_err();
    assert_matches!(err, RunaError::TokenStatus { status: 503, .. });
    assert_eq!(runtime.mount_count(), 0);

    let handle = controller
        .show_map(None, request("rome", &[(12.49, 41.89)]), &cancel)
        .await
        .unwrap();
    assert_eq!(handle.view().as_str(), "rome");
    assert_eq!(tokens.calls.load(Ordering::SeqCst), 2);
    assert_eq!(runtime.mount_count(), 1);
}

#[tokio::test]
async fn token_fetched_once_across_views() {
    let dom = InMemoryDom::new();
    dom.attach_container("map-rome");
    dom.attach_container("map-paris");
    let runtime = HeadlessRuntime::new(dom.clone());
    let tokens = MockTokens::default();
    let controller = controller(runtime, &dom, tokens.clone());
    let cancel = CancellationToken::new();

    let first = controller
        .show_map(None, request("rome", &[(12.49, 41.89)]), &cancel)
        .await
        .unwrap();
    let _second = controller
        .show_map(Some(first), request("paris", &[(2.35, 48.86)]), &cancel)
        .await
        .unwrap();

    assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_album_mounts_without_a_fit() {
    let dom = InMemoryDom::new();
    dom.attach_container("map-empty");
    let runtime = HeadlessRuntime::new(dom.clone());
    let controller = controller(runtime.clone(), &dom, MockTokens::default());

    controller
        .show_map(None, request("empty", &[]), &CancellationToken::new())
        .await
        .unwrap();

    let records = runtime.mount_records();
    assert!(records[0].markers.is_empty());
    assert!(records[0].fitted.is_none());
}

#[tokio::test]
async fn cancellation_stops_the_container_wait() {
    let dom = InMemoryDom::new();
    let runtime = HeadlessRuntime::new(dom.clone());
    let controller = controller(runtime.clone(), &dom, MockTokens::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = controller
        .show_map(None, request("rome", &[(12.49, 41.89)]), &cancel)
        .await
        .unwrap_err();

    assert_matches!(err, RunaError::Cancelled);
    assert_eq!(runtime.mount_count(), 0);
}
