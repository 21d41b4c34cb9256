//! End-to-end scenarios from spec.md §8, exercised against a stub
//! [`CameraDriver`] and the in-memory [`RecordingPlatformClient`] test
//! double rather than real network I/O.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use edge_core::driver::{CameraDriver, DriverContext, DriverRegistry};
use edge_core::error::EdgeResult;
use edge_core::event_bus::EventBus;
use edge_core::models::{
    CameraConfig, CameraEvent, CameraMode, CameraState, EventFilter, Image, IntegrationConfig, Manifest,
    ProcessorState,
};
use edge_core::platform::test_support::RecordingPlatformClient;
use edge_core::secrets::SecretStore;
use edge_core::supervisor::IntegrationSupervisor;

/// Always returns a one-byte image.
struct StubCameraDriver;

impl StubCameraDriver {
    fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CameraDriver for StubCameraDriver {
    async fn configure(&mut self, _ctx: DriverContext) -> EdgeResult<()> {
        Ok(())
    }

    async fn extract_image(&self) -> EdgeResult<Image> {
        Ok(Image {
            body: vec![0x01],
            format: "image/jpeg".to_string(),
            transaction_id: None,
            external_id: None,
        })
    }

    async fn extract_metadata(&self) -> EdgeResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn subscribe_to_event_stream(&self, _filters: &[EventFilter]) -> EdgeResult<mpsc::Receiver<CameraEvent>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    fn get_camera_capabilities_manifest(&self) -> Vec<Manifest> {
        Vec::new()
    }
}

fn sample_camera(id: u64, polling_interval: i64) -> CameraConfig {
    CameraConfig {
        id,
        external_id: String::new(),
        name: format!("cam{id}"),
        model: "stub".to_string(),
        address: "http://cam".to_string(),
        username: "u".to_string(),
        password: String::new(),
        mode: CameraMode::Camera,
        polling_interval,
        state: CameraState::Enabled,
        linked_asset_id: id,
        enable_camera_event_stream: false,
        event_filters: Vec::new(),
    }
}

fn stub_registry() -> Arc<DriverRegistry> {
    let mut registry = DriverRegistry::new();
    registry.register("stub", || Box::new(StubCameraDriver::new()));
    Arc::new(registry)
}

/// Scenario 1: single camera, periodic polling. After a few seconds the
/// uploader has been called at least twice, each with the configured asset
/// id and an external id prefixed with the camera name.
#[tokio::test]
async fn single_camera_periodic_upload() {
    let platform = Arc::new(RecordingPlatformClient::default());
    let supervisor = Arc::new(IntegrationSupervisor::new(
        "ip_cams".to_string(),
        platform.clone(),
        Arc::new(SecretStore::new()),
        stub_registry(),
        Arc::new(EventBus::new()),
    ));

    supervisor.clone().apply_config(IntegrationConfig {
        cameras: vec![sample_camera(1, 1)],
        ..Default::default()
    });

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let uploads = platform.uploads.lock();
    assert!(uploads.len() >= 2, "expected at least 2 uploads, got {}", uploads.len());
    for (external_id, _file_name, asset_id, _content_type, _body) in uploads.iter() {
        assert_eq!(*asset_id, 1);
        assert!(external_id.starts_with("cam1_"), "external id was {external_id}");
    }
}

/// Scenario 2: a camera disabled mid-flight converges to `Stopped` and stops
/// producing uploads.
#[tokio::test]
async fn camera_disabled_mid_flight_stops_processor() {
    let platform = Arc::new(RecordingPlatformClient::default());
    let supervisor = Arc::new(IntegrationSupervisor::new(
        "ip_cams".to_string(),
        platform.clone(),
        Arc::new(SecretStore::new()),
        stub_registry(),
        Arc::new(EventBus::new()),
    ));

    let mut config = IntegrationConfig {
        cameras: vec![sample_camera(7, 1)],
        ..Default::default()
    };
    supervisor.clone().apply_config(config.clone());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(platform.uploads.lock().len() >= 1);

    config.cameras[0].state = CameraState::Disabled;
    supervisor.clone().apply_config(config);

    let state_tracker = supervisor.state_tracker();
    let converged = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if state_tracker.get_current_state(7) == ProcessorState::Stopped {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "camera 7 did not converge on Stopped in time");

    let uploads_at_stop = platform.uploads.lock().len();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        platform.uploads.lock().len(),
        uploads_at_stop,
        "no further uploads should occur once the camera is disabled"
    );
}

/// Scenario 4: a duplicate-external-id upload error is treated as a success,
/// not retried with backoff.
#[tokio::test]
async fn duplicate_upload_counts_as_success_without_retry() {
    struct DuplicateOnceThenOkClient {
        inner: Arc<RecordingPlatformClient>,
        returned_duplicate: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl edge_core::platform::PlatformClient for DuplicateOnceThenOkClient {
        async fn fetch_config(&self, extractor_id: &str) -> EdgeResult<edge_core::models::StaticConfig> {
            self.inner.fetch_config(extractor_id).await
        }

        async fn upload_file(
            &self,
            external_id: &str,
            file_name: &str,
            asset_id: u64,
            content_type: &str,
            body: &[u8],
        ) -> EdgeResult<String> {
            if !self.returned_duplicate.swap(true, Ordering::SeqCst) {
                return Err(edge_core::error::EdgeError::platform("Duplicate external ids"));
            }
            self.inner.upload_file(external_id, file_name, asset_id, content_type, body).await
        }

        async fn report_run_status(&self, report: edge_core::models::RunReport) -> EdgeResult<()> {
            self.inner.report_run_status(report).await
        }

        async fn create_event(&self, external_id: &str, asset_id: u64, event_type: &str, timestamp_ms: i64) -> EdgeResult<()> {
            self.inner.create_event(external_id, asset_id, event_type, timestamp_ms).await
        }

        async fn upload_capabilities_manifest(
            &self,
            camera_external_id: &str,
            manifests: &[edge_core::models::Manifest],
        ) -> EdgeResult<()> {
            self.inner.upload_capabilities_manifest(camera_external_id, manifests).await
        }
    }

    let inner = Arc::new(RecordingPlatformClient::default());
    let platform = Arc::new(DuplicateOnceThenOkClient {
        inner: inner.clone(),
        returned_duplicate: std::sync::atomic::AtomicBool::new(false),
    });

    let supervisor = Arc::new(IntegrationSupervisor::new(
        "ip_cams".to_string(),
        platform,
        Arc::new(SecretStore::new()),
        stub_registry(),
        Arc::new(EventBus::new()),
    ));
    supervisor.clone().apply_config(IntegrationConfig {
        cameras: vec![sample_camera(9, 1)],
        ..Default::default()
    });

    tokio::time::sleep(Duration::from_millis(300)).await;

    let reports = inner.reports.lock();
    assert!(
        reports.iter().any(|r| r.status == edge_core::models::RunStatus::Success),
        "expected a success report for the duplicate-as-success run, got {reports:?}"
    );
}

/// Boundary (spec §4.5 step 6 / §8): a negative `PollingInterval` camera is
/// event-driven only and must never execute a poll-triggered capture.
#[tokio::test]
async fn negative_polling_interval_never_polls() {
    let platform = Arc::new(RecordingPlatformClient::default());
    let supervisor = Arc::new(IntegrationSupervisor::new(
        "ip_cams".to_string(),
        platform.clone(),
        Arc::new(SecretStore::new()),
        stub_registry(),
        Arc::new(EventBus::new()),
    ));

    supervisor.clone().apply_config(IntegrationConfig {
        cameras: vec![sample_camera(11, -1)],
        ..Default::default()
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(
        platform.uploads.lock().is_empty(),
        "an event-driven-only camera must never produce a poll-triggered upload"
    );
}

/// Scenario: `stop_and_clean` converges every processor to `Stopped` and
/// empties the processor map (spec §4.5.3 / §8 invariant).
#[tokio::test]
async fn stop_and_clean_converges_all_processors() {
    let platform = Arc::new(RecordingPlatformClient::default());
    let supervisor = Arc::new(IntegrationSupervisor::new(
        "ip_cams".to_string(),
        platform,
        Arc::new(SecretStore::new()),
        stub_registry(),
        Arc::new(EventBus::new()),
    ));

    supervisor.clone().apply_config(IntegrationConfig {
        cameras: vec![sample_camera(1, 1), sample_camera(2, 1)],
        ..Default::default()
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    supervisor.stop_and_clean().await.unwrap();

    let tracker = supervisor.state_tracker();
    assert_eq!(tracker.get_current_state(1), ProcessorState::Stopped);
    assert_eq!(tracker.get_current_state(2), ProcessorState::Stopped);
}
