//! Integration supervisor (spec §3/§4.5).
//!
//! Ported from `original_source/integrations/ip_cams_to_cdf/process.go`'s
//! `CameraImagesToCdf`: one task per camera, a state machine driven through
//! [`crate::state_tracker::StateTracker`], retry/backoff on upload failure,
//! an event-stream reconnect loop, and a periodic self-monitoring ticker.
//! Every per-camera task body is wrapped so a panic inside it is recovered
//! and reported rather than taking the whole process down, mirroring the
//! original's `defer recover()` pattern with `std::panic::AssertUnwindSafe`
//! + `FutureExt::catch_unwind`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::driver::{default_auth_for, CameraDriver, DriverContext, DriverRegistry};
use crate::error::{EdgeError, EdgeResult};
use crate::event_bus::EventBus;
use crate::models::{CameraConfig, CameraMode, CameraState, IntegrationConfig, ProcessorState, RunReport, RunStatus};
use crate::platform::PlatformClient;
use crate::secrets::SecretStore;
use crate::state_tracker::StateTracker;

/// Sleep applied after a failed run before the next attempt (spec §4.5).
const FAILURE_BACKOFF: Duration = Duration::from_secs(20);

/// Self-monitoring ticker interval (spec §4.5.2).
const SELF_MONITORING_INTERVAL: Duration = Duration::from_secs(60);

/// Bound on event-stream reconnect attempts is `10 * retry_count` (spec
/// §4.5.1); this is the sleep between attempts.
const EVENT_STREAM_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Timeout waiting for a processor to converge on `Stopped` during shutdown
/// (spec §4.5.3).
const STOP_CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(120);

struct RunCounters {
    consecutive_successes: AtomicU64,
    consecutive_failures: AtomicU64,
    /// Successes/failures since the last self-monitoring tick (spec §4.5.2),
    /// tracked separately from the consecutive counters above so the
    /// heartbeat's per-window reset never disturbs the retry/backoff logic.
    window_successes: AtomicU64,
    window_failures: AtomicU64,
}

impl RunCounters {
    fn new() -> Self {
        Self {
            consecutive_successes: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            window_successes: AtomicU64::new(0),
            window_failures: AtomicU64::new(0),
        }
    }

    fn record_success(&self) {
        self.consecutive_successes.fetch_add(1, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.window_successes.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        self.window_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Drain the per-window counters, resetting both to zero.
    fn take_window(&self) -> (u64, u64) {
        (
            self.window_successes.swap(0, Ordering::SeqCst),
            self.window_failures.swap(0, Ordering::SeqCst),
        )
    }
}

/// Per-camera supervised processor.
struct Processor {
    camera: CameraConfig,
    counters: RunCounters,
}

/// Supervises every camera processor for one integration instance: starts a
/// polling task and (if enabled) an event-stream task per enabled camera,
/// applies config changes by diffing against the previously loaded config,
/// and tears everything down on stop.
pub struct IntegrationSupervisor {
    integration_name: String,
    platform: Arc<dyn PlatformClient>,
    secrets: Arc<SecretStore>,
    drivers: Arc<DriverRegistry>,
    state_tracker: Arc<StateTracker>,
    event_bus: Arc<EventBus>,
    processors: RwLock<HashMap<u64, Arc<Processor>>>,
    config: RwLock<Option<IntegrationConfig>>,
}

/// Correlation fields carried on an out-of-band run triggered by an app (e.g.
/// the event-burst capture app), surfaced in the run report message for
/// observability. Spec §4.7's `ExecuteProcessorRunByCameraID` metadata.
#[derive(Debug, Clone, Default)]
pub struct RunMetadata {
    pub event_correlation_id: Option<i64>,
    pub image_sync_id: Option<i64>,
}

impl IntegrationSupervisor {
    pub fn new(
        integration_name: String,
        platform: Arc<dyn PlatformClient>,
        secrets: Arc<SecretStore>,
        drivers: Arc<DriverRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            integration_name,
            platform,
            secrets,
            drivers,
            state_tracker: Arc::new(StateTracker::new()),
            event_bus,
            processors: RwLock::new(HashMap::new()),
            config: RwLock::new(None),
        }
    }

    pub fn state_tracker(&self) -> Arc<StateTracker> {
        self.state_tracker.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Apply a config document: start processors for newly-added enabled
    /// cameras, stop processors for cameras removed or disabled, and leave
    /// unchanged cameras running untouched.
    pub fn apply_config(self: Arc<Self>, new_config: IntegrationConfig) {
        let previous = self.config.read().clone();
        if previous.as_ref() == Some(&new_config) {
            return;
        }

        let existing_ids: Vec<u64> = self.processors.read().keys().copied().collect();
        let wanted_ids: Vec<u64> = new_config
            .cameras
            .iter()
            .filter(|c| c.state == CameraState::Enabled)
            .map(|c| c.id)
            .collect();

        for id in existing_ids {
            if !wanted_ids.contains(&id) {
                self.stop_processor(id);
            }
        }

        for camera in &new_config.cameras {
            if camera.state != CameraState::Enabled {
                continue;
            }
            if self.processors.read().contains_key(&camera.id) {
                continue;
            }
            self.clone()
                .start_processor(camera.clone(), new_config.retry_count, new_config.retry_interval_secs);
        }

        *self.config.write() = Some(new_config);
    }

    fn start_processor(self: Arc<Self>, camera: CameraConfig, retry_count: u32, retry_interval_secs: u64) {
        let id = camera.id;
        let processor = Arc::new(Processor {
            camera: camera.clone(),
            counters: RunCounters::new(),
        });
        self.processors.write().insert(id, processor.clone());

        self.state_tracker.register(id);
        self.state_tracker.set_target_state(id, ProcessorState::Running);
        self.state_tracker.set_current_state(id, ProcessorState::Starting);

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor
                .run_processor_loop(processor, retry_count, retry_interval_secs)
                .await;
        });

        if camera.enable_camera_event_stream {
            let supervisor = self.clone();
            let camera = camera.clone();
            tokio::spawn(async move {
                supervisor.run_event_stream_loop(camera, retry_count).await;
            });
        }

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.run_self_monitoring_loop(id).await;
        });
    }

    fn stop_processor(&self, id: u64) {
        self.state_tracker.set_target_state(id, ProcessorState::Stopped);
        self.processors.write().remove(&id);
    }

    async fn run_processor_loop(self: Arc<Self>, processor: Arc<Processor>, retry_count: u32, retry_interval_secs: u64) {
        let id = processor.camera.id;
        let camera = &processor.camera;

        let mut driver = match self.drivers.create(&camera.model) {
            Ok(d) => d,
            Err(EdgeError::UnsupportedModel(model)) => {
                // Terminal: no retry, matches spec §4.5 step 2 / §7 exactly.
                error!(camera = id, model = %model, "unsupported camera model, processor stopped");
                self.report_run(&build_external_id(camera), RunStatus::Failure, &format!("unsupported camera model: {model}"))
                    .await;
                self.state_tracker.set_current_state(id, ProcessorState::Stopped);
                return;
            }
            Err(e) => {
                error!(camera = id, error = %e, "failed to construct driver, processor stopped");
                self.state_tracker.set_current_state(id, ProcessorState::Stopped);
                return;
            }
        };

        let resolved_password = self.secrets.get_secret(&camera.password);
        let ctx = DriverContext::from_camera_config(camera, resolved_password, default_auth_for(camera));
        if let Err(e) = driver.configure(ctx).await {
            error!(camera = id, error = %e, "driver configure failed, processor stopped");
            self.state_tracker.set_current_state(id, ProcessorState::Stopped);
            return;
        }

        // Service-discovery manifest upload (spec §4.5 step 5), best-effort.
        let manifest_external_id = if camera.external_id.is_empty() {
            camera.name.clone()
        } else {
            camera.external_id.clone()
        };
        let manifest = driver.get_camera_capabilities_manifest();
        if let Err(e) = self.platform.upload_capabilities_manifest(&manifest_external_id, &manifest).await {
            warn!(camera = id, error = %e, "capabilities manifest upload failed");
        }

        self.state_tracker.set_current_state(id, ProcessorState::Running);
        info!(camera = id, "processor started");

        loop {
            if self.state_tracker.get_target_state(id) == ProcessorState::Stopped {
                break;
            }

            // Negative polling interval: event-driven only, no periodic
            // capture loop at all (spec §4.5 step 6 / §8 boundary) — checked
            // before the first run, not after, so such a camera never
            // executes a poll-triggered capture.
            let Some(interval) = camera.effective_polling_interval_secs() else {
                break;
            };

            let outcome = std::panic::AssertUnwindSafe(self.execute_processor_run(
                driver.as_mut(),
                camera,
                retry_count,
                retry_interval_secs,
                None,
            ))
            .catch_unwind()
            .await;

            match outcome {
                Ok(Ok(())) => processor.counters.record_success(),
                Ok(Err(e)) => {
                    warn!(camera = id, error = %e, "processor run failed");
                    processor.counters.record_failure();
                }
                Err(_) => {
                    error!(camera = id, "processor run panicked, recovering");
                    processor.counters.record_failure();
                }
            }

            // A failed run already slept FAILURE_BACKOFF (spec §4.5's 20s
            // failure sleep happens inside execute_processor_run's own
            // error paths); a successful run waits out the polling interval.
            let failed_last = processor.counters.consecutive_failures.load(Ordering::SeqCst) > 0;
            if !failed_last {
                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
        }

        if let Err(e) = driver.close().await {
            warn!(camera = id, error = %e, "driver close failed");
        }

        self.state_tracker.set_current_state(id, ProcessorState::Stopped);
        info!(camera = id, "processor stopped");
    }

    /// One capture-and-upload attempt, with linear-multiplicative retry
    /// against the upload step. `driver` must already be configured; this
    /// function never constructs or closes it — that's the caller's scoped
    /// responsibility (spec §5's "every start pairs with a close"), so the
    /// same connection is reused across polling iterations instead of being
    /// torn down and rebuilt every run. `metadata` is only set for
    /// out-of-band runs triggered by an app via
    /// [`IntegrationSupervisor::execute_processor_run_by_camera_id`].
    async fn execute_processor_run(
        &self,
        driver: &mut dyn CameraDriver,
        camera: &CameraConfig,
        retry_count: u32,
        retry_interval_secs: u64,
        metadata: Option<RunMetadata>,
    ) -> EdgeResult<()> {
        let external_id = build_external_id(camera);

        let image = match driver.extract_image().await {
            Ok(image) => image,
            Err(e) => {
                // Spec §4.5/§7: a driver fetch failure is reported, not
                // silently retried; the caller's polling loop applies the
                // 20s backoff before the next attempt.
                self.report_run(&external_id, RunStatus::Failure, &format!("image capture failed: {e}")).await;
                return Err(e);
            }
        };
        if image.body.is_empty() {
            // No new image is not a failure — skip this run quietly.
            return Ok(());
        }

        let file_name = build_file_name(camera);

        let mut attempt = 0u32;
        let mut last_err = None;
        loop {
            match self
                .platform
                .upload_file(&external_id, &file_name, camera.linked_asset_id, &image.format, &image.body)
                .await
            {
                Ok(_) => {
                    last_err = None;
                    break;
                }
                Err(e) if is_duplicate(&e) => {
                    // Platform already has this external ID: treat as success,
                    // matching the original's "duplicate upload is not an error".
                    last_err = None;
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }

            attempt += 1;
            if attempt > retry_count {
                break;
            }
            tokio::time::sleep(Duration::from_secs(retry_interval_secs * attempt as u64)).await;
        }

        if camera.mode == CameraMode::CameraMetadata {
            // Best-effort: fetch and report, but metadata extraction failing
            // doesn't fail the overall run (the image already uploaded).
            match driver.extract_metadata().await {
                Ok(metadata) => {
                    let metadata_external_id = format!("{external_id}_metadata");
                    let body = serde_json::to_vec(&metadata).unwrap_or_default();
                    if let Err(e) = self
                        .platform
                        .upload_file(&metadata_external_id, &file_name, camera.linked_asset_id, "application/json", &body)
                        .await
                    {
                        warn!(camera = camera.id, error = %e, "best-effort metadata upload failed");
                    }
                }
                Err(e) => {
                    debug!(camera = camera.id, error = %e, "metadata extraction failed, continuing (best-effort)");
                }
            }
        }

        driver.commit().await?;

        let message = match &metadata {
            Some(m) => format!(
                "run completed (event_correlation_id={:?}, image_sync_id={:?})",
                m.event_correlation_id, m.image_sync_id
            ),
            None => "run completed".to_string(),
        };

        if let Some(err) = last_err {
            self.report_run(&external_id, RunStatus::Failure, &err.to_string()).await;
            return Err(err);
        }

        self.report_run(&external_id, RunStatus::Success, &message).await;
        Ok(())
    }

    /// Reports a run/heartbeat outcome to the platform, unless the current
    /// config has `disable_run_reporting` set (spec §4.5.2).
    async fn report_run(&self, external_id: &str, status: RunStatus, message: &str) {
        if self.config.read().as_ref().map(|c| c.disable_run_reporting).unwrap_or(false) {
            return;
        }
        let report = RunReport {
            external_id: external_id.to_string(),
            status,
            message: message.to_string(),
        };
        if let Err(e) = self.platform.report_run_status(report).await {
            warn!(error = %e, "failed to report run status");
        }
    }

    /// Maintains a camera's push event-stream connection, reconnecting on
    /// failure up to `10 * retry_count` attempts (spec §4.5.1) before giving
    /// up on that camera's event stream for this supervisor's lifetime.
    async fn run_event_stream_loop(self: Arc<Self>, camera: CameraConfig, retry_count: u32) {
        let max_attempts = 10 * retry_count.max(1);
        let mut attempt = 0u32;

        loop {
            if self.state_tracker.get_target_state(camera.id) == ProcessorState::Stopped {
                return;
            }
            if attempt >= max_attempts {
                error!(camera = camera.id, attempts = attempt, "event stream exhausted reconnect attempts, giving up");
                return;
            }

            let driver_result = self.drivers.create(&camera.model);
            let mut driver = match driver_result {
                Ok(d) => d,
                Err(e) => {
                    warn!(camera = camera.id, error = %e, "no driver for event stream");
                    return;
                }
            };

            let resolved_password = self.secrets.get_secret(&camera.password);
            let ctx = DriverContext::from_camera_config(&camera, resolved_password, default_auth_for(&camera));
            if let Err(e) = driver.configure(ctx).await {
                warn!(camera = camera.id, error = %e, "event stream driver configure failed");
                attempt += 1;
                tokio::time::sleep(EVENT_STREAM_RECONNECT_BACKOFF).await;
                continue;
            }

            let mut rx = match driver.subscribe_to_event_stream(&camera.event_filters).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(camera = camera.id, error = %e, "event stream subscribe failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(EVENT_STREAM_RECONNECT_BACKOFF).await;
                    continue;
                }
            };

            // A successful connection resets the attempt counter.
            attempt = 0;
            while let Some(event) = rx.recv().await {
                let bus_topic = format!("{}/{}", camera.id, event.topic);
                self.event_bus.try_publish(&bus_topic, event.clone());

                let asset_id = camera.linked_asset_id;
                let external_id = format!("{}-{}", camera.id, event.timestamp_ms);
                if let Err(e) = self
                    .platform
                    .create_event(&external_id, asset_id, &event.event_type, event.timestamp_ms)
                    .await
                {
                    warn!(camera = camera.id, error = %e, "failed to create event on platform");
                }
            }
            // Channel closed: the underlying connection dropped, reconnect.
            attempt += 1;
        }
    }

    /// Self-monitoring heartbeat (spec §4.5.2): once per tick, drain this
    /// camera's since-last-tick success/failure counts and report a
    /// Success/Failure/Seen heartbeat to the platform so a quiet camera is
    /// still visible, not just a failing one.
    async fn run_self_monitoring_loop(self: Arc<Self>, camera_id: u64) {
        loop {
            tokio::time::sleep(SELF_MONITORING_INTERVAL).await;
            if self.state_tracker.get_target_state(camera_id) == ProcessorState::Stopped {
                return;
            }
            let Some(processor) = self.processors.read().get(&camera_id).cloned() else {
                return;
            };
            let (successes, failures) = processor.counters.take_window();

            let (status, message) = if failures > 0 && successes == 0 {
                (RunStatus::Failure, format!("{failures} consecutive failure(s) in the last monitoring window"))
            } else if successes > 0 {
                (RunStatus::Success, format!("{successes} run(s) succeeded in the last monitoring window"))
            } else {
                (RunStatus::Seen, "no runs in the last monitoring window".to_string())
            };

            if failures > 0 {
                warn!(camera = camera_id, failures, "self-monitoring: camera unhealthy");
            } else {
                info!(camera = camera_id, successes, "self-monitoring: camera healthy");
            }

            let external_id = build_external_id(&processor.camera);
            self.report_run(&external_id, status, &message).await;
        }
    }

    /// Stop every processor and wait (bounded) for each to converge on
    /// `Stopped` (spec §4.5.3).
    pub async fn stop_and_clean(&self) -> EdgeResult<()> {
        let ids: Vec<u64> = self.processors.read().keys().copied().collect();
        for id in &ids {
            self.state_tracker.set_target_state(*id, ProcessorState::Stopped);
        }
        for id in ids {
            if let Err(e) = self
                .state_tracker
                .wait_for_target_state(id, ProcessorState::Stopped, Some(STOP_CONVERGENCE_TIMEOUT))
                .await
            {
                warn!(camera = id, error = %e, "processor did not converge on stop within timeout");
            }
        }
        self.processors.write().clear();
        Ok(())
    }

    /// Run a single camera's capture-and-upload pipeline out of band (spec
    /// §4.7's `ExecuteProcessorRunByCameraID` hook), independent of the
    /// polling loop. Used by apps such as the event-burst capture app.
    pub async fn execute_processor_run_by_camera_id(
        &self,
        camera_id: u64,
        retry_count: u32,
        retry_interval_secs: u64,
        metadata: RunMetadata,
    ) -> EdgeResult<()> {
        let processor = self
            .processors
            .read()
            .get(&camera_id)
            .cloned()
            .ok_or_else(|| EdgeError::not_found(format!("processor {camera_id}")))?;
        let camera = &processor.camera;

        let mut driver = self.drivers.create(&camera.model)?;
        let resolved_password = self.secrets.get_secret(&camera.password);
        let ctx = DriverContext::from_camera_config(camera, resolved_password, default_auth_for(camera));
        driver.configure(ctx).await?;

        let result = self
            .execute_processor_run(driver.as_mut(), camera, retry_count, retry_interval_secs, Some(metadata))
            .await;

        if let Err(e) = driver.close().await {
            warn!(camera = camera_id, error = %e, "driver close failed");
        }

        result
    }

    pub fn integration_name(&self) -> &str {
        &self.integration_name
    }
}

/// `"<CameraName>_<UnixNano>"` per spec §4.5's `executeProcessorRun`.
fn build_external_id(camera: &CameraConfig) -> String {
    let unix_nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}_{}", camera.name, unix_nanos)
}

/// `"<CameraName> <RFC3339.millis>.jpeg"` per spec §4.5's `executeProcessorRun`.
fn build_file_name(camera: &CameraConfig) -> String {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    format!("{} {}.jpeg", camera.name, timestamp)
}

fn is_duplicate(err: &EdgeError) -> bool {
    matches!(err, EdgeError::Platform(msg) if msg.to_lowercase().contains("duplicate"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CameraState, EventFilter};
    use crate::platform::test_support::RecordingPlatformClient;

    fn sample_camera(id: u64) -> CameraConfig {
        CameraConfig {
            id,
            external_id: String::new(),
            name: format!("cam{id}"),
            model: "axis".into(),
            address: "http://cam".into(),
            username: "admin".into(),
            password: String::new(),
            mode: CameraMode::Camera,
            polling_interval: 1,
            state: CameraState::Enabled,
            linked_asset_id: 0,
            enable_camera_event_stream: false,
            event_filters: Vec::<EventFilter>::new(),
        }
    }

    #[test]
    fn duplicate_upload_error_is_detected_case_insensitively() {
        let err = EdgeError::platform("Duplicate externalId");
        assert!(is_duplicate(&err));
        let other = EdgeError::platform("connection reset");
        assert!(!is_duplicate(&other));
    }

    #[test]
    fn external_id_has_camera_name_prefix() {
        let camera = sample_camera(1);
        let external_id = build_external_id(&camera);
        assert!(external_id.starts_with("cam1_"));
    }

    #[test]
    fn file_name_has_camera_name_prefix_and_jpeg_suffix() {
        let camera = sample_camera(1);
        let file_name = build_file_name(&camera);
        assert!(file_name.starts_with("cam1 "));
        assert!(file_name.ends_with(".jpeg"));
    }

    #[tokio::test]
    async fn apply_config_stops_processor_for_disabled_camera() {
        let platform = Arc::new(RecordingPlatformClient::default());
        let supervisor = Arc::new(IntegrationSupervisor::new(
            "ip_cams".to_string(),
            platform,
            Arc::new(SecretStore::new()),
            Arc::new(DriverRegistry::with_builtin_drivers()),
            Arc::new(EventBus::new()),
        ));

        let mut config = IntegrationConfig {
            cameras: vec![sample_camera(1)],
            ..Default::default()
        };
        supervisor.apply_config(config.clone());
        assert_eq!(
            supervisor.state_tracker().get_target_state(1),
            ProcessorState::Running
        );

        config.cameras[0].state = CameraState::Disabled;
        supervisor.apply_config(config);
        assert_eq!(
            supervisor.state_tracker().get_target_state(1),
            ProcessorState::Stopped
        );
    }
}
