//! Event-driven micro-apps (spec §3/§4.7).
//!
//! `App` and `AppManager` are ported from
//! `original_source/apps/core/manager.go`'s `AppManager`/app interface: raw
//! JSON per-instance configuration, dependency resolution against the
//! integration set, log-and-continue on a missing dependency, then start.
//!
//! [`EventBurstCaptureApp`] is the reference app, ported from
//! `original_source/apps/lib/events_cam_capture.go` — *except* for its
//! worker-count bookkeeping. The original increments/decrements a bare `int`
//! field from multiple goroutines with no lock while protecting its other
//! mutable fields (`lastEvent`, elapsed-time accumulator) with a mutex; this
//! is a real, confirmed data race in the source material. This port uses an
//! atomic counter for the worker count instead, alongside the mutex used for
//! everything else, and must not be "fixed" back to the unsynchronized form.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{EdgeError, EdgeResult};
use crate::event_bus::EventBus;
use crate::models::{AppConfiguration, AppDependencies, CameraEvent, RunReport, RunStatus};
use crate::platform::PlatformClient;
use crate::supervisor::{IntegrationSupervisor, RunMetadata};

/// Poll interval while the capture loop waits for a free worker slot (spec
/// §4.7).
const WORKER_SLOT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A resolved integration an app can bind to: its event bus (to subscribe to
/// camera events) and its supervisor (to trigger out-of-band processor runs).
#[derive(Clone)]
pub struct IntegrationHandle {
    pub bus: Arc<EventBus>,
    pub supervisor: Arc<IntegrationSupervisor>,
}

/// Capability surface every micro-app implements.
#[async_trait]
pub trait App: Send + Sync {
    /// Apply this instance's raw JSON configuration block.
    fn configure_from_raw(&mut self, configuration: &serde_json::Value) -> EdgeResult<()>;

    /// Receive a handle to an integration this app depends on, resolved by
    /// name from [`AppManager::load_apps_from_raw_config`].
    fn configure_integration(&mut self, name: &str, handle: IntegrationHandle);

    /// Integration names this instance needs wired via
    /// [`App::configure_integration`] before [`App::start`].
    fn get_dependencies(&self) -> AppDependencies;

    async fn start(&self) -> EdgeResult<()>;

    async fn stop(&self) -> EdgeResult<()>;
}

type AppConstructor = fn(Arc<dyn PlatformClient>) -> Box<dyn App>;

/// Loads and wires app instances from raw config, mirroring
/// `AppManager.LoadAppsFromRawConfig`'s behavior: a missing dependency is
/// logged and the app is still started, minus that integration.
pub struct AppManager {
    platform: Arc<dyn PlatformClient>,
    constructors: HashMap<String, AppConstructor>,
    apps: Mutex<HashMap<String, Box<dyn App>>>,
}

impl AppManager {
    pub fn new(platform: Arc<dyn PlatformClient>) -> Self {
        let mut manager = Self {
            platform,
            constructors: HashMap::new(),
            apps: Mutex::new(HashMap::new()),
        };
        manager.register_app_type("event_burst_capture", |platform| {
            Box::new(EventBurstCaptureApp::new(platform))
        });
        manager
    }

    pub fn register_app_type(&mut self, app_name: &str, ctor: AppConstructor) {
        self.constructors.insert(app_name.to_string(), ctor);
    }

    /// Build, configure, wire, and start every app in `configs`. Integration
    /// handles available to wire in are supplied via `integrations`; an app
    /// naming one that isn't present is logged and skipped, not fatal.
    pub async fn load_apps_from_raw_config(
        &self,
        configs: &[AppConfiguration],
        integrations: &HashMap<String, IntegrationHandle>,
    ) -> EdgeResult<()> {
        for config in configs {
            let ctor = match self.constructors.get(&config.app_name) {
                Some(c) => *c,
                None => {
                    warn!(app = %config.app_name, "no app registered under this name, skipping");
                    continue;
                }
            };

            let mut app = ctor(self.platform.clone());
            if let Err(e) = app.configure_from_raw(&config.configurations) {
                warn!(app = %config.app_name, error = %e, "app config invalid, skipping");
                continue;
            }

            let deps = app.get_dependencies();
            for integration_name in &deps.integrations {
                match integrations.get(integration_name) {
                    Some(handle) => app.configure_integration(integration_name, handle.clone()),
                    None => warn!(
                        app = %config.app_name,
                        integration = %integration_name,
                        "app depends on an integration that isn't configured, starting without it"
                    ),
                }
            }

            match app.start().await {
                Ok(()) => {
                    self.apps.lock().insert(config.instance_id.clone(), app);
                }
                Err(e) => warn!(app = %config.app_name, instance = %config.instance_id, error = %e, "app failed to start, skipping"),
            }
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> EdgeResult<()> {
        let instance_ids: Vec<String> = self.apps.lock().keys().cloned().collect();
        for id in instance_ids {
            let app = self.apps.lock().remove(&id);
            if let Some(app) = app {
                app.stop().await?;
            }
        }
        Ok(())
    }
}

/// Reference app config (spec §4.7): trigger topics to debounce on, the fixed
/// set of cameras to burst-capture, how long a burst runs, the spacing
/// between capture iterations, and the worker concurrency bound.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EventBurstCaptureConfig {
    #[serde(default)]
    pub trigger_topics: Vec<String>,
    #[serde(default)]
    pub list_of_target_cameras: Vec<u64>,
    #[serde(default)]
    pub capture_duration_sec: f64,
    #[serde(default)]
    pub delay_between_capture: f64,
    #[serde(default = "default_max_parallel_workers")]
    pub max_parallel_workers: u32,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

fn default_max_parallel_workers() -> u32 {
    1
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_interval_secs() -> u64 {
    10
}

impl EventBurstCaptureConfig {
    /// `MaxParallelWorkers = 0` normalizes to 1 (spec §8 boundary).
    fn normalized_max_parallel_workers(&self) -> u32 {
        self.max_parallel_workers.max(1)
    }
}

/// Mutable state shared between the app handle and its spawned dispatch
/// loop. Held behind an `Arc` so `start(&self)` can hand the loop task its
/// own owned handle without requiring `Arc<Self>` at the trait boundary.
struct EventBurstCaptureState {
    config: EventBurstCaptureConfig,
    platform: Arc<dyn PlatformClient>,
    supervisor: Mutex<Option<Arc<IntegrationSupervisor>>>,
    /// "Latest event wins" single-slot mailbox (spec's debouncer design note).
    last_event: Mutex<Option<CameraEvent>>,
    /// Seconds of capture-loop time accounted so far this burst.
    elapsed_sec: Mutex<f64>,
    active_workers: AtomicI64,
    capture_loop_running: std::sync::atomic::AtomicBool,
}

impl EventBurstCaptureState {
    /// Consumes triggering events: overwrite the mailbox, reset the elapsed
    /// accumulator, and (if idle) start a new capture loop (spec §4.7).
    async fn on_event(self: &Arc<Self>, event: CameraEvent) {
        *self.last_event.lock() = Some(event);
        *self.elapsed_sec.lock() = 0.0;

        if !self.capture_loop_running.swap(true, Ordering::SeqCst) {
            let state = self.clone();
            tokio::spawn(async move {
                state.run_capture_loop().await;
                state.capture_loop_running.store(false, Ordering::SeqCst);
            });
        }
    }

    async fn run_capture_loop(self: &Arc<Self>) {
        let max_workers = self.config.normalized_max_parallel_workers() as i64;

        loop {
            let image_sync_id = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as i64;

            for &camera_id in &self.config.list_of_target_cameras {
                if self.active_workers.load(Ordering::SeqCst) >= max_workers {
                    self.report_worker_limit_reached(camera_id).await;
                }
                while self.active_workers.load(Ordering::SeqCst) >= max_workers {
                    tokio::time::sleep(WORKER_SLOT_POLL_INTERVAL).await;
                }

                let event_correlation_id = self.last_event.lock().as_ref().map(|e| e.timestamp_ms);
                self.active_workers.fetch_add(1, Ordering::SeqCst);
                let state = self.clone();
                tokio::spawn(async move {
                    state.run_worker(camera_id, event_correlation_id, image_sync_id).await;
                    state.active_workers.fetch_sub(1, Ordering::SeqCst);
                });
            }

            // Per spec §9's open question: the elapsed accumulator advances
            // before accounting for worker runtime, so the advertised burst
            // duration is an upper bound on wall time only when workers keep
            // up. This is the original's literal semantics, preserved as-is.
            let mut elapsed = self.elapsed_sec.lock();
            *elapsed += self.config.delay_between_capture;
            let done = *elapsed >= self.config.capture_duration_sec;
            drop(elapsed);

            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis((self.config.delay_between_capture * 1000.0) as u64)).await;
        }
    }

    async fn report_worker_limit_reached(&self, camera_id: u64) {
        let report = RunReport {
            external_id: format!("{camera_id}"),
            status: RunStatus::Failure,
            message: "max parallel workers reached".to_string(),
        };
        if let Err(e) = self.platform.report_run_status(report).await {
            warn!(camera = camera_id, error = %e, "failed to report worker-limit status");
        }
    }

    async fn run_worker(&self, camera_id: u64, event_correlation_id: Option<i64>, image_sync_id: i64) {
        let Some(supervisor) = self.supervisor.lock().clone() else {
            return;
        };
        let metadata = RunMetadata {
            event_correlation_id,
            image_sync_id: Some(image_sync_id),
        };
        if let Err(e) = supervisor
            .execute_processor_run_by_camera_id(
                camera_id,
                self.config.retry_count,
                self.config.retry_interval_secs,
                metadata,
            )
            .await
        {
            warn!(camera = camera_id, error = %e, "event burst capture run failed");
        }
    }
}

/// Reference event-driven app: debounces a camera's event stream down to
/// "latest event wins" and runs a bounded-concurrency capture burst across a
/// fixed set of target cameras for each trigger (spec §4.7).
pub struct EventBurstCaptureApp {
    config: EventBurstCaptureConfig,
    handle: Option<IntegrationHandle>,
    platform: Arc<dyn PlatformClient>,
    state: Mutex<Option<Arc<EventBurstCaptureState>>>,
}

impl EventBurstCaptureApp {
    pub fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self {
            config: EventBurstCaptureConfig {
                trigger_topics: Vec::new(),
                list_of_target_cameras: Vec::new(),
                capture_duration_sec: 0.0,
                delay_between_capture: 1.0,
                max_parallel_workers: default_max_parallel_workers(),
                retry_count: default_retry_count(),
                retry_interval_secs: default_retry_interval_secs(),
            },
            handle: None,
            platform,
            state: Mutex::new(None),
        }
    }

    pub fn active_worker_count(&self) -> i64 {
        match self.state.lock().as_ref() {
            Some(state) => state.active_workers.load(Ordering::SeqCst),
            None => 0,
        }
    }
}

#[async_trait]
impl App for EventBurstCaptureApp {
    fn configure_from_raw(&mut self, configuration: &serde_json::Value) -> EdgeResult<()> {
        self.config = serde_json::from_value(configuration.clone())
            .map_err(|e| EdgeError::config(format!("invalid event burst capture config: {e}")))?;
        Ok(())
    }

    fn configure_integration(&mut self, _name: &str, handle: IntegrationHandle) {
        self.handle = Some(handle);
    }

    fn get_dependencies(&self) -> AppDependencies {
        AppDependencies {
            integrations: vec!["ip_cams".to_string()],
        }
    }

    async fn start(&self) -> EdgeResult<()> {
        let Some(handle) = &self.handle else {
            return Err(EdgeError::config(
                "event burst capture app started without its integration wired",
            ));
        };

        info!(
            max_parallel_workers = self.config.normalized_max_parallel_workers(),
            cameras = self.config.list_of_target_cameras.len(),
            "event burst capture app starting"
        );

        let state = Arc::new(EventBurstCaptureState {
            config: self.config.clone(),
            platform: self.platform.clone(),
            supervisor: Mutex::new(Some(handle.supervisor.clone())),
            last_event: Mutex::new(None),
            elapsed_sec: Mutex::new(0.0),
            active_workers: AtomicI64::new(0),
            capture_loop_running: std::sync::atomic::AtomicBool::new(false),
        });

        let mut rx = handle.bus.subscribe(&self.config.trigger_topics);
        let loop_state = state.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                loop_state.on_event(event).await;
            }
        });

        *self.state.lock() = Some(state);
        Ok(())
    }

    async fn stop(&self) -> EdgeResult<()> {
        if let Some(state) = self.state.lock().as_ref() {
            *state.supervisor.lock() = None;
        }
        *self.state.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverRegistry;
    use crate::models::{CameraConfig, CameraMode, CameraState, IntegrationConfig};
    use crate::platform::test_support::RecordingPlatformClient;
    use crate::secrets::SecretStore;
    use crate::state_tracker::StateTracker;

    fn sample_event(topic: &str, ts: i64) -> CameraEvent {
        CameraEvent {
            core_type: "camera_event".to_string(),
            event_type: "motion".to_string(),
            topic: topic.to_string(),
            source: "cam1".to_string(),
            timestamp_ms: ts,
            raw_data: vec![1, 2, 3],
        }
    }

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
            polling_interval: -1,
            state: CameraState::Enabled,
            linked_asset_id: 0,
            enable_camera_event_stream: false,
            event_filters: Vec::new(),
        }
    }

    async fn started_app(platform: Arc<RecordingPlatformClient>, bus: Arc<EventBus>) -> (EventBurstCaptureApp, Arc<IntegrationSupervisor>) {
        let supervisor = Arc::new(IntegrationSupervisor::new(
            "ip_cams".to_string(),
            platform.clone(),
            Arc::new(SecretStore::new()),
            Arc::new(DriverRegistry::with_builtin_drivers()),
            bus.clone(),
        ));
        supervisor
            .clone()
            .apply_config(IntegrationConfig {
                cameras: vec![sample_camera(42)],
                ..Default::default()
            });

        let mut app = EventBurstCaptureApp::new(platform.clone());
        app.configure_from_raw(&serde_json::json!({
            "trigger_topics": ["42/cam/motion"],
            "list_of_target_cameras": [42],
            "capture_duration_sec": 1.0,
            "delay_between_capture": 0.2,
            "max_parallel_workers": 2,
        }))
        .unwrap();
        app.configure_integration(
            "ip_cams",
            IntegrationHandle {
                bus: bus.clone(),
                supervisor: supervisor.clone(),
            },
        );
        app.start().await.unwrap();
        (app, supervisor)
    }

    #[test]
    fn zero_max_parallel_workers_normalizes_to_one() {
        let config = EventBurstCaptureConfig {
            trigger_topics: Vec::new(),
            list_of_target_cameras: Vec::new(),
            capture_duration_sec: 1.0,
            delay_between_capture: 1.0,
            max_parallel_workers: 0,
            retry_count: 3,
            retry_interval_secs: 10,
        };
        assert_eq!(config.normalized_max_parallel_workers(), 1);
    }

    #[tokio::test]
    async fn triggering_event_runs_a_capture_burst_on_target_cameras() {
        let platform = Arc::new(RecordingPlatformClient::default());
        let bus = Arc::new(EventBus::new());
        let (_app, _sup) = started_app(platform.clone(), bus.clone()).await;

        bus.try_publish("42/cam/motion", sample_event("42/cam/motion", 1000));

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let uploads = platform.uploads.lock().len();
        assert!(uploads >= 2, "expected at least 2 capture uploads, got {uploads}");
    }

    #[tokio::test]
    async fn empty_target_camera_list_exits_without_spawning_workers() {
        let platform = Arc::new(RecordingPlatformClient::default());
        let bus = Arc::new(EventBus::new());
        let supervisor = Arc::new(IntegrationSupervisor::new(
            "ip_cams".to_string(),
            platform.clone(),
            Arc::new(SecretStore::new()),
            Arc::new(DriverRegistry::with_builtin_drivers()),
            bus.clone(),
        ));

        let mut app = EventBurstCaptureApp::new(platform.clone());
        app.configure_from_raw(&serde_json::json!({
            "trigger_topics": ["motion"],
            "list_of_target_cameras": [],
            "capture_duration_sec": 0.2,
            "delay_between_capture": 0.1,
        }))
        .unwrap();
        app.configure_integration("ip_cams", IntegrationHandle { bus: bus.clone(), supervisor });
        app.start().await.unwrap();

        bus.try_publish("motion", sample_event("motion", 1));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(platform.uploads.lock().len(), 0);
        assert_eq!(app.active_worker_count(), 0);
    }

    #[test]
    fn app_manager_skips_unknown_app_names_without_erroring() {
        let platform = Arc::new(RecordingPlatformClient::default());
        let manager = AppManager::new(platform);
        let configs = vec![AppConfiguration {
            instance_id: "inst-1".to_string(),
            app_name: "not_registered".to_string(),
            configurations: serde_json::json!({}),
        }];
        let integrations = HashMap::new();

        let result = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(manager.load_apps_from_raw_config(&configs, &integrations));
        assert!(result.is_ok());
    }
}
