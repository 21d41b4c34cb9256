//! Root coordinator: wires the config observer, secret store, driver
//! registry, integration supervisors, and app manager together (spec §5).
//!
//! There is no single teacher file this is ported from line-for-line — it
//! plays the role `horus_manager`'s `commands/run.rs` launcher plays for
//! `horus`'s nodes, generalized to this crate's seven components instead of
//! spawned OS processes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app_manager::{AppManager, IntegrationHandle};
use crate::config_observer::ConfigObserver;
use crate::driver::DriverRegistry;
use crate::error::EdgeResult;
use crate::event_bus::EventBus;
use crate::models::{AppConfiguration, StaticConfig};
use crate::platform::PlatformClient;
use crate::secrets::{SecretCipher, SecretStore};
use crate::supervisor::IntegrationSupervisor;

/// Owns every long-lived component and the wiring between them. Construct
/// once per extractor process.
pub struct Coordinator {
    extractor_id: String,
    platform: Arc<dyn PlatformClient>,
    secrets: Arc<SecretStore>,
    drivers: Arc<DriverRegistry>,
    config_observer: Arc<ConfigObserver>,
    supervisors: Arc<tokio::sync::Mutex<HashMap<String, Arc<IntegrationSupervisor>>>>,
    event_buses: tokio::sync::Mutex<HashMap<String, Arc<EventBus>>>,
    app_manager: Arc<AppManager>,
    running: Arc<AtomicBool>,
}

impl Coordinator {
    pub fn new(
        extractor_id: String,
        platform: Arc<dyn PlatformClient>,
        cipher: Option<Arc<dyn SecretCipher>>,
    ) -> Self {
        let secrets = Arc::new(SecretStore::new());
        let config_observer = Arc::new(ConfigObserver::new(
            platform.clone(),
            secrets.clone(),
            cipher,
            extractor_id.clone(),
        ));

        Self {
            extractor_id,
            platform: platform.clone(),
            secrets,
            drivers: Arc::new(DriverRegistry::with_builtin_drivers()),
            config_observer,
            supervisors: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            event_buses: tokio::sync::Mutex::new(HashMap::new()),
            app_manager: Arc::new(AppManager::new(platform)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn app_manager(&self) -> Arc<AppManager> {
        self.app_manager.clone()
    }

    /// Run an initial synchronous config fetch, wire supervisors for every
    /// enabled integration, then start the background poll loop and every
    /// integration's subscriber-consume task.
    pub async fn run(&self, poll_interval: Duration) -> EdgeResult<()> {
        self.running.store(true, Ordering::SeqCst);

        self.config_observer.poll_once().await?;

        for name in &self.enabled_integration_names().await {
            self.ensure_supervisor(name).await;
        }

        self.load_apps().await?;
        self.start_apps_follow_loop();

        self.config_observer.clone().start(poll_interval);
        info!(extractor_id = %self.extractor_id, "coordinator running");
        Ok(())
    }

    /// Load the app set from the latest config's `Apps` block, resolving
    /// each app's declared integration dependencies against the currently
    /// wired supervisors/buses (spec §4.7).
    async fn load_apps(&self) -> EdgeResult<()> {
        let Some(config) = self.config_observer.latest_config() else {
            return Ok(());
        };
        let apps: Vec<AppConfiguration> = match serde_json::from_value(config.apps.clone()) {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "invalid apps config, skipping app load for this revision");
                return Ok(());
            }
        };
        if apps.is_empty() {
            return Ok(());
        }

        let integrations = integration_handles(&self.supervisors).await;
        self.app_manager.load_apps_from_raw_config(&apps, &integrations).await
    }

    /// Subscribe to the apps config queue and reload the app set whenever a
    /// new revision arrives, tearing down the previous app set first (spec
    /// §3: "apps ... torn down before the next config revision is applied").
    fn start_apps_follow_loop(&self) {
        let mut rx = self.config_observer.subscribe_apps();
        let coordinator_running = self.running.clone();
        let app_manager = self.app_manager.clone();
        let supervisors = self.supervisors.clone();
        tokio::spawn(async move {
            while let Some(config) = rx.recv().await {
                if !coordinator_running.load(Ordering::SeqCst) {
                    return;
                }
                let _ = app_manager.stop_all().await;
                let apps: Vec<AppConfiguration> = match serde_json::from_value(config.apps.clone()) {
                    Ok(apps) => apps,
                    Err(e) => {
                        warn!(error = %e, "invalid apps config on revision, skipping app reload");
                        continue;
                    }
                };
                let integrations = integration_handles(&supervisors).await;
                if let Err(e) = app_manager.load_apps_from_raw_config(&apps, &integrations).await {
                    warn!(error = %e, "failed to reload apps for new config revision");
                }
            }
        });
    }

    async fn enabled_integration_names(&self) -> Vec<String> {
        self.config_observer
            .latest_config()
            .map(|c| c.enabled_integrations.clone())
            .unwrap_or_default()
    }

    async fn ensure_supervisor(&self, integration_name: &str) -> Arc<IntegrationSupervisor> {
        let mut supervisors = self.supervisors.lock().await;
        if let Some(existing) = supervisors.get(integration_name) {
            return existing.clone();
        }

        let bus = self.event_bus_for(integration_name).await;
        let supervisor = Arc::new(IntegrationSupervisor::new(
            integration_name.to_string(),
            self.platform.clone(),
            self.secrets.clone(),
            self.drivers.clone(),
            bus,
        ));
        supervisors.insert(integration_name.to_string(), supervisor.clone());

        let mut rx = self.config_observer.subscribe_integration(integration_name);
        let sup = supervisor.clone();
        let name = integration_name.to_string();
        tokio::spawn(async move {
            while let Some(config) = rx.recv().await {
                if let Some(raw) = config.integrations.get(&name) {
                    match serde_json::from_value(raw.clone()) {
                        Ok(integration_config) => sup.clone().apply_config(integration_config),
                        Err(e) => warn!(integration = %name, error = %e, "invalid integration config, ignoring"),
                    }
                }
            }
        });

        supervisor
    }

    /// Gracefully stop every integration supervisor and every app.
    pub async fn shutdown(&self) -> EdgeResult<()> {
        self.running.store(false, Ordering::SeqCst);
        self.config_observer.stop();

        let supervisors: Vec<Arc<IntegrationSupervisor>> = self.supervisors.lock().await.values().cloned().collect();
        for supervisor in supervisors {
            supervisor.stop_and_clean().await?;
        }

        self.app_manager.stop_all().await?;
        info!(extractor_id = %self.extractor_id, "coordinator shut down");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Event bus for a named integration, created on first access.
    pub async fn event_bus_for(&self, integration_name: &str) -> Arc<EventBus> {
        let mut buses = self.event_buses.lock().await;
        buses
            .entry(integration_name.to_string())
            .or_insert_with(|| Arc::new(EventBus::new()))
            .clone()
    }

    pub fn secrets(&self) -> Arc<SecretStore> {
        self.secrets.clone()
    }

    pub fn latest_apps_config(&self, config: &StaticConfig) -> serde_json::Value {
        config.apps.clone()
    }
}

/// Snapshot every currently-registered supervisor as an [`IntegrationHandle`]
/// apps can bind to, keyed by integration name.
async fn integration_handles(
    supervisors: &tokio::sync::Mutex<HashMap<String, Arc<IntegrationSupervisor>>>,
) -> HashMap<String, IntegrationHandle> {
    supervisors
        .lock()
        .await
        .iter()
        .map(|(name, supervisor)| {
            (
                name.clone(),
                IntegrationHandle {
                    bus: supervisor.event_bus(),
                    supervisor: supervisor.clone(),
                },
            )
        })
        .collect()
}
