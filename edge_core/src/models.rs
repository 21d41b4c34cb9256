//! Shared data model: processor state, camera/integration config, and
//! camera events (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Finite processor state set. `NotFound` is a lookup sentinel and is never
/// stored in the [`crate::state_tracker::StateTracker`] table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    Starting,
    Running,
    Stopped,
    Shutdown,
    NotFound,
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessorState::Starting => "STARTING",
            ProcessorState::Running => "RUNNING",
            ProcessorState::Stopped => "STOPPED",
            ProcessorState::Shutdown => "SHUTDOWN",
            ProcessorState::NotFound => "NOT_FOUND",
        };
        write!(f, "{s}")
    }
}

/// An event filter attached to a camera's push event-stream subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventFilter {
    pub topic_filter: String,
    #[serde(default)]
    pub content_filter: String,
}

/// Camera mode: plain image capture, or image capture plus periodic metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    Camera,
    #[serde(rename = "camera+metadata")]
    CameraMetadata,
}

impl Default for CameraMode {
    fn default() -> Self {
        CameraMode::Camera
    }
}

/// Enabled/disabled lifecycle state for a camera entry in the integration
/// config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    Enabled,
    Disabled,
}

fn default_camera_state() -> CameraState {
    CameraState::Enabled
}

/// One camera entry in an [`IntegrationConfig`] (spec §3).
///
/// `Password` is a secret *reference*, resolved through the secret store at
/// processor start — never cleartext on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CameraConfig {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(default, rename = "ExternalID")]
    pub external_id: String,
    pub name: String,
    pub model: String,
    pub address: String,
    #[serde(default)]
    pub username: String,
    /// Secret reference, not cleartext. Resolved via [`crate::secrets::SecretStore::get_secret`].
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub mode: CameraMode,
    /// Seconds. 0 => default (60s). Negative => event-driven only, no polling.
    #[serde(default)]
    pub polling_interval: i64,
    #[serde(default = "default_camera_state")]
    pub state: CameraState,
    #[serde(default, rename = "LinkedAssetID")]
    pub linked_asset_id: u64,
    #[serde(default)]
    pub enable_camera_event_stream: bool,
    #[serde(default)]
    pub event_filters: Vec<EventFilter>,
}

impl CameraConfig {
    /// Effective polling interval in seconds, honoring spec §3/§8 boundaries:
    /// `0` normalizes to 60s, negative means "no periodic polling".
    pub fn effective_polling_interval_secs(&self) -> Option<u64> {
        if self.polling_interval < 0 {
            None
        } else if self.polling_interval == 0 {
            Some(60)
        } else {
            Some(self.polling_interval as u64)
        }
    }
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_interval_secs() -> u64 {
    10
}

/// Versioned per-integration configuration document (spec §3).
///
/// Two configs are equal iff their ordered camera lists are element-wise
/// equal (including event filters, compared in order) and the scalar fields
/// match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntegrationConfig {
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_interval_secs", rename = "RetryInterval")]
    pub retry_interval_secs: u64,
    #[serde(default)]
    pub disable_run_reporting: bool,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_interval_secs: default_retry_interval_secs(),
            disable_run_reporting: false,
            cameras: Vec::new(),
        }
    }
}

/// A camera event emitted by a driver's push event-stream (spec §3, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEvent {
    pub core_type: String,
    pub event_type: String,
    pub topic: String,
    pub source: String,
    /// Milliseconds since epoch, taken from the device-supplied value.
    pub timestamp_ms: i64,
    pub raw_data: Vec<u8>,
}

/// Result of a driver's snapshot capability.
#[derive(Debug, Clone)]
pub struct Image {
    pub body: Vec<u8>,
    pub format: String,
    pub transaction_id: Option<String>,
    pub external_id: Option<String>,
}

/// One entry returned by a driver's capabilities manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub format: String,
    pub component_name: String,
    pub body: Vec<u8>,
}

/// Status reported for a single pipeline run (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
    Seen,
}

/// A pipeline run report sent to the external platform (spec §6: `{externalId,
/// status, message}`, camelCase per the platform's own wire convention).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub external_id: String,
    pub status: RunStatus,
    pub message: String,
}

/// One entry in the raw app-list config fed to the App Manager (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppConfiguration {
    #[serde(rename = "InstanceID")]
    pub instance_id: String,
    pub app_name: String,
    pub configurations: serde_json::Value,
}

/// Names of integrations an app declares it depends on.
#[derive(Debug, Clone, Default)]
pub struct AppDependencies {
    pub integrations: Vec<String>,
}

/// The remote static config document (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StaticConfig {
    pub project_name: String,
    pub cdf_cluster: String,
    #[serde(rename = "ClientID")]
    pub client_id: String,
    pub secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub ad_tenant_id: String,
    pub auth_token_url: String,
    #[serde(rename = "CdfDatasetID")]
    pub cdf_dataset_id: i64,
    #[serde(rename = "ExtractorID")]
    pub extractor_id: String,
    pub remote_config_source: RemoteConfigSource,
    #[serde(default = "default_reload_interval_secs", rename = "ConfigReloadInterval")]
    pub config_reload_interval_secs: u64,
    #[serde(default)]
    pub enabled_integrations: Vec<String>,
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub log_dir: String,
    #[serde(default)]
    pub integrations: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub apps: serde_json::Value,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Monotonically increasing revision counter (spec §4.4). Not part of
    /// the distilled wire shape in spec §6; carried as an additional
    /// PascalCase field the remote platform is expected to stamp.
    #[serde(default)]
    pub revision: u64,
}

fn default_reload_interval_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteConfigSource {
    Local,
    ExtPipelineConfig,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            cdf_cluster: String::new(),
            client_id: String::new(),
            secret: String::new(),
            scopes: Vec::new(),
            ad_tenant_id: String::new(),
            auth_token_url: String::new(),
            cdf_dataset_id: 0,
            extractor_id: String::new(),
            remote_config_source: RemoteConfigSource::Local,
            config_reload_interval_secs: default_reload_interval_secs(),
            enabled_integrations: Vec::new(),
            log_level: "info".to_string(),
            log_dir: String::new(),
            integrations: HashMap::new(),
            apps: serde_json::Value::Array(Vec::new()),
            is_encrypted: false,
            secrets: HashMap::new(),
            revision: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integration_config_equality_ignores_nothing_but_order_matters() {
        let a = IntegrationConfig {
            cameras: vec![sample_camera(1), sample_camera(2)],
            ..Default::default()
        };
        let b = IntegrationConfig {
            cameras: vec![sample_camera(1), sample_camera(2)],
            ..Default::default()
        };
        let c = IntegrationConfig {
            cameras: vec![sample_camera(2), sample_camera(1)],
            ..Default::default()
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn polling_interval_boundaries() {
        let mut cam = sample_camera(1);
        cam.polling_interval = 0;
        assert_eq!(cam.effective_polling_interval_secs(), Some(60));
        cam.polling_interval = -1;
        assert_eq!(cam.effective_polling_interval_secs(), None);
        cam.polling_interval = 5;
        assert_eq!(cam.effective_polling_interval_secs(), Some(5));
    }

    #[test]
    fn static_config_roundtrips_through_json() {
        let cfg = StaticConfig {
            project_name: "acme".into(),
            revision: 3,
            ..Default::default()
        };
        let raw = serde_json::to_string(&cfg).unwrap();
        let back: StaticConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.project_name, "acme");
        assert_eq!(back.revision, 3);
    }

    fn sample_camera(id: u64) -> CameraConfig {
        CameraConfig {
            id,
            external_id: String::new(),
            name: format!("cam{id}"),
            model: "axis".into(),
            address: "http://cam".into(),
            username: "u".into(),
            password: "p".into(),
            mode: CameraMode::Camera,
            polling_interval: 60,
            state: CameraState::Enabled,
            linked_asset_id: 0,
            enable_camera_event_stream: false,
            event_filters: Vec::new(),
        }
    }
}
