//! Remote data platform boundary (spec §1/§5).
//!
//! The actual platform SDK (auth, REST/gRPC wire format, retries at the
//! transport level) is explicitly out of scope (spec §1's "external
//! collaborator" note) — this module only defines the async trait seam the
//! rest of the core programs against, mirroring the way
//! `horus_core::communication` separates transport-agnostic pub/sub from any
//! one wire protocol.

use async_trait::async_trait;

use crate::error::EdgeResult;
use crate::models::{Manifest, RunReport, StaticConfig};

/// Everything the core needs from the remote platform: fetching config,
/// uploading extracted files, and reporting run/event status back.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch the latest static config document for this extractor instance.
    async fn fetch_config(&self, extractor_id: &str) -> EdgeResult<StaticConfig>;

    /// Upload a captured file (image or metadata blob) linked to an asset,
    /// returning the platform-assigned external ID.
    async fn upload_file(
        &self,
        external_id: &str,
        file_name: &str,
        asset_id: u64,
        content_type: &str,
        body: &[u8],
    ) -> EdgeResult<String>;

    /// Report a pipeline run's outcome.
    async fn report_run_status(&self, report: RunReport) -> EdgeResult<()>;

    /// Create an event record linked to an asset (e.g. a motion event).
    async fn create_event(
        &self,
        external_id: &str,
        asset_id: u64,
        event_type: &str,
        timestamp_ms: i64,
    ) -> EdgeResult<()>;

    /// Publish a camera's capabilities manifest for service discovery (spec
    /// §4.5 step 5), run once when a processor starts.
    async fn upload_capabilities_manifest(&self, camera_external_id: &str, manifests: &[Manifest]) -> EdgeResult<()>;
}

/// In-memory `PlatformClient` used by tests and by the event-burst capture
/// app's unit tests in [`crate::app_manager`] — never wired in production.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingPlatformClient {
        pub uploads: Mutex<Vec<(String, String, u64, String, Vec<u8>)>>,
        pub reports: Mutex<Vec<RunReport>>,
        pub events: Mutex<Vec<(String, u64, String, i64)>>,
        pub manifests: Mutex<Vec<(String, Vec<Manifest>)>>,
        pub config: Mutex<Option<StaticConfig>>,
        pub fail_uploads: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl PlatformClient for RecordingPlatformClient {
        async fn fetch_config(&self, _extractor_id: &str) -> EdgeResult<StaticConfig> {
            Ok(self.config.lock().clone().unwrap_or_default())
        }

        async fn upload_file(
            &self,
            external_id: &str,
            file_name: &str,
            asset_id: u64,
            content_type: &str,
            body: &[u8],
        ) -> EdgeResult<String> {
            if self.fail_uploads.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(crate::error::EdgeError::platform("simulated upload failure"));
            }
            self.uploads.lock().push((
                external_id.to_string(),
                file_name.to_string(),
                asset_id,
                content_type.to_string(),
                body.to_vec(),
            ));
            Ok(external_id.to_string())
        }

        async fn report_run_status(&self, report: RunReport) -> EdgeResult<()> {
            self.reports.lock().push(report);
            Ok(())
        }

        async fn create_event(
            &self,
            external_id: &str,
            asset_id: u64,
            event_type: &str,
            timestamp_ms: i64,
        ) -> EdgeResult<()> {
            self.events
                .lock()
                .push((external_id.to_string(), asset_id, event_type.to_string(), timestamp_ms));
            Ok(())
        }

        async fn upload_capabilities_manifest(&self, camera_external_id: &str, manifests: &[Manifest]) -> EdgeResult<()> {
            self.manifests.lock().push((camera_external_id.to_string(), manifests.to_vec()));
            Ok(())
        }
    }
}
