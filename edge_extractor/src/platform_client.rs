//! HTTP implementation of `edge_core::platform::PlatformClient`.
//!
//! The wire protocol and auth flow against the real remote platform are
//! explicitly out of scope for the core (spec §1); this is the CLI layer's
//! own client, built the way `horus_manager::security::auth` builds its auth
//! service — a `reqwest::Client`, an OAuth2 client-credentials token fetch,
//! and a small in-memory token cache guarded by a mutex.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use edge_core::error::{EdgeError, EdgeResult};
use edge_core::models::{Manifest, RunReport, StaticConfig};
use edge_core::platform::PlatformClient;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Talks to the configured remote platform over plain HTTPS/JSON.
pub struct HttpPlatformClient {
    client: reqwest::Client,
    base_url: String,
    auth_token_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    token: Mutex<Option<CachedToken>>,
}

impl HttpPlatformClient {
    pub fn from_static_config(config: &StaticConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("building the shared HTTP client never fails with this config"),
            base_url: format!("https://{}.cognitedata.com", config.cdf_cluster),
            auth_token_url: config.auth_token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.secret.clone(),
            scopes: config.scopes.clone(),
            token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> EdgeResult<String> {
        if let Some(cached) = self.token.lock().as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        let scope = self.scopes.join(" ");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let resp = self
            .client
            .post(&self.auth_token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| EdgeError::platform(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EdgeError::platform(format!(
                "token request returned status {}",
                resp.status()
            )));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| EdgeError::platform(format!("invalid token response: {e}")))?;

        let expires_at = Instant::now() + Duration::from_secs(parsed.expires_in.saturating_sub(30));
        *self.token.lock() = Some(CachedToken {
            value: parsed.access_token.clone(),
            expires_at,
        });
        Ok(parsed.access_token)
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn fetch_config(&self, extractor_id: &str) -> EdgeResult<StaticConfig> {
        let token = self.bearer_token().await?;
        let url = format!("{}/api/v1/extractors/{extractor_id}/config", self.base_url);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| EdgeError::platform(format!("fetch config failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EdgeError::platform(format!(
                "fetch config returned status {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| EdgeError::platform(format!("invalid config response: {e}")))
    }

    async fn upload_file(
        &self,
        external_id: &str,
        file_name: &str,
        asset_id: u64,
        content_type: &str,
        body: &[u8],
    ) -> EdgeResult<String> {
        let token = self.bearer_token().await?;
        let url = format!("{}/api/v1/files", self.base_url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .query(&[
                ("externalId", external_id),
                ("name", file_name),
                ("assetId", &asset_id.to_string()),
            ])
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| EdgeError::platform(format!("upload failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            debug!(external_id, "upload reported duplicate external id");
            return Err(EdgeError::Platform(format!("duplicate external id: {external_id}")));
        }
        if !resp.status().is_success() {
            return Err(EdgeError::platform(format!("upload returned status {}", resp.status())));
        }

        Ok(external_id.to_string())
    }

    async fn report_run_status(&self, report: RunReport) -> EdgeResult<()> {
        let token = self.bearer_token().await?;
        let url = format!("{}/api/v1/runs", self.base_url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&report)
            .send()
            .await
            .map_err(|e| EdgeError::platform(format!("run report failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EdgeError::platform(format!(
                "run report returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn create_event(&self, external_id: &str, asset_id: u64, event_type: &str, timestamp_ms: i64) -> EdgeResult<()> {
        let token = self.bearer_token().await?;
        let url = format!("{}/api/v1/events", self.base_url);

        let body = serde_json::json!({
            "externalId": external_id,
            "assetIds": [asset_id],
            "type": event_type,
            "startTime": timestamp_ms,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| EdgeError::platform(format!("create event failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EdgeError::platform(format!(
                "create event returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn upload_capabilities_manifest(&self, camera_external_id: &str, manifests: &[Manifest]) -> EdgeResult<()> {
        let token = self.bearer_token().await?;
        let url = format!("{}/api/v1/extractors/{}/manifest", self.base_url, self.client_id);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({
                "externalId": camera_external_id,
                "capabilities": manifests,
            }))
            .send()
            .await
            .map_err(|e| EdgeError::platform(format!("manifest upload failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EdgeError::platform(format!(
                "manifest upload returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

pub fn build_platform_client(config: &StaticConfig) -> Arc<dyn PlatformClient> {
    Arc::new(HttpPlatformClient::from_static_config(config))
}
