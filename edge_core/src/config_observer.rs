//! Remote config polling and fan-out (spec §4.4).
//!
//! Supersedes `original_source/internal/cdf_config_observer.go`'s older
//! asset-diffing design with the distilled spec's revision-number model:
//! poll, compare an opaque revision counter, and only act — decrypt secrets,
//! fan out to subscribers — when it changes. Subscriber queues are bounded
//! and drop the *incoming* update when full (spec §4.4): a subscriber that
//! falls behind gets its next delivered update later, never blocks the
//! observer loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::EdgeResult;
use crate::models::StaticConfig;
use crate::platform::PlatformClient;
use crate::secrets::{RawSecrets, SecretCipher, SecretStore};

/// Default poll interval (spec §4.4), also the `StaticConfig` default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Capacity of each named-subscriber and the unnamed apps queue (spec §4.4).
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 5;

/// Polls the remote platform for config updates and fans out new revisions
/// to named integration subscribers and one unnamed apps subscriber.
pub struct ConfigObserver {
    platform: Arc<dyn PlatformClient>,
    secrets: Arc<SecretStore>,
    cipher: Option<Arc<dyn SecretCipher>>,
    extractor_id: String,
    last_revision: AtomicU64,
    has_revision: AtomicBool,
    running: Arc<AtomicBool>,
    named_subscribers: RwLock<HashMap<String, mpsc::Sender<Arc<StaticConfig>>>>,
    apps_subscriber: RwLock<Option<mpsc::Sender<Arc<StaticConfig>>>>,
    latest_config: RwLock<Option<Arc<StaticConfig>>>,
}

impl ConfigObserver {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        secrets: Arc<SecretStore>,
        cipher: Option<Arc<dyn SecretCipher>>,
        extractor_id: String,
    ) -> Self {
        Self {
            platform,
            secrets,
            cipher,
            extractor_id,
            last_revision: AtomicU64::new(0),
            has_revision: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            named_subscribers: RwLock::new(HashMap::new()),
            apps_subscriber: RwLock::new(None),
            latest_config: RwLock::new(None),
        }
    }

    /// The most recently fetched config document, if any. Lets a late
    /// subscriber (or the coordinator's bootstrap logic) read current state
    /// without racing the first fan-out.
    pub fn latest_config(&self) -> Option<Arc<StaticConfig>> {
        self.latest_config.read().clone()
    }

    /// Register a named subscriber (one per integration). Replaces any
    /// existing subscriber under the same name.
    pub fn subscribe_integration(&self, name: &str) -> mpsc::Receiver<Arc<StaticConfig>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.named_subscribers.write().insert(name.to_string(), tx);
        rx
    }

    /// Register the single unnamed apps subscriber.
    pub fn subscribe_apps(&self) -> mpsc::Receiver<Arc<StaticConfig>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        *self.apps_subscriber.write() = Some(tx);
        rx
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Spawn the poll loop. Returns immediately; the loop runs until
    /// [`ConfigObserver::stop`] is called.
    pub fn start(self: Arc<Self>, poll_interval: Duration) {
        self.running.store(true, Ordering::SeqCst);
        let observer = self.clone();
        tokio::spawn(async move {
            observer.run_loop(poll_interval).await;
        });
    }

    async fn run_loop(&self, poll_interval: Duration) {
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "config poll failed");
            }
            tokio::time::sleep(poll_interval).await;
        }
        info!("config observer loop stopped");
    }

    /// Fetch, compare revision, and fan out on change. Public so tests and
    /// the `run` CLI command can force a synchronous first poll before
    /// starting the background loop.
    pub async fn poll_once(&self) -> EdgeResult<()> {
        let config = self.platform.fetch_config(&self.extractor_id).await?;

        if self.has_revision.load(Ordering::SeqCst) && self.last_revision.load(Ordering::SeqCst) == config.revision {
            debug!(revision = config.revision, "config unchanged, skipping fan-out");
            return Ok(());
        }

        self.load_secrets(&config)?;

        self.last_revision.store(config.revision, Ordering::SeqCst);
        self.has_revision.store(true, Ordering::SeqCst);

        self.fan_out(Arc::new(config));
        Ok(())
    }

    fn load_secrets(&self, config: &StaticConfig) -> EdgeResult<()> {
        let raw: RawSecrets = config.secrets.clone();
        if raw.is_empty() {
            return Ok(());
        }
        if config.is_encrypted {
            match &self.cipher {
                Some(cipher) => self.secrets.load_encrypted_secrets(&raw, cipher.as_ref()),
                None => {
                    warn!("config marked encrypted but no cipher configured; loading as plaintext");
                    self.secrets.load_plain_secrets(raw);
                    Ok(())
                }
            }
        } else {
            self.secrets.load_plain_secrets(raw);
            Ok(())
        }
    }

    fn fan_out(&self, config: Arc<StaticConfig>) {
        *self.latest_config.write() = Some(config.clone());

        let named = self.named_subscribers.read();
        for (name, tx) in named.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(config.clone()) {
                debug!(subscriber = name, "subscriber queue full, dropping this revision");
            }
        }
        if let Some(tx) = self.apps_subscriber.read().as_ref() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(config.clone()) {
                debug!("apps subscriber queue full, dropping this revision");
            }
        }
    }
}
