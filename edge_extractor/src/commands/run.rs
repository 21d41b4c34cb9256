//! `edge_extractor run`: the long-running supervision process.
//!
//! Shutdown handling follows `horus_manager::commands::launch`'s pattern: a
//! `ctrlc` handler flips an `AtomicBool`, the main task polls it and drives
//! a graceful [`edge_core::coordinator::Coordinator::shutdown`] instead of
//! letting the process die mid-upload.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use edge_core::coordinator::Coordinator;
use tracing::info;

use crate::config::resolve_static_config;
use crate::platform_client::build_platform_client;
use crate::secrets_cipher::{derive_key_from_passphrase, AesGcmCipher};

pub struct RunArgs {
    pub config_path: Option<PathBuf>,
    pub bconfig: Option<String>,
    pub key: Option<String>,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let config = resolve_static_config(args.config_path.as_deref(), args.bconfig.as_deref())
        .context("resolving static config")?;

    init_logging(&config.log_level);

    let cipher: Option<Arc<dyn edge_core::secrets::SecretCipher>> = resolve_cipher_key(&args.key)
        .map(|key| Arc::new(AesGcmCipher::new(&key)) as Arc<dyn edge_core::secrets::SecretCipher>);

    let platform = build_platform_client(&config);
    let coordinator = Arc::new(Coordinator::new(config.extractor_id.clone(), platform, cipher));

    let poll_interval = Duration::from_secs(config.config_reload_interval_secs.max(1));
    coordinator.run(poll_interval).await.context("starting coordinator")?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("installing signal handler")?;

    info!("edge_extractor running, press Ctrl-C to stop");
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    info!("shutdown requested, stopping gracefully");
    coordinator.shutdown().await.context("shutting down coordinator")?;
    Ok(())
}

fn resolve_cipher_key(explicit: &Option<String>) -> Option<[u8; 32]> {
    let passphrase = explicit
        .clone()
        .or_else(|| std::env::var(crate::config::ENV_ENCRYPTION_KEY).ok())?;
    Some(derive_key_from_passphrase(&passphrase))
}

fn init_logging(log_level: &str) {
    let level = if log_level.is_empty() { "info" } else { log_level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
