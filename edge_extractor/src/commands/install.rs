//! `edge_extractor install`: register the extractor as an OS service.
//!
//! Thin, platform-gated: on Linux this writes a systemd unit pointing back
//! at the current executable's `run` subcommand; elsewhere it reports that
//! OS-service installation isn't implemented on this platform rather than
//! silently no-op'ing.

use anyhow::{Context, Result};
use colored::Colorize;

#[cfg(target_os = "linux")]
pub fn execute(config_path: &str) -> Result<()> {
    let exe = std::env::current_exe().context("locating current executable")?;
    let unit = format!(
        "[Unit]\nDescription=Edge Extractor\nAfter=network-online.target\n\n[Service]\nExecStart={} run --config {}\nRestart=on-failure\nRestartSec=10\n\n[Install]\nWantedBy=multi-user.target\n",
        exe.display(),
        config_path
    );

    let unit_path = "/etc/systemd/system/edge-extractor.service";
    std::fs::write(unit_path, unit).with_context(|| format!("writing {unit_path}"))?;
    println!("{} wrote {unit_path}", "ok:".green().bold());
    println!("next: sudo systemctl daemon-reload && sudo systemctl enable --now edge-extractor");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn execute(_config_path: &str) -> Result<()> {
    anyhow::bail!("OS-service installation is only implemented on Linux (systemd) in this build");
}
