//! `edge_extractor uninstall`: remove the OS service installed by
//! [`crate::commands::install`].

use anyhow::{Context, Result};
use colored::Colorize;

#[cfg(target_os = "linux")]
pub fn execute() -> Result<()> {
    let unit_path = "/etc/systemd/system/edge-extractor.service";
    if std::path::Path::new(unit_path).exists() {
        std::fs::remove_file(unit_path).with_context(|| format!("removing {unit_path}"))?;
        println!("{} removed {unit_path}", "ok:".green().bold());
        println!("next: sudo systemctl daemon-reload");
    } else {
        println!("{} no service unit found at {unit_path}", "note:".yellow().bold());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn execute() -> Result<()> {
    anyhow::bail!("OS-service installation is only implemented on Linux (systemd) in this build");
}
