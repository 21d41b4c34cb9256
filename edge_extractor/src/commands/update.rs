//! `edge_extractor update`: re-run [`crate::commands::install`] so a
//! changed `--config` path or binary location is picked up by the installed
//! service without a manual uninstall/install cycle.

use anyhow::Result;
use colored::Colorize;

pub fn execute(config_path: &str) -> Result<()> {
    super::install::execute(config_path)?;
    println!("{} service definition refreshed", "ok:".green().bold());
    Ok(())
}
