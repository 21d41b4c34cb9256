//! `edge_extractor gen-config`: emit a starter local config document.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use edge_core::models::{RemoteConfigSource, StaticConfig};

pub fn execute(output_path: &Path, format: &str) -> Result<()> {
    let config = StaticConfig {
        project_name: "my-project".to_string(),
        cdf_cluster: "westeurope-1".to_string(),
        client_id: "replace-me".to_string(),
        secret: "replace-me".to_string(),
        scopes: vec!["https://westeurope-1.cognitedata.com/.default".to_string()],
        ad_tenant_id: "replace-me".to_string(),
        auth_token_url: "https://login.microsoftonline.com/replace-me/oauth2/v2.0/token".to_string(),
        cdf_dataset_id: 0,
        extractor_id: "edge-extractor-1".to_string(),
        remote_config_source: RemoteConfigSource::Local,
        enabled_integrations: vec!["ip_cams".to_string()],
        ..Default::default()
    };

    let serialized = match format {
        "json" => serde_json::to_string_pretty(&config).context("serializing config as JSON")?,
        "toml" => toml::to_string_pretty(&config).context("serializing config as TOML")?,
        _ => serde_yaml::to_string(&config).context("serializing config as YAML")?,
    };

    std::fs::write(output_path, serialized).with_context(|| format!("writing {}", output_path.display()))?;
    println!("{} wrote starter config to {}", "ok:".green().bold(), output_path.display());
    Ok(())
}
