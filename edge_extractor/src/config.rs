//! Static config resolution for the CLI (spec §6).
//!
//! Mirrors `horus_core::driver::DriversConfig::from_file`'s
//! extension-sniffing load pattern, extended with the base64-literal and
//! environment-variable fallbacks the CLI surface requires: a local bring-up
//! config can come from a file path, a base64-encoded blob passed directly
//! on the command line, or either of those supplied via environment
//! variables instead (for container deployments that can't mount a file).

use std::path::{Path, PathBuf};

use base64::Engine;
use edge_core::error::{EdgeError, EdgeResult};
use edge_core::models::StaticConfig;

/// Env var carrying a config file path, used when `--config` is omitted.
pub const ENV_CONFIG_PATH: &str = "EDGE_EXTRACTOR_CONFIG";
/// Env var carrying a base64-encoded config document, used when `--bconfig`
/// is omitted and `EDGE_EXTRACTOR_CONFIG` isn't set either.
pub const ENV_CONFIG_B64: &str = "EDGE_EXTRACTOR_BCONFIG";
/// Env var carrying the AES-GCM key used to decrypt an encrypted config.
pub const ENV_ENCRYPTION_KEY: &str = "EDGE_EXT_ENCRYPTION_KEY";

/// Resolution precedence, highest first: `--config` file path, `--bconfig`
/// literal, `EDGE_EXTRACTOR_CONFIG` env var, `EDGE_EXTRACTOR_BCONFIG` env
/// var.
pub fn resolve_static_config(config_path: Option<&Path>, bconfig: Option<&str>) -> EdgeResult<StaticConfig> {
    if let Some(path) = config_path {
        return load_from_file(path);
    }
    if let Some(encoded) = bconfig {
        return load_from_base64(encoded);
    }
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        return load_from_file(Path::new(&path));
    }
    if let Ok(encoded) = std::env::var(ENV_CONFIG_B64) {
        return load_from_base64(&encoded);
    }
    Err(EdgeError::config(
        "no config source: pass --config, --bconfig, or set EDGE_EXTRACTOR_CONFIG / EDGE_EXTRACTOR_BCONFIG",
    ))
}

fn load_from_file(path: &Path) -> EdgeResult<StaticConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EdgeError::config(format!("reading config file {}: {e}", path.display())))?;
    parse_by_extension(path, &content)
}

fn load_from_base64(encoded: &str) -> EdgeResult<StaticConfig> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| EdgeError::config(format!("invalid base64 config: {e}")))?;
    let content = String::from_utf8(decoded).map_err(|e| EdgeError::config(format!("config is not valid UTF-8: {e}")))?;
    parse_document(&content)
}

fn parse_by_extension(path: &PathBuf, content: &str) -> EdgeResult<StaticConfig> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(serde_json::from_str(content)?),
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(content)?),
        Some("toml") => Ok(toml::from_str(content)?),
        _ => parse_document(content),
    }
}

/// Auto-detect format by attempting JSON, then YAML, then TOML in turn —
/// same fallback order `DriversConfig::find_and_load` uses when extension
/// sniffing alone can't determine format.
fn parse_document(content: &str) -> EdgeResult<StaticConfig> {
    if let Ok(cfg) = serde_json::from_str::<StaticConfig>(content) {
        return Ok(cfg);
    }
    if let Ok(cfg) = serde_yaml::from_str::<StaticConfig>(content) {
        return Ok(cfg);
    }
    toml::from_str(content).map_err(EdgeError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_yaml_config_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "ProjectName: acme\nCdfCluster: westeurope-1\nClientID: id\nSecret: s\nAdTenantId: t\nAuthTokenUrl: url\nCdfDatasetID: 1\nExtractorID: ext-1\nRemoteConfigSource: local").unwrap();

        let cfg = load_from_file(file.path()).unwrap();
        assert_eq!(cfg.project_name, "acme");
    }

    #[test]
    fn loads_base64_json_config() {
        let json = r#"{"ProjectName":"acme","CdfCluster":"c","ClientID":"i","Secret":"s","AdTenantId":"t","AuthTokenUrl":"u","CdfDatasetID":1,"ExtractorID":"e","RemoteConfigSource":"local"}"#;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        let cfg = load_from_base64(&encoded).unwrap();
        assert_eq!(cfg.project_name, "acme");
    }

    #[test]
    fn missing_source_is_an_error() {
        std::env::remove_var(ENV_CONFIG_PATH);
        std::env::remove_var(ENV_CONFIG_B64);
        assert!(resolve_static_config(None, None).is_err());
    }
}
