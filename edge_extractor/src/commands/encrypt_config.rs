//! `edge_extractor encrypt-config`: encrypt every value in a config
//! document's `secrets` map in place and mark the document encrypted.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::resolve_static_config;
use crate::secrets_cipher::{derive_key_from_passphrase, AesGcmCipher};

pub fn execute(input_path: &Path, output_path: &Path, passphrase: &str) -> Result<()> {
    let mut config = resolve_static_config(Some(input_path), None).context("loading input config")?;

    if config.is_encrypted {
        anyhow::bail!("config at {} is already marked as encrypted", input_path.display());
    }

    let key = derive_key_from_passphrase(passphrase);
    let cipher = AesGcmCipher::new(&key);

    for value in config.secrets.values_mut() {
        *value = cipher.encrypt(value).context("encrypting secret value")?;
    }
    config.is_encrypted = true;

    let serialized = match output_path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::to_string_pretty(&config)?,
        Some("toml") => toml::to_string_pretty(&config)?,
        _ => serde_yaml::to_string(&config)?,
    };

    std::fs::write(output_path, serialized).with_context(|| format!("writing {}", output_path.display()))?;
    println!(
        "{} encrypted {} secret(s), wrote {}",
        "ok:".green().bold(),
        config.secrets.len(),
        output_path.display()
    );
    Ok(())
}
