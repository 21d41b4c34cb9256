//! CLI entry point for the edge extractor runtime.

mod commands;
mod config;
mod platform_client;
mod secrets_cipher;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser)]
#[command(name = "edge_extractor")]
#[command(about = "Edge extractor runtime: supervises camera fleets and forwards captures to the data platform")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the extractor as an OS service.
    Install {
        /// Config file path the installed service will run with.
        #[arg(short = 'c', long = "config")]
        config: String,
    },

    /// Remove the previously installed OS service.
    Uninstall,

    /// Refresh the installed OS service's definition.
    Update {
        /// Config file path the installed service will run with.
        #[arg(short = 'c', long = "config")]
        config: String,
    },

    /// Run the extractor supervision loop.
    Run {
        /// Path to a local config file (JSON, YAML, or TOML).
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,

        /// Base64-encoded config document, alternative to --config.
        #[arg(long = "bconfig")]
        bconfig: Option<String>,

        /// Passphrase used to derive the AES-256 key for encrypted secrets.
        #[arg(short = 'k', long = "key")]
        key: Option<String>,
    },

    /// Write a starter local config document.
    GenConfig {
        /// Output file path.
        #[arg(short = 'o', long = "output", default_value = "config.yaml")]
        output: PathBuf,

        /// Output format: yaml, json, or toml.
        #[arg(short = 'f', long = "format", default_value = "yaml")]
        format: String,
    },

    /// Encrypt every secret in a config document in place.
    EncryptConfig {
        /// Input config file path.
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Output config file path.
        #[arg(short = 'o', long = "output")]
        output: PathBuf,

        /// Passphrase used to derive the AES-256 key.
        #[arg(short = 'k', long = "key")]
        key: String,
    },

    /// Encrypt a single literal secret value.
    EncryptSecret {
        /// Plaintext value to encrypt.
        value: String,

        /// Passphrase used to derive the AES-256 key.
        #[arg(short = 'k', long = "key")]
        key: String,
    },

    /// Print build metadata.
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Install { config } => commands::install::execute(&config),
        Commands::Uninstall => commands::uninstall::execute(),
        Commands::Update { config } => commands::update::execute(&config),
        Commands::Run { config, bconfig, key } => {
            commands::run::execute(commands::run::RunArgs {
                config_path: config,
                bconfig,
                key,
            })
            .await
        }
        Commands::GenConfig { output, format } => commands::gen_config::execute(&output, &format),
        Commands::EncryptConfig { input, output, key } => commands::encrypt_config::execute(&input, &output, &key),
        Commands::EncryptSecret { value, key } => commands::encrypt_secret::execute(&value, &key),
        Commands::Version => {
            commands::version::execute();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}
