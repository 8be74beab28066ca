//! Local CLI configuration.
//!
//! Stored as TOML in `<config dir>/wordhoard/config.toml`, or wherever
//! `WORDHOARD_CLI_CONFIG` points.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::client::Credential;
use crate::output::{self, OutputFormat};

pub const DEFAULT_SERVER: &str = "http://localhost:50051";
const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";

/// Keys `config set` accepts.
const KNOWN_KEYS: &[(&str, &str)] = &[
    ("server", "Admin API address"),
    ("user-id", "User id sent in the identity header"),
    ("identity-header", "Identity header name (default x-user-id)"),
    ("token", "Bearer token; takes precedence over user-id"),
];

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Configuration key (server, user-id, identity-header, token)
        key: String,
        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Show all configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl CliConfig {
    pub fn server(&self) -> Option<&str> {
        self.values.get("server").map(String::as_str)
    }

    /// Credential from the stored values; a token wins over a user id.
    pub fn credential(&self) -> Result<Credential> {
        if let Some(token) = self.values.get("token") {
            return Ok(Credential::Bearer(token.clone()));
        }
        match self.values.get("user-id") {
            Some(raw) => Ok(Credential::UserId {
                header: self
                    .values
                    .get("identity-header")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_IDENTITY_HEADER.to_string()),
                user_id: raw
                    .parse()
                    .with_context(|| format!("user-id must be numeric, got {:?}", raw))?,
            }),
            None => Ok(Credential::Anonymous),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if !KNOWN_KEYS.iter().any(|(k, _)| *k == key) {
            let keys: Vec<&str> = KNOWN_KEYS.iter().map(|(k, _)| *k).collect();
            bail!("unknown key '{}' (expected one of: {})", key, keys.join(", "));
        }
        if key == "user-id" {
            value
                .parse::<u64>()
                .with_context(|| format!("user-id must be numeric, got {:?}", value))?;
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("WORDHOARD_CLI_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    let dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(dir.join("wordhoard").join("config.toml"))
}

/// Missing file means defaults.
fn load_from(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save_to(path: &Path, cfg: &CliConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn load_config() -> Result<CliConfig> {
    load_from(&config_path()?)
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    let path = config_path()?;

    match cmd {
        ConfigCommands::Set { key, value } => {
            let mut cfg = load_from(&path)?;
            cfg.set(&key, &value)?;
            save_to(&path, &cfg)?;

            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key, value)),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
            }
        }

        ConfigCommands::Get { key } => {
            let cfg = load_from(&path)?;
            let Some(value) = cfg.values.get(&key) else {
                bail!("Key '{}' not set", key);
            };
            match format {
                OutputFormat::Table => println!("{}", value),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
            }
        }

        ConfigCommands::Show => {
            let cfg = load_from(&path)?;
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    output::print_detail("file", &path.display().to_string());
                    output::print_detail("server", cfg.server().unwrap_or(DEFAULT_SERVER));
                    for (key, value) in cfg.values.iter().filter(|(k, _)| *k != "server") {
                        // Never echo the bearer token.
                        let shown = if key == "token" { "********" } else { value };
                        output::print_detail(key, shown);
                    }
                }
                _ => output::print_item(&cfg.values, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will reset all CLI configuration. Use --force to confirm.");
                return Ok(());
            }
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}
