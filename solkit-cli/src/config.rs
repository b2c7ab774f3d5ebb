use anyhow::{Context, Result};
use serde::Deserialize;
use solkit_connector::config::ConnectorConfig;
use solkit_logger::LogConfig;
use std::path::PathBuf;

/// Prefix of environment variables that override file settings,
/// e.g. `SOLKIT__CLI__KEYPAIR_PATH`.
pub const ENV_PREFIX: &str = "SOLKIT";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub cli: CliSpecific,
}

/// Settings that only the command-line front end uses.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct CliSpecific {
    /// JSON keypair file backing the local wallet. Without it the wallet is
    /// reported unavailable.
    #[serde(alias = "keypair_path")]
    pub keypair_path: Option<PathBuf>,
    pub log: LogConfig,
}

/// Loads the configuration from an optional TOML file, overlaid with
/// `SOLKIT__`-prefixed environment variables.
pub fn load_config(path: Option<&str>) -> Result<CliConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    }
    builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

    let settings: CliConfig = builder
        .build()
        .with_context(|| match path {
            Some(path) => format!("Failed to build configuration from '{path}'"),
            None => "Failed to build configuration from the environment".to_string(),
        })?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
