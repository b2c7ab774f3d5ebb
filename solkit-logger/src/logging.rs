use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs::File, path::PathBuf, str::FromStr, sync::Mutex};
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, writer::BoxMakeWriter},
    prelude::*,
    EnvFilter, Layer, Registry,
};

/// Environment variable holding extra filter directives, e.g. `solkit_connector=trace`.
const FILTER_ENV: &str = "SOLKIT_LOG";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Plain,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    #[default]
    Stderr,
    File,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
        }
    }
}

impl LogConfig {
    /// The configured level. Unknown names fall back to `INFO`.
    pub fn level(&self) -> Level {
        Level::from_str(&self.level).unwrap_or(Level::INFO)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level()).into())
            .with_env_var(FILTER_ENV)
            .from_env_lossy()
    }

    fn writer(&self) -> Result<BoxMakeWriter> {
        Ok(match self.output {
            LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogOutput::File => {
                let path = self
                    .file_path
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Log output is 'file' but 'file-path' is not specified"))?;
                let file = File::create(path)
                    .with_context(|| format!("Failed to create log file {}", path.display()))?;
                BoxMakeWriter::new(Mutex::new(file))
            }
        })
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let ansi = config.output != LogOutput::File;
    let layer = fmt::layer().with_writer(config.writer()?).with_ansi(ansi);
    let layer = match config.format {
        LogFormat::Json => layer.json().with_filter(config.filter()).boxed(),
        LogFormat::Plain => layer.pretty().with_filter(config.filter()).boxed(),
    };

    Registry::default()
        .with(layer)
        .try_init()
        .context("A global logger is already installed")?;
    Ok(())
}
