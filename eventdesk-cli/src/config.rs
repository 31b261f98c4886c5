use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use eventdesk_client::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::cli::Args;

const APP_DIR: &str = "eventdesk";
const CONFIG_FILE: &str = "config.toml";
const CREDENTIALS_FILE: &str = "credentials.json";

/// Settings read from the TOML configuration file.
///
/// Command-line flags (and their environment variables) take precedence
/// over anything set here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    /// Where the session is saved between runs
    pub credentials_file: Option<PathBuf>,
}

impl AppConfig {
    /// Load the configuration.
    ///
    /// An explicit path must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn credentials_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.credentials_file {
            return Ok(path.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CREDENTIALS_FILE))
            .context("no configuration directory available; set credentials_file")
    }

    /// Merge flags over file values into a client configuration.
    pub fn client_config(&self, args: &Args) -> Result<ClientConfig> {
        let mut builder = ClientConfig::builder();

        if let Some(base_url) = args.base_url.as_ref().or(self.base_url.as_ref()) {
            builder = builder.base_url(base_url.clone());
        }
        if let Some(secs) = args.timeout.or(self.timeout_secs) {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = args.connect_timeout.or(self.connect_timeout_secs) {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(user_agent) = args.user_agent.as_ref().or(self.user_agent.as_ref()) {
            builder = builder.user_agent(user_agent.clone());
        }

        builder.build().context("invalid client configuration")
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
