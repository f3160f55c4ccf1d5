//! # Tillpoint Kiosk
//!
//! Console host for the Tillpoint startup sequence.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p tillpoint-kiosk -- --data-dir /var/lib/tillpoint
//! ```
//!
//! ## With launch parameters:
//!
//! ```bash
//! cargo run -p tillpoint-kiosk -- \
//!     --launch-url "tillpoint://start?serverName=pos-server&deviceId=POS-1"
//! ```
//!
//! ## Architecture
//!
//! - `CliArgs` - Command-line arguments parsed with clap
//! - `KioskConfig` - Storage location, personalization config and discovery source
//! - `ConsolePrompt` - Manual personalization dialogs on a terminal

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

mod prompt;

pub use prompt::ConsolePrompt;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tillpoint_personalization::PersonalizationConfig;
use url::Url;

/// Name of the session file inside the data directory.
pub const SESSION_FILE: &str = "session.json";

/// Command-line arguments for tillpoint-kiosk.
#[derive(Debug, Clone, Parser)]
#[command(name = "tillpoint-kiosk")]
#[command(about = "Tillpoint point-of-sale kiosk shell")]
#[command(version)]
pub struct CliArgs {
    /// URL the shell was launched with; its query holds personalization parameters
    #[arg(long, env = "TILLPOINT_LAUNCH_URL")]
    pub launch_url: Option<String>,

    /// Directory holding the persisted session
    #[arg(long, env = "TILLPOINT_DATA_DIR", default_value = "tillpoint-data")]
    pub data_dir: PathBuf,

    /// JSON file with personalization settings
    #[arg(long, env = "TILLPOINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Device name announced to auto-personalization endpoints
    #[arg(long, env = "TILLPOINT_DEVICE_NAME")]
    pub device_name: Option<String>,

    /// Auto-personalization endpoint to use instead of network discovery
    /// (e.g., <http://pos-server:6140/rest/devices/autoPersonalizationParameters>)
    #[arg(long, env = "TILLPOINT_DISCOVERY_URL")]
    pub discovery_url: Option<String>,
}

/// Kiosk configuration.
#[derive(Debug, Clone)]
pub struct KioskConfig {
    /// URL the shell was launched with.
    pub launch_url: Option<String>,
    /// Directory holding the persisted session.
    pub data_dir: PathBuf,
    /// JSON file with personalization settings.
    pub config_path: Option<PathBuf>,
    /// Device name override.
    pub device_name: Option<String>,
    /// Fixed auto-personalization endpoint.
    pub discovery_url: Option<String>,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl KioskConfig {
    /// Create a new kiosk configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            launch_url: None,
            data_dir: PathBuf::from("tillpoint-data"),
            config_path: None,
            device_name: None,
            discovery_url: None,
        }
    }

    /// Location of the session file.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }

    /// Query pairs of the launch URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the launch URL is not a valid URL.
    pub fn launch_params(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let Some(launch_url) = &self.launch_url else {
            return Ok(BTreeMap::new());
        };
        let url = Url::parse(launch_url)
            .with_context(|| format!("invalid launch URL `{launch_url}`"))?;
        Ok(url.query_pairs().into_owned().collect())
    }

    /// Load personalization settings, applying command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn personalization_config(&self) -> anyhow::Result<PersonalizationConfig> {
        let mut config = match &self.config_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                PersonalizationConfig::from_json(&text)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => PersonalizationConfig::default(),
        };
        if let Some(name) = &self.device_name {
            config.device_name = Some(name.clone());
        }
        Ok(config)
    }
}

impl From<CliArgs> for KioskConfig {
    fn from(args: CliArgs) -> Self {
        Self {
            launch_url: args.launch_url,
            data_dir: args.data_dir,
            config_path: args.config,
            device_name: args.device_name,
            discovery_url: args.discovery_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KioskConfig::default();
        assert_eq!(config.storage_path(), PathBuf::from("tillpoint-data/session.json"));
        assert!(config.launch_params().expect("params").is_empty());
    }

    #[test]
    fn test_from_cli_args() {
        let args = CliArgs::parse_from([
            "tillpoint-kiosk",
            "--launch-url",
            "tillpoint://start?serverName=pos-server&deviceId=POS-1",
            "--data-dir",
            "/tmp/till",
            "--device-name",
            "lane-4",
        ]);
        let config = KioskConfig::from(args);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/till"));

        let params = config.launch_params().expect("params");
        assert_eq!(params.get("serverName").map(String::as_str), Some("pos-server"));
        assert_eq!(params.get("deviceId").map(String::as_str), Some("POS-1"));

        let personalization = config.personalization_config().expect("config");
        assert_eq!(personalization.device_name.as_deref(), Some("lane-4"));
    }

    #[test]
    fn test_config_file_is_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("personalization.json");
        std::fs::write(&path, r#"{ "deviceType": "tablet", "manualEntry": { "canCancel": true } }"#)
            .expect("write");

        let config = KioskConfig {
            config_path: Some(path),
            ..KioskConfig::new()
        };
        let personalization = config.personalization_config().expect("config");
        assert_eq!(personalization.device_type, "tablet");
        assert!(personalization.manual_entry.can_cancel);
    }

    #[test]
    fn test_invalid_launch_url() {
        let config = KioskConfig {
            launch_url: Some("not a url".to_string()),
            ..KioskConfig::new()
        };
        assert!(config.launch_params().is_err());
    }
}
