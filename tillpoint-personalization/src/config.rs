//! Personalization configuration.
//!
//! Every field has a default, so a configuration file only needs the values
//! it overrides:
//!
//! ```
//! use tillpoint_personalization::PersonalizationConfig;
//!
//! let config = PersonalizationConfig::from_json(r#"{ "savedSession": { "maxAttempts": 3 } }"#)
//!     .expect("valid config");
//! assert_eq!(config.saved_session.max_attempts, Some(3));
//! assert_eq!(config.default_server_port, 6140);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port the personalization server listens on unless told otherwise.
pub const DEFAULT_SERVER_PORT: u16 = 6140;

/// mDNS service type advertised by personalization servers.
pub const DEFAULT_SERVICE_TYPE: &str = "_jmc-personalize._tcp.";

/// Top-level personalization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalizationConfig {
    /// Device type reported in personalize requests.
    pub device_type: String,
    /// Name this device announces when asking for auto-personalization.
    pub device_name: Option<String>,
    /// Port used when a source names a server but no port.
    pub default_server_port: u16,
    /// Timeout for personalize and configuration requests.
    pub request_timeout_ms: u64,
    /// Timeout for the auto-personalization parameter fetch.
    pub auto_personalization_timeout_ms: u64,
    /// Zero-conf discovery settings.
    pub zero_conf: ZeroConfConfig,
    /// Saved-session retry settings.
    pub saved_session: SavedSessionConfig,
    /// Manual entry settings.
    pub manual_entry: ManualEntryConfig,
}

impl Default for PersonalizationConfig {
    fn default() -> Self {
        Self {
            device_type: "desktop".to_string(),
            device_name: None,
            default_server_port: DEFAULT_SERVER_PORT,
            request_timeout_ms: 30_000,
            auto_personalization_timeout_ms: 10_000,
            zero_conf: ZeroConfConfig::default(),
            saved_session: SavedSessionConfig::default(),
            manual_entry: ManualEntryConfig::default(),
        }
    }
}

impl PersonalizationConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid configuration object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Timeout for personalize and configuration requests.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Timeout for the auto-personalization parameter fetch.
    #[must_use]
    pub fn auto_personalization_timeout(&self) -> Duration {
        Duration::from_millis(self.auto_personalization_timeout_ms)
    }
}

/// Zero-conf discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZeroConfConfig {
    /// Service type to browse for.
    pub service_type: String,
    /// How long to wait for the first resolved instance.
    pub discovery_timeout_ms: u64,
    /// Keep retrying each phase while the discovery modal is open.
    pub retry: bool,
    /// Backoff between discovery attempts.
    pub discovery_backoff: BackoffConfig,
    /// Backoff between parameter fetch attempts.
    pub fetch_backoff: BackoffConfig,
    /// Backoff between personalize attempts.
    pub personalize_backoff: BackoffConfig,
}

impl Default for ZeroConfConfig {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            discovery_timeout_ms: 5_000,
            retry: false,
            discovery_backoff: BackoffConfig::new(1_000, 10_000, 2.0),
            fetch_backoff: BackoffConfig::new(1_000, 30_000, 2.0),
            personalize_backoff: BackoffConfig::new(1_000, 30_000, 2.0),
        }
    }
}

impl ZeroConfConfig {
    /// How long to wait for the first resolved instance.
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

/// Saved-session retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SavedSessionConfig {
    /// Countdown steps shown between attempts.
    pub countdown_steps: u32,
    /// Length of one countdown step.
    pub countdown_step_ms: u64,
    /// Give up after this many attempts; `None` retries until success.
    pub max_attempts: Option<u32>,
}

impl Default for SavedSessionConfig {
    fn default() -> Self {
        Self {
            countdown_steps: 5,
            countdown_step_ms: 1_000,
            max_attempts: None,
        }
    }
}

/// Manual entry settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManualEntryConfig {
    /// Whether dismissing the dialog fails the task instead of reopening it.
    pub can_cancel: bool,
}

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any delay in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(1_000, 30_000, 2.0)
    }
}

impl BackoffConfig {
    /// Create a backoff configuration.
    #[must_use]
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            multiplier,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay_ms as f64).max(0.0) as u64;
        Duration::from_millis(capped_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PersonalizationConfig::default();
        assert_eq!(config.device_type, "desktop");
        assert_eq!(config.default_server_port, 6140);
        assert_eq!(config.zero_conf.service_type, "_jmc-personalize._tcp.");
        assert_eq!(config.saved_session.countdown_steps, 5);
        assert_eq!(config.saved_session.countdown_step_ms, 1_000);
        assert_eq!(config.saved_session.max_attempts, None);
        assert!(!config.manual_entry.can_cancel);
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let discovery = ZeroConfConfig::default().discovery_backoff;
        let delays: Vec<Duration> = (0..6).map(|a| discovery.delay_for_attempt(a)).collect();
        let expected: Vec<Duration> = [1_000, 2_000, 4_000, 8_000, 10_000, 10_000]
            .into_iter()
            .map(Duration::from_millis)
            .collect();
        assert_eq!(delays, expected);

        let fetch = ZeroConfConfig::default().fetch_backoff;
        assert_eq!(fetch.delay_for_attempt(4), Duration::from_millis(16_000));
        assert_eq!(fetch.delay_for_attempt(5), Duration::from_millis(30_000));
        assert_eq!(fetch.delay_for_attempt(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PersonalizationConfig::from_json(
            r#"{
                "deviceType": "tablet",
                "zeroConf": { "retry": true, "discoveryTimeoutMs": 250 },
                "manualEntry": { "canCancel": true }
            }"#,
        )
        .expect("parse");
        assert_eq!(config.device_type, "tablet");
        assert!(config.zero_conf.retry);
        assert_eq!(config.zero_conf.discovery_timeout(), Duration::from_millis(250));
        assert_eq!(config.zero_conf.service_type, DEFAULT_SERVICE_TYPE);
        assert!(config.manual_entry.can_cancel);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_shape_is_rejected() {
        assert!(PersonalizationConfig::from_json(r#"{ "defaultServerPort": "x" }"#).is_err());
    }
}
