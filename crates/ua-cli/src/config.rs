//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use ua_core::DetectorConfig;
use ua_push::VapidConfig;

/// Unprefixed environment variables accepted for deployment compatibility.
const RAW_ENV_KEYS: &[&str] = &[
    "DATABASE_PATH",
    "TIME_RANGE",
    "NOTIFICATION_FREQUENCY_THRESHOLD",
    "TIME_TO_WAIT",
    "TIMEOUT",
    "NOTIFICATION_RETENTION_SECS",
    "REDIRECT_URL",
    "VAPID_PUBLIC_KEY",
    "VAPID_PRIVATE_KEY",
];

const PEM_PREFIX: &str = "-----BEGIN";

/// Longest accepted notification retention (one day). A notifying run
/// sleeps for the retention period before removing its records.
const MAX_RETENTION_SECS: u64 = 24 * 60 * 60;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Minutes two requests may differ and still count as the same time.
    pub time_range: f64,
    /// Minimum number of recurrences before notifying.
    pub notification_frequency_threshold: f64,
    /// Minutes to wait after the usual request time before notifying.
    pub time_to_wait: f64,
    /// Minutes the notification window stays open.
    pub timeout: f64,
    /// Seconds a notification record is kept before being purged.
    pub notification_retention_secs: u64,
    /// VAPID subject (contact URL or `mailto:` address).
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// VAPID public key, base64url encoded.
    #[serde(default)]
    pub vapid_public_key: Option<String>,
    /// VAPID private key: inline PKCS#8 PEM, or a path to a PEM file.
    #[serde(default)]
    pub vapid_private_key: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("time_range", &self.time_range)
            .field(
                "notification_frequency_threshold",
                &self.notification_frequency_threshold,
            )
            .field("time_to_wait", &self.time_to_wait)
            .field("timeout", &self.timeout)
            .field("notification_retention_secs", &self.notification_retention_secs)
            .field("redirect_url", &self.redirect_url)
            .field("vapid_public_key", &self.vapid_public_key)
            .field(
                "vapid_private_key",
                &self.vapid_private_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        let detector = DetectorConfig::default();
        Self {
            database_path: data_dir.join("ua.db"),
            time_range: detector.tolerance_minutes,
            notification_frequency_threshold: detector.frequency_threshold,
            time_to_wait: detector.time_to_wait_minutes,
            timeout: detector.timeout_minutes,
            notification_retention_secs: 10,
            redirect_url: None,
            vapid_public_key: None,
            vapid_private_key: None,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Plain variables (TIME_RANGE, ...), then UA_* which take precedence
        figment = figment.merge(Env::raw().only(RAW_ENV_KEYS));
        figment = figment.merge(Env::prefixed("UA_"));

        figment.extract()
    }

    /// Detector tuning derived from this configuration.
    pub const fn detector(&self) -> DetectorConfig {
        DetectorConfig {
            tolerance_minutes: self.time_range,
            frequency_threshold: self.notification_frequency_threshold,
            time_to_wait_minutes: self.time_to_wait,
            timeout_minutes: self.timeout,
        }
    }

    /// How long notification records are kept.
    pub fn retention(&self) -> Result<chrono::Duration> {
        let secs = self.notification_retention_secs;
        if secs > MAX_RETENTION_SECS {
            anyhow::bail!(
                "NOTIFICATION_RETENTION_SECS is {secs}, must be at most {MAX_RETENTION_SECS}"
            );
        }
        let secs = i64::try_from(secs).context("notification retention out of range")?;
        chrono::Duration::try_seconds(secs).context("notification retention out of range")
    }

    /// VAPID identity for push delivery.
    ///
    /// Fails if any delivery setting is missing, since notifications cannot
    /// be sent without them.
    pub fn vapid(&self) -> Result<VapidConfig> {
        let subject = required(self.redirect_url.as_deref(), "REDIRECT_URL")?;
        let public_key = required(self.vapid_public_key.as_deref(), "VAPID_PUBLIC_KEY")?;
        let private_key = required(self.vapid_private_key.as_deref(), "VAPID_PRIVATE_KEY")?;

        // Inline keys are passed through as written; only paths are trimmed.
        let private_key_pem = if private_key.starts_with(PEM_PREFIX) {
            self.vapid_private_key.clone().unwrap_or_default()
        } else {
            std::fs::read_to_string(private_key)
                .with_context(|| format!("failed to read VAPID private key from {private_key}"))?
        };

        Ok(VapidConfig {
            subject: subject.to_string(),
            public_key: public_key.to_string(),
            private_key_pem,
        })
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!("missing {name}: set it in the environment or config.toml to send notifications")
        })
}

/// Returns the platform-specific config directory for ua.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ua"))
}

/// Returns the platform-specific data directory for ua.
///
/// On Linux: `~/.local/share/ua`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("ua"))
}
