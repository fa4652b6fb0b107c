//! Application-level configuration loading: match timing rules and relay destination.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};
use validator::Validate;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PROP_SYNC_BACK_CONFIG_PATH";

const DEFAULT_DISPLAYED_DURATION_SECS: u64 = 400;
const DEFAULT_AUTO_END_WITHOUT_PLANT_SECS: u64 = 180;
const DEFAULT_DEFUSE_WINDOW_SECS: u64 = 40;
const DEFAULT_LATENCY_WINDOW: usize = 10;
const DEFAULT_PROP_SESSION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FINAL_DATA_TIMEOUT_SECS: u64 = 10;
const DEFAULT_AUTOMATION_DEBOUNCE_MS: u64 = 3_000;
const DEFAULT_RELAY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Timing rules of the match coordinator.
    pub match_rules: MatchRules,
    /// Downstream relay destination.
    pub relay: RelayConfig,
}

/// Timing rules and team labels consumed by the match coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRules {
    /// Match length as displayed by the host.
    pub displayed_duration: Duration,
    /// End the match when nobody planted after this much play time.
    pub auto_end_without_plant: Duration,
    /// Time the defenders get after a plant.
    pub defuse_window: Duration,
    /// Samples per latency window.
    pub latency_window: usize,
    /// Prop silence after which clock sync starts over.
    pub prop_session_timeout: Duration,
    /// Wait for the host's closing packet before synthesizing one.
    pub final_data_timeout: Duration,
    /// Minimum spacing between automation attempts.
    pub automation_debounce: Duration,
    /// Team credited with detonations and expired defuse windows.
    pub attacking_team: String,
    /// Team credited with defusals and plant-less timeouts.
    pub defending_team: String,
}

impl Default for MatchRules {
    fn default() -> Self {
        RawMatchRules::default().into()
    }
}

/// Relay destination settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Master switch.
    pub enabled: bool,
    /// Destination URL.
    pub url: Option<String>,
    /// Optional bearer token sent with every POST.
    pub bearer_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RelayConfig {
    /// The relay only sends when switched on and pointed at a non-empty URL.
    pub fn is_active(&self) -> bool {
        self.enabled && self.url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        RawRelayConfig::default().into()
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        relay_enabled = app_config.relay.is_active(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(contents)?;
        raw.validate()?;
        Ok(raw.into())
    }
}

/// Reasons a configuration document is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Not valid JSON for the expected shape.
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid config values: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Default, Deserialize, Validate)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default, rename = "match")]
    #[validate(nested)]
    match_rules: RawMatchRules,
    #[serde(default)]
    #[validate(nested)]
    relay: RawRelayConfig,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            match_rules: value.match_rules.into(),
            relay: value.relay.into(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default)]
struct RawMatchRules {
    #[validate(range(min = 1))]
    displayed_duration_secs: u64,
    #[validate(range(min = 1))]
    auto_end_without_plant_secs: u64,
    #[validate(range(min = 1))]
    defuse_window_secs: u64,
    #[validate(range(min = 1))]
    latency_window: usize,
    #[validate(range(min = 1))]
    prop_session_timeout_secs: u64,
    #[validate(range(min = 1))]
    final_data_timeout_secs: u64,
    #[validate(range(min = 1))]
    automation_debounce_ms: u64,
    #[validate(length(min = 1))]
    attacking_team: String,
    #[validate(length(min = 1))]
    defending_team: String,
}

impl Default for RawMatchRules {
    fn default() -> Self {
        Self {
            displayed_duration_secs: DEFAULT_DISPLAYED_DURATION_SECS,
            auto_end_without_plant_secs: DEFAULT_AUTO_END_WITHOUT_PLANT_SECS,
            defuse_window_secs: DEFAULT_DEFUSE_WINDOW_SECS,
            latency_window: DEFAULT_LATENCY_WINDOW,
            prop_session_timeout_secs: DEFAULT_PROP_SESSION_TIMEOUT_SECS,
            final_data_timeout_secs: DEFAULT_FINAL_DATA_TIMEOUT_SECS,
            automation_debounce_ms: DEFAULT_AUTOMATION_DEBOUNCE_MS,
            attacking_team: "attackers".into(),
            defending_team: "defenders".into(),
        }
    }
}

impl From<RawMatchRules> for MatchRules {
    fn from(value: RawMatchRules) -> Self {
        Self {
            displayed_duration: Duration::from_secs(value.displayed_duration_secs),
            auto_end_without_plant: Duration::from_secs(value.auto_end_without_plant_secs),
            defuse_window: Duration::from_secs(value.defuse_window_secs),
            latency_window: value.latency_window,
            prop_session_timeout: Duration::from_secs(value.prop_session_timeout_secs),
            final_data_timeout: Duration::from_secs(value.final_data_timeout_secs),
            automation_debounce: Duration::from_millis(value.automation_debounce_ms),
            attacking_team: value.attacking_team,
            defending_team: value.defending_team,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default)]
struct RawRelayConfig {
    enabled: bool,
    #[validate(url)]
    url: Option<String>,
    bearer_token: Option<String>,
    #[validate(range(min = 1))]
    timeout_ms: u64,
}

impl Default for RawRelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            bearer_token: None,
            timeout_ms: DEFAULT_RELAY_TIMEOUT_MS,
        }
    }
}

impl From<RawRelayConfig> for RelayConfig {
    fn from(value: RawRelayConfig) -> Self {
        Self {
            enabled: value.enabled,
            url: value.url.filter(|url| !url.trim().is_empty()),
            bearer_token: value.bearer_token.filter(|token| !token.is_empty()),
            timeout: Duration::from_millis(value.timeout_ms),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::parse("{}").unwrap();
        assert_eq!(config.match_rules, MatchRules::default());
        assert_eq!(config.match_rules.displayed_duration, Duration::from_secs(400));
        assert!(!config.relay.is_active());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::parse(
            r#"{
                "match": { "defuse_window_secs": 45 },
                "relay": { "enabled": true, "url": "http://127.0.0.1:9000/ingest", "bearer_token": "abc" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.match_rules.defuse_window, Duration::from_secs(45));
        assert_eq!(
            config.match_rules.auto_end_without_plant,
            Duration::from_secs(180)
        );
        assert!(config.relay.is_active());
        assert_eq!(config.relay.bearer_token.as_deref(), Some("abc"));
    }

    #[test]
    fn zero_timing_is_rejected() {
        let err = AppConfig::parse(r#"{ "match": { "latency_window": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn relay_without_url_is_inactive() {
        let config = AppConfig::parse(r#"{ "relay": { "enabled": true, "url": "  " } }"#);
        // A blank URL is not a valid URL.
        assert!(config.is_err());

        let config = AppConfig::parse(r#"{ "relay": { "enabled": true } }"#).unwrap();
        assert!(!config.relay.is_active());
    }
}
