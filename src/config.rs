use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_REQUEST_TOPIC: &str = "credential-request";
pub const DEFAULT_RESPONSE_TOPIC: &str = "credential-response";
pub const DEFAULT_SUBSCRIPTION: &str = "credential-subscription";
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Settings for the queue consumer, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Queue project identifier. Defaults to an empty string.
    pub project: String,
    /// Topic requests arrive on. `REQUEST_TOPIC` overrides `PUBSUB_REQUEST_TOPIC`.
    pub request_topic: String,
    /// Topic responses are published to. `NOTIFY_TOPIC` overrides `PUBSUB_RESPONSE_TOPIC`.
    pub response_topic: String,
    pub subscription: String,
    pub pubsub_endpoint: String,
    /// Pre-obtained bearer token. `ACCESS_TOKEN_FILE` wins over `ACCESS_TOKEN`.
    pub access_token: Option<String>,
    /// Directory holding the issuance executables.
    pub scripts_dir: PathBuf,
    /// Pause after a failed pull before trying again.
    pub pull_retry_interval: Duration,
    pub refresh_crls_on_boot: bool,
}

impl ProvisionerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source so tests never touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| read_optional(&lookup, key);

        let request_topic = read("REQUEST_TOPIC")
            .or_else(|| read("PUBSUB_REQUEST_TOPIC"))
            .unwrap_or_else(|| DEFAULT_REQUEST_TOPIC.to_string());
        let response_topic = read("NOTIFY_TOPIC")
            .or_else(|| read("PUBSUB_RESPONSE_TOPIC"))
            .unwrap_or_else(|| DEFAULT_RESPONSE_TOPIC.to_string());
        let subscription =
            read("PUBSUB_SUBSCRIPTION").unwrap_or_else(|| DEFAULT_SUBSCRIPTION.to_string());

        let pull_retry_secs = match read("PULL_RETRY_INTERVAL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    var: "PULL_RETRY_INTERVAL_SECS",
                    reason: format!("expected a positive integer, got '{raw}'"),
                })?,
            None => 10,
        };

        let refresh_crls_on_boot = match read("REFRESH_CRLS_ON_BOOT") {
            Some(raw) => parse_bool("REFRESH_CRLS_ON_BOOT", &raw)?,
            None => true,
        };

        Ok(Self {
            project: read("PUBSUB_PROJECT").unwrap_or_default(),
            request_topic,
            response_topic,
            subscription,
            pubsub_endpoint: read("PUBSUB_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_PUBSUB_ENDPOINT.to_string()),
            access_token: read_secret(&lookup, "ACCESS_TOKEN", "ACCESS_TOKEN_FILE")?,
            scripts_dir: read("SCRIPTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            pull_retry_interval: Duration::from_secs(pull_retry_secs),
            refresh_crls_on_boot,
        })
    }
}

/// Settings for the storage CLI and the index updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub bucket: String,
    pub endpoint: String,
    pub access_token: Option<String>,
    /// One backoff "time unit". Attempt `i` waits `2^i` units plus jitter.
    pub backoff_unit: Duration,
    /// Total sleep, in units, after which the updater gives up.
    pub backoff_ceiling_units: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            access_token: None,
            backoff_unit: Duration::from_secs(1),
            backoff_ceiling_units: 32,
        }
    }
}

fn read_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_secret<F>(
    lookup: &F,
    value_key: &'static str,
    file_key: &'static str,
) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = read_optional(lookup, file_key) {
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::SecretFile {
            var: file_key,
            path: path.clone(),
            source,
        })?;
        let trimmed = contents.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed));
        }
    }

    Ok(read_optional(lookup, value_key))
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ProvisionerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProvisionerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.project, "");
        assert_eq!(config.request_topic, DEFAULT_REQUEST_TOPIC);
        assert_eq!(config.response_topic, DEFAULT_RESPONSE_TOPIC);
        assert_eq!(config.subscription, DEFAULT_SUBSCRIPTION);
        assert_eq!(config.pubsub_endpoint, DEFAULT_PUBSUB_ENDPOINT);
        assert_eq!(config.access_token, None);
        assert_eq!(config.scripts_dir, PathBuf::from("."));
        assert_eq!(config.pull_retry_interval, Duration::from_secs(10));
        assert!(config.refresh_crls_on_boot);
    }

    #[test]
    fn short_topic_names_override_prefixed_ones() {
        let config = config_from(&[
            ("PUBSUB_REQUEST_TOPIC", "prefixed-request"),
            ("REQUEST_TOPIC", "short-request"),
            ("PUBSUB_RESPONSE_TOPIC", "prefixed-response"),
        ])
        .unwrap();
        assert_eq!(config.request_topic, "short-request");
        assert_eq!(config.response_topic, "prefixed-response");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[("PUBSUB_SUBSCRIPTION", "   ")]).unwrap();
        assert_eq!(config.subscription, DEFAULT_SUBSCRIPTION);
    }

    #[test]
    fn rejects_zero_pull_interval() {
        let err = config_from(&[("PULL_RETRY_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "PULL_RETRY_INTERVAL_SECS",
                ..
            }
        ));
    }

    #[test]
    fn parses_boot_refresh_flag() {
        let config = config_from(&[("REFRESH_CRLS_ON_BOOT", "no")]).unwrap();
        assert!(!config.refresh_crls_on_boot);
        assert!(config_from(&[("REFRESH_CRLS_ON_BOOT", "maybe")]).is_err());
    }

    #[test]
    fn token_file_wins_over_inline_token() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();
        let path = file.path().to_string_lossy().to_string();
        let config = config_from(&[
            ("ACCESS_TOKEN", "inline"),
            ("ACCESS_TOKEN_FILE", path.as_str()),
        ])
        .unwrap();
        assert_eq!(config.access_token.as_deref(), Some("from-file"));
    }

    #[test]
    fn store_defaults_back_off_in_seconds_up_to_32_units() {
        let config = StoreConfig::default();
        assert_eq!(config.endpoint, DEFAULT_STORAGE_ENDPOINT);
        assert_eq!(config.backoff_unit, Duration::from_secs(1));
        assert_eq!(config.backoff_ceiling_units, 32);
    }
}
