use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::capabilities::{HttpError, RetryPolicy, ValidatedUrl};
use crate::filter::Locale;
use crate::model::UserId;
use crate::telemetry::LogFormat;

pub const ENV_BACKEND: &str = "VEHICLE_EVAL_BACKEND";
pub const ENV_DB_PATH: &str = "VEHICLE_EVAL_DB_PATH";
pub const ENV_REMOTE_URL: &str = "VEHICLE_EVAL_REMOTE_URL";
pub const ENV_REMOTE_KEY: &str = "VEHICLE_EVAL_REMOTE_KEY";
pub const ENV_ALLOW_PRIVATE_HOSTS: &str = "VEHICLE_EVAL_ALLOW_PRIVATE_HOSTS";
pub const ENV_USER_ID: &str = "VEHICLE_EVAL_USER_ID";
pub const ENV_SEARCH_DEBOUNCE_MS: &str = "VEHICLE_EVAL_SEARCH_DEBOUNCE_MS";
pub const ENV_AUTOSAVE_MS: &str = "VEHICLE_EVAL_AUTOSAVE_MS";
pub const ENV_AUTOSAVE_EXPIRY_HOURS: &str = "VEHICLE_EVAL_AUTOSAVE_EXPIRY_HOURS";
pub const ENV_LOCALE: &str = "VEHICLE_EVAL_LOCALE";
pub const ENV_LOG_FORMAT: &str = "VEHICLE_EVAL_LOG_FORMAT";

pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_AUTOSAVE_MS: u64 = 2_000;
pub const DEFAULT_AUTOSAVE_EXPIRY_HOURS: u64 = 24;
pub const DEFAULT_ACTIVITY_LOG_LIMIT: usize = 500;
const MAX_AUTOSAVE_EXPIRY_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "supabase" => Ok(Self::Remote),
            other => Err(format!("unknown backend '{other}', expected 'local' or 'remote'")),
        }
    }
}

#[derive(Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: SecretString,
    pub allow_private_hosts: bool,
    pub retry: RetryPolicy,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("allow_private_hosts", &self.allow_private_hosts)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RemoteConfig {
    pub fn validated_url(&self) -> Result<ValidatedUrl, HttpError> {
        if self.allow_private_hosts {
            ValidatedUrl::new_allow_private(self.url.as_str())
        } else {
            ValidatedUrl::new(self.url.as_str())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// SQLite file for device-local data; in-memory when unset.
    pub db_path: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOptions {
    pub debounce_ms: u64,
    /// Mirror the filter state into the location's query string.
    pub sync_location: bool,
    pub locale: Locale,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_SEARCH_DEBOUNCE_MS,
            sync_location: true,
            locale: Locale::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSaveConfig {
    pub debounce_ms: u64,
    pub expiry_hours: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_AUTOSAVE_MS,
            expiry_hours: DEFAULT_AUTOSAVE_EXPIRY_HOURS,
        }
    }
}

impl AutoSaveConfig {
    pub fn expiry(&self) -> chrono::Duration {
        let hours = self.expiry_hours.min(MAX_AUTOSAVE_EXPIRY_HOURS);
        chrono::Duration::hours(i64::try_from(hours).unwrap_or(24))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityConfig {
    pub max_local_entries: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            max_local_entries: DEFAULT_ACTIVITY_LOG_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub filter: FilterOptions,
    pub autosave: AutoSaveConfig,
    pub activity: ActivityConfig,
    pub user_id: Option<UserId>,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, so callers can feed values from anywhere.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let kind = match get(ENV_BACKEND) {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: ENV_BACKEND,
                value: raw,
                reason,
            })?,
            None => BackendKind::Local,
        };

        let remote = match (get(ENV_REMOTE_URL), get(ENV_REMOTE_KEY)) {
            (Some(url), Some(key)) => Some(RemoteConfig {
                url,
                api_key: SecretString::new(key),
                allow_private_hosts: parse_bool(ENV_ALLOW_PRIVATE_HOSTS, get(ENV_ALLOW_PRIVATE_HOSTS), false)?,
                retry: RetryPolicy::default(),
            }),
            (Some(_), None) if kind == BackendKind::Remote => {
                return Err(ConfigError::Missing(ENV_REMOTE_KEY))
            }
            (None, _) if kind == BackendKind::Remote => {
                return Err(ConfigError::Missing(ENV_REMOTE_URL))
            }
            _ => None,
        };

        let locale = match get(ENV_LOCALE).as_deref() {
            None | Some("en") => Locale::En,
            Some("ar") => Locale::Ar,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: ENV_LOCALE,
                    value: other.to_string(),
                    reason: "expected 'en' or 'ar'".to_string(),
                })
            }
        };

        let log_format = match get(ENV_LOG_FORMAT) {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: ENV_LOG_FORMAT,
                value: raw,
                reason,
            })?,
            None => LogFormat::default(),
        };

        let config = Self {
            backend: BackendConfig {
                kind,
                db_path: get(ENV_DB_PATH).map(PathBuf::from),
                remote,
            },
            filter: FilterOptions {
                debounce_ms: parse_u64(ENV_SEARCH_DEBOUNCE_MS, get(ENV_SEARCH_DEBOUNCE_MS), DEFAULT_SEARCH_DEBOUNCE_MS)?,
                sync_location: true,
                locale,
            },
            autosave: AutoSaveConfig {
                debounce_ms: parse_u64(ENV_AUTOSAVE_MS, get(ENV_AUTOSAVE_MS), DEFAULT_AUTOSAVE_MS)?,
                expiry_hours: parse_u64(
                    ENV_AUTOSAVE_EXPIRY_HOURS,
                    get(ENV_AUTOSAVE_EXPIRY_HOURS),
                    DEFAULT_AUTOSAVE_EXPIRY_HOURS,
                )?,
            },
            activity: ActivityConfig::default(),
            user_id: get(ENV_USER_ID).map(UserId::new),
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.debounce_ms > 10_000 {
            return Err(ConfigError::Validation(
                "search debounce should not exceed 10000ms".into(),
            ));
        }
        if self.autosave.debounce_ms == 0 {
            return Err(ConfigError::Validation("auto-save delay must be > 0".into()));
        }
        if self.autosave.expiry_hours == 0 || self.autosave.expiry_hours > MAX_AUTOSAVE_EXPIRY_HOURS {
            return Err(ConfigError::Validation(format!(
                "auto-save expiry must be between 1 and {MAX_AUTOSAVE_EXPIRY_HOURS} hours"
            )));
        }
        if self.activity.max_local_entries == 0 {
            return Err(ConfigError::Validation(
                "activity log limit must be > 0".into(),
            ));
        }
        if let Some(remote) = &self.backend.remote {
            if remote.api_key.expose_secret().is_empty() {
                return Err(ConfigError::Missing(ENV_REMOTE_KEY));
            }
            remote.validated_url().map_err(|e| ConfigError::Invalid {
                var: ENV_REMOTE_URL,
                value: remote.url.clone(),
                reason: e.to_string(),
            })?;
            if remote.retry.max_attempts == 0 {
                return Err(ConfigError::Validation("retry max_attempts must be > 0".into()));
            }
        } else if self.backend.kind == BackendKind::Remote {
            return Err(ConfigError::Missing(ENV_REMOTE_URL));
        }
        Ok(())
    }
}

fn parse_u64(var: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse::<u64>().map_err(|e| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool(var: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref() {
        None => Ok(default),
        Some("1" | "true" | "TRUE" | "yes" | "YES") => Ok(true),
        Some("0" | "false" | "FALSE" | "no" | "NO") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            var,
            value: other.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
