use std::fmt;

use anyhow::Result;

use crate::db::Database;

pub(crate) const DEFAULT_CACHE_TTL_MINUTES: u64 = 30;
pub(crate) const DEFAULT_HISTORY_LIMIT: usize = 50;
pub(crate) const DEFAULT_CHECK_INTERVAL_MINUTES: u64 = 30;
pub(crate) const CHECK_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 15..=60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum SettingsError {
    #[error("unknown setting '{0}' (known: {known})", known = SettingKey::ALL.map(SettingKey::as_str).join(", "))]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SettingKey {
    Username,
    MonitorUrl,
    MonitorEnabled,
    CacheTtlMinutes,
    HistoryLimit,
    CheckIntervalMinutes,
}

impl SettingKey {
    const ALL: [SettingKey; 6] = [
        Self::Username,
        Self::MonitorUrl,
        Self::MonitorEnabled,
        Self::CacheTtlMinutes,
        Self::HistoryLimit,
        Self::CheckIntervalMinutes,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::MonitorUrl => "monitor_url",
            Self::MonitorEnabled => "monitor_enabled",
            Self::CacheTtlMinutes => "cache_ttl_minutes",
            Self::HistoryLimit => "history_limit",
            Self::CheckIntervalMinutes => "check_interval_minutes",
        }
    }

    pub(crate) fn parse(raw: &str) -> Result<Self, SettingsError> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == raw.trim())
            .ok_or_else(|| SettingsError::UnknownKey(raw.trim().to_string()))
    }

    /// Checks a raw value and returns the form that gets stored.
    pub(crate) fn validate(self, raw: &str) -> Result<String, SettingsError> {
        let value = raw.trim();
        let invalid = |reason: &str| SettingsError::InvalidValue {
            key: self.as_str(),
            reason: reason.to_string(),
        };
        match self {
            Self::Username => {
                if is_valid_username(value) {
                    Ok(value.to_string())
                } else {
                    Err(invalid("expected 2-16 letters, digits, '_' or '-'"))
                }
            }
            Self::MonitorUrl => {
                if is_valid_url(value) {
                    Ok(value.to_string())
                } else {
                    Err(invalid("expected an http:// or https:// URL"))
                }
            }
            Self::MonitorEnabled => parse_bool(value)
                .map(|flag| flag.to_string())
                .ok_or_else(|| invalid("expected true or false")),
            Self::CacheTtlMinutes | Self::HistoryLimit => match value.parse::<u64>() {
                Ok(number) if number > 0 => Ok(number.to_string()),
                _ => Err(invalid("expected a positive whole number")),
            },
            Self::CheckIntervalMinutes => match value.parse::<u64>() {
                Ok(number) if CHECK_INTERVAL_RANGE.contains(&number) => Ok(number.to_string()),
                _ => Err(invalid("expected a whole number of minutes between 15 and 60")),
            },
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Snapshot of the persisted configuration, with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub(crate) username: Option<String>,
    pub(crate) monitor_url: Option<String>,
    pub(crate) monitor_enabled: bool,
    pub(crate) cache_ttl_minutes: u64,
    pub(crate) history_limit: usize,
    pub(crate) check_interval_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: None,
            monitor_url: None,
            monitor_enabled: false,
            cache_ttl_minutes: DEFAULT_CACHE_TTL_MINUTES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
        }
    }
}

impl Settings {
    /// Unreadable stored values fall back to defaults with a warning.
    pub(crate) fn load(db: &Database) -> Result<Self> {
        let defaults = Self::default();
        let read = |key: SettingKey| -> Result<Option<String>> {
            let Some(raw) = db.setting(key.as_str())? else {
                return Ok(None);
            };
            match key.validate(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    tracing::warn!(%err, "ignoring stored setting");
                    Ok(None)
                }
            }
        };

        Ok(Self {
            username: read(SettingKey::Username)?,
            monitor_url: read(SettingKey::MonitorUrl)?,
            monitor_enabled: read(SettingKey::MonitorEnabled)?
                .and_then(|value| parse_bool(&value))
                .unwrap_or(defaults.monitor_enabled),
            cache_ttl_minutes: read(SettingKey::CacheTtlMinutes)?
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.cache_ttl_minutes),
            history_limit: read(SettingKey::HistoryLimit)?
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.history_limit),
            check_interval_minutes: read(SettingKey::CheckIntervalMinutes)?
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.check_interval_minutes),
        })
    }

    pub(crate) fn cache_ttl_millis(&self) -> i64 {
        i64::try_from(self.cache_ttl_minutes.saturating_mul(60_000)).unwrap_or(i64::MAX)
    }

    /// Monitored URL when monitoring is switched on.
    pub(crate) fn active_monitor_url(&self) -> Option<&str> {
        self.monitor_url
            .as_deref()
            .filter(|_| self.monitor_enabled)
    }

    pub(crate) fn display_rows(&self) -> Vec<(SettingKey, String)> {
        vec![
            (
                SettingKey::Username,
                self.username.clone().unwrap_or_else(|| "(not set)".to_string()),
            ),
            (
                SettingKey::MonitorUrl,
                self.monitor_url
                    .clone()
                    .unwrap_or_else(|| "(not set)".to_string()),
            ),
            (SettingKey::MonitorEnabled, self.monitor_enabled.to_string()),
            (SettingKey::CacheTtlMinutes, self.cache_ttl_minutes.to_string()),
            (SettingKey::HistoryLimit, self.history_limit.to_string()),
            (
                SettingKey::CheckIntervalMinutes,
                self.check_interval_minutes.to_string(),
            ),
        ]
    }
}

pub(crate) fn is_valid_username(raw: &str) -> bool {
    (2..=16).contains(&raw.chars().count())
        && raw
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

pub(crate) fn is_valid_url(raw: &str) -> bool {
    let Some(rest) = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
    else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    !host.is_empty() && !raw.chars().any(char::is_whitespace)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
