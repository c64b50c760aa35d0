use crate::monitor::MonitorConfig;
use crate::payment_core::{DispatchConfig, LnbitsConfig};
use crate::relay_core::FilterConfig;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Everything the bot reads at startup.
///
/// Environment variables:
/// - `TARGET_NOTE_ID` (required) - hex id of the note to watch
/// - `LNBITS_URL`, `LNBITS_API_KEY` (required) - payment backend
/// - `NOSTR_RELAY_URLS` (required) - comma-separated `ws://` / `wss://` relays
/// - `PAYMENT_AMOUNT` (default: 1) - sats per qualifying repost
/// - `RATE_LIMIT_HOURS` (default: 24) - one payment per actor per note per window
/// - `DB_PATH` (default: payments.db)
/// - `PAYMENT_TIMEOUT_SECS` (default: 10)
/// - `POLL_INTERVAL_MS` (default: 500)
/// - `ERROR_BACKOFF_SECS` (default: 5)
/// - `ACCEPTED_KINDS` (default: 1,6) - event kinds that may carry the reaction
/// - `REFERENCE_TAGS` (default: e,q) - tag names that may point at the note
/// - `REQUIRE_COMMENT` (default: false) - only pay reactions with accompanying text
/// - `RUST_LOG` (default: info)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub target_note_id: String,
    pub lnbits_url: String,
    pub lnbits_api_key: String,
    pub relay_urls: Vec<String>,
    pub payment_amount: u64,
    pub rate_limit_hours: u32,
    pub db_path: String,
    pub payment_timeout: Duration,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub accepted_kinds: Vec<u16>,
    pub reference_tags: Vec<String>,
    pub require_comment: bool,
    pub rust_log: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
        };

        let target_note_id = required("TARGET_NOTE_ID")?.to_lowercase();
        if target_note_id.len() != 64 || !target_note_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidValue(format!(
                "TARGET_NOTE_ID must be a 64-character hex event id, got '{}'",
                target_note_id
            )));
        }

        let lnbits_api_key = required("LNBITS_API_KEY")?;

        let lnbits_url = required("LNBITS_URL")?;
        if !lnbits_url.starts_with("http://") && !lnbits_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "LNBITS_URL must start with http:// or https://, got '{}'",
                lnbits_url
            )));
        }

        let relay_urls = parse_relay_urls(&required("NOSTR_RELAY_URLS")?)?;

        let payment_amount = parse_positive(&lookup, "PAYMENT_AMOUNT", 1u64)?;
        let rate_limit_hours = parse_positive(&lookup, "RATE_LIMIT_HOURS", 24u32)?;
        let payment_timeout_secs = parse_positive(&lookup, "PAYMENT_TIMEOUT_SECS", 10u64)?;
        let poll_interval_ms = parse_positive(&lookup, "POLL_INTERVAL_MS", 500u64)?;
        let error_backoff_secs = parse_positive(&lookup, "ERROR_BACKOFF_SECS", 5u64)?;

        let accepted_kinds = match lookup("ACCEPTED_KINDS") {
            Some(raw) => split_list(&raw)
                .into_iter()
                .map(|kind| {
                    kind.parse::<u16>().map_err(|_| {
                        ConfigError::InvalidValue(format!("ACCEPTED_KINDS entry '{}' is not a kind number", kind))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => FilterConfig::default().accepted_kinds,
        };
        if accepted_kinds.is_empty() {
            return Err(ConfigError::InvalidValue("ACCEPTED_KINDS cannot be empty".to_string()));
        }

        let reference_tags = match lookup("REFERENCE_TAGS") {
            Some(raw) => split_list(&raw),
            None => FilterConfig::default().reference_tags,
        };
        if reference_tags.is_empty() {
            return Err(ConfigError::InvalidValue("REFERENCE_TAGS cannot be empty".to_string()));
        }

        let require_comment = match lookup("REQUIRE_COMMENT") {
            Some(raw) => raw.trim().to_lowercase().parse::<bool>().map_err(|_| {
                ConfigError::InvalidValue(format!("REQUIRE_COMMENT must be true or false, got '{}'", raw))
            })?,
            None => false,
        };

        Ok(Self {
            target_note_id,
            lnbits_url,
            lnbits_api_key,
            relay_urls,
            payment_amount,
            rate_limit_hours,
            db_path: lookup("DB_PATH").unwrap_or_else(|| "payments.db".to_string()),
            payment_timeout: Duration::from_secs(payment_timeout_secs),
            poll_interval: Duration::from_millis(poll_interval_ms),
            error_backoff: Duration::from_secs(error_backoff_secs),
            accepted_kinds,
            reference_tags,
            require_comment,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            accepted_kinds: self.accepted_kinds.clone(),
            reference_tags: self.reference_tags.clone(),
            require_comment: self.require_comment,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            rate_limit_hours: self.rate_limit_hours,
            payment_timeout: self.payment_timeout,
        }
    }

    pub fn lnbits_config(&self) -> LnbitsConfig {
        LnbitsConfig {
            base_url: self.lnbits_url.clone(),
            api_key: self.lnbits_api_key.clone(),
            timeout: self.payment_timeout,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            target_post_id: self.target_note_id.clone(),
            amount_units: self.payment_amount,
            relay_urls: self.relay_urls.clone(),
            poll_interval: self.poll_interval,
            error_backoff: self.error_backoff,
            ..MonitorConfig::default()
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_relay_urls(raw: &str) -> Result<Vec<String>, ConfigError> {
    let urls = split_list(raw);
    if urls.is_empty() {
        return Err(ConfigError::InvalidValue(
            "NOSTR_RELAY_URLS must contain at least one relay".to_string(),
        ));
    }

    for url in &urls {
        let host = url
            .strip_prefix("wss://")
            .or_else(|| url.strip_prefix("ws://"))
            .ok_or_else(|| {
                ConfigError::InvalidValue(format!("Invalid relay URL '{}': must start with ws:// or wss://", url))
            })?;
        if host.is_empty() || host.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!("Invalid relay URL '{}': missing host", url)));
        }
    }

    Ok(urls)
}

fn parse_positive<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(format!("{} must be a positive integer, got '{}'", key, raw)))?;

    if value < T::from(1) {
        return Err(ConfigError::InvalidValue(format!("{} must be at least 1", key)));
    }

    Ok(value)
}
