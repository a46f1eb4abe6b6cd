//! Engine configuration.
//!
//! Each deployed handler reads its configuration from the environment exactly
//! once at startup into an [`EngineConfig`] value, which is then passed by
//! value to whatever needs it — there are no process-wide mutable settings.
//!
//! [`EngineConfig::from_lookup`] takes the lookup function as an argument so
//! the parsing and validation rules are testable without mutating the real
//! process environment.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::courier::channel::ChannelMethod;

/// Invalid or inconsistent configuration.
#[derive(Debug)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl Error for ConfigError {}

/// Parsed engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Version string stamped into Context Object metadata.
    pub router_version: String,
    /// Version string stamped into conversation records by the processor.
    pub processor_version: String,
    /// Log filter passed to the logger at startup (`info`, `debug`, ...).
    pub log_level: String,
    /// Region hint for the secret store, when the deployment needs one.
    pub secrets_region: Option<String>,
    /// Tenant configuration table name.
    pub config_table: String,
    /// Conversation state table name.
    pub state_table: String,
    /// Per-channel work queue URLs; a channel without a URL is not deployed.
    pub whatsapp_queue_url: Option<String>,
    pub sms_queue_url: Option<String>,
    pub email_queue_url: Option<String>,
    /// Wait between heartbeat lease extensions.
    pub heartbeat_interval: Duration,
    /// New visibility duration applied by each extension.
    pub heartbeat_extension: Duration,
    /// Initial visibility lease taken on receive.
    pub visibility_timeout: Duration,
    /// Deliveries before a message dead-letters.
    pub max_receive_count: u32,
    /// Wait between LLM run-status polls.
    pub llm_poll_interval: Duration,
    /// Total wall-clock budget for LLM run polling.
    pub llm_poll_budget: Duration,
}

impl EngineConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<EngineConfig, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup function.
    ///
    /// # Example
    ///
    /// ```rust
    /// use courier::config::EngineConfig;
    ///
    /// let config = EngineConfig::from_lookup(|key| match key {
    ///     "COURIER_WHATSAPP_QUEUE_URL" => Some("local://whatsapp".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert!(config.whatsapp_queue_url.is_some());
    /// assert!(config.sms_queue_url.is_none());
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<EngineConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let version = lookup("COURIER_VERSION")
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
        let router_version = lookup("COURIER_ROUTER_VERSION").unwrap_or_else(|| version.clone());
        let processor_version =
            lookup("COURIER_PROCESSOR_VERSION").unwrap_or_else(|| version.clone());

        let visibility_timeout = Duration::from_secs(parse_u64(
            &lookup,
            "COURIER_VISIBILITY_TIMEOUT_SECS",
            900,
        )?);
        let heartbeat_interval = Duration::from_secs(parse_u64(
            &lookup,
            "COURIER_HEARTBEAT_INTERVAL_SECS",
            240,
        )?);
        // Extension defaults to the visibility timeout so each beat restores
        // the full lease.
        let heartbeat_extension = match lookup("COURIER_HEARTBEAT_EXTENSION_SECS") {
            Some(raw) => Duration::from_secs(parse_raw_u64("COURIER_HEARTBEAT_EXTENSION_SECS", &raw)?),
            None => visibility_timeout,
        };

        if heartbeat_interval >= heartbeat_extension {
            return Err(ConfigError(format!(
                "heartbeat interval ({:?}) must be strictly less than the extension ({:?})",
                heartbeat_interval, heartbeat_extension
            )));
        }

        let config = EngineConfig {
            router_version,
            processor_version,
            log_level: lookup("COURIER_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            secrets_region: lookup("COURIER_SECRETS_REGION"),
            config_table: lookup("COURIER_CONFIG_TABLE")
                .unwrap_or_else(|| "courier-config".to_string()),
            state_table: lookup("COURIER_STATE_TABLE")
                .unwrap_or_else(|| "courier-conversations".to_string()),
            whatsapp_queue_url: lookup("COURIER_WHATSAPP_QUEUE_URL"),
            sms_queue_url: lookup("COURIER_SMS_QUEUE_URL"),
            email_queue_url: lookup("COURIER_EMAIL_QUEUE_URL"),
            heartbeat_interval,
            heartbeat_extension,
            visibility_timeout,
            max_receive_count: parse_u64(&lookup, "COURIER_MAX_RECEIVE_COUNT", 3)? as u32,
            llm_poll_interval: Duration::from_millis(parse_u64(
                &lookup,
                "COURIER_LLM_POLL_INTERVAL_MS",
                1000,
            )?),
            llm_poll_budget: Duration::from_secs(parse_u64(
                &lookup,
                "COURIER_LLM_POLL_BUDGET_SECS",
                120,
            )?),
        };

        Ok(config)
    }

    /// The work queue URL configured for `channel`, if any.
    pub fn queue_url(&self, channel: ChannelMethod) -> Option<&str> {
        match channel {
            ChannelMethod::Whatsapp => self.whatsapp_queue_url.as_deref(),
            ChannelMethod::Sms => self.sms_queue_url.as_deref(),
            ChannelMethod::Email => self.email_queue_url.as_deref(),
        }
    }
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_raw_u64(key, &raw),
        None => Ok(default),
    }
}

fn parse_raw_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError(format!("{} must be a non-negative integer, got '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_the_environment_is_empty() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.config_table, "courier-config");
        assert_eq!(config.state_table, "courier-conversations");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_receive_count, 3);
        assert_eq!(config.visibility_timeout, Duration::from_secs(900));
        // Extension follows the visibility timeout unless overridden.
        assert_eq!(config.heartbeat_extension, config.visibility_timeout);
        assert!(config.heartbeat_interval < config.heartbeat_extension);
        assert!(config.queue_url(ChannelMethod::Whatsapp).is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = EngineConfig::from_lookup(|key| match key {
            "COURIER_VERSION" => Some("2.3.4".to_string()),
            "COURIER_PROCESSOR_VERSION" => Some("2.3.5".to_string()),
            "COURIER_SMS_QUEUE_URL" => Some("local://sms".to_string()),
            "COURIER_HEARTBEAT_INTERVAL_SECS" => Some("30".to_string()),
            "COURIER_HEARTBEAT_EXTENSION_SECS" => Some("90".to_string()),
            "COURIER_LLM_POLL_INTERVAL_MS" => Some("250".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.router_version, "2.3.4");
        assert_eq!(config.processor_version, "2.3.5");
        assert_eq!(config.queue_url(ChannelMethod::Sms), Some("local://sms"));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_extension, Duration::from_secs(90));
        assert_eq!(config.llm_poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn interval_must_stay_below_extension() {
        let err = EngineConfig::from_lookup(|key| match key {
            "COURIER_HEARTBEAT_INTERVAL_SECS" => Some("120".to_string()),
            "COURIER_HEARTBEAT_EXTENSION_SECS" => Some("120".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("strictly less"));
    }

    #[test]
    fn malformed_numbers_are_reported_with_the_key() {
        let err = EngineConfig::from_lookup(|key| match key {
            "COURIER_MAX_RECEIVE_COUNT" => Some("three".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("COURIER_MAX_RECEIVE_COUNT"));
    }
}
