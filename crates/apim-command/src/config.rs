use std::time::Duration;

use crate::model::{CommandTag, MessageRecipient};

pub const ENV_INTERVAL_MS: &str = "APIM_COMMANDS_INTERVAL_MS";
pub const ENV_STORE_TIMEOUT_MS: &str = "APIM_COMMANDS_STORE_TIMEOUT_MS";
pub const ENV_RECIPIENT: &str = "APIM_COMMANDS_RECIPIENT";

#[derive(Debug, Clone, PartialEq)]
pub struct RefresherConfig {
    /// Delay between two polls of the command store.
    pub interval: Duration,
    /// Upper bound for a single store call; a call exceeding it counts as a
    /// store failure.
    pub store_timeout: Duration,
    /// Logical group this node reads commands for.
    pub recipient: MessageRecipient,
    /// Tags consumed elsewhere and never read by this loop.
    pub excluded_tags: Vec<CommandTag>,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            store_timeout: Duration::from_secs(10),
            recipient: MessageRecipient::ManagementApis,
            excluded_tags: vec![CommandTag::DataToIndex],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl RefresherConfig {
    /// Defaults overridden by `APIM_COMMANDS_*` variables when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = env_millis(ENV_INTERVAL_MS)? {
            config.interval = ms;
        }
        if let Some(ms) = env_millis(ENV_STORE_TIMEOUT_MS)? {
            config.store_timeout = ms;
        }
        if let Ok(value) = std::env::var(ENV_RECIPIENT) {
            config.recipient =
                MessageRecipient::parse(&value).ok_or_else(|| ConfigError::Invalid {
                    name: ENV_RECIPIENT,
                    value: value.clone(),
                    reason: "unknown recipient".into(),
                })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: ENV_INTERVAL_MS,
                value: "0".into(),
                reason: "polling interval must be positive".into(),
            });
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: ENV_STORE_TIMEOUT_MS,
                value: "0".into(),
                reason: "store timeout must be positive".into(),
            });
        }
        Ok(())
    }
}

fn env_millis(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ConfigError::Invalid {
                name,
                value,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
