use std::{env, time::Duration};

use thiserror::Error;

/// The configuration of the realtime layer
#[derive(Debug, Clone)]
pub struct Config {
    /// How often a live connection refreshes its presence marker
    pub heartbeat_interval: Duration,
    /// How long a presence marker lives without being refreshed
    pub presence_ttl: Duration,
    /// How many characters a room join code has
    pub join_code_length: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{variable} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { variable: &'static str, value: String },
    #[error("Heartbeat interval must be at least one second")]
    HeartbeatTooShort,
    #[error("Presence TTL ({ttl:?}) must be more than twice the heartbeat interval ({interval:?})")]
    TtlTooShort { ttl: Duration, interval: Duration },
    #[error("Join codes must be at least {min} characters long")]
    JoinCodeTooShort { min: usize },
}

impl Config {
    pub const HEARTBEAT_VARIABLE: &'static str = "TONEDEAF_HEARTBEAT_SECONDS";
    pub const PRESENCE_TTL_VARIABLE: &'static str = "TONEDEAF_PRESENCE_TTL_SECONDS";

    /// Anything shorter makes collisions plausible
    const MIN_JOIN_CODE_LENGTH: usize = 12;

    /// Reads overrides from the environment, falling back to the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            heartbeat_interval: seconds_from_env(
                Self::HEARTBEAT_VARIABLE,
                defaults.heartbeat_interval,
            )?,
            presence_ttl: seconds_from_env(Self::PRESENCE_TTL_VARIABLE, defaults.presence_ttl)?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Ensures a missed heartbeat tick can never flip a live user to offline
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval < Duration::from_secs(1) {
            return Err(ConfigError::HeartbeatTooShort);
        }

        if self.presence_ttl <= self.heartbeat_interval * 2 {
            return Err(ConfigError::TtlTooShort {
                ttl: self.presence_ttl,
                interval: self.heartbeat_interval,
            });
        }

        if self.join_code_length < Self::MIN_JOIN_CODE_LENGTH {
            return Err(ConfigError::JoinCodeTooShort {
                min: Self::MIN_JOIN_CODE_LENGTH,
            });
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            // Covers two missed ticks
            presence_ttl: Duration::from_secs(60),
            // 62^16 possible codes
            join_code_length: 16,
        }
    }
}

fn seconds_from_env(variable: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(variable) {
        Err(_) => Ok(default),
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidSeconds { variable, value }),
    }
}
