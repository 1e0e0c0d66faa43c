use std::time::Duration;

use super::error::ConfigError;

/// Longest call timeout the engine accepts, in seconds (one day).
pub const MAX_CALL_TIMEOUT_SECS: u64 = 86_400;

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Name used to tag request/response log lines.
    pub server_name: String,
    /// Default call timeout, in seconds.
    pub call_timeout: u64,
    /// Lower bound applied to every call timeout, in milliseconds.
    pub min_call_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    /// How long resolved requests stay in the store, in seconds.
    pub retention: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_name: String::from("rocpp"),
            call_timeout: 30,
            min_call_timeout_ms: 1000,
            sweep_interval_ms: 100,
            retention: 60,
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout == 0 {
            return Err(ConfigError::Zero("call_timeout"));
        }
        if self.call_timeout > MAX_CALL_TIMEOUT_SECS {
            return Err(ConfigError::TooLong {
                field: "call_timeout",
                max: self.max_call_timeout(),
            });
        }
        if self.min_call_timeout_ms == 0 {
            return Err(ConfigError::Zero("min_call_timeout_ms"));
        }
        if self.min_call_timeout() > self.max_call_timeout() {
            return Err(ConfigError::TooLong {
                field: "min_call_timeout_ms",
                max: self.max_call_timeout(),
            });
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Zero("sweep_interval_ms"));
        }
        if self.sweep_interval_ms.saturating_mul(10) > self.min_call_timeout_ms {
            return Err(ConfigError::SweepTooCoarse {
                sweep: self.sweep_interval(),
                min: self.min_call_timeout(),
            });
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }

    pub fn min_call_timeout(&self) -> Duration {
        Duration::from_millis(self.min_call_timeout_ms)
    }

    pub fn max_call_timeout(&self) -> Duration {
        Duration::from_secs(MAX_CALL_TIMEOUT_SECS)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention)
    }

    /// Timeout for one call: the requested one, or the default, kept between
    /// the configured minimum and [`MAX_CALL_TIMEOUT_SECS`].
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or_else(|| self.call_timeout())
            .min(self.max_call_timeout())
            .max(self.min_call_timeout())
    }
}
