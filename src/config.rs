use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::Amount;
use crate::amount::FeeRate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Business constants and operational knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Smallest allowed withdrawal, in currency units.
    pub minimum_payout: f64,
    /// Fraction deducted at earning time.
    pub platform_fee_rate: f64,
    /// Delay before an earning clears.
    pub holding_period_days: u32,
    pub gateway_timeout_ms: u64,
    /// Pending payouts without a settlement callback for this long are failed.
    pub settlement_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub lock_timeout_ms: u64,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            minimum_payout: 1_000.0,
            platform_fee_rate: 0.15,
            holding_period_days: 7,
            gateway_timeout_ms: 10_000,
            settlement_timeout_secs: 3 * 24 * 60 * 60,
            sweep_interval_secs: 300,
            lock_timeout_ms: 2_000,
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LedgerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.platform_fee_rate) {
            return Err(ConfigError::Invalid(format!(
                "platform_fee_rate must be in [0, 1), got {}",
                self.platform_fee_rate
            )));
        }
        if !self.minimum_payout.is_finite() || self.minimum_payout <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "minimum_payout must be positive, got {}",
                self.minimum_payout
            )));
        }
        if self.gateway_timeout_ms == 0 || self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        if self.holding_period_days > 36_500 {
            return Err(ConfigError::Invalid(format!(
                "holding_period_days must be at most 36500, got {}",
                self.holding_period_days
            )));
        }
        if self.settlement_timeout_secs > 36_500 * 24 * 60 * 60 {
            return Err(ConfigError::Invalid(format!(
                "settlement_timeout_secs must be at most 100 years, got {}",
                self.settlement_timeout_secs
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn minimum_payout(&self) -> Amount {
        Amount::from_float(self.minimum_payout)
    }

    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_fraction(self.platform_fee_rate)
    }

    pub fn holding_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.holding_period_days as i64)
    }

    pub fn settlement_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.settlement_timeout_secs as i64)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
