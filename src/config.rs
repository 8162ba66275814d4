//! Runtime configuration owned by the composition root.

use crate::application::scheduler::SchedulerConfig;
use crate::domain::keyspace::Seed;
use crate::error::{GatewayError, Result};
use std::time::Duration;

/// What happens to confirmed and expired records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    #[default]
    KeepForever,
    /// Delete terminal records once they have been final for this long.
    DeleteAfter(Duration),
}

/// Settings of the payment engine itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub retention: RetentionPolicy,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.check_interval.is_zero() {
            return Err(GatewayError::invalid("check interval must be positive"));
        }
        if s.max_check_interval < s.check_interval {
            return Err(GatewayError::invalid(
                "max check interval must not be below the check interval",
            ));
        }
        if s.payment_timeout.is_zero() {
            return Err(GatewayError::invalid("payment timeout must be positive"));
        }
        if self.retention == RetentionPolicy::DeleteAfter(Duration::ZERO) {
            return Err(GatewayError::invalid("retention period must be positive"));
        }
        Ok(())
    }
}

/// Everything the `serve` command needs.
#[derive(Clone)]
pub struct GatewayConfig {
    pub seed: Seed,
    pub token_secret: String,
    pub listen: String,
    pub node_url: String,
    pub price_url: String,
    pub coin_id: String,
    pub upstream_timeout: Duration,
    pub admin_password: Option<String>,
    pub engine: EngineConfig,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.token_secret.is_empty() {
            return Err(GatewayError::invalid("token secret must not be empty"));
        }
        if matches!(self.admin_password.as_deref(), Some("")) {
            return Err(GatewayError::invalid("admin password must not be empty"));
        }
        self.engine.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inconsistent_intervals_rejected() {
        let config = EngineConfig {
            scheduler: SchedulerConfig {
                check_interval: Duration::from_secs(10),
                max_check_interval: Duration::from_secs(5),
                payment_timeout: Duration::from_secs(60),
            },
            retention: RetentionPolicy::KeepForever,
        };
        assert!(matches!(
            config.validate(),
            Err(GatewayError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = EngineConfig::default();
        config.scheduler.payment_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.retention = RetentionPolicy::DeleteAfter(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
