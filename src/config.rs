use crate::domain::fees::{DEFAULT_GATEWAY_FEE_BPS, DEFAULT_PLATFORM_FEE_BPS, FeeSchedule};
use crate::domain::money::Paise;
use crate::error::{EscrowError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 1st and 16th of every month at midnight UTC (seconds-first cron syntax).
pub const DEFAULT_SETTLEMENT_CRON: &str = "0 0 0 1,16 * *";

/// Tunables for the escrow engine, loaded from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub platform_fee_bps: u32,
    pub gateway_fee_bps: u32,
    /// Fixed bounty paid to a scout for a recruit's first sale.
    pub referral_bounty_paise: u64,
    /// Hold before a PAYABLE payout may be settled.
    pub maturation_days: i64,
    pub pending_batch_size: usize,
    pub gateway_timeout_ms: u64,
    /// PROCESSING payouts older than this are re-queried on the next run.
    pub stuck_processing_minutes: i64,
    pub settlement_cron: String,
    /// Where the gateway sends the buyer after payment.
    pub return_url: String,
    pub gateway: GatewayConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: DEFAULT_PLATFORM_FEE_BPS,
            gateway_fee_bps: DEFAULT_GATEWAY_FEE_BPS,
            referral_bounty_paise: 1_000,
            maturation_days: 14,
            pending_batch_size: 10,
            gateway_timeout_ms: 10_000,
            stuck_processing_minutes: 30,
            settlement_cron: DEFAULT_SETTLEMENT_CRON.to_string(),
            return_url: "http://localhost:3000/orders/callback".to_string(),
            gateway: GatewayConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub webhook_username: String,
    pub webhook_password: String,
    pub checkout_base_url: String,
    /// Probability that a simulated disbursement is declined.
    pub failure_rate: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            webhook_username: "merchant".to_string(),
            webhook_password: "change-me".to_string(),
            checkout_base_url: "https://checkout.example.test/pay".to_string(),
            failure_rate: 0.0,
        }
    }
}

impl EngineConfig {
    /// Reads the config file if one is given, applies environment overrides
    /// and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| EscrowError::Config(e.to_string()))
    }

    /// Webhook credentials are secrets and may come from the environment.
    fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var("ESCROW_WEBHOOK_USERNAME") {
            self.gateway.webhook_username = username;
        }
        if let Ok(password) = std::env::var("ESCROW_WEBHOOK_PASSWORD") {
            self.gateway.webhook_password = password;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.platform_fee_bps > 10_000 || self.gateway_fee_bps > 10_000 {
            return Err(EscrowError::Config(
                "fee rates must not exceed 10000 basis points".to_string(),
            ));
        }
        if self.referral_bounty_paise == 0 {
            return Err(EscrowError::Config(
                "referral_bounty_paise must be positive".to_string(),
            ));
        }
        if self.maturation_days < 0 || self.stuck_processing_minutes < 0 {
            return Err(EscrowError::Config(
                "durations must not be negative".to_string(),
            ));
        }
        if self.pending_batch_size == 0 {
            return Err(EscrowError::Config(
                "pending_batch_size must be at least 1".to_string(),
            ));
        }
        if self.gateway_timeout_ms == 0 {
            return Err(EscrowError::Config(
                "gateway_timeout_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.gateway.failure_rate) {
            return Err(EscrowError::Config(
                "gateway.failure_rate must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule {
            platform_fee_bps: self.platform_fee_bps,
            gateway_fee_bps: self.gateway_fee_bps,
        }
    }

    pub fn referral_bounty(&self) -> Paise {
        Paise::new(self.referral_bounty_paise)
    }

    pub fn maturation_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.maturation_days)
    }

    pub fn stuck_processing_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stuck_processing_minutes)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_marketplace_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.fee_schedule(), FeeSchedule::default());
        assert_eq!(config.referral_bounty(), Paise::new(1_000));
        assert_eq!(config.maturation_window(), chrono::Duration::days(14));
        assert_eq!(config.settlement_cron, DEFAULT_SETTLEMENT_CRON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            maturation_days = 7
            [gateway]
            failure_rate = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.maturation_days, 7);
        assert_eq!(config.gateway.failure_rate, 0.25);
        assert_eq!(config.platform_fee_bps, DEFAULT_PLATFORM_FEE_BPS);
        assert_eq!(config.gateway.webhook_username, "merchant");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = EngineConfig::default();
        config.pending_batch_size = 0;
        assert!(matches!(config.validate(), Err(EscrowError::Config(_))));

        let mut config = EngineConfig::default();
        config.gateway_fee_bps = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        assert!(matches!(
            EngineConfig::from_toml_str("maturation_days = \"soon\""),
            Err(EscrowError::Config(_))
        ));
    }
}
