//! Registry parameters
//!
//! This module handles:
//! - Slash ratios, timeouts and storage pricing
//! - Unbonding, commission and redelegation periods
//! - Validation and JSON loading
//!
//! All tunables travel in one [`Params`] value held by the keeper. Nothing is
//! read from global state.

use crate::decimal::Dec;
use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};

/// Default cap on active stakers per pool
pub const MAX_STAKERS: usize = 50;

/// Maximum number of funders per pool
pub const MAX_FUNDERS: usize = 50;

/// Commission assigned to a staker on first stake
pub const DEFAULT_COMMISSION: &str = "0.9";

/// Registry parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Ratio slashed from voters on the losing side of a quorum
    pub vote_slash: Dec,

    /// Ratio slashed from uploaders of invalid bundles
    pub upload_slash: Dec,

    /// Ratio slashed for upload timeouts and repeated non-voting
    pub timeout_slash: Dec,

    /// Seconds the next uploader has after the upload interval (seconds)
    pub upload_timeout: u64,

    /// Reward per stored byte
    pub storage_cost: u64,

    /// Share of every bundle reward sent to the treasury
    pub network_fee: Dec,

    /// Missed votes tolerated before a timeout slash
    pub max_points: u64,

    /// Stake unbonding period (seconds)
    pub unbonding_staking_time: u64,

    /// Delegation unbonding period (seconds)
    pub unbonding_delegation_time: u64,

    /// Delay before a commission change applies (seconds)
    pub commission_change_time: u64,

    /// Window in which redelegations count against the limit (seconds)
    pub redelegation_cooldown: u64,

    /// Redelegations allowed per address within one window
    pub redelegation_max_amount: u64,

    /// Active stakers per pool before the lowest one is evicted
    pub max_stakers: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            vote_slash: Dec::from_ratio(1, 10),       // 0.1
            upload_slash: Dec::from_ratio(2, 10),     // 0.2
            timeout_slash: Dec::from_ratio(2, 100),   // 0.02
            upload_timeout: 600,                      // 10 minutes
            storage_cost: 100_000,
            network_fee: Dec::from_ratio(1, 100),     // 1%
            max_points: 5,
            unbonding_staking_time: 86_400,           // 1 day
            unbonding_delegation_time: 86_400,        // 1 day
            commission_change_time: 432_000,          // 5 days
            redelegation_cooldown: 86_400,            // 1 day
            redelegation_max_amount: 5,
            max_stakers: MAX_STAKERS,
        }
    }
}

impl Params {
    /// Parse parameters from JSON, falling back to defaults for absent fields
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Params = serde_json::from_str(json)
            .map_err(|e| RegistryError::InvalidParams(format!("Failed to parse params: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    /// Serialize parameters to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every ratio lies in `[0, 1]` and every count is usable
    pub fn validate(&self) -> Result<()> {
        let ratios = [
            ("vote_slash", &self.vote_slash),
            ("upload_slash", &self.upload_slash),
            ("timeout_slash", &self.timeout_slash),
            ("network_fee", &self.network_fee),
        ];

        for (name, value) in ratios {
            if !value.is_unit_interval() {
                return Err(RegistryError::InvalidParams(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }

        if self.redelegation_max_amount == 0 {
            return Err(RegistryError::InvalidParams(
                "redelegation_max_amount must be positive".to_string(),
            ));
        }

        if self.max_stakers == 0 {
            return Err(RegistryError::InvalidParams(
                "max_stakers must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        let params = Params::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.vote_slash, "0.1".parse().unwrap());
        assert_eq!(params.upload_slash, "0.2".parse().unwrap());
        assert_eq!(params.timeout_slash, "0.02".parse().unwrap());
        assert_eq!(params.network_fee, "0.01".parse().unwrap());
    }

    #[test]
    fn test_from_json_partial_override() {
        let params = Params::from_json(r#"{"upload_timeout": 30, "vote_slash": "0.5"}"#).unwrap();
        assert_eq!(params.upload_timeout, 30);
        assert_eq!(params.vote_slash, "0.5".parse().unwrap());

        // Untouched fields keep defaults
        assert_eq!(params.storage_cost, 100_000);
        assert_eq!(params.max_stakers, MAX_STAKERS);
    }

    #[test]
    fn test_zero_max_stakers_rejected() {
        let result = Params::from_json(r#"{"max_stakers": 0}"#);
        assert!(matches!(result, Err(RegistryError::InvalidParams(_))));
        assert_eq!(Params::from_json(r#"{"max_stakers": 120}"#).unwrap().max_stakers, 120);
    }

    #[test]
    fn test_ratio_out_of_range_rejected() {
        let result = Params::from_json(r#"{"network_fee": "1.5"}"#);
        assert!(matches!(result, Err(RegistryError::InvalidParams(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let params = Params {
            max_points: 9,
            ..Params::default()
        };
        let json = params.to_json().unwrap();
        assert_eq!(Params::from_json(&json).unwrap(), params);
    }
}
