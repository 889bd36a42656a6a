//! The Graph Horizon protocol configuration.

use alloy_primitives::{Address, U256};
use horizon_common::{
    ppm::{is_valid_ppm, MAX_PPM},
    types::grt,
};
use horizon_framework::config::GovernanceConfig;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Governance roles
    pub governance: GovernanceConfig,
    /// Format log output as JSON
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub staking: StakingConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub curation: CurationConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub subgraph_service: SubgraphServiceConfig,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid governance config: {0}")]
    Governance(#[from] horizon_framework::errors::ControllerError),
    #[error("invalid PPM value for {field}: {value}")]
    InvalidPpm { field: &'static str, value: u32 },
    #[error("invalid range for {field}: min {min} > max {max}")]
    InvalidRange {
        field: &'static str,
        min: String,
        max: String,
    },
}

impl Config {
    /// A configuration with default parameters for the given governor.
    pub fn with_governor(governor: Address) -> Self {
        Self {
            governance: GovernanceConfig {
                governor,
                ..Default::default()
            },
            log_json: false,
            staking: Default::default(),
            rewards: Default::default(),
            curation: Default::default(),
            payments: Default::default(),
            subgraph_service: Default::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.governance.validate()?;

        let ppm_fields = [
            ("curation.curation_tax", self.curation.curation_tax),
            (
                "payments.protocol_payment_cut",
                self.payments.protocol_payment_cut,
            ),
            (
                "subgraph_service.curation_fee_cut",
                self.subgraph_service.curation_fee_cut,
            ),
            (
                "subgraph_service.max_verifier_cut",
                self.subgraph_service.max_verifier_cut,
            ),
        ];
        for (field, value) in ppm_fields {
            if !is_valid_ppm(U256::from(value)) {
                return Err(ConfigError::InvalidPpm { field, value });
            }
        }

        let service = &self.subgraph_service;
        if service.minimum_provision_tokens > service.maximum_provision_tokens {
            return Err(ConfigError::InvalidRange {
                field: "subgraph_service.provision_tokens",
                min: service.minimum_provision_tokens.to_string(),
                max: service.maximum_provision_tokens.to_string(),
            });
        }
        if service.min_thawing_period > service.max_thawing_period {
            return Err(ConfigError::InvalidRange {
                field: "subgraph_service.thawing_period",
                min: service.min_thawing_period.to_string(),
                max: service.max_thawing_period.to_string(),
            });
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StakingConfig {
    /// Maximum thawing period a provision can be created with, in seconds
    pub max_thawing_period: u64,
    /// Minimum delegation, and minimum remaining delegation after a partial undelegation
    #[serde_as(as = "DisplayFromStr")]
    pub min_delegation: U256,
    /// Whether slashing may take tokens from the delegation pool once the provision is exhausted
    pub delegation_slashing_enabled: bool,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            max_thawing_period: 28 * 24 * 60 * 60,
            min_delegation: grt(1),
            delegation_slashing_enabled: false,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RewardsConfig {
    /// GRT issued per block, in base units
    #[serde_as(as = "DisplayFromStr")]
    pub issuance_per_block: U256,
    /// Subgraphs with less signal than this accrue no rewards
    #[serde_as(as = "DisplayFromStr")]
    pub minimum_subgraph_signal: U256,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            issuance_per_block: U256::from(114_155_251_141_552_511_415u128),
            minimum_subgraph_signal: grt(100),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CurationConfig {
    /// Share of a curation deposit burned on mint (PPM)
    pub curation_tax: u32,
    /// Minimum tokens for a curation deposit
    #[serde_as(as = "DisplayFromStr")]
    pub minimum_curation_deposit: U256,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            curation_tax: 10_000,
            minimum_curation_deposit: U256::from(1),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PaymentsConfig {
    /// Protocol share of every payment (PPM)
    pub protocol_payment_cut: u32,
    /// Where the protocol cut goes. The zero address burns it.
    pub protocol_payment_sink: Address,
    /// Seconds between an escrow thaw and the matching withdrawal
    pub withdraw_escrow_thawing_period: u64,
    /// Seconds between thawing a signer and being able to revoke it
    pub revoke_signer_thawing_period: u64,
    /// EIP-712 domain chain id for signed vouchers
    pub chain_id: u64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            protocol_payment_cut: 10_000,
            protocol_payment_sink: Address::ZERO,
            withdraw_escrow_thawing_period: 24 * 60 * 60,
            revoke_signer_thawing_period: 24 * 60 * 60,
            chain_id: 42161,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SubgraphServiceConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub minimum_provision_tokens: U256,
    #[serde_as(as = "DisplayFromStr")]
    pub maximum_provision_tokens: U256,
    pub min_thawing_period: u64,
    pub max_thawing_period: u64,
    /// Maximum verifier cut accepted on an indexer provision (PPM)
    pub max_verifier_cut: u32,
    /// Provision tokens that must be locked per collected query fee token
    pub stake_to_fees_ratio: u64,
    /// Seconds fee stake stays locked after a collection
    pub dispute_period: u64,
    /// Share of query fees sent to curators (PPM)
    pub curation_fee_cut: u32,
    /// Delegated tokens usable per provisioned token
    pub delegation_ratio: u32,
    /// Maximum outstanding stake claims per indexer
    pub max_stake_claims: usize,
}

impl Default for SubgraphServiceConfig {
    fn default() -> Self {
        Self {
            minimum_provision_tokens: grt(100_000),
            maximum_provision_tokens: U256::MAX,
            min_thawing_period: 14 * 24 * 60 * 60,
            max_thawing_period: 28 * 24 * 60 * 60,
            max_verifier_cut: MAX_PPM,
            stake_to_fees_ratio: 5,
            dispute_period: 7 * 24 * 60 * 60,
            curation_fee_cut: 100_000,
            delegation_ratio: 16,
            max_stake_claims: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_minimal_config() {
        //* Given
        let text = r#"{
            "governance": { "governor": "0x00000000000000000000000000000000000000aa" },
            "rewards": { "issuance_per_block": "1000" },
            "payments": { "protocol_payment_cut": 20000 }
        }"#;

        //* When
        let config: Config = serde_json::from_str(text).expect("valid config");

        //* Then
        assert!(config.validate().is_ok());
        assert_eq!(config.rewards.issuance_per_block, U256::from(1000));
        assert_eq!(config.rewards.minimum_subgraph_signal, grt(100));
        assert_eq!(config.payments.protocol_payment_cut, 20_000);
        assert_eq!(config.staking.min_delegation, grt(1));
    }

    #[test]
    fn reject_invalid_ppm() {
        let mut config = Config::with_governor(Address::repeat_byte(1));
        config.payments.protocol_payment_cut = MAX_PPM + 1;

        assert_matches!(
            config.validate(),
            Err(ConfigError::InvalidPpm { field: "payments.protocol_payment_cut", .. })
        );
    }

    #[test]
    fn reject_missing_governor() {
        let config = Config::with_governor(Address::ZERO);
        assert_matches!(config.validate(), Err(ConfigError::Governance(_)));
    }
}
