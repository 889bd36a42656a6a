//! Provision requirements of a data service.

use alloy_primitives::{Address, U256};
use horizon_common::ppm::MAX_PPM;
use horizon_framework::context::Context;

use super::DataServiceError;
use crate::staking::{HorizonStaking, Provision};

#[derive(Clone, Debug)]
pub struct ProvisionManager {
    /// Data service address, i.e. the verifier of the provisions it manages.
    verifier: Address,
    tokens_range: (U256, U256),
    verifier_cut_range: (u32, u32),
    thawing_period_range: (u64, u64),
}

impl ProvisionManager {
    /// A manager accepting any provision of `verifier`.
    pub fn new(verifier: Address) -> Self {
        Self {
            verifier,
            tokens_range: (U256::ZERO, U256::MAX),
            verifier_cut_range: (0, MAX_PPM),
            thawing_period_range: (0, u64::MAX),
        }
    }

    pub fn verifier(&self) -> Address {
        self.verifier
    }

    pub fn provision_tokens_range(&self) -> (U256, U256) {
        self.tokens_range
    }

    pub fn verifier_cut_range(&self) -> (u32, u32) {
        self.verifier_cut_range
    }

    pub fn thawing_period_range(&self) -> (u64, u64) {
        self.thawing_period_range
    }

    pub fn set_provision_tokens_range(
        &mut self,
        min: U256,
        max: U256,
    ) -> Result<(), DataServiceError> {
        if min > max {
            return Err(DataServiceError::InvalidRange {
                parameter: "provision tokens",
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        self.tokens_range = (min, max);
        tracing::info!(%min, %max, "provision tokens range set");
        Ok(())
    }

    pub fn set_verifier_cut_range(&mut self, min: u32, max: u32) -> Result<(), DataServiceError> {
        if min > max || max > MAX_PPM {
            return Err(DataServiceError::InvalidRange {
                parameter: "verifier cut",
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        self.verifier_cut_range = (min, max);
        tracing::info!(min, max, "verifier cut range set");
        Ok(())
    }

    pub fn set_thawing_period_range(&mut self, min: u64, max: u64) -> Result<(), DataServiceError> {
        if min > max {
            return Err(DataServiceError::InvalidRange {
                parameter: "thawing period",
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        self.thawing_period_range = (min, max);
        tracing::info!(min, max, "thawing period range set");
        Ok(())
    }

    /// The provider's provision to this data service, if it meets the requirements.
    pub fn validate_provision(
        &self,
        staking: &HorizonStaking,
        service_provider: Address,
    ) -> Result<Provision, DataServiceError> {
        let provision = staking
            .get_provision(&service_provider, &self.verifier)
            .cloned()
            .ok_or(DataServiceError::ProvisionNotFound {
                service_provider,
                verifier: self.verifier,
            })?;
        self.check_provision_tokens(&provision)?;
        self.check_provision_parameters(&provision, false)?;
        Ok(provision)
    }

    pub fn check_provision_tokens(&self, provision: &Provision) -> Result<(), DataServiceError> {
        let (min, max) = self.tokens_range;
        let value = provision.tokens_available();
        if value < min || value > max {
            return Err(DataServiceError::InvalidProvisionTokens { value, min, max });
        }
        Ok(())
    }

    /// Check the current parameters of a provision, or the staged ones if `pending`.
    pub fn check_provision_parameters(
        &self,
        provision: &Provision,
        pending: bool,
    ) -> Result<(), DataServiceError> {
        let (verifier_cut, thawing_period) = if pending {
            (provision.max_verifier_cut_pending, provision.thawing_period_pending)
        } else {
            (provision.max_verifier_cut, provision.thawing_period)
        };
        let (min, max) = self.verifier_cut_range;
        if verifier_cut < min || verifier_cut > max {
            return Err(DataServiceError::InvalidProvisionParameter {
                parameter: "max verifier cut",
                value: verifier_cut.into(),
                min: min.into(),
                max: max.into(),
            });
        }
        let (min, max) = self.thawing_period_range;
        if thawing_period < min || thawing_period > max {
            return Err(DataServiceError::InvalidProvisionParameter {
                parameter: "thawing period",
                value: thawing_period,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Accept the staged parameters of a provision if they meet the requirements.
    pub fn accept_provision_pending_parameters(
        &self,
        ctx: &Context,
        staking: &mut HorizonStaking,
        service_provider: Address,
    ) -> Result<Provision, DataServiceError> {
        let provision = staking
            .get_provision(&service_provider, &self.verifier)
            .ok_or(DataServiceError::ProvisionNotFound {
                service_provider,
                verifier: self.verifier,
            })?;
        self.check_provision_parameters(provision, true)?;
        let accepted =
            staking.accept_provision_parameters(&ctx.with_caller(self.verifier), service_provider)?;
        Ok(accepted)
    }
}
