//! Per-provider accounting of provision tokens a data service has committed.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};

use super::DataServiceError;
use crate::staking::HorizonStaking;

/// Tracks tokens locked against a provider's provision to one data service. Locks never exceed
/// what staking reports as available to the data service.
#[derive(Clone, Debug, Default)]
pub struct ProvisionTracker {
    locked: HashMap<Address, U256>,
}

impl ProvisionTracker {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn locked(&self, service_provider: &Address) -> U256 {
        self.locked
            .get(service_provider)
            .copied()
            .unwrap_or_default()
    }

    /// Lock `tokens` of the provision `service_provider` has with `verifier`.
    pub fn lock(
        &mut self,
        staking: &HorizonStaking,
        verifier: Address,
        service_provider: Address,
        tokens: U256,
        delegation_ratio: u32,
    ) -> Result<(), DataServiceError> {
        if tokens.is_zero() {
            return Ok(());
        }
        let required = self.locked(&service_provider) + tokens;
        let available =
            staking.get_tokens_available(&service_provider, &verifier, delegation_ratio);
        if required > available {
            return Err(DataServiceError::InsufficientTokensAvailable {
                available,
                required,
            });
        }
        self.locked.insert(service_provider, required);
        Ok(())
    }

    pub fn release(
        &mut self,
        service_provider: Address,
        tokens: U256,
    ) -> Result<(), DataServiceError> {
        if tokens.is_zero() {
            return Ok(());
        }
        let locked = self.locked(&service_provider);
        if locked < tokens {
            return Err(DataServiceError::InsufficientTokensLocked { locked, tokens });
        }
        self.locked.insert(service_provider, locked - tokens);
        Ok(())
    }
}
