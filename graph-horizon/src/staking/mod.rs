//! The Horizon staking ledger.
//!
//! Service providers stake GRT, then provision slices of that stake to verifiers (data
//! services). Provisioned tokens leave a provision through thawing: a thaw request matures after
//! the provision's thawing period and is then fulfilled, oldest first, by `deprovision`.
//! Delegators back a provision through its delegation pool, and verifiers can slash provisions.
//!
//! The staking contract holds every staked and delegated token.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, B256, U256};
use horizon_common::{linked_list::LinkedList, types::PaymentType};
use horizon_framework::{
    context::Context,
    controller::{ContractName, Controller},
    token::GraphToken,
};

pub use self::{
    delegation::DelegationPool,
    errors::StakingError,
    provision::Provision,
    slashing::Slashed,
    thaw::{ThawListKey, ThawRequest, ThawRequestType},
};
use crate::config::StakingConfig;

mod delegation;
mod errors;
mod provision;
mod slashing;
mod thaw;

/// Maximum outstanding thaw requests per list.
pub const MAX_THAW_REQUESTS: usize = 1_000;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceProvider {
    /// Tokens staked, including provisioned tokens.
    pub tokens_staked: U256,
    /// Tokens provisioned to verifiers.
    pub tokens_provisioned: U256,
}

impl ServiceProvider {
    /// Staked tokens not committed to any provision.
    pub fn idle_stake(&self) -> U256 {
        self.tokens_staked.saturating_sub(self.tokens_provisioned)
    }
}

#[derive(Clone, Debug)]
pub struct HorizonStaking {
    controller: Controller,
    config: StakingConfig,
    service_providers: HashMap<Address, ServiceProvider>,
    provisions: HashMap<(Address, Address), Provision>,
    delegation_pools: HashMap<(Address, Address), DelegationPool>,
    delegation_fee_cuts: HashMap<(Address, Address, PaymentType), u32>,
    /// (service provider, verifier, operator)
    operators: HashSet<(Address, Address, Address)>,
    thaw_requests: HashMap<B256, ThawRequest>,
    thaw_lists: HashMap<ThawListKey, LinkedList>,
}

impl HorizonStaking {
    pub fn new(controller: Controller, config: StakingConfig) -> Self {
        Self {
            controller,
            config,
            service_providers: HashMap::new(),
            provisions: HashMap::new(),
            delegation_pools: HashMap::new(),
            delegation_fee_cuts: HashMap::new(),
            operators: HashSet::new(),
            thaw_requests: HashMap::new(),
            thaw_lists: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StakingConfig {
        &self.config
    }

    fn address(&self) -> Result<Address, StakingError> {
        Ok(self.controller.resolve(ContractName::Staking)?)
    }

    /// Stake tokens for the caller.
    pub fn stake(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        tokens: U256,
    ) -> Result<(), StakingError> {
        self.stake_to(ctx, token, ctx.caller, tokens)
    }

    /// Stake the caller's tokens on behalf of `service_provider`.
    pub fn stake_to(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        service_provider: Address,
        tokens: U256,
    ) -> Result<(), StakingError> {
        self.controller.ensure_not_paused()?;
        if tokens.is_zero() {
            return Err(StakingError::InvalidZeroTokens);
        }
        if service_provider.is_zero() {
            return Err(StakingError::InvalidZeroAddress("service provider"));
        }
        let staking = self.address()?;

        let sp = self.service_providers.entry(service_provider).or_default();
        sp.tokens_staked += tokens;
        token.pull_tokens(ctx.caller, staking, tokens)?;

        tracing::info!(%service_provider, %tokens, "stake deposited");
        Ok(())
    }

    /// Withdraw idle stake back to the caller.
    pub fn unstake(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        tokens: U256,
    ) -> Result<(), StakingError> {
        self.controller.ensure_not_partial_paused()?;
        if tokens.is_zero() {
            return Err(StakingError::InvalidZeroTokens);
        }
        let staking = self.address()?;

        let sp = self.service_providers.entry(ctx.caller).or_default();
        let idle = sp.idle_stake();
        if idle < tokens {
            return Err(StakingError::InsufficientIdleStake {
                available: idle,
                required: tokens,
            });
        }
        sp.tokens_staked -= tokens;
        token.push_tokens(staking, ctx.caller, tokens)?;

        tracing::info!(service_provider = %ctx.caller, %tokens, "stake withdrawn");
        Ok(())
    }

    /// Allow or disallow `operator` to manage the caller's provision with `verifier`.
    pub fn set_operator(
        &mut self,
        ctx: &Context,
        verifier: Address,
        operator: Address,
        allowed: bool,
    ) -> Result<(), StakingError> {
        self.controller.ensure_not_paused()?;
        if operator == ctx.caller {
            return Err(StakingError::InvalidOperator(operator));
        }
        let entry = (ctx.caller, verifier, operator);
        if allowed {
            self.operators.insert(entry);
        } else {
            self.operators.remove(&entry);
        }
        tracing::info!(
            service_provider = %ctx.caller,
            %verifier,
            %operator,
            allowed,
            "operator set"
        );
        Ok(())
    }

    pub fn is_authorized(
        &self,
        service_provider: &Address,
        verifier: &Address,
        operator: &Address,
    ) -> bool {
        operator == service_provider
            || self
                .operators
                .contains(&(*service_provider, *verifier, *operator))
    }

    fn ensure_authorized(
        &self,
        caller: Address,
        service_provider: Address,
        verifier: Address,
    ) -> Result<(), StakingError> {
        if !self.is_authorized(&service_provider, &verifier, &caller) {
            return Err(StakingError::NotAuthorized {
                caller,
                service_provider,
                verifier,
            });
        }
        Ok(())
    }

    pub fn get_service_provider(&self, service_provider: &Address) -> ServiceProvider {
        self.service_providers
            .get(service_provider)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_stake(&self, service_provider: &Address) -> U256 {
        self.get_service_provider(service_provider).tokens_staked
    }

    pub fn get_idle_stake(&self, service_provider: &Address) -> U256 {
        self.get_service_provider(service_provider).idle_stake()
    }

    /// Tokens a provider has available across all of its provisions, not counting thawing ones.
    pub fn get_provider_tokens_available(&self, service_provider: &Address) -> U256 {
        self.provisions
            .iter()
            .filter(|((sp, _), _)| sp == service_provider)
            .fold(U256::ZERO, |sum, (_, provision)| sum + provision.tokens_available())
    }

    /// Tokens usable by `verifier`: the provision's available tokens plus delegated tokens, with
    /// delegation capped at `delegation_ratio` times the provider's own tokens.
    pub fn get_tokens_available(
        &self,
        service_provider: &Address,
        verifier: &Address,
        delegation_ratio: u32,
    ) -> U256 {
        let provider_tokens = self
            .provisions
            .get(&(*service_provider, *verifier))
            .map(Provision::tokens_available)
            .unwrap_or_default();
        let delegated_tokens = self
            .delegation_pools
            .get(&(*service_provider, *verifier))
            .map(DelegationPool::tokens_available)
            .unwrap_or_default();
        let delegated_max = provider_tokens.saturating_mul(U256::from(delegation_ratio));
        provider_tokens + delegated_tokens.min(delegated_max)
    }
}

#[cfg(test)]
mod tests;
