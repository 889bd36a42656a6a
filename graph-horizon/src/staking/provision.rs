use alloy_primitives::{Address, B256, U256};
use horizon_common::ppm::is_valid_ppm;
use horizon_framework::context::Context;
use serde::{Deserialize, Serialize};

use super::{
    thaw::{ThawListKey, ThawRequestType, ThawingPool},
    HorizonStaking, StakingError,
};

/// Stake a service provider committed to a verifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provision {
    /// Provisioned tokens, including thawing ones.
    pub tokens: U256,
    pub tokens_thawing: U256,
    pub shares_thawing: U256,
    /// Maximum share of slashed tokens the verifier may keep (PPM).
    pub max_verifier_cut: u32,
    /// Seconds a thaw request waits before it can be fulfilled.
    pub thawing_period: u64,
    pub created_at: u64,
    pub max_verifier_cut_pending: u32,
    pub thawing_period_pending: u64,
    pub last_parameters_staged_at: u64,
    pub thawing_nonce: u64,
}

impl Provision {
    /// Tokens not thawing.
    pub fn tokens_available(&self) -> U256 {
        self.tokens.saturating_sub(self.tokens_thawing)
    }

    fn thawing_pool(&self) -> ThawingPool {
        ThawingPool {
            tokens_thawing: self.tokens_thawing,
            shares_thawing: self.shares_thawing,
            thawing_nonce: self.thawing_nonce,
        }
    }
}

fn provision_list_key(service_provider: Address, verifier: Address) -> ThawListKey {
    ThawListKey {
        request_type: ThawRequestType::Provision,
        service_provider,
        verifier,
        owner: service_provider,
    }
}

impl HorizonStaking {
    pub fn get_provision(
        &self,
        service_provider: &Address,
        verifier: &Address,
    ) -> Option<&Provision> {
        self.provisions.get(&(*service_provider, *verifier))
    }

    pub(super) fn provision_mut(
        &mut self,
        service_provider: Address,
        verifier: Address,
    ) -> Result<&mut Provision, StakingError> {
        self.provisions
            .get_mut(&(service_provider, verifier))
            .ok_or(StakingError::ProvisionNotFound {
                service_provider,
                verifier,
            })
    }

    /// Thaw requests of the provision, oldest first.
    pub fn get_provision_thaw_requests(
        &self,
        service_provider: &Address,
        verifier: &Address,
    ) -> Vec<B256> {
        self.get_thaw_request_ids(&provision_list_key(*service_provider, *verifier))
    }

    fn validate_provision_parameters(
        &self,
        max_verifier_cut: u32,
        thawing_period: u64,
    ) -> Result<(), StakingError> {
        if !is_valid_ppm(U256::from(max_verifier_cut)) {
            return Err(StakingError::InvalidMaxVerifierCut(max_verifier_cut));
        }
        if thawing_period > self.config.max_thawing_period {
            return Err(StakingError::InvalidThawingPeriod {
                thawing_period,
                max_thawing_period: self.config.max_thawing_period,
            });
        }
        Ok(())
    }

    fn ensure_idle_stake(
        &self,
        service_provider: &Address,
        tokens: U256,
    ) -> Result<(), StakingError> {
        let available = self.get_idle_stake(service_provider);
        if available < tokens {
            return Err(StakingError::InsufficientIdleStake {
                available,
                required: tokens,
            });
        }
        Ok(())
    }

    /// Commit idle stake of `service_provider` to `verifier`.
    pub fn provision(
        &mut self,
        ctx: &Context,
        service_provider: Address,
        verifier: Address,
        tokens: U256,
        max_verifier_cut: u32,
        thawing_period: u64,
    ) -> Result<(), StakingError> {
        self.controller.ensure_not_paused()?;
        self.ensure_authorized(ctx.caller, service_provider, verifier)?;
        if tokens.is_zero() {
            return Err(StakingError::InvalidZeroTokens);
        }
        if verifier.is_zero() {
            return Err(StakingError::InvalidZeroAddress("verifier"));
        }
        self.validate_provision_parameters(max_verifier_cut, thawing_period)?;
        if self.provisions.contains_key(&(service_provider, verifier)) {
            return Err(StakingError::ProvisionAlreadyExists {
                service_provider,
                verifier,
            });
        }
        self.ensure_idle_stake(&service_provider, tokens)?;

        self.provisions.insert(
            (service_provider, verifier),
            Provision {
                tokens,
                max_verifier_cut,
                thawing_period,
                created_at: ctx.timestamp,
                max_verifier_cut_pending: max_verifier_cut,
                thawing_period_pending: thawing_period,
                ..Default::default()
            },
        );
        self.service_providers
            .entry(service_provider)
            .or_default()
            .tokens_provisioned += tokens;

        tracing::info!(
            %service_provider,
            %verifier,
            %tokens,
            max_verifier_cut,
            thawing_period,
            "provision created"
        );
        Ok(())
    }

    /// Add idle stake to an existing provision.
    pub fn add_to_provision(
        &mut self,
        ctx: &Context,
        service_provider: Address,
        verifier: Address,
        tokens: U256,
    ) -> Result<(), StakingError> {
        self.controller.ensure_not_paused()?;
        self.ensure_authorized(ctx.caller, service_provider, verifier)?;
        self.add_to_provision_unchecked(service_provider, verifier, tokens)
    }

    fn add_to_provision_unchecked(
        &mut self,
        service_provider: Address,
        verifier: Address,
        tokens: U256,
    ) -> Result<(), StakingError> {
        if tokens.is_zero() {
            return Err(StakingError::InvalidZeroTokens);
        }
        self.ensure_idle_stake(&service_provider, tokens)?;
        self.provision_mut(service_provider, verifier)?.tokens += tokens;
        self.service_providers
            .entry(service_provider)
            .or_default()
            .tokens_provisioned += tokens;

        tracing::info!(%service_provider, %verifier, %tokens, "provision increased");
        Ok(())
    }

    /// Start thawing `tokens` of a provision. Returns the thaw request id.
    pub fn thaw(
        &mut self,
        ctx: &Context,
        service_provider: Address,
        verifier: Address,
        tokens: U256,
    ) -> Result<B256, StakingError> {
        self.controller.ensure_not_paused()?;
        self.ensure_authorized(ctx.caller, service_provider, verifier)?;
        if tokens.is_zero() {
            return Err(StakingError::InvalidZeroTokens);
        }
        let key = provision_list_key(service_provider, verifier);
        self.ensure_thaw_capacity(&key)?;

        let provision = self.provision_mut(service_provider, verifier)?;
        let available = provision.tokens_available();
        if available < tokens {
            return Err(StakingError::InsufficientTokens {
                available,
                required: tokens,
            });
        }

        let shares = if provision.tokens_thawing.is_zero() {
            tokens
        } else {
            tokens * provision.shares_thawing / provision.tokens_thawing
        };
        if shares.is_zero() {
            return Err(StakingError::InvalidZeroShares);
        }
        let thawing_until = ctx.timestamp + provision.thawing_period;
        let thawing_nonce = provision.thawing_nonce;
        provision.tokens_thawing += tokens;
        provision.shares_thawing += shares;

        let id = self.create_thaw_request(
            key,
            shares,
            thawing_until,
            thawing_nonce,
        )?;
        tracing::info!(%service_provider, %verifier, %tokens, thawing_until, "provision thawing");
        Ok(id)
    }

    /// Remove matured thawed tokens from a provision back to idle stake. Fulfills up to `n`
    /// requests, `n == 0` meaning all of them. Returns the tokens released.
    pub fn deprovision(
        &mut self,
        ctx: &Context,
        service_provider: Address,
        verifier: Address,
        n: usize,
    ) -> Result<U256, StakingError> {
        self.controller.ensure_not_paused()?;
        self.ensure_authorized(ctx.caller, service_provider, verifier)?;
        self.deprovision_unchecked(ctx.timestamp, service_provider, verifier, n)
    }

    fn deprovision_unchecked(
        &mut self,
        now: u64,
        service_provider: Address,
        verifier: Address,
        n: usize,
    ) -> Result<U256, StakingError> {
        let pool = self.provision_mut(service_provider, verifier)?.thawing_pool();
        let key = provision_list_key(service_provider, verifier);
        let fulfilled = self.fulfill_thaw_requests(key, pool, now, n)?;

        let provision = self.provision_mut(service_provider, verifier)?;
        provision.tokens -= fulfilled.tokens_thawed;
        provision.tokens_thawing = fulfilled.pool.tokens_thawing;
        provision.shares_thawing = fulfilled.pool.shares_thawing;
        let sp = self.service_providers.entry(service_provider).or_default();
        sp.tokens_provisioned -= fulfilled.tokens_thawed;

        tracing::info!(
            %service_provider,
            %verifier,
            tokens = %fulfilled.tokens_thawed,
            requests = fulfilled.requests,
            "provision deprovisioned"
        );
        Ok(fulfilled.tokens_thawed)
    }

    /// Move matured thawed tokens from one provision straight into another.
    pub fn reprovision(
        &mut self,
        ctx: &Context,
        service_provider: Address,
        old_verifier: Address,
        new_verifier: Address,
        n: usize,
    ) -> Result<U256, StakingError> {
        self.controller.ensure_not_paused()?;
        self.ensure_authorized(ctx.caller, service_provider, old_verifier)?;
        self.ensure_authorized(ctx.caller, service_provider, new_verifier)?;
        if !self.provisions.contains_key(&(service_provider, new_verifier)) {
            return Err(StakingError::ProvisionNotFound {
                service_provider,
                verifier: new_verifier,
            });
        }

        let tokens = self.deprovision_unchecked(ctx.timestamp, service_provider, old_verifier, n)?;
        if !tokens.is_zero() {
            self.add_to_provision_unchecked(service_provider, new_verifier, tokens)?;
        }
        Ok(tokens)
    }

    /// Stage new provision parameters. They take effect once the verifier accepts them.
    pub fn set_provision_parameters(
        &mut self,
        ctx: &Context,
        service_provider: Address,
        verifier: Address,
        max_verifier_cut: u32,
        thawing_period: u64,
    ) -> Result<(), StakingError> {
        self.controller.ensure_not_paused()?;
        self.ensure_authorized(ctx.caller, service_provider, verifier)?;
        self.validate_provision_parameters(max_verifier_cut, thawing_period)?;

        let provision = self.provision_mut(service_provider, verifier)?;
        if provision.max_verifier_cut_pending == max_verifier_cut
            && provision.thawing_period_pending == thawing_period
        {
            return Ok(());
        }
        provision.max_verifier_cut_pending = max_verifier_cut;
        provision.thawing_period_pending = thawing_period;
        provision.last_parameters_staged_at = ctx.timestamp;

        tracing::info!(
            %service_provider,
            %verifier,
            max_verifier_cut,
            thawing_period,
            "provision parameters staged"
        );
        Ok(())
    }

    /// Apply the staged parameters of a provision. The caller is the verifier.
    pub fn accept_provision_parameters(
        &mut self,
        ctx: &Context,
        service_provider: Address,
    ) -> Result<Provision, StakingError> {
        self.controller.ensure_not_paused()?;
        let verifier = ctx.caller;
        let provision = self.provision_mut(service_provider, verifier)?;
        provision.max_verifier_cut = provision.max_verifier_cut_pending;
        provision.thawing_period = provision.thawing_period_pending;

        tracing::info!(
            %service_provider,
            %verifier,
            max_verifier_cut = provision.max_verifier_cut,
            thawing_period = provision.thawing_period,
            "provision parameters accepted"
        );
        Ok(provision.clone())
    }
}
