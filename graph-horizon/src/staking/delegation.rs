//! Delegation pools.
//!
//! Each provision has a pool in which delegators hold shares. The share price is
//! `(tokens - tokens_thawing) / shares`; undelegated shares leave `shares` and join the pool's
//! thawing shares until withdrawn.

use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};
use horizon_common::{
    ppm::{is_valid_ppm, PpmMathError},
    types::PaymentType,
};
use horizon_framework::{context::Context, token::GraphToken};
use serde::{Deserialize, Serialize};

use super::{
    thaw::{ThawListKey, ThawRequestType, ThawingPool},
    HorizonStaking, StakingError,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationPool {
    /// Delegated tokens, including thawing ones.
    pub tokens: U256,
    /// Shares not thawing.
    pub shares: U256,
    pub tokens_thawing: U256,
    pub shares_thawing: U256,
    pub thawing_nonce: u64,
    /// Delegator shares.
    pub delegators: HashMap<Address, U256>,
}

impl DelegationPool {
    /// Tokens not thawing.
    pub fn tokens_available(&self) -> U256 {
        self.tokens.saturating_sub(self.tokens_thawing)
    }

    pub(super) fn thawing_pool(&self) -> ThawingPool {
        ThawingPool {
            tokens_thawing: self.tokens_thawing,
            shares_thawing: self.shares_thawing,
            thawing_nonce: self.thawing_nonce,
        }
    }

    /// Value of `shares` in tokens at the current share price.
    pub fn shares_to_tokens(&self, shares: U256) -> U256 {
        if self.shares.is_zero() {
            return U256::ZERO;
        }
        shares * self.tokens_available() / self.shares
    }
}

fn delegation_list_key(
    service_provider: Address,
    verifier: Address,
    delegator: Address,
) -> ThawListKey {
    ThawListKey {
        request_type: ThawRequestType::Delegation,
        service_provider,
        verifier,
        owner: delegator,
    }
}

impl HorizonStaking {
    pub fn get_delegation_pool(
        &self,
        service_provider: &Address,
        verifier: &Address,
    ) -> Option<&DelegationPool> {
        self.delegation_pools.get(&(*service_provider, *verifier))
    }

    /// Shares held by `delegator` in the pool.
    pub fn get_delegation(
        &self,
        service_provider: &Address,
        verifier: &Address,
        delegator: &Address,
    ) -> U256 {
        self.get_delegation_pool(service_provider, verifier)
            .and_then(|pool| pool.delegators.get(delegator).copied())
            .unwrap_or_default()
    }

    /// Thaw requests of a delegator, oldest first.
    pub fn get_delegation_thaw_requests(
        &self,
        service_provider: &Address,
        verifier: &Address,
        delegator: &Address,
    ) -> Vec<B256> {
        self.get_thaw_request_ids(&delegation_list_key(*service_provider, *verifier, *delegator))
    }

    pub fn get_delegation_fee_cut(
        &self,
        service_provider: &Address,
        verifier: &Address,
        payment_type: PaymentType,
    ) -> u32 {
        self.delegation_fee_cuts
            .get(&(*service_provider, *verifier, payment_type))
            .copied()
            .unwrap_or_default()
    }

    /// Set the share of `payment_type` payments that goes to the provision's delegators (PPM).
    pub fn set_delegation_fee_cut(
        &mut self,
        ctx: &Context,
        service_provider: Address,
        verifier: Address,
        payment_type: PaymentType,
        fee_cut: u32,
    ) -> Result<(), StakingError> {
        self.controller.ensure_not_paused()?;
        self.ensure_authorized(ctx.caller, service_provider, verifier)?;
        if !is_valid_ppm(U256::from(fee_cut)) {
            return Err(PpmMathError::InvalidPpm(U256::from(fee_cut)).into());
        }
        self.delegation_fee_cuts
            .insert((service_provider, verifier, payment_type), fee_cut);

        tracing::info!(
            %service_provider,
            %verifier,
            %payment_type,
            fee_cut,
            "delegation fee cut set"
        );
        Ok(())
    }

    fn ensure_provision_exists(
        &self,
        service_provider: Address,
        verifier: Address,
    ) -> Result<(), StakingError> {
        if !self.provisions.contains_key(&(service_provider, verifier)) {
            return Err(StakingError::ProvisionNotFound {
                service_provider,
                verifier,
            });
        }
        Ok(())
    }

    /// Delegate the caller's tokens to a provision. Returns the shares minted.
    pub fn delegate(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        service_provider: Address,
        verifier: Address,
        tokens: U256,
        min_shares_out: U256,
    ) -> Result<U256, StakingError> {
        self.controller.ensure_not_paused()?;
        if tokens.is_zero() {
            return Err(StakingError::InvalidZeroTokens);
        }
        if tokens < self.config.min_delegation {
            return Err(StakingError::InsufficientDelegationTokens {
                tokens,
                minimum: self.config.min_delegation,
            });
        }
        self.ensure_provision_exists(service_provider, verifier)?;
        let staking = self.address()?;

        let pool = self
            .delegation_pools
            .entry((service_provider, verifier))
            .or_default();
        // A pool slashed to zero tokens while shares remain cannot price new shares.
        if pool.tokens.is_zero() && !pool.shares.is_zero() {
            return Err(StakingError::InvalidDelegationPoolState {
                service_provider,
                verifier,
            });
        }
        let shares = if pool.tokens_available().is_zero() || pool.shares.is_zero() {
            tokens
        } else {
            tokens * pool.shares / pool.tokens_available()
        };
        if shares.is_zero() {
            return Err(StakingError::InvalidZeroShares);
        }
        if shares < min_shares_out {
            return Err(StakingError::SlippageProtection {
                shares,
                min_shares_out,
            });
        }

        pool.tokens += tokens;
        pool.shares += shares;
        *pool.delegators.entry(ctx.caller).or_default() += shares;
        token.pull_tokens(ctx.caller, staking, tokens)?;

        tracing::info!(
            %service_provider,
            %verifier,
            delegator = %ctx.caller,
            %tokens,
            %shares,
            "tokens delegated"
        );
        Ok(shares)
    }

    /// Start thawing `shares` of the caller's delegation. Returns the thaw request id.
    pub fn undelegate(
        &mut self,
        ctx: &Context,
        service_provider: Address,
        verifier: Address,
        shares: U256,
    ) -> Result<B256, StakingError> {
        self.controller.ensure_not_paused()?;
        if shares.is_zero() {
            return Err(StakingError::InvalidZeroShares);
        }
        let thawing_period = self
            .get_provision(&service_provider, &verifier)
            .map(|provision| provision.thawing_period)
            .ok_or(StakingError::ProvisionNotFound {
                service_provider,
                verifier,
            })?;
        let min_delegation = self.config.min_delegation;
        let delegator = ctx.caller;
        let key = delegation_list_key(service_provider, verifier, delegator);
        self.ensure_thaw_capacity(&key)?;

        let pool = self
            .delegation_pools
            .get_mut(&(service_provider, verifier))
            .ok_or(StakingError::InvalidDelegationPoolState {
                service_provider,
                verifier,
            })?;
        let delegator_shares = pool.delegators.get(&delegator).copied().unwrap_or_default();
        if delegator_shares < shares {
            return Err(StakingError::InsufficientShares {
                available: delegator_shares,
                required: shares,
            });
        }

        let tokens = pool.shares_to_tokens(shares);
        if tokens.is_zero() {
            return Err(StakingError::InvalidZeroTokens);
        }
        let remaining = pool.shares_to_tokens(delegator_shares - shares);
        if !remaining.is_zero() && remaining < min_delegation {
            return Err(StakingError::InsufficientDelegationTokens {
                tokens: remaining,
                minimum: min_delegation,
            });
        }
        let thawing_shares = if pool.tokens_thawing.is_zero() {
            tokens
        } else {
            tokens * pool.shares_thawing / pool.tokens_thawing
        };

        pool.shares -= shares;
        pool.tokens_thawing += tokens;
        pool.shares_thawing += thawing_shares;
        pool.delegators.insert(delegator, delegator_shares - shares);
        let thawing_nonce = pool.thawing_nonce;

        let id = self.create_thaw_request(
            key,
            thawing_shares,
            ctx.timestamp + thawing_period,
            thawing_nonce,
        )?;
        tracing::info!(
            %service_provider,
            %verifier,
            %delegator,
            %shares,
            %tokens,
            "tokens undelegated"
        );
        Ok(id)
    }

    /// Withdraw the caller's matured undelegated tokens. Fulfills up to `n` requests, `n == 0`
    /// meaning all of them. Returns the tokens withdrawn.
    pub fn withdraw_delegated(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        service_provider: Address,
        verifier: Address,
        n: usize,
    ) -> Result<U256, StakingError> {
        self.controller.ensure_not_paused()?;
        let staking = self.address()?;
        let delegator = ctx.caller;

        let pool = self
            .get_delegation_pool(&service_provider, &verifier)
            .map(DelegationPool::thawing_pool)
            .ok_or(StakingError::NothingThawing)?;
        let fulfilled = self.fulfill_thaw_requests(
            delegation_list_key(service_provider, verifier, delegator),
            pool,
            ctx.timestamp,
            n,
        )?;

        let pool = self
            .delegation_pools
            .get_mut(&(service_provider, verifier))
            .ok_or(StakingError::InvalidDelegationPoolState {
                service_provider,
                verifier,
            })?;
        pool.tokens -= fulfilled.tokens_thawed;
        pool.tokens_thawing = fulfilled.pool.tokens_thawing;
        pool.shares_thawing = fulfilled.pool.shares_thawing;
        token.push_tokens(staking, delegator, fulfilled.tokens_thawed)?;

        tracing::info!(
            %service_provider,
            %verifier,
            %delegator,
            tokens = %fulfilled.tokens_thawed,
            requests = fulfilled.requests,
            "delegation withdrawn"
        );
        Ok(fulfilled.tokens_thawed)
    }

    /// Add the caller's tokens to a delegation pool without minting shares, raising the share
    /// price. Used to pay delegators their cut of fees and rewards.
    pub fn add_to_delegation_pool(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        service_provider: Address,
        verifier: Address,
        tokens: U256,
    ) -> Result<(), StakingError> {
        self.controller.ensure_not_paused()?;
        if tokens.is_zero() {
            return Err(StakingError::InvalidZeroTokens);
        }
        self.ensure_provision_exists(service_provider, verifier)?;
        let staking = self.address()?;

        let pool = self
            .delegation_pools
            .get_mut(&(service_provider, verifier))
            .filter(|pool| !pool.shares.is_zero())
            .ok_or(StakingError::InvalidDelegationPoolState {
                service_provider,
                verifier,
            })?;
        pool.tokens += tokens;
        token.pull_tokens(ctx.caller, staking, tokens)?;

        tracing::info!(%service_provider, %verifier, %tokens, "tokens added to delegation pool");
        Ok(())
    }
}
