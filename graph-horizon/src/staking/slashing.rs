use alloy_primitives::{Address, U256};
use horizon_common::ppm::mul_ppm;
use horizon_framework::{
    context::Context,
    metrics::{grt_f64, METRICS},
    token::GraphToken,
};

use super::{HorizonStaking, StakingError};

/// Tokens taken by a slash.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Slashed {
    pub provision_tokens: U256,
    pub delegation_tokens: U256,
    pub tokens_verifier: U256,
}

/// Scale `tokens_thawing` down in proportion to the tokens slashed from `tokens`.
fn scale_thawing(tokens_thawing: U256, tokens: U256, slashed: U256) -> U256 {
    if tokens.is_zero() {
        return U256::ZERO;
    }
    tokens_thawing * (tokens - slashed) / tokens
}

impl HorizonStaking {
    /// Slash `tokens` from a provision. The caller is the provision's verifier.
    ///
    /// The provision is slashed first. Whatever it cannot cover comes out of the delegation pool
    /// if delegation slashing is enabled. The verifier receives `tokens_verifier` at
    /// `verifier_destination`, capped by the provision's max verifier cut of the provision tokens
    /// slashed; the rest is burned.
    pub fn slash(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        service_provider: Address,
        tokens: U256,
        tokens_verifier: U256,
        verifier_destination: Address,
    ) -> Result<Slashed, StakingError> {
        self.controller.ensure_not_paused()?;
        if tokens.is_zero() {
            return Err(StakingError::InvalidZeroTokens);
        }
        let verifier = ctx.caller;
        let staking = self.address()?;
        let delegation_slashing_enabled = self.config.delegation_slashing_enabled;

        let provision = self.provision_mut(service_provider, verifier)?;
        let provision_tokens = tokens.min(provision.tokens);
        let max_verifier_tokens =
            mul_ppm(provision_tokens, U256::from(provision.max_verifier_cut))?;
        if tokens_verifier > max_verifier_tokens {
            return Err(StakingError::VerifierTokensTooHigh {
                tokens_verifier,
                max_verifier_tokens,
            });
        }
        if !tokens_verifier.is_zero() && verifier_destination.is_zero() {
            return Err(StakingError::InvalidZeroAddress("verifier destination"));
        }

        provision.tokens_thawing =
            scale_thawing(provision.tokens_thawing, provision.tokens, provision_tokens);
        provision.tokens -= provision_tokens;
        if provision.tokens_thawing.is_zero() && !provision.shares_thawing.is_zero() {
            provision.shares_thawing = U256::ZERO;
            provision.thawing_nonce += 1;
        }
        let sp = self.service_providers.entry(service_provider).or_default();
        sp.tokens_provisioned -= provision_tokens;
        sp.tokens_staked -= provision_tokens;

        let mut slashed = Slashed {
            provision_tokens,
            tokens_verifier,
            ..Default::default()
        };

        let remaining = tokens - provision_tokens;
        if !remaining.is_zero() {
            match self.delegation_pools.get_mut(&(service_provider, verifier)) {
                Some(pool) if delegation_slashing_enabled => {
                    let delegation_tokens = remaining.min(pool.tokens);
                    pool.tokens_thawing =
                        scale_thawing(pool.tokens_thawing, pool.tokens, delegation_tokens);
                    pool.tokens -= delegation_tokens;
                    if pool.tokens_thawing.is_zero() && !pool.shares_thawing.is_zero() {
                        pool.shares_thawing = U256::ZERO;
                        pool.thawing_nonce += 1;
                    }
                    slashed.delegation_tokens = delegation_tokens;
                }
                Some(_) => {
                    tracing::info!(
                        %service_provider,
                        %verifier,
                        tokens = %remaining,
                        "delegation slashing skipped"
                    );
                }
                None => (),
            }
        }

        token.push_tokens(staking, verifier_destination, tokens_verifier)?;
        let burned = provision_tokens - tokens_verifier + slashed.delegation_tokens;
        token.burn_tokens(staking, burned)?;
        METRICS
            .tokens
            .with_label_values(&["slashed"])
            .inc_by(grt_f64(provision_tokens + slashed.delegation_tokens));
        METRICS
            .tokens
            .with_label_values(&["burned"])
            .inc_by(grt_f64(burned));

        tracing::info!(
            %service_provider,
            %verifier,
            provision_tokens = %slashed.provision_tokens,
            delegation_tokens = %slashed.delegation_tokens,
            %tokens_verifier,
            %burned,
            "provision slashed"
        );
        Ok(slashed)
    }
}
