//! Curation signal pools.
//!
//! Curators deposit GRT on a subgraph deployment and receive signal in return. Signal is priced
//! linearly against the pool reserve: the first deposit mints signal one to one, later ones mint
//! in proportion to the reserve. A tax is burned from every deposit. Query fee curation cuts are
//! added to the reserve, raising the value of existing signal.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use horizon_common::ppm::{mul_ppm_round_up, PpmMathError};
use horizon_framework::{
    context::Context,
    controller::{ContractName, Controller},
    errors::{Classify, ControllerError, ErrorKind, TokenError},
    token::GraphToken,
};
use thegraph_core::types::DeploymentId;

use crate::{
    config::CurationConfig,
    rewards::{RewardsManager, SignalSource},
};

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum CurationError {
    #[error("invalid zero tokens")]
    InvalidZeroTokens,
    #[error("invalid zero signal")]
    InvalidZeroSignal,
    #[error("curation deposit below minimum: {tokens} < {minimum}")]
    InsufficientDeposit { tokens: U256, minimum: U256 },
    #[error("slippage protection: {value} < {minimum}")]
    SlippageProtection { value: U256, minimum: U256 },
    #[error("insufficient signal: {available} < {required}")]
    InsufficientSignal { available: U256, required: U256 },
    #[error("deployment {0} is not curated")]
    NotCurated(DeploymentId),
    #[error("caller {0} cannot collect curation fees")]
    NotCollector(Address),
    #[error(transparent)]
    PpmMath(#[from] PpmMathError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl Classify for CurationError {
    fn kind(&self) -> ErrorKind {
        match self {
            CurationError::NotCollector(_) => ErrorKind::Authorization,
            CurationError::Token(err) => err.kind(),
            CurationError::Controller(err) => err.kind(),
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CurationPool {
    /// Reserve backing the pool's signal.
    pub tokens: U256,
    /// Signal supply.
    pub signal: U256,
    pub curators: HashMap<Address, U256>,
}

#[derive(Clone, Debug)]
pub struct Curation {
    controller: Controller,
    curation_tax: u32,
    minimum_curation_deposit: U256,
    pools: HashMap<DeploymentId, CurationPool>,
    total_tokens: U256,
}

impl SignalSource for Curation {
    fn curation_pool_tokens(&self, deployment: &DeploymentId) -> U256 {
        self.pools
            .get(deployment)
            .map(|pool| pool.tokens)
            .unwrap_or_default()
    }

    fn total_signalled_tokens(&self) -> U256 {
        self.total_tokens
    }
}

impl Curation {
    pub fn new(controller: Controller, config: &CurationConfig) -> Self {
        Self {
            controller,
            curation_tax: config.curation_tax,
            minimum_curation_deposit: config.minimum_curation_deposit,
            pools: HashMap::new(),
            total_tokens: U256::ZERO,
        }
    }

    pub fn curation_tax(&self) -> u32 {
        self.curation_tax
    }

    pub fn get_pool(&self, deployment: &DeploymentId) -> Option<&CurationPool> {
        self.pools.get(deployment)
    }

    pub fn is_curated(&self, deployment: &DeploymentId) -> bool {
        self.pools
            .get(deployment)
            .is_some_and(|pool| !pool.signal.is_zero())
    }

    pub fn get_curator_signal(&self, curator: &Address, deployment: &DeploymentId) -> U256 {
        self.pools
            .get(deployment)
            .and_then(|pool| pool.curators.get(curator))
            .copied()
            .unwrap_or_default()
    }

    /// Signal minted for a deposit of `tokens`, and the curation tax taken from it.
    pub fn tokens_to_signal(
        &self,
        deployment: &DeploymentId,
        tokens: U256,
    ) -> Result<(U256, U256), CurationError> {
        let tax = mul_ppm_round_up(tokens, U256::from(self.curation_tax))?;
        let tokens = tokens - tax;
        let signal = match self.pools.get(deployment) {
            Some(pool) if !pool.signal.is_zero() && !pool.tokens.is_zero() => {
                tokens * pool.signal / pool.tokens
            }
            _ => tokens,
        };
        Ok((signal, tax))
    }

    /// Tokens returned for burning `signal`.
    pub fn signal_to_tokens(&self, deployment: &DeploymentId, signal: U256) -> U256 {
        match self.pools.get(deployment) {
            Some(pool) if !pool.signal.is_zero() => pool.tokens * signal / pool.signal,
            _ => U256::ZERO,
        }
    }

    /// Deposit `tokens` on a deployment. Returns the signal minted and the tax burned.
    pub fn mint(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        rewards: &mut RewardsManager,
        deployment: DeploymentId,
        tokens: U256,
        signal_out_min: U256,
    ) -> Result<(U256, U256), CurationError> {
        self.controller.ensure_not_partial_paused()?;
        if tokens.is_zero() {
            return Err(CurationError::InvalidZeroTokens);
        }
        if tokens < self.minimum_curation_deposit {
            return Err(CurationError::InsufficientDeposit {
                tokens,
                minimum: self.minimum_curation_deposit,
            });
        }
        let (signal, tax) = self.tokens_to_signal(&deployment, tokens)?;
        if signal < signal_out_min {
            return Err(CurationError::SlippageProtection {
                value: signal,
                minimum: signal_out_min,
            });
        }
        let curation = self.controller.resolve(ContractName::Curation)?;

        rewards.on_subgraph_signal_update(&*self, &deployment, ctx.block_number);

        let reserve = tokens - tax;
        let pool = self.pools.entry(deployment).or_default();
        pool.tokens += reserve;
        pool.signal += signal;
        *pool.curators.entry(ctx.caller).or_default() += signal;
        self.total_tokens += reserve;

        token.pull_tokens(ctx.caller, curation, tokens)?;
        token.burn_tokens(curation, tax)?;

        tracing::info!(curator = %ctx.caller, %deployment, %tokens, %signal, %tax, "signalled");
        Ok((signal, tax))
    }

    /// Burn signal from a deployment. Returns the tokens paid out.
    pub fn burn(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        rewards: &mut RewardsManager,
        deployment: DeploymentId,
        signal: U256,
        tokens_out_min: U256,
    ) -> Result<U256, CurationError> {
        self.controller.ensure_not_partial_paused()?;
        if signal.is_zero() {
            return Err(CurationError::InvalidZeroSignal);
        }
        let available = self.get_curator_signal(&ctx.caller, &deployment);
        if available < signal {
            return Err(CurationError::InsufficientSignal {
                available,
                required: signal,
            });
        }
        let tokens = self.signal_to_tokens(&deployment, signal);
        if tokens < tokens_out_min {
            return Err(CurationError::SlippageProtection {
                value: tokens,
                minimum: tokens_out_min,
            });
        }
        let curation = self.controller.resolve(ContractName::Curation)?;

        rewards.on_subgraph_signal_update(&*self, &deployment, ctx.block_number);

        let mut emptied = false;
        if let Some(pool) = self.pools.get_mut(&deployment) {
            pool.tokens -= tokens;
            pool.signal -= signal;
            let balance = pool.curators.entry(ctx.caller).or_default();
            *balance -= signal;
            if balance.is_zero() {
                pool.curators.remove(&ctx.caller);
            }
            emptied = pool.signal.is_zero();
        }
        if emptied {
            self.pools.remove(&deployment);
        }
        self.total_tokens -= tokens;

        token.push_tokens(curation, ctx.caller, tokens)?;

        tracing::info!(curator = %ctx.caller, %deployment, %signal, %tokens, "signal burned");
        Ok(tokens)
    }

    /// Add collected fees to a deployment's reserve. The caller transfers `tokens` to curation
    /// beforehand.
    ///
    /// Only the payments contract and the subgraph service may collect.
    pub fn collect(
        &mut self,
        ctx: &Context,
        rewards: &mut RewardsManager,
        deployment: DeploymentId,
        tokens: U256,
    ) -> Result<(), CurationError> {
        let payments = self.controller.get_contract_proxy(ContractName::GraphPayments.id());
        let subgraph_service = self
            .controller
            .get_contract_proxy(ContractName::SubgraphService.id());
        if ctx.caller.is_zero() || (ctx.caller != payments && ctx.caller != subgraph_service) {
            return Err(CurationError::NotCollector(ctx.caller));
        }
        if !self.is_curated(&deployment) {
            return Err(CurationError::NotCurated(deployment));
        }

        rewards.on_subgraph_signal_update(&*self, &deployment, ctx.block_number);

        if let Some(pool) = self.pools.get_mut(&deployment) {
            pool.tokens += tokens;
        }
        self.total_tokens += tokens;

        tracing::info!(%deployment, %tokens, "curation fees collected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use horizon_common::{
        types::grt,
        utils::testing::{init_test_tracing, test_address, test_deployment_id},
    };
    use horizon_framework::context::Clock;

    use super::*;
    use crate::config::RewardsConfig;

    struct Setup {
        clock: Clock,
        token: GraphToken,
        curation: Curation,
        rewards: RewardsManager,
    }

    fn setup() -> Setup {
        init_test_tracing();
        let governor = test_address(0);
        let controller = Controller::new(governor).expect("valid governor");
        for name in [ContractName::Curation, ContractName::SubgraphService] {
            controller
                .register(governor, name, name.default_address())
                .expect("register");
        }
        let mut token = GraphToken::new(controller.clone());
        token.add_minter(governor, governor).expect("add minter");
        for curator in [test_address(1), test_address(2)] {
            token.mint(governor, curator, grt(10_000)).expect("mint");
            token
                .approve(curator, ContractName::Curation.default_address(), U256::MAX)
                .expect("approve");
        }
        Setup {
            clock: Clock::default(),
            token,
            curation: Curation::new(
                controller.clone(),
                &CurationConfig {
                    curation_tax: 10_000,
                    minimum_curation_deposit: grt(1),
                },
            ),
            rewards: RewardsManager::new(controller, &RewardsConfig::default()),
        }
    }

    #[test]
    fn first_deposit_mints_signal_one_to_one_after_tax() {
        //* Given
        let mut s = setup();
        let deployment = test_deployment_id(0);
        let supply = s.token.total_supply();

        //* When
        let minted = s.curation.mint(
            &s.clock.context(test_address(1)),
            &mut s.token,
            &mut s.rewards,
            deployment,
            grt(1_000),
            U256::ZERO,
        );

        //* Then
        assert_eq!(minted, Ok((grt(990), grt(10))));
        assert!(s.curation.is_curated(&deployment));
        assert_eq!(s.curation.curation_pool_tokens(&deployment), grt(990));
        assert_eq!(s.curation.total_signalled_tokens(), grt(990));
        assert_eq!(s.token.total_supply(), supply - grt(10));
    }

    #[test]
    fn collected_fees_raise_the_signal_price() {
        //* Given
        let mut s = setup();
        let deployment = test_deployment_id(0);
        let (alice, bob) = (test_address(1), test_address(2));
        s.curation
            .mint(
                &s.clock.context(alice),
                &mut s.token,
                &mut s.rewards,
                deployment,
                grt(1_000),
                U256::ZERO,
            )
            .expect("mint");
        s.curation
            .collect(
                &s.clock.context(ContractName::SubgraphService.default_address()),
                &mut s.rewards,
                deployment,
                grt(990),
            )
            .expect("collect");

        //* When
        let (bob_signal, _) = s
            .curation
            .mint(
                &s.clock.context(bob),
                &mut s.token,
                &mut s.rewards,
                deployment,
                grt(1_000),
                U256::ZERO,
            )
            .expect("mint");

        //* Then
        assert_eq!(bob_signal, grt(495));
        assert_eq!(s.curation.signal_to_tokens(&deployment, grt(990)), grt(1_980));
    }

    #[test]
    fn burning_all_signal_empties_the_pool() {
        let mut s = setup();
        let deployment = test_deployment_id(0);
        let curator = test_address(1);
        let ctx = s.clock.context(curator);
        let (signal, _) = s
            .curation
            .mint(&ctx, &mut s.token, &mut s.rewards, deployment, grt(100), U256::ZERO)
            .expect("mint");

        assert_matches!(
            s.curation.burn(
                &ctx,
                &mut s.token,
                &mut s.rewards,
                deployment,
                signal + U256::from(1),
                U256::ZERO,
            ),
            Err(CurationError::InsufficientSignal { .. })
        );
        let tokens = s
            .curation
            .burn(&ctx, &mut s.token, &mut s.rewards, deployment, signal, U256::ZERO)
            .expect("burn");

        assert_eq!(tokens, grt(99));
        assert!(!s.curation.is_curated(&deployment));
        assert_eq!(s.curation.total_signalled_tokens(), U256::ZERO);
        assert_eq!(s.token.balance_of(&curator), grt(9_999));
    }

    #[test]
    fn mint_slippage_and_minimum_deposit() {
        let mut s = setup();
        let deployment = test_deployment_id(0);
        let ctx = s.clock.context(test_address(1));

        assert_matches!(
            s.curation
                .mint(&ctx, &mut s.token, &mut s.rewards, deployment, grt(100), grt(100)),
            Err(CurationError::SlippageProtection { .. })
        );
        assert_matches!(
            s.curation.mint(
                &ctx,
                &mut s.token,
                &mut s.rewards,
                deployment,
                U256::from(1),
                U256::ZERO
            ),
            Err(CurationError::InsufficientDeposit { .. })
        );
        assert!(s.curation.get_pool(&deployment).is_none());
    }

    #[test]
    fn only_registered_collectors_can_collect() {
        let mut s = setup();
        let deployment = test_deployment_id(0);

        assert_matches!(
            s.curation.collect(
                &s.clock.context(test_address(3)),
                &mut s.rewards,
                deployment,
                grt(1)
            ),
            Err(CurationError::NotCollector(_))
        );
        assert_matches!(
            s.curation.collect(
                &s.clock.context(ContractName::SubgraphService.default_address()),
                &mut s.rewards,
                deployment,
                grt(1)
            ),
            Err(CurationError::NotCurated(_))
        );
    }
}
