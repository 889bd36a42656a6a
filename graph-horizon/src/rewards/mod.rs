//! Indexing rewards accrual.
//!
//! Rewards are issued per block and split between subgraph deployments by their share of the
//! total curation signal, then between a deployment's allocations by allocated tokens. Nothing
//! is computed eagerly: three accumulators are advanced whenever signal or allocations change,
//! and read when an allocation takes its rewards.
//!
//! - `acc_rewards_per_signal`: rewards per signalled token since genesis, global.
//! - `acc_rewards_for_subgraph`: rewards accrued to a deployment, at its last signal change.
//! - `acc_rewards_per_allocated_token`: rewards per allocated token of a deployment, at its last
//!   allocation change.
//!
//! Every per-deployment update first moves the global accumulator to the current block.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use horizon_common::types::FIXED_POINT_SCALING_FACTOR;
use horizon_framework::{
    context::Context,
    controller::{ContractName, Controller},
    errors::{Classify, ControllerError, ErrorKind, TokenError},
    metrics::{grt_f64, METRICS},
    token::GraphToken,
};
use serde::{Deserialize, Serialize};
use thegraph_core::types::DeploymentId;

use crate::config::RewardsConfig;


/// Where the rewards manager reads curation signal from.
pub trait SignalSource {
    /// Tokens signalled on a deployment.
    fn curation_pool_tokens(&self, deployment: &DeploymentId) -> U256;
    /// Tokens signalled across every deployment.
    fn total_signalled_tokens(&self) -> U256;
}

/// A data service whose allocations earn indexing rewards.
pub trait RewardsIssuer {
    fn allocation_data(&self, allocation_id: &Address) -> Option<AllocationData>;
    /// Tokens allocated to a deployment across every open allocation.
    fn subgraph_allocated_tokens(&self, deployment: &DeploymentId) -> U256;
}

/// The view of an allocation the rewards manager needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationData {
    pub is_active: bool,
    pub indexer: Address,
    pub deployment: DeploymentId,
    pub tokens: U256,
    /// `acc_rewards_per_allocated_token` when the allocation was last settled.
    pub acc_rewards_per_allocated_token: U256,
    /// Rewards settled but not yet taken, e.g. on resize.
    pub acc_rewards_pending: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subgraph {
    pub acc_rewards_for_subgraph: U256,
    pub acc_rewards_for_subgraph_snapshot: U256,
    pub acc_rewards_per_signal_snapshot: U256,
    pub acc_rewards_per_allocated_token: U256,
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum RewardsError {
    #[error("caller {0} is not the rewards issuer")]
    NotRewardsIssuer(Address),
    #[error("caller {0} is not the subgraph availability oracle")]
    NotSubgraphAvailabilityOracle(Address),
    #[error("allocation not found: {0}")]
    AllocationNotFound(Address),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl Classify for RewardsError {
    fn kind(&self) -> ErrorKind {
        match self {
            RewardsError::NotRewardsIssuer(_) | RewardsError::NotSubgraphAvailabilityOracle(_) => {
                ErrorKind::Authorization
            }
            RewardsError::AllocationNotFound(_) => ErrorKind::Validation,
            RewardsError::Token(err) => err.kind(),
            RewardsError::Controller(err) => err.kind(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RewardsManager {
    controller: Controller,
    issuance_per_block: U256,
    minimum_subgraph_signal: U256,
    subgraph_availability_oracle: Address,
    /// The data service allowed to take rewards.
    subgraph_service: Address,
    acc_rewards_per_signal: U256,
    acc_rewards_per_signal_last_block_updated: u64,
    subgraphs: HashMap<DeploymentId, Subgraph>,
    /// Deployment to the block it was denied at.
    denylist: HashMap<DeploymentId, u64>,
}

impl RewardsManager {
    pub fn new(controller: Controller, config: &RewardsConfig) -> Self {
        Self {
            controller,
            issuance_per_block: config.issuance_per_block,
            minimum_subgraph_signal: config.minimum_subgraph_signal,
            subgraph_availability_oracle: Address::ZERO,
            subgraph_service: Address::ZERO,
            acc_rewards_per_signal: U256::ZERO,
            acc_rewards_per_signal_last_block_updated: 0,
            subgraphs: HashMap::new(),
            denylist: HashMap::new(),
        }
    }

    pub fn issuance_per_block(&self) -> U256 {
        self.issuance_per_block
    }

    pub fn minimum_subgraph_signal(&self) -> U256 {
        self.minimum_subgraph_signal
    }

    pub fn subgraph_service(&self) -> Address {
        self.subgraph_service
    }

    pub fn acc_rewards_per_signal(&self) -> U256 {
        self.acc_rewards_per_signal
    }

    pub fn acc_rewards_per_signal_last_block_updated(&self) -> u64 {
        self.acc_rewards_per_signal_last_block_updated
    }

    pub fn get_subgraph(&self, deployment: &DeploymentId) -> Subgraph {
        self.subgraphs.get(deployment).cloned().unwrap_or_default()
    }

    pub fn is_denied(&self, deployment: &DeploymentId) -> bool {
        self.denylist.get(deployment).is_some_and(|block| *block > 0)
    }

    /// Set the issuance rate. Rewards up to the current block accrue at the previous rate.
    pub fn set_issuance_per_block(
        &mut self,
        ctx: &Context,
        signal: &dyn SignalSource,
        issuance_per_block: U256,
    ) -> Result<(), RewardsError> {
        self.controller.ensure_governor(ctx.caller)?;
        self.update_acc_rewards_per_signal(signal, ctx.block_number);
        self.issuance_per_block = issuance_per_block;
        tracing::info!(%issuance_per_block, "issuance per block updated");
        Ok(())
    }

    pub fn set_minimum_subgraph_signal(
        &mut self,
        ctx: &Context,
        minimum_subgraph_signal: U256,
    ) -> Result<(), RewardsError> {
        self.controller.ensure_governor(ctx.caller)?;
        self.minimum_subgraph_signal = minimum_subgraph_signal;
        tracing::info!(%minimum_subgraph_signal, "minimum subgraph signal updated");
        Ok(())
    }

    pub fn set_subgraph_availability_oracle(
        &mut self,
        ctx: &Context,
        oracle: Address,
    ) -> Result<(), RewardsError> {
        self.controller.ensure_governor(ctx.caller)?;
        self.subgraph_availability_oracle = oracle;
        tracing::info!(%oracle, "subgraph availability oracle updated");
        Ok(())
    }

    pub fn set_subgraph_service(
        &mut self,
        ctx: &Context,
        subgraph_service: Address,
    ) -> Result<(), RewardsError> {
        self.controller.ensure_governor(ctx.caller)?;
        self.subgraph_service = subgraph_service;
        tracing::info!(%subgraph_service, "rewards issuer updated");
        Ok(())
    }

    /// Deny or allow rewards for a deployment. Oracle only.
    ///
    /// Rewards accrued before the change are settled at the previous state.
    pub fn set_denied(
        &mut self,
        ctx: &Context,
        signal: &dyn SignalSource,
        deployment: DeploymentId,
        deny: bool,
    ) -> Result<(), RewardsError> {
        if ctx.caller.is_zero() || ctx.caller != self.subgraph_availability_oracle {
            return Err(RewardsError::NotSubgraphAvailabilityOracle(ctx.caller));
        }
        self.on_subgraph_signal_update(signal, &deployment, ctx.block_number);

        let denied_at = if deny { ctx.block_number.max(1) } else { 0 };
        self.denylist.insert(deployment, denied_at);
        tracing::info!(%deployment, denied_at, "rewards denylist updated");
        Ok(())
    }

    /// Rewards per signalled token accrued since the last global update.
    pub fn get_new_rewards_per_signal(&self, signal: &dyn SignalSource, block_number: u64) -> U256 {
        let blocks = block_number.saturating_sub(self.acc_rewards_per_signal_last_block_updated);
        if blocks == 0 {
            return U256::ZERO;
        }
        let signalled_tokens = signal.total_signalled_tokens();
        if signalled_tokens.is_zero() {
            return U256::ZERO;
        }
        self.issuance_per_block * U256::from(blocks) * FIXED_POINT_SCALING_FACTOR / signalled_tokens
    }

    pub fn get_acc_rewards_per_signal(&self, signal: &dyn SignalSource, block_number: u64) -> U256 {
        self.acc_rewards_per_signal + self.get_new_rewards_per_signal(signal, block_number)
    }

    /// Move the global accumulator to `block_number`.
    pub fn update_acc_rewards_per_signal(
        &mut self,
        signal: &dyn SignalSource,
        block_number: u64,
    ) -> U256 {
        self.acc_rewards_per_signal = self.get_acc_rewards_per_signal(signal, block_number);
        self.acc_rewards_per_signal_last_block_updated = block_number;
        self.acc_rewards_per_signal
    }

    /// Rewards accrued to a deployment up to `block_number`. Frozen while the deployment is
    /// denied or signalled below the minimum.
    pub fn get_acc_rewards_for_subgraph(
        &self,
        signal: &dyn SignalSource,
        deployment: &DeploymentId,
        block_number: u64,
    ) -> U256 {
        let subgraph = self.get_subgraph(deployment);
        if self.is_denied(deployment) {
            return subgraph.acc_rewards_for_subgraph;
        }
        let signalled_tokens = signal.curation_pool_tokens(deployment);
        if signalled_tokens < self.minimum_subgraph_signal || signalled_tokens.is_zero() {
            return subgraph.acc_rewards_for_subgraph;
        }
        let acc_rewards_per_signal = self.get_acc_rewards_per_signal(signal, block_number);
        let new_rewards = acc_rewards_per_signal
            .saturating_sub(subgraph.acc_rewards_per_signal_snapshot)
            * signalled_tokens
            / FIXED_POINT_SCALING_FACTOR;
        subgraph.acc_rewards_for_subgraph + new_rewards
    }

    /// Settle a deployment's rewards before its signal changes.
    ///
    /// Returns the deployment's accrued rewards.
    pub fn on_subgraph_signal_update(
        &mut self,
        signal: &dyn SignalSource,
        deployment: &DeploymentId,
        block_number: u64,
    ) -> U256 {
        let acc_rewards_for_subgraph =
            self.get_acc_rewards_for_subgraph(signal, deployment, block_number);
        let acc_rewards_per_signal = self.update_acc_rewards_per_signal(signal, block_number);

        let subgraph = self.subgraphs.entry(*deployment).or_default();
        subgraph.acc_rewards_for_subgraph = acc_rewards_for_subgraph;
        subgraph.acc_rewards_per_signal_snapshot = acc_rewards_per_signal;

        tracing::trace!(
            %deployment,
            %acc_rewards_for_subgraph,
            %acc_rewards_per_signal,
            "subgraph signal settled"
        );
        acc_rewards_for_subgraph
    }

    /// Rewards per allocated token of a deployment up to `block_number`, and the deployment's
    /// accrued rewards.
    pub fn get_acc_rewards_per_allocated_token(
        &self,
        signal: &dyn SignalSource,
        issuer: &dyn RewardsIssuer,
        deployment: &DeploymentId,
        block_number: u64,
    ) -> (U256, U256) {
        let subgraph = self.get_subgraph(deployment);
        let acc_rewards_for_subgraph =
            self.get_acc_rewards_for_subgraph(signal, deployment, block_number);
        let allocated_tokens = issuer.subgraph_allocated_tokens(deployment);
        if allocated_tokens.is_zero() {
            return (subgraph.acc_rewards_per_allocated_token, acc_rewards_for_subgraph);
        }
        let new_rewards =
            acc_rewards_for_subgraph.saturating_sub(subgraph.acc_rewards_for_subgraph_snapshot);
        let acc_rewards_per_allocated_token = subgraph.acc_rewards_per_allocated_token
            + new_rewards * FIXED_POINT_SCALING_FACTOR / allocated_tokens;
        (acc_rewards_per_allocated_token, acc_rewards_for_subgraph)
    }

    /// Settle a deployment's rewards before its allocated tokens change.
    ///
    /// Returns the deployment's rewards per allocated token.
    pub fn on_subgraph_allocation_update(
        &mut self,
        signal: &dyn SignalSource,
        issuer: &dyn RewardsIssuer,
        deployment: &DeploymentId,
        block_number: u64,
    ) -> U256 {
        let (acc_rewards_per_allocated_token, _) =
            self.get_acc_rewards_per_allocated_token(signal, issuer, deployment, block_number);
        let acc_rewards_for_subgraph =
            self.on_subgraph_signal_update(signal, deployment, block_number);

        let subgraph = self.subgraphs.entry(*deployment).or_default();
        subgraph.acc_rewards_per_allocated_token = acc_rewards_per_allocated_token;
        subgraph.acc_rewards_for_subgraph_snapshot = acc_rewards_for_subgraph;
        acc_rewards_per_allocated_token
    }

    /// The rewards an allocation would take at `block_number`.
    pub fn get_rewards(
        &self,
        signal: &dyn SignalSource,
        issuer: &dyn RewardsIssuer,
        allocation_id: &Address,
        block_number: u64,
    ) -> U256 {
        let Some(allocation) = issuer.allocation_data(allocation_id) else {
            return U256::ZERO;
        };
        if !allocation.is_active {
            return U256::ZERO;
        }
        let (acc_rewards_per_allocated_token, _) = self.get_acc_rewards_per_allocated_token(
            signal,
            issuer,
            &allocation.deployment,
            block_number,
        );
        calc_rewards(
            allocation.tokens,
            allocation.acc_rewards_per_allocated_token,
            acc_rewards_per_allocated_token,
        ) + allocation.acc_rewards_pending
    }

    /// Settle an allocation and mint its rewards to the issuer. Issuer only.
    ///
    /// Inactive allocations take nothing, but still settle their deployment.
    pub fn take_rewards(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        signal: &dyn SignalSource,
        issuer: &dyn RewardsIssuer,
        allocation_id: Address,
    ) -> Result<U256, RewardsError> {
        self.controller.ensure_not_paused()?;
        if ctx.caller.is_zero() || ctx.caller != self.subgraph_service {
            return Err(RewardsError::NotRewardsIssuer(ctx.caller));
        }
        let allocation = issuer
            .allocation_data(&allocation_id)
            .ok_or(RewardsError::AllocationNotFound(allocation_id))?;

        let acc_rewards_per_allocated_token = self.on_subgraph_allocation_update(
            signal,
            issuer,
            &allocation.deployment,
            ctx.block_number,
        );
        if !allocation.is_active {
            return Ok(U256::ZERO);
        }
        let rewards = calc_rewards(
            allocation.tokens,
            allocation.acc_rewards_per_allocated_token,
            acc_rewards_per_allocated_token,
        ) + allocation.acc_rewards_pending;

        if !rewards.is_zero() {
            let rewards_manager = self.controller.resolve(ContractName::RewardsManager)?;
            token.mint(rewards_manager, ctx.caller, rewards)?;
            METRICS
                .tokens
                .with_label_values(&["minted"])
                .inc_by(grt_f64(rewards));
        }
        tracing::info!(
            indexer = %allocation.indexer,
            %allocation_id,
            deployment = %allocation.deployment,
            %rewards,
            "rewards assigned"
        );
        Ok(rewards)
    }
}

/// Rewards earned by `tokens` between two per-allocated-token accumulator values.
pub fn calc_rewards(tokens: U256, acc_start: U256, acc_end: U256) -> U256 {
    tokens * acc_end.saturating_sub(acc_start) / FIXED_POINT_SCALING_FACTOR
}
