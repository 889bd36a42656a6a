//! Indexer allocations: provision tokens an indexer commits to serving one deployment.

use alloy_primitives::{Address, U256};
use horizon_framework::context::Context;
use serde::{Deserialize, Serialize};
use thegraph_core::types::DeploymentId;

use super::{SubgraphService, SubgraphServiceError};
use crate::{
    protocol::Core,
    rewards::{calc_rewards, AllocationData, RewardsIssuer},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub indexer: Address,
    pub deployment: DeploymentId,
    pub tokens: U256,
    pub created_at: u64,
    /// Zero while open.
    pub closed_at: u64,
    pub last_poi_presented_at: u64,
    pub acc_rewards_per_allocated_token: U256,
    pub acc_rewards_pending: U256,
}

impl Allocation {
    pub fn is_open(&self) -> bool {
        self.closed_at == 0
    }
}

impl RewardsIssuer for SubgraphService {
    fn allocation_data(&self, allocation_id: &Address) -> Option<AllocationData> {
        self.allocations.get(allocation_id).map(|allocation| AllocationData {
            is_active: allocation.is_open(),
            indexer: allocation.indexer,
            deployment: allocation.deployment,
            tokens: allocation.tokens,
            acc_rewards_per_allocated_token: allocation.acc_rewards_per_allocated_token,
            acc_rewards_pending: allocation.acc_rewards_pending,
        })
    }

    fn subgraph_allocated_tokens(&self, deployment: &DeploymentId) -> U256 {
        self.subgraph_allocated_tokens
            .get(deployment)
            .copied()
            .unwrap_or_default()
    }
}

impl SubgraphService {
    pub fn get_allocation(&self, allocation_id: &Address) -> Option<&Allocation> {
        self.allocations.get(allocation_id)
    }

    /// Tokens the indexer has allocated across its open allocations.
    pub fn allocated_tokens(&self, indexer: &Address) -> U256 {
        self.allocation_tracker.locked(indexer)
    }

    /// The open allocation `allocation_id` of `indexer`.
    pub(super) fn open_allocation(
        &self,
        indexer: Address,
        allocation_id: Address,
    ) -> Result<&Allocation, SubgraphServiceError> {
        let allocation = self
            .allocations
            .get(&allocation_id)
            .ok_or(SubgraphServiceError::AllocationNotFound(allocation_id))?;
        if allocation.indexer != indexer {
            return Err(SubgraphServiceError::AllocationNotOwned {
                allocation_id,
                indexer,
            });
        }
        if !allocation.is_open() {
            return Err(SubgraphServiceError::AllocationClosed(allocation_id));
        }
        Ok(allocation)
    }

    pub(super) fn allocate(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        allocation_id: Address,
        deployment: DeploymentId,
        tokens: U256,
    ) -> Result<(), SubgraphServiceError> {
        if allocation_id.is_zero() {
            return Err(SubgraphServiceError::InvalidZeroAllocationId);
        }
        if self.allocations.contains_key(&allocation_id) {
            return Err(SubgraphServiceError::AllocationAlreadyExists(allocation_id));
        }

        let acc_rewards_per_allocated_token = core.rewards.on_subgraph_allocation_update(
            &core.curation,
            &*self,
            &deployment,
            ctx.block_number,
        );
        self.allocation_tracker.lock(
            &core.staking,
            self.address,
            indexer,
            tokens,
            self.config.delegation_ratio,
        )?;
        self.allocations.insert(
            allocation_id,
            Allocation {
                indexer,
                deployment,
                tokens,
                created_at: ctx.timestamp,
                closed_at: 0,
                last_poi_presented_at: 0,
                acc_rewards_per_allocated_token,
                acc_rewards_pending: U256::ZERO,
            },
        );
        *self.subgraph_allocated_tokens.entry(deployment).or_default() += tokens;

        tracing::info!(%indexer, %allocation_id, %deployment, %tokens, "allocation created");
        Ok(())
    }

    /// Change the tokens of an open allocation. Rewards accrued at the previous size are kept
    /// pending until the next rewards collection.
    pub fn resize_allocation(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        allocation_id: Address,
        tokens: U256,
    ) -> Result<(), SubgraphServiceError> {
        core.controller.ensure_not_paused()?;
        self.ensure_authorized(core, ctx, indexer)?;
        self.ensure_registered(indexer)?;
        self.provision_manager.validate_provision(&core.staking, indexer)?;
        let allocation = self.open_allocation(indexer, allocation_id)?;
        let (deployment, old_tokens) = (allocation.deployment, allocation.tokens);
        if tokens == old_tokens {
            return Err(SubgraphServiceError::AllocationSameSize(allocation_id));
        }

        if tokens > old_tokens {
            self.allocation_tracker.lock(
                &core.staking,
                self.address,
                indexer,
                tokens - old_tokens,
                self.config.delegation_ratio,
            )?;
        } else {
            self.allocation_tracker
                .release(indexer, old_tokens - tokens)?;
        }

        let acc_rewards_per_allocated_token = core.rewards.on_subgraph_allocation_update(
            &core.curation,
            &*self,
            &deployment,
            ctx.block_number,
        );
        if let Some(allocation) = self.allocations.get_mut(&allocation_id) {
            allocation.acc_rewards_pending += calc_rewards(
                old_tokens,
                allocation.acc_rewards_per_allocated_token,
                acc_rewards_per_allocated_token,
            );
            allocation.acc_rewards_per_allocated_token = acc_rewards_per_allocated_token;
            allocation.tokens = tokens;
        }
        let allocated = self.subgraph_allocated_tokens.entry(deployment).or_default();
        *allocated = *allocated - old_tokens + tokens;

        tracing::info!(%indexer, %allocation_id, %old_tokens, %tokens, "allocation resized");
        Ok(())
    }

    /// Close the allocation, paying out the rewards it accrued since its last snapshot.
    pub(super) fn close_allocation(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        allocation_id: Address,
    ) -> Result<(), SubgraphServiceError> {
        let allocation = self.open_allocation(indexer, allocation_id)?;
        let (deployment, tokens) = (allocation.deployment, allocation.tokens);

        let tokens_rewards = core.rewards.take_rewards(
            &ctx.with_caller(self.address),
            &mut core.token,
            &core.curation,
            &*self,
            allocation_id,
        )?;
        let acc_rewards_per_allocated_token = core.rewards.on_subgraph_allocation_update(
            &core.curation,
            &*self,
            &deployment,
            ctx.block_number,
        );
        if let Some(allocation) = self.allocations.get_mut(&allocation_id) {
            allocation.acc_rewards_per_allocated_token = acc_rewards_per_allocated_token;
            allocation.acc_rewards_pending = U256::ZERO;
            allocation.closed_at = ctx.timestamp;
        }
        if !tokens_rewards.is_zero() {
            self.distribute_indexing_rewards(core, ctx, indexer, tokens_rewards)?;
        }
        self.allocation_tracker.release(indexer, tokens)?;
        if let Some(allocated) = self.subgraph_allocated_tokens.get_mut(&deployment) {
            *allocated = allocated.saturating_sub(tokens);
        }

        tracing::info!(
            %indexer,
            %allocation_id,
            %deployment,
            %tokens,
            %tokens_rewards,
            "allocation closed"
        );
        Ok(())
    }
}
