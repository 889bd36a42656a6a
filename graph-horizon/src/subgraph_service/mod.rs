//! The subgraph service: the data service indexers provision stake to in order to serve
//! subgraph queries and earn indexing rewards.
//!
//! Indexers register, then open allocations against their provision, one per deployment they
//! index. Query fees are collected through the tally collector and lock provision stake as
//! economic security until the dispute period is over. Indexing rewards are taken from the
//! rewards manager per allocation. Slashing is delegated to the dispute manager.

use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};
use horizon_common::{
    ppm::{is_valid_ppm, mul_ppm, PpmMathError},
    types::PaymentType,
};
use horizon_framework::{
    context::Context,
    controller::{ContractName, Controller},
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use thegraph_core::types::DeploymentId;

pub use self::{allocation::Allocation, errors::SubgraphServiceError};
use crate::{
    config::SubgraphServiceConfig,
    curation::Curation,
    data_service::{
        CollectData, DataService, DataServiceFees, ProvisionManager, ProvisionTracker, SlashData,
    },
    errors::Error,
    payments::SignedRav,
    protocol::Core,
};

mod allocation;
mod errors;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indexer {
    pub url: String,
    pub geo_hash: String,
    pub registered_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub url: String,
    pub geo_hash: String,
    /// Where query fees and indexing rewards are sent. The zero address restakes them.
    #[serde(default)]
    pub payments_destination: Address,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartService {
    pub allocation_id: Address,
    pub deployment: DeploymentId,
    #[serde_as(as = "DisplayFromStr")]
    pub tokens: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopService {
    pub allocation_id: Address,
}

#[derive(Clone, Debug)]
pub struct SubgraphService {
    address: Address,
    controller: Controller,
    config: SubgraphServiceConfig,
    provision_manager: ProvisionManager,
    fees: DataServiceFees,
    allocation_tracker: ProvisionTracker,
    indexers: HashMap<Address, Indexer>,
    payments_destination: HashMap<Address, Address>,
    allocations: HashMap<Address, Allocation>,
    subgraph_allocated_tokens: HashMap<DeploymentId, U256>,
}

impl SubgraphService {
    pub fn new(
        controller: Controller,
        address: Address,
        config: SubgraphServiceConfig,
    ) -> Result<Self, SubgraphServiceError> {
        let mut provision_manager = ProvisionManager::new(address);
        provision_manager.set_provision_tokens_range(
            config.minimum_provision_tokens,
            config.maximum_provision_tokens,
        )?;
        provision_manager.set_verifier_cut_range(0, config.max_verifier_cut)?;
        provision_manager
            .set_thawing_period_range(config.min_thawing_period, config.max_thawing_period)?;
        Ok(Self {
            address,
            controller,
            fees: DataServiceFees::new(address, config.max_stake_claims, config.delegation_ratio),
            config,
            provision_manager,
            allocation_tracker: ProvisionTracker::new(),
            indexers: HashMap::new(),
            payments_destination: HashMap::new(),
            allocations: HashMap::new(),
            subgraph_allocated_tokens: HashMap::new(),
        })
    }

    pub fn config(&self) -> &SubgraphServiceConfig {
        &self.config
    }

    pub fn provision_manager(&self) -> &ProvisionManager {
        &self.provision_manager
    }

    pub fn fees(&self) -> &DataServiceFees {
        &self.fees
    }

    pub fn get_indexer(&self, indexer: &Address) -> Option<&Indexer> {
        self.indexers.get(indexer)
    }

    pub fn get_payments_destination(&self, indexer: &Address) -> Address {
        self.payments_destination
            .get(indexer)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_payments_destination(
        &mut self,
        ctx: &Context,
        destination: Address,
    ) -> Result<(), SubgraphServiceError> {
        self.controller.ensure_not_paused()?;
        self.payments_destination.insert(ctx.caller, destination);
        tracing::info!(indexer = %ctx.caller, %destination, "payments destination set");
        Ok(())
    }

    pub fn set_delegation_ratio(
        &mut self,
        ctx: &Context,
        delegation_ratio: u32,
    ) -> Result<(), SubgraphServiceError> {
        self.controller.ensure_governor(ctx.caller)?;
        self.config.delegation_ratio = delegation_ratio;
        self.fees.set_delegation_ratio(delegation_ratio);
        tracing::info!(delegation_ratio, "delegation ratio set");
        Ok(())
    }

    pub fn set_stake_to_fees_ratio(
        &mut self,
        ctx: &Context,
        stake_to_fees_ratio: u64,
    ) -> Result<(), SubgraphServiceError> {
        self.controller.ensure_governor(ctx.caller)?;
        self.config.stake_to_fees_ratio = stake_to_fees_ratio;
        tracing::info!(stake_to_fees_ratio, "stake to fees ratio set");
        Ok(())
    }

    pub fn set_curation_cut(
        &mut self,
        ctx: &Context,
        curation_fee_cut: u32,
    ) -> Result<(), SubgraphServiceError> {
        self.controller.ensure_governor(ctx.caller)?;
        if !is_valid_ppm(U256::from(curation_fee_cut)) {
            return Err(PpmMathError::InvalidPpm(U256::from(curation_fee_cut)).into());
        }
        self.config.curation_fee_cut = curation_fee_cut;
        tracing::info!(curation_fee_cut, "curation cut set");
        Ok(())
    }

    pub fn set_provision_tokens_range(
        &mut self,
        ctx: &Context,
        min: U256,
        max: U256,
    ) -> Result<(), SubgraphServiceError> {
        self.controller.ensure_governor(ctx.caller)?;
        self.provision_manager.set_provision_tokens_range(min, max)?;
        Ok(())
    }

    /// Release the indexer's matured fee stake claims. Anyone may call.
    pub fn release_stake(
        &mut self,
        ctx: &Context,
        indexer: Address,
        n: usize,
    ) -> Result<U256, SubgraphServiceError> {
        Ok(self.fees.release_stake_claims(indexer, n, ctx.timestamp)?)
    }

    /// Release exactly `tokens` of the indexer's matured fee stake, oldest claims first. Anyone
    /// may call.
    pub fn release_stake_tokens(
        &mut self,
        ctx: &Context,
        indexer: Address,
        tokens: U256,
    ) -> Result<U256, SubgraphServiceError> {
        Ok(self.fees.release_stake(indexer, tokens, ctx.timestamp)?)
    }

    /// The curation cut of the deployment's query fees. Zero when nobody curates it.
    pub fn curation_cut_for(&self, curation: &Curation, deployment: &DeploymentId) -> u32 {
        if curation.is_curated(deployment) {
            self.config.curation_fee_cut
        } else {
            0
        }
    }

    fn ensure_authorized(
        &self,
        core: &Core,
        ctx: &Context,
        indexer: Address,
    ) -> Result<(), SubgraphServiceError> {
        if !core.staking.is_authorized(&indexer, &self.address, &ctx.caller) {
            return Err(SubgraphServiceError::NotAuthorized {
                caller: ctx.caller,
                indexer,
            });
        }
        Ok(())
    }

    fn ensure_registered(&self, indexer: Address) -> Result<(), SubgraphServiceError> {
        if !self.indexers.contains_key(&indexer) {
            return Err(SubgraphServiceError::IndexerNotRegistered(indexer));
        }
        Ok(())
    }

    fn collect_query_fees(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        signed_rav: SignedRav,
        tokens_to_collect: U256,
    ) -> Result<U256, SubgraphServiceError> {
        let rav = &signed_rav.rav;
        if rav.service_provider != indexer {
            return Err(SubgraphServiceError::InvalidRavServiceProvider {
                indexer,
                rav_service_provider: rav.service_provider,
            });
        }
        let allocation_id = Address::from_word(rav.collection_id);
        let deployment = match self.allocations.get(&allocation_id) {
            Some(allocation) if allocation.indexer == indexer => allocation.deployment,
            _ => return Err(SubgraphServiceError::InvalidCollectionId(rav.collection_id)),
        };
        let curation_cut = self.curation_cut_for(&core.curation, &deployment);

        let as_service = ctx.with_caller(self.address);
        let balance_before = core.token.balance_of(&self.address);
        let Core {
            token,
            staking,
            escrow,
            payments,
            collector,
            ..
        } = &mut *core;
        let tokens_collected = collector.collect(
            &as_service,
            token,
            escrow,
            payments,
            staking,
            PaymentType::QueryFee,
            &signed_rav,
            tokens_to_collect,
            curation_cut,
            self.get_payments_destination(&indexer),
        )?;
        let tokens_curators = core
            .token
            .balance_of(&self.address)
            .saturating_sub(balance_before);

        if !tokens_collected.is_zero() {
            let tokens_to_lock = tokens_collected * U256::from(self.config.stake_to_fees_ratio);
            if !tokens_to_lock.is_zero() {
                self.fees.lock_stake(
                    &core.staking,
                    indexer,
                    tokens_to_lock,
                    ctx.timestamp,
                    ctx.timestamp + self.config.dispute_period,
                )?;
            }
            if !tokens_curators.is_zero() {
                let curation = self.controller.resolve(ContractName::Curation)?;
                core.token
                    .push_tokens(self.address, curation, tokens_curators)?;
                core.curation
                    .collect(&as_service, &mut core.rewards, deployment, tokens_curators)?;
            }
        }

        tracing::info!(
            %indexer,
            %allocation_id,
            payer = %signed_rav.rav.payer,
            %tokens_collected,
            %tokens_curators,
            "query fees collected"
        );
        Ok(tokens_collected)
    }

    fn collect_indexing_rewards(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        allocation_id: Address,
        poi: B256,
    ) -> Result<U256, SubgraphServiceError> {
        let deployment = self.open_allocation(indexer, allocation_id)?.deployment;
        let as_service = ctx.with_caller(self.address);

        let tokens_rewards = if poi.is_zero() {
            U256::ZERO
        } else {
            core.rewards.take_rewards(
                &as_service,
                &mut core.token,
                &core.curation,
                &*self,
                allocation_id,
            )?
        };
        let acc_rewards_per_allocated_token = core.rewards.on_subgraph_allocation_update(
            &core.curation,
            &*self,
            &deployment,
            ctx.block_number,
        );
        if let Some(allocation) = self.allocations.get_mut(&allocation_id) {
            allocation.acc_rewards_per_allocated_token = acc_rewards_per_allocated_token;
            allocation.acc_rewards_pending = U256::ZERO;
            allocation.last_poi_presented_at = ctx.timestamp;
        }
        if tokens_rewards.is_zero() {
            tracing::info!(%indexer, %allocation_id, %poi, "poi presented without rewards");
            return Ok(U256::ZERO);
        }

        let (tokens_delegation, tokens_indexer) =
            self.distribute_indexing_rewards(core, ctx, indexer, tokens_rewards)?;

        tracing::info!(
            %indexer,
            %allocation_id,
            %poi,
            %tokens_rewards,
            %tokens_delegation,
            %tokens_indexer,
            "indexing rewards collected"
        );
        Ok(tokens_rewards)
    }

    /// Split minted indexing rewards between the delegation pool and the indexer. Returns the
    /// delegation and indexer shares.
    fn distribute_indexing_rewards(
        &self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        tokens_rewards: U256,
    ) -> Result<(U256, U256), SubgraphServiceError> {
        let as_service = ctx.with_caller(self.address);
        let staking_address = self.controller.resolve(ContractName::Staking)?;
        let pool_has_shares = core
            .staking
            .get_delegation_pool(&indexer, &self.address)
            .is_some_and(|pool| !pool.shares.is_zero());
        let tokens_delegation = if pool_has_shares {
            let cut = core.staking.get_delegation_fee_cut(
                &indexer,
                &self.address,
                PaymentType::IndexingRewards,
            );
            mul_ppm(tokens_rewards, U256::from(cut))?
        } else {
            U256::ZERO
        };
        if !tokens_delegation.is_zero() {
            core.token
                .approve(self.address, staking_address, tokens_delegation)?;
            core.staking.add_to_delegation_pool(
                &as_service,
                &mut core.token,
                indexer,
                self.address,
                tokens_delegation,
            )?;
        }
        let tokens_indexer = tokens_rewards - tokens_delegation;
        if !tokens_indexer.is_zero() {
            let destination = self.get_payments_destination(&indexer);
            if destination.is_zero() {
                core.token
                    .approve(self.address, staking_address, tokens_indexer)?;
                core.staking
                    .stake_to(&as_service, &mut core.token, indexer, tokens_indexer)?;
            } else {
                core.token
                    .push_tokens(self.address, destination, tokens_indexer)?;
            }
        }

        Ok((tokens_delegation, tokens_indexer))
    }
}

impl DataService for SubgraphService {
    type Registration = Registration;
    type StartService = StartService;
    type StopService = StopService;

    fn address(&self) -> Address {
        self.address
    }

    fn register(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        data: Registration,
    ) -> Result<(), Error> {
        core.controller.ensure_not_paused()?;
        self.ensure_authorized(core, ctx, indexer)?;
        self.provision_manager.validate_provision(&core.staking, indexer)?;
        if data.url.is_empty() {
            return Err(SubgraphServiceError::EmptyField("url").into());
        }
        if data.geo_hash.is_empty() {
            return Err(SubgraphServiceError::EmptyField("geo hash").into());
        }
        if self.indexers.contains_key(&indexer) {
            return Err(SubgraphServiceError::IndexerAlreadyRegistered(indexer).into());
        }

        self.indexers.insert(
            indexer,
            Indexer {
                url: data.url,
                geo_hash: data.geo_hash,
                registered_at: ctx.timestamp,
            },
        );
        if !data.payments_destination.is_zero() {
            self.payments_destination
                .insert(indexer, data.payments_destination);
        }
        tracing::info!(%indexer, "indexer registered");
        Ok(())
    }

    fn accept_provision(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
    ) -> Result<(), Error> {
        core.controller.ensure_not_paused()?;
        self.ensure_authorized(core, ctx, indexer)?;
        let provision = self.provision_manager.accept_provision_pending_parameters(
            ctx,
            &mut core.staking,
            indexer,
        )?;
        tracing::info!(
            %indexer,
            max_verifier_cut = provision.max_verifier_cut,
            thawing_period = provision.thawing_period,
            "provision parameters accepted"
        );
        Ok(())
    }

    fn start_service(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        data: StartService,
    ) -> Result<(), Error> {
        core.controller.ensure_not_paused()?;
        self.ensure_authorized(core, ctx, indexer)?;
        self.ensure_registered(indexer)?;
        self.provision_manager.validate_provision(&core.staking, indexer)?;
        self.allocate(
            core,
            ctx,
            indexer,
            data.allocation_id,
            data.deployment,
            data.tokens,
        )?;
        Ok(())
    }

    fn stop_service(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        data: StopService,
    ) -> Result<(), Error> {
        core.controller.ensure_not_paused()?;
        self.ensure_authorized(core, ctx, indexer)?;
        self.ensure_registered(indexer)?;
        self.close_allocation(core, ctx, indexer, data.allocation_id)?;
        Ok(())
    }

    fn collect(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        payment_type: PaymentType,
        data: CollectData,
    ) -> Result<U256, Error> {
        core.controller.ensure_not_paused()?;
        self.ensure_authorized(core, ctx, indexer)?;
        self.ensure_registered(indexer)?;
        self.provision_manager.validate_provision(&core.staking, indexer)?;
        if data.payment_type() != payment_type {
            return Err(SubgraphServiceError::InvalidPaymentTypeData { payment_type }.into());
        }

        self.fees.release_stake_claims(indexer, 0, ctx.timestamp)?;

        let tokens = match data {
            CollectData::QueryFee {
                signed_rav,
                tokens_to_collect,
            } => self.collect_query_fees(core, ctx, indexer, signed_rav, tokens_to_collect)?,
            CollectData::IndexingRewards { allocation_id, poi } => {
                self.collect_indexing_rewards(core, ctx, indexer, allocation_id, poi)?
            }
            CollectData::IndexingFee { .. } => {
                return Err(SubgraphServiceError::UnsupportedPaymentType(payment_type).into())
            }
        };
        Ok(tokens)
    }

    fn slash(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        indexer: Address,
        data: SlashData,
    ) -> Result<(), Error> {
        core.controller.ensure_not_paused()?;
        self.controller
            .ensure_caller(ctx.caller, ContractName::DisputeManager)?;
        let slashed = core.staking.slash(
            &ctx.with_caller(self.address),
            &mut core.token,
            indexer,
            data.tokens,
            data.tokens_reward,
            ctx.caller,
        )?;
        tracing::info!(
            %indexer,
            provision_tokens = %slashed.provision_tokens,
            delegation_tokens = %slashed.delegation_tokens,
            tokens_reward = %slashed.tokens_verifier,
            "indexer slashed"
        );
        Ok(())
    }
}
