//! The protocol composite: one instance of every component, wired through a shared controller.
//!
//! Every state change goes through [`GraphProtocol::transact`], which restores the state it
//! started from when the call fails. A failed call has no effect, however far it got.

use alloy_primitives::Address;
use horizon_framework::{
    context::{Clock, Context},
    controller::{ContractName, Controller},
    metrics::METRICS,
    token::GraphToken,
};

use crate::{
    config::Config,
    curation::Curation,
    errors::Error,
    payments::{GraphPayments, GraphTallyCollector, PaymentsEscrow},
    rewards::RewardsManager,
    staking::HorizonStaking,
    subgraph_service::SubgraphService,
};

/// The protocol contracts a data service calls into.
#[derive(Clone, Debug)]
pub struct Core {
    pub controller: Controller,
    pub token: GraphToken,
    pub staking: HorizonStaking,
    pub curation: Curation,
    pub rewards: RewardsManager,
    pub payments: GraphPayments,
    pub escrow: PaymentsEscrow,
    pub collector: GraphTallyCollector,
}

#[derive(Clone, Debug)]
pub struct GraphProtocol {
    pub core: Core,
    pub subgraph_service: SubgraphService,
    pub clock: Clock,
}

impl GraphProtocol {
    /// Deploy every protocol contract at its default address and wire them together.
    ///
    /// The governor is granted the minter role alongside the rewards manager, so it can fund
    /// accounts.
    pub fn deploy(config: Config, clock: Clock) -> Result<Self, Error> {
        config.validate()?;
        let governance = &config.governance;
        let governor = governance.governor;
        let controller = Controller::new(governor)?;
        for name in ContractName::ALL {
            let address = match name {
                ContractName::DisputeManager => governance.dispute_manager,
                _ => name.default_address(),
            };
            if !address.is_zero() {
                controller.register(governor, name, address)?;
            }
        }
        if !governance.pause_guardian.is_zero() {
            controller.set_pause_guardian(governor, governance.pause_guardian)?;
        }

        let mut token = GraphToken::new(controller.clone());
        token.add_minter(governor, ContractName::RewardsManager.default_address())?;
        token.add_minter(governor, governor)?;

        let subgraph_service_address = ContractName::SubgraphService.default_address();
        let ctx = clock.context(governor);
        let mut rewards = RewardsManager::new(controller.clone(), &config.rewards);
        rewards.set_subgraph_service(&ctx, subgraph_service_address)?;
        if !governance.subgraph_availability_oracle.is_zero() {
            rewards
                .set_subgraph_availability_oracle(&ctx, governance.subgraph_availability_oracle)?;
        }

        let core = Core {
            staking: HorizonStaking::new(controller.clone(), config.staking.clone()),
            curation: Curation::new(controller.clone(), &config.curation),
            payments: GraphPayments::new(controller.clone(), &config.payments),
            escrow: PaymentsEscrow::new(
                controller.clone(),
                config.payments.withdraw_escrow_thawing_period,
            ),
            collector: GraphTallyCollector::new(controller.clone(), &config.payments),
            rewards,
            token,
            controller: controller.clone(),
        };
        let subgraph_service = SubgraphService::new(
            controller,
            subgraph_service_address,
            config.subgraph_service.clone(),
        )?;

        tracing::info!(%governor, chain_id = config.payments.chain_id, "protocol deployed");
        Ok(Self {
            core,
            subgraph_service,
            clock,
        })
    }

    /// The call context of `caller` at the current block.
    pub fn context(&self, caller: Address) -> Context {
        self.clock.context(caller)
    }

    /// Run `f` atomically: if it fails, every component and the controller registry are
    /// restored to their state before the call.
    pub fn transact<T, F>(&mut self, label: &str, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Self) -> Result<T, Error>,
    {
        let registry = self.core.controller.snapshot();
        let snapshot = (self.core.clone(), self.subgraph_service.clone());
        match f(self) {
            Ok(value) => {
                METRICS
                    .transactions
                    .with_label_values(&["committed", "none"])
                    .inc();
                tracing::debug!(transaction = label, "committed");
                Ok(value)
            }
            Err(err) => {
                (self.core, self.subgraph_service) = snapshot;
                self.core.controller.restore(registry);
                METRICS
                    .transactions
                    .with_label_values(&["reverted", err.kind_label()])
                    .inc();
                tracing::warn!(transaction = label, kind = err.kind_label(), %err, "reverted");
                Err(err)
            }
        }
    }
}
