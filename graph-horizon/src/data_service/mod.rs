//! The data service interface, and the building blocks data services are composed of.
//!
//! A data service is the verifier of the provisions its providers create. It registers
//! providers, starts and stops their services, collects payments for them and slashes them when
//! a dispute is lost.

use alloy_primitives::{Address, B256, U256};
use horizon_common::types::PaymentType;
use horizon_framework::context::Context;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

pub use self::{
    errors::DataServiceError,
    fees::{DataServiceFees, StakeClaim},
    provision_manager::ProvisionManager,
    provision_tracker::ProvisionTracker,
};
use crate::{errors::Error, payments::SignedRav, protocol::Core};

mod errors;
mod fees;
mod provision_manager;
mod provision_tracker;

/// Payment data, one variant per payment type a data service can collect.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectData {
    QueryFee {
        signed_rav: SignedRav,
        /// Tokens to collect out of the voucher's uncollected value. Zero collects all of it.
        #[serde_as(as = "DisplayFromStr")]
        #[serde(default)]
        tokens_to_collect: U256,
    },
    IndexingRewards {
        allocation_id: Address,
        /// Proof of indexing. The zero POI claims no rewards.
        poi: B256,
    },
    IndexingFee {
        agreement_id: B256,
    },
}

impl CollectData {
    pub fn payment_type(&self) -> PaymentType {
        match self {
            CollectData::QueryFee { .. } => PaymentType::QueryFee,
            CollectData::IndexingRewards { .. } => PaymentType::IndexingRewards,
            CollectData::IndexingFee { .. } => PaymentType::IndexingFee,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashData {
    #[serde_as(as = "DisplayFromStr")]
    pub tokens: U256,
    /// Slashed tokens paid to the caller.
    #[serde_as(as = "DisplayFromStr")]
    pub tokens_reward: U256,
}

pub trait DataService {
    type Registration;
    type StartService;
    type StopService;

    /// The data service address, i.e. the verifier of its providers' provisions.
    fn address(&self) -> Address;

    fn register(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        service_provider: Address,
        data: Self::Registration,
    ) -> Result<(), Error>;

    /// Accept the provider's staged provision parameters.
    fn accept_provision(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        service_provider: Address,
    ) -> Result<(), Error>;

    fn start_service(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        service_provider: Address,
        data: Self::StartService,
    ) -> Result<(), Error>;

    fn stop_service(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        service_provider: Address,
        data: Self::StopService,
    ) -> Result<(), Error>;

    /// Collect a payment for the provider. Returns the tokens collected.
    fn collect(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        service_provider: Address,
        payment_type: PaymentType,
        data: CollectData,
    ) -> Result<U256, Error>;

    fn slash(
        &mut self,
        core: &mut Core,
        ctx: &Context,
        service_provider: Address,
        data: SlashData,
    ) -> Result<(), Error>;
}
