use alloy_primitives::{Address, B256};
use horizon_common::{ppm::PpmMathError, types::PaymentType};
use horizon_framework::errors::{Classify, ControllerError, ErrorKind, TokenError};

use crate::{
    curation::CurationError, data_service::DataServiceError, payments::CollectorError,
    rewards::RewardsError, staking::StakingError,
};

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum SubgraphServiceError {
    #[error("caller {caller} is not authorized for indexer {indexer}")]
    NotAuthorized { caller: Address, indexer: Address },
    #[error("indexer {0} is not registered")]
    IndexerNotRegistered(Address),
    #[error("indexer {0} is already registered")]
    IndexerAlreadyRegistered(Address),
    #[error("empty indexer {0}")]
    EmptyField(&'static str),
    #[error("invalid zero allocation id")]
    InvalidZeroAllocationId,
    #[error("allocation {0} already exists")]
    AllocationAlreadyExists(Address),
    #[error("allocation {0} not found")]
    AllocationNotFound(Address),
    #[error("allocation {0} is closed")]
    AllocationClosed(Address),
    #[error("allocation {allocation_id} is not owned by indexer {indexer}")]
    AllocationNotOwned {
        allocation_id: Address,
        indexer: Address,
    },
    #[error("allocation {0} already has that size")]
    AllocationSameSize(Address),
    #[error("voucher collection {0} is not an allocation of the indexer")]
    InvalidCollectionId(B256),
    #[error("voucher service provider {rav_service_provider} is not the indexer {indexer}")]
    InvalidRavServiceProvider {
        indexer: Address,
        rav_service_provider: Address,
    },
    #[error("payment type {payment_type} does not match the collect data")]
    InvalidPaymentTypeData { payment_type: PaymentType },
    #[error("unsupported payment type {0}")]
    UnsupportedPaymentType(PaymentType),
    #[error(transparent)]
    DataService(#[from] DataServiceError),
    #[error(transparent)]
    Staking(#[from] StakingError),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error(transparent)]
    Curation(#[from] CurationError),
    #[error(transparent)]
    Rewards(#[from] RewardsError),
    #[error(transparent)]
    PpmMath(#[from] PpmMathError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl Classify for SubgraphServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            SubgraphServiceError::NotAuthorized { .. }
            | SubgraphServiceError::AllocationNotOwned { .. } => ErrorKind::Authorization,
            SubgraphServiceError::DataService(err) => err.kind(),
            SubgraphServiceError::Staking(err) => err.kind(),
            SubgraphServiceError::Collector(err) => err.kind(),
            SubgraphServiceError::Curation(err) => err.kind(),
            SubgraphServiceError::Rewards(err) => err.kind(),
            SubgraphServiceError::Token(err) => err.kind(),
            SubgraphServiceError::Controller(err) => err.kind(),
            _ => ErrorKind::Validation,
        }
    }
}
