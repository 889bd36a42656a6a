use alloy_primitives::{Address, B256, U256};
use horizon_common::linked_list::LinkedListError;
use horizon_framework::errors::{Classify, ControllerError, ErrorKind};

use crate::staking::StakingError;

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum DataServiceError {
    #[error("invalid zero tokens")]
    InvalidZeroTokens,
    /// The provider already has the maximum number of outstanding stake claims.
    #[error("max stake claims reached: {0}")]
    MaxStakeClaimsReached(usize),
    /// Less matured stake than requested.
    #[error("insufficient releasable tokens: {available} < {requested}")]
    InsufficientReleasableTokens { available: U256, requested: U256 },
    /// Locking would exceed the tokens available to the data service.
    #[error("insufficient tokens available: {available} < {required}")]
    InsufficientTokensAvailable { available: U256, required: U256 },
    #[error("insufficient tokens locked: {locked} < {tokens}")]
    InsufficientTokensLocked { locked: U256, tokens: U256 },
    #[error("stake claim not found: {0}")]
    StakeClaimNotFound(B256),
    #[error("provision not found for provider {service_provider} and verifier {verifier}")]
    ProvisionNotFound {
        service_provider: Address,
        verifier: Address,
    },
    #[error("invalid provision tokens {value}, expected [{min}, {max}]")]
    InvalidProvisionTokens { value: U256, min: U256, max: U256 },
    #[error("invalid {parameter} {value}, expected [{min}, {max}]")]
    InvalidProvisionParameter {
        parameter: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("invalid range for {parameter}: {min} > {max}")]
    InvalidRange {
        parameter: &'static str,
        min: String,
        max: String,
    },
    #[error("caller {caller} is not authorized for provider {service_provider}")]
    NotAuthorized {
        caller: Address,
        service_provider: Address,
    },
    #[error(transparent)]
    LinkedList(#[from] LinkedListError),
    #[error(transparent)]
    Staking(#[from] StakingError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl Classify for DataServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            DataServiceError::NotAuthorized { .. } => ErrorKind::Authorization,
            DataServiceError::StakeClaimNotFound(_) => ErrorKind::Invariant,
            DataServiceError::InvalidRange { .. } => ErrorKind::Configuration,
            DataServiceError::Staking(err) => err.kind(),
            DataServiceError::Controller(err) => err.kind(),
            _ => ErrorKind::Validation,
        }
    }
}
