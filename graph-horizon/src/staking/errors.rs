use alloy_primitives::{Address, B256, U256};
use horizon_common::{linked_list::LinkedListError, ppm::PpmMathError};
use horizon_framework::errors::{Classify, ControllerError, ErrorKind, TokenError};

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum StakingError {
    #[error("invalid zero tokens")]
    InvalidZeroTokens,
    #[error("invalid zero shares")]
    InvalidZeroShares,
    #[error("invalid zero address for {0}")]
    InvalidZeroAddress(&'static str),
    #[error("caller {caller} is not authorized for provider {service_provider} and verifier {verifier}")]
    NotAuthorized {
        caller: Address,
        service_provider: Address,
        verifier: Address,
    },
    #[error("caller {0} cannot be its own operator")]
    InvalidOperator(Address),
    #[error("invalid max verifier cut: {0}")]
    InvalidMaxVerifierCut(u32),
    #[error("invalid thawing period: {thawing_period} > {max_thawing_period}")]
    InvalidThawingPeriod {
        thawing_period: u64,
        max_thawing_period: u64,
    },
    #[error("provision already exists for provider {service_provider} and verifier {verifier}")]
    ProvisionAlreadyExists {
        service_provider: Address,
        verifier: Address,
    },
    #[error("provision not found for provider {service_provider} and verifier {verifier}")]
    ProvisionNotFound {
        service_provider: Address,
        verifier: Address,
    },
    #[error("insufficient idle stake: {available} < {required}")]
    InsufficientIdleStake { available: U256, required: U256 },
    #[error("insufficient tokens: {available} < {required}")]
    InsufficientTokens { available: U256, required: U256 },
    #[error("insufficient shares: {available} < {required}")]
    InsufficientShares { available: U256, required: U256 },
    #[error("insufficient delegation tokens: {tokens} < {minimum}")]
    InsufficientDelegationTokens { tokens: U256, minimum: U256 },
    #[error("slippage protection: {shares} shares < {min_shares_out}")]
    SlippageProtection { shares: U256, min_shares_out: U256 },
    #[error("invalid delegation pool state for provider {service_provider} and verifier {verifier}")]
    InvalidDelegationPoolState {
        service_provider: Address,
        verifier: Address,
    },
    #[error("too many thaw requests, max {0}")]
    TooManyThawRequests(usize),
    #[error("nothing thawing")]
    NothingThawing,
    #[error("verifier tokens too high: {tokens_verifier} > {max_verifier_tokens}")]
    VerifierTokensTooHigh {
        tokens_verifier: U256,
        max_verifier_tokens: U256,
    },
    #[error("thaw request not found: {0}")]
    ThawRequestNotFound(B256),
    #[error(transparent)]
    LinkedList(#[from] LinkedListError),
    #[error(transparent)]
    PpmMath(#[from] PpmMathError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl Classify for StakingError {
    fn kind(&self) -> ErrorKind {
        match self {
            StakingError::NotAuthorized { .. } => ErrorKind::Authorization,
            StakingError::ThawRequestNotFound(_) => ErrorKind::Invariant,
            StakingError::Token(err) => err.kind(),
            StakingError::Controller(err) => err.kind(),
            StakingError::LinkedList(LinkedListError::EmptyList) => ErrorKind::Invariant,
            _ => ErrorKind::Validation,
        }
    }
}
