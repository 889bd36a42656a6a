use alloy_primitives::{Address, U256};
use horizon_common::ppm::PpmMathError;
use horizon_framework::errors::{Classify, ControllerError, ErrorKind, TokenError};

use super::rav::SignatureError;
use crate::staking::StakingError;

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum PaymentsError {
    #[error("invalid data service cut: {0}")]
    InvalidDataServiceCut(u32),
    /// The protocol and data service cuts add up to more than the payment.
    #[error("insufficient tokens: {tokens} < {required}")]
    InsufficientTokens { tokens: U256, required: U256 },
    #[error(transparent)]
    PpmMath(#[from] PpmMathError),
    #[error(transparent)]
    Staking(#[from] StakingError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl Classify for PaymentsError {
    fn kind(&self) -> ErrorKind {
        match self {
            PaymentsError::Staking(err) => err.kind(),
            PaymentsError::Token(err) => err.kind(),
            PaymentsError::Controller(err) => err.kind(),
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum EscrowError {
    #[error("invalid zero tokens")]
    InvalidZeroTokens,
    #[error("insufficient escrow balance: {balance} < {minimum}")]
    InsufficientBalance { balance: U256, minimum: U256 },
    /// A withdrawal is already thawing for the account.
    #[error("escrow thaw in progress: {tokens_thawing} tokens until {thaw_end_timestamp}")]
    ThawInProgress {
        tokens_thawing: U256,
        thaw_end_timestamp: u64,
    },
    #[error("escrow not thawing")]
    NotThawing,
    #[error("escrow still thawing: {now} < {thaw_end_timestamp}")]
    StillThawing { now: u64, thaw_end_timestamp: u64 },
    #[error("escrow balance changed inconsistently: {before} -> {after}, expected -{tokens}")]
    InconsistentCollection {
        before: U256,
        after: U256,
        tokens: U256,
    },
    #[error(transparent)]
    Payments(#[from] PaymentsError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl Classify for EscrowError {
    fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::InconsistentCollection { .. } => ErrorKind::Invariant,
            EscrowError::Payments(err) => err.kind(),
            EscrowError::Token(err) => err.kind(),
            EscrowError::Controller(err) => err.kind(),
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum CollectorError {
    #[error("signer {signer} already authorized by {payer}")]
    SignerAlreadyAuthorized { payer: Address, signer: Address },
    #[error("signer {signer} is not authorized by {payer}")]
    SignerNotAuthorized { payer: Address, signer: Address },
    #[error("signer {0} is not thawing")]
    SignerNotThawing(Address),
    #[error("signer {signer} still thawing: {now} < {thaw_end_timestamp}")]
    SignerStillThawing {
        signer: Address,
        now: u64,
        thaw_end_timestamp: u64,
    },
    #[error("signer proof expired: {deadline} < {now}")]
    SignerProofExpired { deadline: u64, now: u64 },
    #[error("invalid signer proof for {0}")]
    InvalidSignerProof(Address),
    #[error("caller {caller} is not the voucher data service {data_service}")]
    CallerNotDataService { caller: Address, data_service: Address },
    #[error("service provider {service_provider} has no provision with data service {data_service}")]
    UnauthorizedDataService {
        service_provider: Address,
        data_service: Address,
    },
    #[error("invalid voucher signer {0}")]
    InvalidRavSigner(Address),
    /// The voucher does not exceed what was already collected.
    #[error("inconsistent voucher tokens: {tokens_rav} <= {tokens_collected}")]
    InconsistentRavTokens {
        tokens_rav: U256,
        tokens_collected: U256,
    },
    #[error("invalid tokens to collect: {tokens_to_collect} > {tokens_uncollected}")]
    InvalidTokensToCollect {
        tokens_to_collect: U256,
        tokens_uncollected: U256,
    },
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl Classify for CollectorError {
    fn kind(&self) -> ErrorKind {
        match self {
            CollectorError::SignerNotAuthorized { .. }
            | CollectorError::CallerNotDataService { .. }
            | CollectorError::UnauthorizedDataService { .. }
            | CollectorError::InvalidRavSigner(_)
            | CollectorError::InvalidSignerProof(_) => ErrorKind::Authorization,
            CollectorError::Escrow(err) => err.kind(),
            CollectorError::Controller(err) => err.kind(),
            _ => ErrorKind::Validation,
        }
    }
}
