use alloy_primitives::{Address, U256};

use crate::controller::ContractName;

/// The error taxonomy every protocol error maps into.
///
/// Off-chain tooling uses it to tell apart bad input from missing permissions and from
/// deployment mistakes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid parameters or insufficient balances. The caller can fix the input.
    Validation,
    /// The caller is not allowed to perform the operation.
    Authorization,
    /// The protocol is misconfigured, e.g. a dependency is not registered.
    Configuration,
    /// An internal accounting invariant does not hold.
    Invariant,
}

/// Classify an error into an [`ErrorKind`].
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ControllerError {
    #[error("caller {0} is not the governor")]
    NotGovernor(Address),
    #[error("caller {0} is not the pending governor")]
    NotPendingGovernor(Address),
    #[error("caller {0} is neither the governor nor the pause guardian")]
    NotPauseAuthority(Address),
    #[error("caller {caller} is not the registered {expected}")]
    UnauthorizedCaller {
        caller: Address,
        expected: ContractName,
    },
    #[error("contract not registered: {0}")]
    ContractNotRegistered(ContractName),
    #[error("invalid zero address for {0}")]
    InvalidZeroAddress(&'static str),
    #[error("protocol is paused")]
    Paused,
    #[error("protocol is partially paused")]
    PartialPaused,
}

impl Classify for ControllerError {
    fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::NotGovernor(_)
            | ControllerError::NotPendingGovernor(_)
            | ControllerError::NotPauseAuthority(_)
            | ControllerError::UnauthorizedCaller { .. } => ErrorKind::Authorization,
            ControllerError::ContractNotRegistered(_) => ErrorKind::Configuration,
            ControllerError::InvalidZeroAddress(_)
            | ControllerError::Paused
            | ControllerError::PartialPaused => ErrorKind::Validation,
        }
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient balance for {account}: {balance} < {needed}")]
    InsufficientBalance {
        account: Address,
        balance: U256,
        needed: U256,
    },
    #[error("insufficient allowance from {owner} to {spender}: {allowance} < {needed}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: U256,
        needed: U256,
    },
    #[error("caller {0} is not a minter")]
    NotMinter(Address),
    #[error("total supply overflow")]
    SupplyOverflow,
    #[error("invalid zero address for {0}")]
    InvalidZeroAddress(&'static str),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl Classify for TokenError {
    fn kind(&self) -> ErrorKind {
        match self {
            TokenError::NotMinter(_) => ErrorKind::Authorization,
            TokenError::SupplyOverflow => ErrorKind::Invariant,
            TokenError::Controller(err) => err.kind(),
            TokenError::InsufficientBalance { .. }
            | TokenError::InsufficientAllowance { .. }
            | TokenError::InvalidZeroAddress(_) => ErrorKind::Validation,
        }
    }
}
