use horizon_common::{linked_list::LinkedListError, ppm::PpmMathError};
pub use horizon_framework::errors::{Classify, ErrorKind};
use horizon_framework::errors::{ControllerError, TokenError};

use crate::{
    config::ConfigError,
    curation::CurationError,
    data_service::DataServiceError,
    payments::{CollectorError, EscrowError, PaymentsError, SignatureError},
    rewards::RewardsError,
    staking::StakingError,
    subgraph_service::SubgraphServiceError,
};

/// Any error a protocol transaction can fail with.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    PpmMath(#[from] PpmMathError),
    #[error(transparent)]
    LinkedList(#[from] LinkedListError),
    #[error(transparent)]
    Staking(#[from] StakingError),
    #[error(transparent)]
    DataService(#[from] DataServiceError),
    #[error(transparent)]
    Curation(#[from] CurationError),
    #[error(transparent)]
    Rewards(#[from] RewardsError),
    #[error(transparent)]
    Payments(#[from] PaymentsError),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    SubgraphService(#[from] SubgraphServiceError),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Controller(err) => err.kind(),
            Error::Token(err) => err.kind(),
            Error::PpmMath(_) | Error::Signature(_) | Error::LinkedList(_) => ErrorKind::Validation,
            Error::Staking(err) => err.kind(),
            Error::DataService(err) => err.kind(),
            Error::Curation(err) => err.kind(),
            Error::Rewards(err) => err.kind(),
            Error::Payments(err) => err.kind(),
            Error::Escrow(err) => err.kind(),
            Error::Collector(err) => err.kind(),
            Error::SubgraphService(err) => err.kind(),
        }
    }
}

impl Error {
    /// A short label for the error kind, used in logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Invariant => "invariant",
        }
    }
}
