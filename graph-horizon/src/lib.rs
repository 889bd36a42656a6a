pub mod config;
pub mod curation;
pub mod data_service;
pub mod errors;
pub mod payments;
pub mod protocol;
pub mod rewards;
pub mod scenario;
pub mod staking;
pub mod subgraph_service;
