pub mod config;
pub mod context;
pub mod controller;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod token;
