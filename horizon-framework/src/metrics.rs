use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter_vec, CounterVec, IntCounterVec};

lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

pub struct Metrics {
    /// Transactions by outcome (`committed`, `reverted`) and error kind
    pub transactions: IntCounterVec,
    /// GRT collected, by payment type
    pub tokens_collected: CounterVec,
    /// GRT moved by the reward and slashing paths: `minted`, `slashed`, `burned`
    pub tokens: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        Self {
            transactions: register_int_counter_vec!(
                "horizon_transactions",
                "protocol transactions",
                &["outcome", "kind"]
            )
            .unwrap(),
            tokens_collected: register_counter_vec!(
                "horizon_tokens_collected",
                "GRT collected through the payments layer",
                &["payment_type"]
            )
            .unwrap(),
            tokens: register_counter_vec!(
                "horizon_tokens",
                "GRT minted as rewards, slashed, or burned",
                &["flow"]
            )
            .unwrap(),
        }
    }
}

/// Lossy GRT conversion, for reporting only.
pub fn grt_f64(amount: alloy_primitives::U256) -> f64 {
    let scale = 1e18;
    let whole: u128 = (amount / horizon_common::types::GRT).saturating_to();
    let fraction: u128 = (amount % horizon_common::types::GRT).saturating_to();
    whole as f64 + fraction as f64 / scale
}
