use std::fmt;

use serde::{Deserialize, Serialize};

pub use self::tokens::{grt, FIXED_POINT_SCALING_FACTOR, GRT};

mod tokens;

/// The kinds of payments routed through the protocol.
///
/// Delegation fee cuts are configured per payment type.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    QueryFee,
    IndexingFee,
    IndexingRewards,
}

impl PaymentType {
    pub const ALL: [PaymentType; 3] = [
        PaymentType::QueryFee,
        PaymentType::IndexingFee,
        PaymentType::IndexingRewards,
    ];
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentType::QueryFee => "query_fee",
            PaymentType::IndexingFee => "indexing_fee",
            PaymentType::IndexingRewards => "indexing_rewards",
        };
        f.write_str(name)
    }
}
