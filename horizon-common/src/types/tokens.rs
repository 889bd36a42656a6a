use alloy_primitives::U256;

/// One GRT, i.e. `10^18` base units.
pub const GRT: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Fixed point scaling factor used by the reward accumulators.
pub const FIXED_POINT_SCALING_FACTOR: U256 = GRT;

/// Convert a whole number of GRT into base units.
pub fn grt(amount: u64) -> U256 {
    U256::from(amount) * GRT
}
