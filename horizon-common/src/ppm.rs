//! Parts-per-million fixed-point arithmetic.
//!
//! A PPM value expresses a fraction with a denominator of [`MAX_PPM`], i.e. `1_000_000` is 100%.
//! Every cut, fee and ratio in the protocol is expressed this way.

use alloy_primitives::U256;

/// The PPM denominator, 100%.
pub const MAX_PPM: u32 = 1_000_000;

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum PpmMathError {
    /// The multiplication operands are invalid: `b` is not a valid PPM value, or the product
    /// does not fit in 256 bits.
    #[error("invalid PPM multiplication: {a} * {b}")]
    InvalidMulPpm { a: U256, b: U256 },
    /// The value is not a valid PPM value.
    #[error("invalid PPM value: {0}")]
    InvalidPpm(U256),
}

/// Returns whether `value` is a valid PPM value, i.e. it is not greater than [`MAX_PPM`].
#[inline]
pub fn is_valid_ppm(value: U256) -> bool {
    value <= U256::from(MAX_PPM)
}

/// Multiplies `a` by the PPM value `b`, rounding down.
///
/// Fails if `b` is not a valid PPM value or if `a * b` overflows. Callers are expected to bound
/// `a` themselves, the function never clamps.
pub fn mul_ppm(a: U256, b: U256) -> Result<U256, PpmMathError> {
    if !is_valid_ppm(b) {
        return Err(PpmMathError::InvalidMulPpm { a, b });
    }
    let product = a
        .checked_mul(b)
        .ok_or(PpmMathError::InvalidMulPpm { a, b })?;
    Ok(product / U256::from(MAX_PPM))
}

/// Multiplies `a` by the PPM value `b`, rounding up.
///
/// Computed as the complement of [`mul_ppm`]: `a - mul_ppm(a, MAX_PPM - b)`.
pub fn mul_ppm_round_up(a: U256, b: U256) -> Result<U256, PpmMathError> {
    if !is_valid_ppm(b) {
        return Err(PpmMathError::InvalidPpm(b));
    }
    let complement = mul_ppm(a, U256::from(MAX_PPM) - b)?;
    Ok(a - complement)
}
