//! Exact Q64.96 price math for valuing token amounts in the quote token.

use super::ProcessError;
use crate::domain::{Amount, PoolMetadata, QuoteToken};

/// `sqrtPriceX96^2 / 2^192` is the raw token1-per-token0 price.
const Q192_BITS: u32 = 192;

/// Value `(amount0, amount1)` in raw quote-token units at `sqrt_price_x96`.
///
/// The base-token leg is converted with a single floor division so the result
/// is reproducible bit for bit.
pub fn value_in_quote(
    amount0: &Amount,
    amount1: &Amount,
    sqrt_price_x96: &Amount,
    quote: QuoteToken,
) -> Result<Amount, ProcessError> {
    let q192 = Amount::pow2(Q192_BITS);
    let price_sq = sqrt_price_x96 * sqrt_price_x96;

    match quote {
        QuoteToken::Token1 => {
            let base_value = amount0
                .mul_div_floor(&price_sq, &q192)
                .ok_or_else(|| ProcessError::Division("Q192 denominator".to_string()))?;
            Ok(amount1 + &base_value)
        }
        QuoteToken::Token0 => {
            if amount1.is_zero() {
                return Ok(amount0.clone());
            }
            let base_value = amount1.mul_div_floor(&q192, &price_sq).ok_or_else(|| {
                ProcessError::Division("sqrtPriceX96 is zero; cannot value token1".to_string())
            })?;
            Ok(amount0 + &base_value)
        }
    }
}

/// Raw quote units paid for one whole base token (`10^base_decimals` raw units).
pub fn pool_price(sqrt_price_x96: &Amount, pool: &PoolMetadata) -> Result<Amount, ProcessError> {
    let one_base = Amount::pow10(pool.base().decimals);
    match pool.quote_token {
        QuoteToken::Token1 => value_in_quote(&one_base, &Amount::zero(), sqrt_price_x96, QuoteToken::Token1),
        QuoteToken::Token0 => value_in_quote(&Amount::zero(), &one_base, sqrt_price_x96, QuoteToken::Token0),
    }
}
