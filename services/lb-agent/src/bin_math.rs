//! Liquidity-Book bin pricing
//!
//! Price of bin `id` is `(1 + bin_step / 10_000)^(id - 2^23)`, in raw
//! token-Y per raw token-X.

use rust_decimal::MathematicalOps;
use rust_decimal::Decimal;

use crate::amount::to_decimal;
use crate::types::BinId;

/// Bin id whose price is exactly 1
pub const ID_OFFSET: i32 = 1 << 23;

const BASIS_POINT_MAX: u32 = 10_000;

fn base(bin_step: u16) -> Decimal {
    Decimal::ONE + Decimal::from(bin_step) / Decimal::from(BASIS_POINT_MAX)
}

fn pow_signed(base: Decimal, exp: i64) -> Option<Decimal> {
    let magnitude = base.checked_powi(exp.unsigned_abs() as i64)?;
    if exp >= 0 {
        Some(magnitude)
    } else {
        Decimal::ONE.checked_div(magnitude)
    }
}

/// Absolute Liquidity-Book price of a bin; `None` when not representable
pub fn price_from_id(bin: BinId, bin_step: u16) -> Option<Decimal> {
    pow_signed(base(bin_step), bin.0 as i64 - ID_OFFSET as i64)
}

/// Price of `bin` given a known price at `anchor`
pub fn price_relative(
    bin: BinId,
    anchor: BinId,
    anchor_price: Decimal,
    bin_step: u16,
) -> Option<Decimal> {
    let factor = pow_signed(base(bin_step), bin.0 as i64 - anchor.0 as i64)?;
    anchor_price.checked_mul(factor)
}

/// Value of (x, y) denominated in raw token-Y
pub fn value_in_y(x: u128, y: u128, price: Decimal) -> Option<Decimal> {
    to_decimal(x)?.checked_mul(price)?.checked_add(to_decimal(y)?)
}
