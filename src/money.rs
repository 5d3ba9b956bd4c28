//! Fixed-point money helpers. Every amount is quantized to 2 decimal places,
//! rounding half away from zero.

use rust_decimal::{Decimal, RoundingStrategy};

pub const SCALE: u32 = 2;

/// Quantizes to cents, rounding half-up.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `max(0, subtotal - discount_total)`, quantized.
pub fn payable_total(subtotal: Decimal, discount_total: Decimal) -> Decimal {
    round2((subtotal - discount_total).max(Decimal::ZERO))
}

/// Restricts a discount to `[0, ceiling]`.
pub fn clamp_discount(discount: Decimal, ceiling: Decimal) -> Decimal {
    round2(discount.max(Decimal::ZERO).min(ceiling.max(Decimal::ZERO)))
}
