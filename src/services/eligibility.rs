//! Pure promotion eligibility rules. No I/O: callers load the promotion,
//! the customer's paid-order history and the usage counters first.

use crate::entities::promotion::{Model as PromotionModel, PromotionType, Segment};
use crate::money::{clamp_discount, round2};
use crate::services::outcome::RejectionReason;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

/// Paid-order history of a registered customer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CustomerHistory {
    pub paid_orders: u64,
    pub last_paid_at: Option<DateTime<Utc>>,
}

/// APPLIED redemptions counted against the promotion's caps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub total: u64,
    pub by_user: u64,
}

#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub now: DateTime<Utc>,
    pub subtotal: Decimal,
    /// `None` for guests, who only qualify for `ALL` promotions
    pub history: Option<CustomerHistory>,
    pub usage: UsageCounts,
    pub inactive_segment_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: Option<RejectionReason>,
    pub discount_amount: Decimal,
}

impl Eligibility {
    fn eligible(discount_amount: Decimal) -> Self {
        Self {
            eligible: true,
            reason: None,
            discount_amount,
        }
    }

    fn rejected(reason: RejectionReason) -> Self {
        debug!(reason = %reason, "promotion not eligible");
        Self {
            eligible: false,
            reason: Some(reason),
            discount_amount: Decimal::ZERO,
        }
    }
}

/// Runs the checks in order and stops at the first failure:
/// window/active, segment, minimum order, global cap, per-user cap.
pub fn evaluate(promotion: &PromotionModel, ctx: &EvaluationContext) -> Eligibility {
    if !promotion.is_live_at(ctx.now) {
        return Eligibility::rejected(RejectionReason::PromoInactive);
    }

    if !segment_matches(
        promotion.segment,
        ctx.history.as_ref(),
        ctx.now,
        ctx.inactive_segment_days,
    ) {
        return Eligibility::rejected(RejectionReason::NotEligible);
    }

    if let Some(min_amount) = promotion.min_order_amount {
        if ctx.subtotal < min_amount {
            return Eligibility::rejected(RejectionReason::MinOrderNotMet);
        }
    }

    if let Some(limit) = promotion.usage_limit_total {
        if ctx.usage.total >= limit.max(0) as u64 {
            return Eligibility::rejected(RejectionReason::PromoLimitReached);
        }
    }

    if let (Some(limit), Some(_)) = (promotion.usage_limit_per_user, ctx.history.as_ref()) {
        if ctx.usage.by_user >= limit.max(0) as u64 {
            return Eligibility::rejected(RejectionReason::UserLimitReached);
        }
    }

    Eligibility::eligible(compute_discount(
        promotion.promo_type,
        promotion.value,
        promotion.max_discount_amount,
        ctx.subtotal,
    ))
}

pub fn segment_matches(
    segment: Segment,
    history: Option<&CustomerHistory>,
    now: DateTime<Utc>,
    inactive_days: i64,
) -> bool {
    match (segment, history) {
        (Segment::All, _) => true,
        (_, None) => false,
        (Segment::New, Some(history)) => history.paid_orders == 0,
        (Segment::Inactive30d, Some(history)) => match history.last_paid_at {
            None => true,
            Some(last) => now - last >= Duration::days(inactive_days),
        },
    }
}

/// Candidate discount clamped to `[0, min(cap, subtotal)]`.
pub fn compute_discount(
    promo_type: PromotionType,
    value: Decimal,
    max_discount: Option<Decimal>,
    subtotal: Decimal,
) -> Decimal {
    let raw = match promo_type {
        PromotionType::Percent => round2(subtotal * value / Decimal::ONE_HUNDRED),
        PromotionType::FixedAmount => value,
        PromotionType::FreeItem => Decimal::ZERO,
    };

    let ceiling = match max_discount {
        Some(cap) => cap.min(subtotal),
        None => subtotal,
    };

    clamp_discount(raw, ceiling)
}
