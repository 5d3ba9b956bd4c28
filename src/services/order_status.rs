use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;

/// Work the transition owner must run, in the same transaction that flips
/// the status, when an order enters a new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Convert the order's item count into loyalty stamps
    AccrueLoyalty,
    /// Qualify and reward the referral of the order's customer
    QualifyReferral,
    /// Release promo redemptions held by the order
    ReverseRedemptions,
}

/// Validates if a status transition is allowed
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    match (from, to) {
        (Pending, Confirmed) => true,
        (Pending, Delivered) | (Confirmed, Delivered) => true,
        (Pending, Canceled) | (Confirmed, Canceled) => true,
        _ if from == to => true,
        _ => false,
    }
}

/// Returns the side effects triggered by moving an order from `current` to
/// `next`. Re-entering the current state is a no-op with no side effects,
/// which is what makes the hooks fire at most once per order.
pub fn transition_order(
    current: OrderStatus,
    next: OrderStatus,
) -> Result<Vec<SideEffect>, ServiceError> {
    if !is_valid_transition(current, next) {
        return Err(ServiceError::InvalidStatus(format!(
            "Cannot transition from status '{}' to '{}'",
            current, next
        )));
    }

    if current == next {
        return Ok(Vec::new());
    }

    Ok(match next {
        OrderStatus::Delivered => vec![SideEffect::AccrueLoyalty, SideEffect::QualifyReferral],
        OrderStatus::Canceled => vec![SideEffect::ReverseRedemptions],
        OrderStatus::Pending | OrderStatus::Confirmed => Vec::new(),
    })
}
