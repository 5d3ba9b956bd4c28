use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why an incentive was not applied. These are expected outcomes, not faults.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    PromoNotFound,
    PromoInactive,
    NotEligible,
    MinOrderNotMet,
    PromoLimitReached,
    UserLimitReached,
    RefCodeNotFound,
    SelfReferral,
    AlreadyReferred,
    VoucherNotFound,
    VoucherNotAvailable,
    VoucherExpired,
    EmptyOrder,
}

/// Result of an incentive operation: `{ok, reason, discount}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncentiveOutcome {
    pub ok: bool,
    pub reason: Option<RejectionReason>,
    pub discount: Decimal,
}

impl IncentiveOutcome {
    pub fn applied(discount: Decimal) -> Self {
        Self {
            ok: true,
            reason: None,
            discount,
        }
    }

    /// Successful operation that carries no amount (referral attribution).
    pub fn accepted() -> Self {
        Self::applied(Decimal::ZERO)
    }

    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            discount: Decimal::ZERO,
        }
    }
}

impl From<RejectionReason> for IncentiveOutcome {
    fn from(reason: RejectionReason) -> Self {
        Self::rejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reasons_use_wire_codes() {
        assert_eq!(RejectionReason::MinOrderNotMet.to_string(), "MIN_ORDER_NOT_MET");
        assert_eq!(RejectionReason::RefCodeNotFound.as_ref(), "REF_CODE_NOT_FOUND");
        assert_eq!(
            serde_json::to_value(RejectionReason::VoucherNotAvailable).unwrap(),
            serde_json::json!("VOUCHER_NOT_AVAILABLE")
        );
    }

    #[test]
    fn rejected_outcome_has_no_discount() {
        let outcome = IncentiveOutcome::from(RejectionReason::EmptyOrder);
        assert!(!outcome.ok);
        assert_eq!(outcome.reason, Some(RejectionReason::EmptyOrder));
        assert_eq!(outcome.discount, Decimal::ZERO);
    }

    #[test]
    fn outcome_serializes_as_flat_object() {
        let json = serde_json::to_value(IncentiveOutcome::applied(dec!(12.50))).unwrap();
        assert_eq!(json["ok"], true);
        assert!(json["reason"].is_null());
        assert_eq!(json["discount"], "12.50");
    }
}
