mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{assert_total_consistent, TestApp};
use resto_incentives::{
    entities::{
        order::OrderStatus,
        promotion::{PromotionType, Segment},
        promotion_redemption::RedemptionStatus,
    },
    errors::ServiceError,
    identity::Identity,
    money::round2,
    services::{outcome::RejectionReason, promotions::RequestFingerprint},
};
use rust_decimal_macros::dec;
use std::collections::HashSet;
use uuid::Uuid;

fn no_fingerprint() -> RequestFingerprint {
    RequestFingerprint::default()
}

#[tokio::test]
async fn percent_promo_discounts_the_order() {
    let app = TestApp::new().await;
    app.seed_promotion("TENOFF", PromotionType::Percent, dec!(10), |_| {})
        .await;
    let user = Uuid::new_v4();
    let order = app.place_simple_order(user, dec!(5000)).await;

    let outcome = app
        .state
        .pipeline
        .apply_promo(&Identity::user(user), order.id, " tenoff ", &no_fingerprint())
        .await
        .unwrap();

    assert!(outcome.ok);
    assert_eq!(outcome.discount, dec!(500.00));
    let order = app.fetch_order(order.id).await;
    assert_eq!(round2(order.total), dec!(4500.00));
    assert_eq!(order.promo_code.as_deref(), Some("TENOFF"));
    assert_total_consistent(&order);
}

#[tokio::test]
async fn percent_promo_respects_cap() {
    let app = TestApp::new().await;
    app.seed_promotion("CAPPED", PromotionType::Percent, dec!(10), |p| {
        p.max_discount_amount = Some(dec!(300));
    })
    .await;
    let user = Uuid::new_v4();
    let order = app.place_simple_order(user, dec!(5000)).await;

    let outcome = app
        .state
        .pipeline
        .apply_promo(&Identity::user(user), order.id, "CAPPED", &no_fingerprint())
        .await
        .unwrap();

    assert_eq!(outcome.discount, dec!(300.00));
    assert_eq!(round2(app.fetch_order(order.id).await.total), dec!(4700.00));
}

#[tokio::test]
async fn second_code_supersedes_the_first() {
    let app = TestApp::new().await;
    app.seed_promotion("FIRST", PromotionType::FixedAmount, dec!(200), |_| {})
        .await;
    app.seed_promotion("SECOND", PromotionType::FixedAmount, dec!(700), |_| {})
        .await;
    let user = Uuid::new_v4();
    let identity = Identity::user(user);
    let order = app.place_simple_order(user, dec!(3000)).await;

    for code in ["FIRST", "SECOND"] {
        let outcome = app
            .state
            .pipeline
            .apply_promo(&identity, order.id, code, &no_fingerprint())
            .await
            .unwrap();
        assert!(outcome.ok, "{} should apply", code);
    }

    let redemptions = app
        .state
        .pipeline
        .promotions
        .redemptions_for_order(order.id)
        .await
        .unwrap();
    let applied: Vec<_> = redemptions
        .iter()
        .filter(|r| r.status == RedemptionStatus::Applied)
        .collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(round2(applied[0].discount_amount), dec!(700.00));
    assert_eq!(
        redemptions
            .iter()
            .filter(|r| r.status == RedemptionStatus::Cancelled)
            .count(),
        1
    );

    let order = app.fetch_order(order.id).await;
    assert_eq!(round2(order.total), dec!(2300.00));
    assert_eq!(order.promo_code.as_deref(), Some("SECOND"));
    assert_total_consistent(&order);
}

#[tokio::test]
async fn reapplying_the_same_code_does_not_stack() {
    let app = TestApp::new().await;
    app.seed_promotion("ONCE", PromotionType::FixedAmount, dec!(250), |p| {
        p.usage_limit_per_user = Some(1);
    })
    .await;
    let user = Uuid::new_v4();
    let identity = Identity::user(user);
    let order = app.place_simple_order(user, dec!(1000)).await;

    for _ in 0..2 {
        let outcome = app
            .state
            .pipeline
            .apply_promo(&identity, order.id, "ONCE", &no_fingerprint())
            .await
            .unwrap();
        assert!(outcome.ok);
    }

    let order = app.fetch_order(order.id).await;
    assert_eq!(round2(order.discount_total), dec!(250.00));
    assert_eq!(round2(order.total), dec!(750.00));
}

#[tokio::test]
async fn per_user_limit_blocks_second_order() {
    let app = TestApp::new().await;
    app.seed_promotion("WELCOME", PromotionType::FixedAmount, dec!(100), |p| {
        p.usage_limit_per_user = Some(1);
    })
    .await;
    let user = Uuid::new_v4();
    let identity = Identity::user(user);

    let first = app.place_simple_order(user, dec!(1000)).await;
    let second = app.place_simple_order(user, dec!(1000)).await;

    let ok = app
        .state
        .pipeline
        .apply_promo(&identity, first.id, "WELCOME", &no_fingerprint())
        .await
        .unwrap();
    assert!(ok.ok);

    let rejected = app
        .state
        .pipeline
        .apply_promo(&identity, second.id, "WELCOME", &no_fingerprint())
        .await
        .unwrap();
    assert!(!rejected.ok);
    assert_eq!(rejected.reason, Some(RejectionReason::UserLimitReached));

    let untouched = app.fetch_order(second.id).await;
    assert_eq!(round2(untouched.total), dec!(1000.00));
    assert!(untouched.promo_code.is_none());
}

#[tokio::test]
async fn global_limit_counts_other_users() {
    let app = TestApp::new().await;
    app.seed_promotion("FIRST100", PromotionType::FixedAmount, dec!(50), |p| {
        p.usage_limit_total = Some(1);
    })
    .await;

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let alice_order = app.place_simple_order(alice, dec!(500)).await;
    let bob_order = app.place_simple_order(bob, dec!(500)).await;

    let ok = app
        .state
        .pipeline
        .apply_promo(&Identity::user(alice), alice_order.id, "FIRST100", &no_fingerprint())
        .await
        .unwrap();
    assert!(ok.ok);

    let rejected = app
        .state
        .pipeline
        .apply_promo(&Identity::user(bob), bob_order.id, "FIRST100", &no_fingerprint())
        .await
        .unwrap();
    assert_eq!(rejected.reason, Some(RejectionReason::PromoLimitReached));
}

#[tokio::test]
async fn rejections_leave_the_order_unchanged() {
    let app = TestApp::new().await;
    app.seed_promotion("BIGSPEND", PromotionType::FixedAmount, dec!(100), |p| {
        p.min_order_amount = Some(dec!(10000));
    })
    .await;
    app.seed_promotion("EXPIRED", PromotionType::FixedAmount, dec!(100), |p| {
        p.end_at = Some(Utc::now() - Duration::days(1));
        p.start_at = Some(Utc::now() - Duration::days(10));
    })
    .await;
    let user = Uuid::new_v4();
    let identity = Identity::user(user);
    let order = app.place_simple_order(user, dec!(2000)).await;

    let cases = [
        ("NOPE", RejectionReason::PromoNotFound),
        ("BIGSPEND", RejectionReason::MinOrderNotMet),
        ("EXPIRED", RejectionReason::PromoInactive),
    ];
    for (code, reason) in cases {
        let outcome = app
            .state
            .pipeline
            .apply_promo(&identity, order.id, code, &no_fingerprint())
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.reason, Some(reason), "code {}", code);
        assert_eq!(outcome.discount, dec!(0));
    }

    let order = app.fetch_order(order.id).await;
    assert_eq!(round2(order.total), dec!(2000.00));
    assert_total_consistent(&order);
}

#[tokio::test]
async fn new_customer_segment_requires_no_paid_orders() {
    let app = TestApp::new().await;
    app.seed_promotion("NEWBIE", PromotionType::Percent, dec!(20), |p| {
        p.segment = Segment::New;
    })
    .await;
    let regular = Uuid::new_v4();
    app.delivered_order(regular, dec!(800), None).await;
    let order = app.place_simple_order(regular, dec!(1000)).await;

    let outcome = app
        .state
        .pipeline
        .apply_promo(&Identity::user(regular), order.id, "NEWBIE", &no_fingerprint())
        .await
        .unwrap();
    assert_eq!(outcome.reason, Some(RejectionReason::NotEligible));

    let newcomer = Uuid::new_v4();
    let order = app.place_simple_order(newcomer, dec!(1000)).await;
    let outcome = app
        .state
        .pipeline
        .apply_promo(&Identity::user(newcomer), order.id, "NEWBIE", &no_fingerprint())
        .await
        .unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.discount, dec!(200.00));
}

#[tokio::test]
async fn inactive_segment_targets_lapsed_customers() {
    let app = TestApp::new().await;
    app.seed_promotion("COMEBACK", PromotionType::FixedAmount, dec!(300), |p| {
        p.segment = Segment::Inactive30d;
    })
    .await;

    let lapsed = Uuid::new_v4();
    app.delivered_order(lapsed, dec!(900), Some(Utc::now() - Duration::days(45)))
        .await;
    let recent = Uuid::new_v4();
    app.delivered_order(recent, dec!(900), Some(Utc::now() - Duration::days(3)))
        .await;

    let lapsed_order = app.place_simple_order(lapsed, dec!(1500)).await;
    let recent_order = app.place_simple_order(recent, dec!(1500)).await;

    let ok = app
        .state
        .pipeline
        .apply_promo(&Identity::user(lapsed), lapsed_order.id, "COMEBACK", &no_fingerprint())
        .await
        .unwrap();
    assert!(ok.ok);

    let rejected = app
        .state
        .pipeline
        .apply_promo(&Identity::user(recent), recent_order.id, "COMEBACK", &no_fingerprint())
        .await
        .unwrap();
    assert_eq!(rejected.reason, Some(RejectionReason::NotEligible));
}

#[tokio::test]
async fn fixed_amount_larger_than_subtotal_zeroes_the_total() {
    let app = TestApp::new().await;
    app.seed_promotion("HUGE", PromotionType::FixedAmount, dec!(99999), |_| {})
        .await;
    let user = Uuid::new_v4();
    let order = app.place_simple_order(user, dec!(450)).await;

    let outcome = app
        .state
        .pipeline
        .apply_promo(&Identity::user(user), order.id, "HUGE", &no_fingerprint())
        .await
        .unwrap();
    assert_eq!(outcome.discount, dec!(450.00));

    let order = app.fetch_order(order.id).await;
    assert_eq!(round2(order.total), dec!(0.00));
    assert_total_consistent(&order);
}

#[tokio::test]
async fn remove_promo_restores_full_price() {
    let app = TestApp::new().await;
    app.seed_promotion("SAVE", PromotionType::FixedAmount, dec!(120), |_| {})
        .await;
    let user = Uuid::new_v4();
    let identity = Identity::user(user);
    let order = app.place_simple_order(user, dec!(1000)).await;

    app.state
        .pipeline
        .apply_promo(&identity, order.id, "SAVE", &no_fingerprint())
        .await
        .unwrap();
    let order = app.state.pipeline.remove_promo(&identity, order.id).await.unwrap();

    assert!(order.promo_code.is_none());
    assert_eq!(round2(order.total), dec!(1000.00));
    let redemptions = app
        .state
        .pipeline
        .promotions
        .redemptions_for_order(order.id)
        .await
        .unwrap();
    assert!(redemptions
        .iter()
        .all(|r| r.status == RedemptionStatus::Cancelled));
}

#[tokio::test]
async fn promos_need_a_pending_order_owned_by_the_caller() {
    let app = TestApp::new().await;
    app.seed_promotion("SAVE", PromotionType::FixedAmount, dec!(120), |_| {})
        .await;
    let owner = Uuid::new_v4();
    let order = app.place_simple_order(owner, dec!(1000)).await;

    let stranger = app
        .state
        .pipeline
        .apply_promo(&Identity::user(Uuid::new_v4()), order.id, "SAVE", &no_fingerprint())
        .await;
    assert_matches!(stranger, Err(ServiceError::NotFound(_)));

    let guest = app
        .state
        .pipeline
        .apply_promo(&Identity::guest(), order.id, "SAVE", &no_fingerprint())
        .await;
    assert_matches!(guest, Err(ServiceError::Unauthorized(_)));

    app.state.pipeline.confirm(order.id).await.unwrap();
    let confirmed = app
        .state
        .pipeline
        .apply_promo(&Identity::user(owner), order.id, "SAVE", &no_fingerprint())
        .await;
    assert_matches!(confirmed, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn cancellation_releases_usage_caps() {
    let app = TestApp::new().await;
    app.seed_promotion("ONEUSE", PromotionType::FixedAmount, dec!(100), |p| {
        p.usage_limit_per_user = Some(1);
    })
    .await;
    let user = Uuid::new_v4();
    let identity = Identity::user(user);
    let first = app.place_simple_order(user, dec!(800)).await;

    app.state
        .pipeline
        .apply_promo(&identity, first.id, "ONEUSE", &no_fingerprint())
        .await
        .unwrap();
    let result = app.state.pipeline.cancel(first.id).await.unwrap();
    assert_eq!(result.order.status, OrderStatus::Canceled);
    assert_eq!(result.redemptions_reversed, 1);

    let second = app.place_simple_order(user, dec!(800)).await;
    let outcome = app
        .state
        .pipeline
        .apply_promo(&identity, second.id, "ONEUSE", &no_fingerprint())
        .await
        .unwrap();
    assert!(outcome.ok);
}

#[tokio::test]
async fn fingerprint_is_recorded_on_the_redemption() {
    let app = TestApp::new().await;
    app.seed_promotion("TRACK", PromotionType::FixedAmount, dec!(10), |_| {})
        .await;
    let user = Uuid::new_v4();
    let order = app.place_simple_order(user, dec!(100)).await;

    let fingerprint = RequestFingerprint {
        device_id: Some("device-42".into()),
        ip_hash: Some("abc123".into()),
    };
    app.state
        .pipeline
        .apply_promo(&Identity::user(user), order.id, "TRACK", &fingerprint)
        .await
        .unwrap();

    let redemptions = app
        .state
        .pipeline
        .promotions
        .redemptions_for_order(order.id)
        .await
        .unwrap();
    assert_eq!(redemptions[0].device_id.as_deref(), Some("device-42"));
    assert_eq!(redemptions[0].ip_hash.as_deref(), Some("abc123"));
    assert_eq!(redemptions[0].user_id, user);
}

#[tokio::test]
async fn concurrent_applications_leave_one_applied_redemption() {
    let app = TestApp::concurrent().await;
    let codes = ["RACE100", "RACE200", "RACE300", "RACE400"];
    for (i, code) in codes.iter().enumerate() {
        let value = dec!(100) * rust_decimal::Decimal::from(i as u32 + 1);
        app.seed_promotion(code, PromotionType::FixedAmount, value, |_| {})
            .await;
    }
    let user = Uuid::new_v4();
    let order = app.place_simple_order(user, dec!(3000)).await;

    let mut handles = Vec::new();
    for code in codes {
        let pipeline = app.state.pipeline.clone();
        let order_id = order.id;
        handles.push(tokio::spawn(async move {
            pipeline
                .apply_promo(&Identity::user(user), order_id, code, &RequestFingerprint::default())
                .await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.ok);
    }

    let redemptions = app
        .state
        .pipeline
        .promotions
        .redemptions_for_order(order.id)
        .await
        .unwrap();
    assert_eq!(redemptions.len(), codes.len());
    let applied: Vec<_> = redemptions
        .iter()
        .filter(|r| r.status == RedemptionStatus::Applied)
        .collect();
    assert_eq!(applied.len(), 1);
    let distinct: HashSet<_> = redemptions.iter().map(|r| r.promotion_id).collect();
    assert_eq!(distinct.len(), codes.len());

    let stored = app.fetch_order(order.id).await;
    assert_total_consistent(&stored);
    assert_eq!(round2(stored.discount_total), round2(applied[0].discount_amount));
    assert_eq!(
        round2(stored.total),
        round2(stored.subtotal) - round2(applied[0].discount_amount)
    );
}

#[tokio::test]
async fn deactivated_promotion_is_rejected_until_switched_back_on() {
    let app = TestApp::new().await;
    let promotion = app
        .seed_promotion("PAUSED", PromotionType::FixedAmount, dec!(250), |_| {})
        .await;
    let user = Uuid::new_v4();
    let identity = Identity::user(user);
    let order = app.place_simple_order(user, dec!(2000)).await;

    let paused = app
        .state
        .pipeline
        .promotions
        .set_active(promotion.id, false)
        .await
        .unwrap();
    assert!(!paused.is_active);

    let outcome = app
        .state
        .pipeline
        .apply_promo(&identity, order.id, "PAUSED", &no_fingerprint())
        .await
        .unwrap();
    assert_eq!(outcome.reason, Some(RejectionReason::PromoInactive));
    assert_eq!(round2(app.fetch_order(order.id).await.total), dec!(2000.00));

    app.state
        .pipeline
        .promotions
        .set_active(promotion.id, true)
        .await
        .unwrap();
    let outcome = app
        .state
        .pipeline
        .apply_promo(&identity, order.id, "PAUSED", &no_fingerprint())
        .await
        .unwrap();
    assert!(outcome.ok);
    assert_eq!(round2(app.fetch_order(order.id).await.total), dec!(1750.00));

    let missing = app
        .state
        .pipeline
        .promotions
        .set_active(Uuid::new_v4(), false)
        .await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));
}
