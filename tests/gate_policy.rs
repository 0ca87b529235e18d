//! End-to-end checks of the access policy and the pure validation helpers
//! the handlers are built on.

use chrono::{Duration, Utc};
use classment_server::db::models::Coupon;
use classment_server::gate::{GateDecision, GateSnapshot, evaluate, landing_path};
use classment_server::routes::coupons::{RedeemPlan, coupon_rejection, redeem_plan};
use classment_server::routes::webhook::signature_matches;
use uuid::Uuid;

fn snapshot(
    has_session: bool,
    has_phone_number: bool,
    is_counselor: bool,
    atp_done: bool,
    payment_done: bool,
) -> GateSnapshot {
    GateSnapshot {
        has_session,
        has_phone_number,
        is_counselor,
        atp_done,
        payment_done,
    }
}

const GATED_PATHS: &[&str] = &[
    "/app-to-tap",
    "/coupon",
    "/payments",
    "/report",
    "/assessment",
    "/jobs",
    "/externship",
    "/explorer-graph",
    "/counselor/dashboard",
];

#[test]
fn anonymous_navigation_always_lands_on_login() {
    let anon = snapshot(false, false, false, false, false);
    for path in GATED_PATHS {
        assert_eq!(
            evaluate(&anon, path),
            GateDecision::Redirect("/login"),
            "anonymous user should not reach {path}"
        );
    }
    assert_eq!(evaluate(&anon, "/"), GateDecision::Allow);
    assert_eq!(evaluate(&anon, "/login"), GateDecision::Allow);
}

#[test]
fn student_onboarding_progression() {
    // Fresh student: assessment first.
    let fresh = snapshot(true, true, false, false, false);
    for path in GATED_PATHS.iter().filter(|p| **p != "/app-to-tap") {
        assert_eq!(evaluate(&fresh, path), GateDecision::Redirect("/app-to-tap"));
    }
    assert_eq!(evaluate(&fresh, "/app-to-tap"), GateDecision::Allow);

    // Assessment done: the three payment-stage paths open up, nothing else.
    let paying = snapshot(true, true, false, true, false);
    for path in GATED_PATHS {
        let expected = if ["/app-to-tap", "/coupon", "/payments"].contains(path) {
            GateDecision::Allow
        } else {
            GateDecision::Redirect("/coupon")
        };
        assert_eq!(evaluate(&paying, path), expected, "path {path}");
    }

    // Paid: everything student-side opens.
    let done = snapshot(true, true, false, true, true);
    for path in GATED_PATHS.iter().filter(|p| !p.starts_with("/counselor")) {
        assert_eq!(evaluate(&done, path), GateDecision::Allow, "path {path}");
    }
}

#[test]
fn landing_paths_track_the_same_progression() {
    assert_eq!(landing_path(&snapshot(true, false, false, false, false)), "/phone");
    assert_eq!(landing_path(&snapshot(true, true, false, false, false)), "/app-to-tap");
    assert_eq!(landing_path(&snapshot(true, true, false, true, false)), "/coupon");
    assert_eq!(landing_path(&snapshot(true, true, false, true, true)), "/");
    assert_eq!(
        landing_path(&snapshot(true, true, true, false, false)),
        "/counselor/dashboard"
    );
}

#[test]
fn phone_capture_is_enforced_server_side() {
    let no_phone = snapshot(true, false, false, true, true);
    assert_eq!(evaluate(&no_phone, "/phone"), GateDecision::Allow);
    for path in GATED_PATHS {
        assert_eq!(evaluate(&no_phone, path), GateDecision::Redirect("/phone"));
    }
}

fn coupon(uses: i32, max_uses: Option<i32>, expired: bool) -> Coupon {
    Coupon {
        id: Uuid::new_v4(),
        code: "NAIROBI".to_string(),
        discount_type: "fixed".to_string(),
        discount_value: 100,
        uses,
        max_uses,
        expires_at: expired.then(|| Utc::now() - Duration::days(1)),
        created_at: Utc::now(),
    }
}

#[test]
fn coupon_limit_and_expiry_reject_singly_and_combined() {
    let now = Utc::now();
    assert!(coupon_rejection(&coupon(0, None, false), now).is_none());
    assert!(coupon_rejection(&coupon(3, Some(3), false), now).is_some());
    assert!(coupon_rejection(&coupon(0, None, true), now).is_some());
    assert!(coupon_rejection(&coupon(3, Some(3), true), now).is_some());
}

#[test]
fn redemption_validity_is_stable_while_uses_increments_per_call() {
    // The profile effect is idempotent, the `uses` counter is not: every
    // successful call answers Redeem and schedules an increment, so the
    // counter climbs call by call while the user-visible outcome repeats.
    let now = Utc::now();
    let mut row = coupon(0, Some(10), false);
    for expected_uses in 0..10 {
        assert_eq!(row.uses, expected_uses);
        assert_eq!(redeem_plan(Some(&row), &[], "NAIROBI", now), RedeemPlan::Redeem);
        row.uses += 1;
    }
    assert_eq!(
        redeem_plan(Some(&row), &[], "NAIROBI", now),
        RedeemPlan::Reject("Coupon has reached its usage limit")
    );
}

#[test]
fn fallback_code_redeems_without_any_coupon_row() {
    // No table row, code on the configured list: the profile flips but
    // there is no counter to increment, no matter how often it is redeemed.
    let fallback = vec!["NAIROBI".to_string()];
    let now = Utc::now();
    for _ in 0..3 {
        assert_eq!(
            redeem_plan(None, &fallback, "NAIROBI", now),
            RedeemPlan::Fallback
        );
    }
    assert_eq!(redeem_plan(None, &fallback, "OTHER", now), RedeemPlan::Unknown);
}

#[test]
fn webhook_signature_must_match_byte_for_byte() {
    use hmac::{Hmac, Mac};

    let secret = "integration-secret";
    let body = br#"{"event":"payment.captured","payload":{}}"#;

    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    let good = hex::encode(mac.finalize().into_bytes());

    assert!(signature_matches(secret, body, &good));
    assert!(!signature_matches(secret, body, &good[..good.len() - 1]));
    assert!(!signature_matches(secret, b"other body", &good));
    assert!(!signature_matches("other secret", body, &good));
}
