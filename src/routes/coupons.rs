use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::auth::session::AuthUser;
use crate::db::models::Coupon;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize, validator::Validate)]
pub struct RedeemRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Serialize)]
pub struct RedeemResponse {
    pub valid: bool,
    pub message: String,
}

/// Why a coupon row cannot be redeemed right now. Usage limit is checked
/// before expiry, matching the order users see in the responses.
pub fn coupon_rejection(coupon: &Coupon, now: DateTime<Utc>) -> Option<&'static str> {
    if let Some(max_uses) = coupon.max_uses {
        if coupon.uses >= max_uses {
            return Some("Coupon has reached its usage limit");
        }
    }
    if let Some(expires_at) = coupon.expires_at {
        if expires_at < now {
            return Some("Coupon has expired");
        }
    }
    None
}

/// What a redemption attempt does, decided purely from the table lookup and
/// the configured fallback list. Only `Redeem` touches the coupon row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemPlan {
    /// Usable table row: update the profile and increment `uses`.
    Redeem,
    /// Legacy env-list code with no table row: update the profile only.
    Fallback,
    /// Table row exists but cannot be used right now.
    Reject(&'static str),
    /// Neither a table row nor a fallback code.
    Unknown,
}

/// Table rows take precedence over the fallback list; a row that exists but
/// is exhausted or expired rejects even if the same code is also listed.
pub fn redeem_plan(
    coupon: Option<&Coupon>,
    fallback_codes: &[String],
    code: &str,
    now: DateTime<Utc>,
) -> RedeemPlan {
    match coupon {
        Some(coupon) => match coupon_rejection(coupon, now) {
            Some(reason) => RedeemPlan::Reject(reason),
            None => RedeemPlan::Redeem,
        },
        None if fallback_codes.iter().any(|c| c == code) => RedeemPlan::Fallback,
        None => RedeemPlan::Unknown,
    }
}

async fn fetch_coupon(state: &AppState, code: &str) -> Result<Option<Coupon>, ApiError> {
    let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE code = $1")
        .bind(code)
        .fetch_optional(&state.db)
        .await?;
    Ok(coupon)
}

async fn apply_to_profile(
    executor: impl sqlx::PgExecutor<'_>,
    code: &str,
    user_id: uuid::Uuid,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE profiles SET payment_done = TRUE, coupon_code = $1, updated_at = NOW()
         WHERE id = $2",
    )
    .bind(code)
    .bind(user_id)
    .execute(executor)
    .await?;
    Ok(())
}

fn accepted() -> Json<RedeemResponse> {
    Json(RedeemResponse {
        valid: true,
        message: "Coupon applied successfully!".to_string(),
    })
}

fn rejected(message: &str) -> Json<RedeemResponse> {
    Json(RedeemResponse {
        valid: false,
        message: message.to_string(),
    })
}

/// Redeem a code for the signed-in user. Codes match case-sensitively. Table
/// rows are validated against usage limit and expiry; the profile update and
/// the `uses` increment commit together, with the increment re-checking the
/// limit so concurrent redemptions cannot run a coupon past `max_uses`.
/// Codes on the legacy fallback list flip `payment_done` without touching
/// any coupon row.
pub async fn redeem(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, ApiError> {
    validator::Validate::validate(&body)?;

    let coupon = fetch_coupon(&state, &body.code).await?;
    let plan = redeem_plan(
        coupon.as_ref(),
        &state.config.fallback_coupon_codes,
        &body.code,
        Utc::now(),
    );

    match plan {
        RedeemPlan::Unknown => Ok(rejected("Invalid coupon code")),
        RedeemPlan::Reject(reason) => Ok(rejected(reason)),
        RedeemPlan::Fallback => {
            apply_to_profile(&state.db, &body.code, user.id).await?;
            info!(user_id = %user.id, "legacy coupon redeemed");
            Ok(accepted())
        }
        RedeemPlan::Redeem => {
            let mut tx = state.db.begin().await?;

            apply_to_profile(&mut *tx, &body.code, user.id).await?;

            let incremented = sqlx::query(
                "UPDATE coupons SET uses = uses + 1
                 WHERE code = $1 AND (max_uses IS NULL OR uses < max_uses)",
            )
            .bind(&body.code)
            .execute(&mut *tx)
            .await?;

            if incremented.rows_affected() == 0 {
                // Lost the race against another redemption consuming the last use.
                tx.rollback().await?;
                return Ok(rejected("Coupon has reached its usage limit"));
            }

            tx.commit().await?;

            info!(user_id = %user.id, code = %body.code, "coupon redeemed");
            Ok(accepted())
        }
    }
}

#[derive(Deserialize)]
pub struct CheckQuery {
    pub code: String,
}

/// Read-only validity probe: no profile mutation, no usage increment.
pub async fn check(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.code.is_empty() {
        return Err(ApiError::bad_request("Missing coupon code"));
    }

    if state.config.fallback_coupon_codes.contains(&query.code) {
        return Ok(Json(json!({
            "valid": true,
            "discount_type": "fixed",
            "discount_value": 100,
        })));
    }

    let Some(coupon) = fetch_coupon(&state, &query.code).await? else {
        return Err(ApiError::not_found("Invalid coupon code"));
    };

    if let Some(reason) = coupon_rejection(&coupon, Utc::now()) {
        return Err(ApiError::bad_request(reason));
    }

    Ok(Json(json!({
        "valid": true,
        "discount_type": coupon.discount_type,
        "discount_value": coupon.discount_value,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn coupon(uses: i32, max_uses: Option<i32>, expires_at: Option<DateTime<Utc>>) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            code: "LAUNCH24".to_string(),
            discount_type: "fixed".to_string(),
            discount_value: 100,
            uses,
            max_uses,
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unlimited_unexpired_coupon_is_accepted() {
        assert_eq!(coupon_rejection(&coupon(500, None, None), Utc::now()), None);
    }

    #[test]
    fn usage_limit_rejects_at_the_boundary() {
        let now = Utc::now();
        assert_eq!(coupon_rejection(&coupon(4, Some(5), None), now), None);
        assert_eq!(
            coupon_rejection(&coupon(5, Some(5), None), now),
            Some("Coupon has reached its usage limit")
        );
        assert_eq!(
            coupon_rejection(&coupon(6, Some(5), None), now),
            Some("Coupon has reached its usage limit")
        );
    }

    #[test]
    fn expiry_rejects_independently_of_usage() {
        let now = Utc::now();
        let past = now - Duration::hours(1);
        let future = now + Duration::hours(1);
        assert_eq!(
            coupon_rejection(&coupon(0, None, Some(past)), now),
            Some("Coupon has expired")
        );
        assert_eq!(coupon_rejection(&coupon(0, None, Some(future)), now), None);
    }

    #[test]
    fn exhausted_and_expired_reports_the_limit_first() {
        let now = Utc::now();
        let past = now - Duration::hours(1);
        assert_eq!(
            coupon_rejection(&coupon(5, Some(5), Some(past)), now),
            Some("Coupon has reached its usage limit")
        );
    }

    #[test]
    fn fallback_code_without_a_table_row_never_plans_an_increment() {
        let fallback = vec!["NAIROBI".to_string()];
        assert_eq!(
            redeem_plan(None, &fallback, "NAIROBI", Utc::now()),
            RedeemPlan::Fallback
        );
        // Codes match exactly; case variants fall through to Unknown.
        assert_eq!(
            redeem_plan(None, &fallback, "nairobi", Utc::now()),
            RedeemPlan::Unknown
        );
    }

    #[test]
    fn table_row_takes_precedence_over_the_fallback_list() {
        let fallback = vec!["LAUNCH24".to_string()];
        let now = Utc::now();
        assert_eq!(
            redeem_plan(Some(&coupon(0, Some(5), None)), &fallback, "LAUNCH24", now),
            RedeemPlan::Redeem
        );
        assert_eq!(
            redeem_plan(Some(&coupon(5, Some(5), None)), &fallback, "LAUNCH24", now),
            RedeemPlan::Reject("Coupon has reached its usage limit")
        );
    }

    #[test]
    fn repeated_redemptions_stay_valid_while_uses_climbs_to_the_limit() {
        // Each successful plan is followed by the increment it schedules; the
        // answer stays Redeem on every call until the counter hits the cap.
        let now = Utc::now();
        let mut row = coupon(0, Some(3), None);
        for expected_uses in 0..3 {
            assert_eq!(row.uses, expected_uses);
            assert_eq!(
                redeem_plan(Some(&row), &[], "LAUNCH24", now),
                RedeemPlan::Redeem
            );
            row.uses += 1;
        }
        assert_eq!(
            redeem_plan(Some(&row), &[], "LAUNCH24", now),
            RedeemPlan::Reject("Coupon has reached its usage limit")
        );
    }
}
