use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::auth::session::AuthUser;
use crate::db::models::Profile;
use crate::error::ApiError;
use crate::routes::gatekeeper::counselor_exists;
use crate::state::AppState;

pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    let is_counselor = counselor_exists(&state, user.id).await?;
    Ok(Json(json!({ "profile": profile, "is_counselor": is_counselor })))
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Counselor,
}

#[derive(Deserialize)]
pub struct RoleRequest {
    pub role: Role,
}

/// Role selection. Students get their profile row upserted (it normally
/// already exists from the signup trigger); counselors are told whether
/// onboarding is still pending, since the counselor row itself is what marks
/// the role.
pub async fn select_role(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<RoleRequest>,
) -> Result<Json<Value>, ApiError> {
    match body.role {
        Role::Student => {
            sqlx::query(
                "INSERT INTO profiles (id, email) VALUES ($1, $2)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(user.id)
            .bind(&user.email)
            .execute(&state.db)
            .await?;

            info!(user_id = %user.id, "student role selected");
            Ok(Json(json!({ "role": "student", "next": "/app-to-tap" })))
        }
        Role::Counselor => {
            let onboarded = counselor_exists(&state, user.id).await?;
            let next = if onboarded {
                "/counselor/dashboard"
            } else {
                "/counselor/onboarding"
            };
            Ok(Json(json!({ "role": "counselor", "onboarded": onboarded, "next": next })))
        }
    }
}

#[derive(Deserialize, validator::Validate)]
pub struct PhoneRequest {
    #[validate(length(min = 7, max = 20))]
    pub phone_number: String,
}

pub async fn set_phone(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PhoneRequest>,
) -> Result<Json<Value>, ApiError> {
    validator::Validate::validate(&body)?;

    let updated = sqlx::query(
        "UPDATE profiles SET phone_number = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(body.phone_number.trim())
    .bind(user.id)
    .execute(&state.db)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("Profile not found"));
    }

    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct MarkPaidRequest {
    pub user_id: Uuid,
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(key) if key == state.config.admin_api_key => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Operational escape hatch for marking a payment done out-of-band. Requires
/// the admin API key and addresses the profile by id, never by email.
pub async fn mark_paid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MarkPaidRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;

    let updated = sqlx::query(
        "UPDATE profiles SET payment_done = TRUE, updated_at = NOW() WHERE id = $1",
    )
    .bind(body.user_id)
    .execute(&state.db)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    info!(user_id = %body.user_id, "payment marked done by admin");
    Ok(Json(json!({ "success": true, "message": "Profile updated successfully" })))
}
