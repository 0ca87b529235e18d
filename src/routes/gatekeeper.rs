//! Adapters between the pure gate policy and the three places it is
//! enforced: the page middleware, the client route-guard endpoint, and the
//! post-login landing helper. All three share one snapshot loader so the
//! policy cannot drift between call sites.

use axum::Json;
use axum::extract::{Query, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::auth::session::session_from_headers;
use crate::error::ApiError;
use crate::gate::{self, GateDecision, GateSnapshot, PUBLIC_PATHS};
use crate::state::AppState;

struct GateInputs {
    snapshot: GateSnapshot,
    /// False when the session user has no profile row yet (role not chosen);
    /// the gate never sees that state, adapters redirect to /role-selection.
    has_profile: bool,
}

#[derive(sqlx::FromRow)]
struct ProfileFlags {
    phone_number: Option<String>,
    atp_done: bool,
    payment_done: bool,
}

async fn load_inputs(state: &AppState, headers: &HeaderMap) -> Result<GateInputs, ApiError> {
    let claims = session_from_headers(headers, &state.config.jwt_secret);
    load_inputs_for_user(state, claims.map(|c| c.sub)).await
}

async fn load_inputs_for_user(
    state: &AppState,
    user_id: Option<Uuid>,
) -> Result<GateInputs, ApiError> {
    let Some(user_id) = user_id else {
        return Ok(GateInputs {
            snapshot: GateSnapshot {
                has_session: false,
                has_phone_number: false,
                is_counselor: false,
                atp_done: false,
                payment_done: false,
            },
            has_profile: false,
        });
    };

    let is_counselor = counselor_exists(state, user_id).await?;

    let profile = sqlx::query_as::<_, ProfileFlags>(
        "SELECT phone_number, atp_done, payment_done FROM profiles WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?;

    let has_profile = profile.is_some();
    let (phone, atp_done, payment_done) = match profile {
        Some(p) => (p.phone_number.is_some(), p.atp_done, p.payment_done),
        None => (false, false, false),
    };

    Ok(GateInputs {
        snapshot: GateSnapshot {
            has_session: true,
            has_phone_number: phone,
            is_counselor,
            atp_done,
            payment_done,
        },
        has_profile,
    })
}

pub async fn counselor_exists(state: &AppState, user_id: Uuid) -> Result<bool, ApiError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM career_counselors WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&state.db)
            .await?;
    Ok(exists)
}

/// Decide for one path, handling the states the pure gate does not model:
/// `/role-selection` is open to any signed-in user, and a signed-in user
/// without a profile row is sent there from everywhere else.
fn decide(inputs: &GateInputs, path: &str) -> GateDecision {
    if inputs.snapshot.has_session && path == "/role-selection" {
        return GateDecision::Allow;
    }
    if inputs.snapshot.has_session && !inputs.has_profile && !inputs.snapshot.is_counselor {
        return GateDecision::Redirect("/role-selection");
    }
    gate::evaluate(&inputs.snapshot, path)
}

/// Server-side enforcement point, layered over the page routes. A failed
/// snapshot load falls back to the most restrictive redirect rather than
/// granting access.
pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();

    let inputs = match load_inputs(&state, request.headers()).await {
        Ok(inputs) => inputs,
        Err(e) => {
            warn!(path = %path, error = %e, "gate snapshot load failed, re-onboarding");
            if PUBLIC_PATHS.contains(&path.as_str()) {
                return next.run(request).await;
            }
            return Redirect::temporary("/role-selection").into_response();
        }
    };

    match decide(&inputs, &path) {
        GateDecision::Allow => next.run(request).await,
        GateDecision::Redirect(target) => Redirect::temporary(target).into_response(),
    }
}

#[derive(Deserialize)]
pub struct CheckQuery {
    path: String,
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

/// Client route-guard adapter: same decision the middleware would make for
/// the given path, without performing the navigation.
pub async fn check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, ApiError> {
    if !query.path.starts_with('/') {
        return Err(ApiError::bad_request("path must be absolute"));
    }

    let inputs = load_inputs(&state, &headers).await?;
    let decision = decide(&inputs, &query.path);

    Ok(Json(CheckResponse {
        allow: decision.is_allow(),
        redirect: decision.redirect_target().map(str::to_string),
    }))
}

/// Post-sign-in adapter: where the client should navigate next.
pub async fn landing(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = landing_for(&state, &headers).await?;
    Ok(Json(json!({ "landing": target })))
}

pub async fn landing_for(state: &AppState, headers: &HeaderMap) -> Result<&'static str, ApiError> {
    let claims = session_from_headers(headers, &state.config.jwt_secret);
    landing_for_user(state, claims.map(|c| c.sub)).await
}

/// Landing target for a user who just received a fresh session (login,
/// register, magic-link callback), before any cookie round-trip.
pub async fn landing_for_user(
    state: &AppState,
    user_id: Option<Uuid>,
) -> Result<&'static str, ApiError> {
    let inputs = load_inputs_for_user(state, user_id).await?;
    if inputs.snapshot.has_session && !inputs.has_profile && !inputs.snapshot.is_counselor {
        return Ok("/role-selection");
    }
    Ok(gate::landing_path(&inputs.snapshot))
}
