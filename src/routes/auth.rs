use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::Json;
use axum::extract::{Query, State};
use axum::response::Redirect;
use axum_extra::extract::CookieJar;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::auth::jwt;
use crate::auth::session::{expired_session_cookie, session_cookie};
use crate::db::models::User;
use crate::error::ApiError;
use crate::routes::gatekeeper;
use crate::state::AppState;

const MAGIC_LINK_TTL_MINUTES: i64 = 15;

#[derive(Deserialize, validator::Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
}

#[derive(Deserialize, validator::Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, validator::Validate)]
pub struct MagicLinkRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

async fn issue_session(
    state: &AppState,
    jar: CookieJar,
    user_id: Uuid,
    email: &str,
) -> Result<(CookieJar, &'static str), ApiError> {
    let token = jwt::issue(
        &state.config.jwt_secret,
        user_id,
        email,
        state.config.session_ttl_hours,
    )?;
    let landing = gatekeeper::landing_for_user(state, Some(user_id)).await?;
    Ok((jar.add(session_cookie(token)), landing))
}

/// Duplicate emails surface as a unique violation on the INSERT itself, so a
/// concurrent registration of the same address gets the same 400 as a retry.
fn registration_error(err: sqlx::Error) -> ApiError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::bad_request("Email already registered")
        }
        _ => ApiError::Database(err),
    }
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    validator::Validate::validate(&body)?;

    let password_hash = hash_password(&body.password)?;
    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (email, name, password_hash) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(&body.email)
    .bind(&body.name)
    .bind(&password_hash)
    .fetch_one(&state.db)
    .await
    .map_err(registration_error)?;

    info!(user_id = %user_id, "user registered");

    let (jar, landing) = issue_session(&state, jar, user_id, &body.email).await?;
    Ok((jar, Json(json!({ "user_id": user_id, "landing": landing }))))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    validator::Validate::validate(&body)?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&body.email)
        .fetch_optional(&state.db)
        .await?;

    // Unknown email, passwordless account, and bad password all collapse to 401.
    let Some(user) = user else {
        return Err(ApiError::Unauthorized);
    };
    let valid = user
        .password_hash
        .as_deref()
        .map(|hash| verify_password(&body.password, hash))
        .unwrap_or(false);
    if !valid {
        return Err(ApiError::Unauthorized);
    }

    sqlx::query("UPDATE users SET last_sign_in_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    let (jar, landing) = issue_session(&state, jar, user.id, &user.email).await?;
    Ok((jar, Json(json!({ "user_id": user.id, "landing": landing }))))
}

/// Passwordless sign-in: store a single-use code and email it as a callback
/// link. Signing in with an unknown address provisions the account, the same
/// way the payment webhook does.
pub async fn magic_link(
    State(state): State<AppState>,
    Json(body): Json<MagicLinkRequest>,
) -> Result<Json<Value>, ApiError> {
    validator::Validate::validate(&body)?;

    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (email) VALUES ($1)
         ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
         RETURNING id",
    )
    .bind(&body.email)
    .fetch_one(&state.db)
    .await?;

    let mut raw = [0u8; 32];
    rand::rng().fill_bytes(&mut raw);
    let code = URL_SAFE_NO_PAD.encode(raw);

    sqlx::query("INSERT INTO login_tokens (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(&code)
        .bind(user_id)
        .bind(Utc::now() + Duration::minutes(MAGIC_LINK_TTL_MINUTES))
        .execute(&state.db)
        .await?;

    let link = format!("{}/auth/callback?code={code}", state.config.public_base_url);
    state.mailer.send_magic_link(&body.email, &link).await?;

    info!(user_id = %user_id, "magic link issued");
    Ok(Json(json!({ "sent": true })))
}

/// Exchange a login code for a session and land the user on whatever the
/// gate says comes next. The token is consumed atomically; replaying a used
/// or expired code just returns to /login.
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(CookieJar, Redirect), ApiError> {
    let Some(code) = query.code else {
        return Ok((jar, Redirect::temporary("/login")));
    };

    let user_id: Option<Uuid> = sqlx::query_scalar(
        "UPDATE login_tokens SET used_at = NOW()
         WHERE token = $1 AND used_at IS NULL AND expires_at > NOW()
         RETURNING user_id",
    )
    .bind(&code)
    .fetch_optional(&state.db)
    .await?;

    let Some(user_id) = user_id else {
        return Ok((jar, Redirect::temporary("/login")));
    };

    let email: String = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&state.db)
        .await?;

    sqlx::query("UPDATE users SET last_sign_in_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(&state.db)
        .await?;

    let (jar, landing) = issue_session(&state, jar, user_id, &email).await?;
    Ok((jar, Redirect::temporary(landing)))
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    (
        jar.add(expired_session_cookie()),
        Json(json!({ "signed_out": true })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn invalid_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[derive(Debug)]
    struct DuplicateKey;

    impl std::fmt::Display for DuplicateKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("duplicate key value violates unique constraint \"users_email_key\"")
        }
    }

    impl std::error::Error for DuplicateKey {}

    impl sqlx::error::DatabaseError for DuplicateKey {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint \"users_email_key\""
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::UniqueViolation
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }
    }

    #[test]
    fn concurrent_duplicate_registration_maps_to_bad_request() {
        let err = registration_error(sqlx::Error::Database(Box::new(DuplicateKey)));
        assert!(matches!(err, ApiError::BadRequest(msg) if msg == "Email already registered"));
    }

    #[test]
    fn other_insert_failures_stay_internal() {
        let err = registration_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, ApiError::Database(_)));
    }
}
