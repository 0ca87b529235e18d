use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use uuid::Uuid;

use crate::auth::jwt::{self, Claims};
use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "cm_session";

/// Authenticated caller, resolved from the session cookie or an
/// `Authorization: Bearer` header. Extraction fails with 401.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
        }
    }
}

/// Pull session claims out of request headers without failing the request.
/// The gate middleware uses this directly: an absent or invalid token is a
/// policy input there, not an error.
pub fn session_from_headers(headers: &HeaderMap, secret: &str) -> Option<Claims> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let token = match bearer {
        Some(token) => Some(token.to_string()),
        None => CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string()),
    }?;

    jwt::verify(secret, &token)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        session_from_headers(&parts.headers, &state.config.jwt_secret)
            .map(AuthUser::from)
            .ok_or(ApiError::Unauthorized)
    }
}

/// Session cookie with the freshly issued token. HttpOnly; Lax so the
/// magic-link redirect carries it.
pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn expired_session_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .build();
    cookie.make_removal();
    cookie
}
