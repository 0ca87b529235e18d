use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue(
    secret: &str,
    user_id: Uuid,
    email: &str,
    ttl_hours: i64,
) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(ttl_hours)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("failed to sign session token: {e}")))
}

/// Expired or otherwise invalid tokens are indistinguishable to the caller:
/// both are a missing session.
pub fn verify(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn roundtrip() {
        let id = Uuid::new_v4();
        let token = issue(SECRET, id, "student@example.com", 24).unwrap();
        let claims = verify(SECRET, &token).expect("token should verify");
        assert_eq!(claims.sub, id);
        assert_eq!(claims.email, "student@example.com");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue(SECRET, Uuid::new_v4(), "a@example.com", 24).unwrap();
        assert!(verify("other-secret", &token).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue(SECRET, Uuid::new_v4(), "a@example.com", -1).unwrap();
        assert!(verify(SECRET, &token).is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(verify(SECRET, "not.a.token").is_none());
    }
}
