use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-razorpay-signature";
const PROFILE_POLL_ATTEMPTS: u32 = 5;
const PROFILE_POLL_BASE_DELAY: Duration = Duration::from_millis(100);

/// The provider signs the raw body with HMAC-SHA256 and sends the hex digest.
/// Comparison is byte-for-byte on the hex strings; anything else is a reject,
/// regardless of whether the body parses.
pub fn signature_matches(secret: &str, body: &[u8], signature: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    expected.as_bytes() == signature.as_bytes()
}

#[derive(Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: Value,
}

struct PaymentEntity {
    id: String,
    email: String,
    amount_paise: i64,
    name: Option<String>,
    phone: Option<String>,
    age: Option<i64>,
}

fn parse_payment_entity(payload: &Value) -> Result<PaymentEntity, ApiError> {
    let entity = &payload["payment"]["entity"];
    let email = entity["email"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Email not found in payment data"))?
        .to_string();
    let notes = &entity["notes"];
    let contact = entity["contact"].as_str().map(str::to_string);

    Ok(PaymentEntity {
        id: entity["id"].as_str().unwrap_or_default().to_string(),
        email,
        amount_paise: entity["amount"].as_i64().unwrap_or(0),
        name: notes["name"].as_str().map(str::to_string).or(contact.clone()),
        phone: notes["phone"].as_str().map(str::to_string).or(contact),
        age: notes["age"].as_i64(),
    })
}

#[derive(sqlx::FromRow)]
struct ProfileIdentity {
    id: Uuid,
    name: Option<String>,
    welcome_email_sent: bool,
}

async fn fetch_profile_by_email(
    state: &AppState,
    email: &str,
) -> Result<Option<ProfileIdentity>, ApiError> {
    let profile = sqlx::query_as::<_, ProfileIdentity>(
        "SELECT id, name, welcome_email_sent FROM profiles WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(&state.db)
    .await?;
    Ok(profile)
}

/// The profile row is materialized by a database trigger after the user
/// insert. Poll with exponential backoff until it appears; give up with a
/// definitive error instead of assuming a fixed delay was enough.
async fn wait_for_profile(state: &AppState, user_id: Uuid) -> Result<ProfileIdentity, ApiError> {
    let mut delay = PROFILE_POLL_BASE_DELAY;
    for attempt in 0..PROFILE_POLL_ATTEMPTS {
        let profile = sqlx::query_as::<_, ProfileIdentity>(
            "SELECT id, name, welcome_email_sent FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;

        if let Some(profile) = profile {
            return Ok(profile);
        }

        if attempt + 1 < PROFILE_POLL_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    Err(ApiError::Internal(format!(
        "profile for user {user_id} did not materialize after {PROFILE_POLL_ATTEMPTS} attempts"
    )))
}

pub async fn razorpay(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("No signature found"))?;

    if !signature_matches(&state.config.razorpay_webhook_secret, &body, signature) {
        return Err(ApiError::bad_request("Invalid signature"));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Malformed webhook body"))?;

    if event.event != "payment.captured" {
        return Ok(Json(json!({ "status": "ignored" })));
    }

    let payment = parse_payment_entity(&event.payload)?;
    info!(email = %payment.email, payment_id = %payment.id, "payment captured");

    let profile = match fetch_profile_by_email(&state, &payment.email).await? {
        Some(profile) => profile,
        None => {
            // Paying through the provider's checkout without an account:
            // provision one and let the trigger create the profile.
            let user_id: Uuid = sqlx::query_scalar(
                "INSERT INTO users (email, name) VALUES ($1, $2)
                 ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
                 RETURNING id",
            )
            .bind(&payment.email)
            .bind(&payment.name)
            .fetch_one(&state.db)
            .await?;

            info!(user_id = %user_id, "provisioned user from payment webhook");
            wait_for_profile(&state, user_id).await?
        }
    };

    // Best-effort, and idempotent under duplicate delivery: once the flag is
    // set, redelivery never re-sends the mail.
    let email_sent = if profile.welcome_email_sent {
        true
    } else {
        let display_name = payment
            .name
            .clone()
            .or(profile.name.clone())
            .unwrap_or_default();
        let sent = state.mailer.send_welcome(&payment.email, &display_name).await;
        if !sent {
            warn!(user_id = %profile.id, "welcome email failed, recording and continuing");
        }
        sent
    };

    sqlx::query(
        "UPDATE profiles
         SET name = COALESCE($1, name),
             phone_number = COALESCE($2, phone_number),
             age = COALESCE($3, age),
             payment_done = TRUE,
             payment_id = $4,
             amount_paid = $5,
             welcome_email_sent = $6,
             updated_at = NOW()
         WHERE id = $7",
    )
    .bind(&payment.name)
    .bind(&payment.phone)
    .bind(payment.age.map(|a| a as i32))
    .bind(&payment.id)
    .bind(payment.amount_paise as f64 / 100.0)
    .bind(email_sent)
    .bind(profile.id)
    .execute(&state.db)
    .await?;

    info!(user_id = %profile.id, "profile updated from captured payment");
    Ok(Json(json!({ "status": "success" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "webhook-test-secret";

    fn sign(body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"event":"payment.captured"}"#;
        assert!(signature_matches(SECRET, body, &sign(body)));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign(body);
        assert!(!signature_matches(
            SECRET,
            br#"{"event":"payment.failed"}"#,
            &signature
        ));
    }

    #[test]
    fn signature_check_ignores_json_validity() {
        // Garbage bytes with a correct HMAC still pass the signature stage.
        let body = b"this is not json at all";
        assert!(signature_matches(SECRET, body, &sign(body)));
        // And valid JSON with a bad signature does not.
        assert!(!signature_matches(
            SECRET,
            br#"{"event":"payment.captured"}"#,
            "deadbeef"
        ));
    }

    #[test]
    fn signature_comparison_is_exact() {
        let body = b"payload";
        let mut signature = sign(body);
        signature.make_ascii_uppercase();
        assert!(!signature_matches(SECRET, body, &signature));
    }

    #[test]
    fn payment_entity_requires_email() {
        let payload = json!({ "payment": { "entity": { "id": "pay_1", "amount": 49900 } } });
        assert!(parse_payment_entity(&payload).is_err());
    }

    #[test]
    fn payment_entity_falls_back_to_contact() {
        let payload = json!({
            "payment": {
                "entity": {
                    "id": "pay_1",
                    "email": "s@example.com",
                    "amount": 49900,
                    "contact": "+911234567890",
                    "notes": {}
                }
            }
        });
        let entity = parse_payment_entity(&payload).unwrap();
        assert_eq!(entity.email, "s@example.com");
        assert_eq!(entity.phone.as_deref(), Some("+911234567890"));
        assert_eq!(entity.amount_paise, 49900);
    }
}
