use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::auth::session::AuthUser;
use crate::db::models::{Report, SessionStatus};
use crate::error::ApiError;
use crate::routes::gatekeeper::counselor_exists;
use crate::state::AppState;

/// Every handler here requires a completed counselor onboarding row.
async fn require_counselor(state: &AppState, user: &AuthUser) -> Result<Uuid, ApiError> {
    if counselor_exists(state, user.id).await? {
        Ok(user.id)
    } else {
        Err(ApiError::Forbidden("Counselor onboarding required".to_string()))
    }
}

#[derive(Deserialize, validator::Validate)]
pub struct OnboardingRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 7, max = 20))]
    pub phone_number: Option<String>,
    pub age: Option<i32>,
    pub country: Option<String>,
    pub experience_years: Option<i32>,
    pub specialization: Option<String>,
    pub linkedin_profile: Option<String>,
    pub bio: Option<String>,
}

/// Create the counselor record and grant the profile full access, in one
/// transaction: a counselor must never be half-onboarded into the student
/// payment flow.
pub async fn onboard(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<OnboardingRequest>,
) -> Result<Json<Value>, ApiError> {
    validator::Validate::validate(&body)?;

    if counselor_exists(&state, user.id).await? {
        return Err(ApiError::bad_request("Counselor already onboarded"));
    }

    let mut tx = state.db.begin().await?;

    sqlx::query(
        "INSERT INTO career_counselors
           (id, email, name, phone_number, age, country, experience_years,
            specialization, linkedin_profile, bio)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(&body.name)
    .bind(&body.phone_number)
    .bind(body.age)
    .bind(&body.country)
    .bind(body.experience_years)
    .bind(&body.specialization)
    .bind(&body.linkedin_profile)
    .bind(&body.bio)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE profiles
         SET atp_done = TRUE, payment_done = TRUE,
             phone_number = COALESCE($1, phone_number), updated_at = NOW()
         WHERE id = $2",
    )
    .bind(&body.phone_number)
    .bind(user.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(counselor_id = %user.id, "counselor onboarded");
    Ok(Json(json!({ "success": true, "next": "/counselor/dashboard" })))
}

#[derive(sqlx::FromRow, Serialize)]
pub struct AssignedStudent {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub phone_number: Option<String>,
    pub atp_done: bool,
    pub payment_done: bool,
    pub created_at: DateTime<Utc>,
    pub report_url: Option<String>,
    pub session_count: i64,
}

/// Students assigned to this counselor, with their onboarding flags, report
/// link (if uploaded) and how many sessions have been held or booked.
pub async fn students(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<AssignedStudent>>, ApiError> {
    let counselor_id = require_counselor(&state, &user).await?;

    let students = sqlx::query_as::<_, AssignedStudent>(
        "SELECT p.id, p.name, p.email, p.phone_number, p.atp_done, p.payment_done,
                p.created_at,
                r.report_url,
                (SELECT COUNT(*) FROM counseling_sessions cs
                  WHERE cs.counselor_id = a.counselor_id AND cs.student_id = p.id)
                  AS session_count
         FROM student_counselor_assignments a
         JOIN profiles p ON p.id = a.student_id
         LEFT JOIN reports r
           ON r.student_id = p.id AND r.counselor_id = a.counselor_id
         WHERE a.counselor_id = $1
         ORDER BY p.created_at DESC",
    )
    .bind(counselor_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(students))
}

#[derive(sqlx::FromRow, Serialize)]
pub struct SessionWithStudent {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_name: Option<String>,
    pub student_email: String,
    pub session_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub meeting_link: Option<String>,
    pub status: String,
    pub notes: Option<String>,
}

pub async fn sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<SessionWithStudent>>, ApiError> {
    let counselor_id = require_counselor(&state, &user).await?;

    let sessions = sqlx::query_as::<_, SessionWithStudent>(
        "SELECT s.id, s.student_id, p.name AS student_name, p.email AS student_email,
                s.session_date, s.duration_minutes, s.meeting_link, s.status, s.notes
         FROM counseling_sessions s
         JOIN profiles p ON p.id = s.student_id
         WHERE s.counselor_id = $1
         ORDER BY s.session_date ASC",
    )
    .bind(counselor_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(sessions))
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub student_id: Uuid,
    pub session_date: DateTime<Utc>,
    #[serde(default = "default_duration")]
    pub duration_minutes: i32,
    pub meeting_link: Option<String>,
    pub notes: Option<String>,
}

fn default_duration() -> i32 {
    60
}

pub async fn create_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let counselor_id = require_counselor(&state, &user).await?;

    if body.duration_minutes <= 0 {
        return Err(ApiError::bad_request("Duration must be positive"));
    }

    let assigned: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM student_counselor_assignments
          WHERE counselor_id = $1 AND student_id = $2)",
    )
    .bind(counselor_id)
    .bind(body.student_id)
    .fetch_one(&state.db)
    .await?;
    if !assigned {
        return Err(ApiError::not_found("Student not assigned to this counselor"));
    }

    let session_id: Uuid = sqlx::query_scalar(
        "INSERT INTO counseling_sessions
           (counselor_id, student_id, session_date, duration_minutes, meeting_link, notes)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id",
    )
    .bind(counselor_id)
    .bind(body.student_id)
    .bind(body.session_date)
    .bind(body.duration_minutes)
    .bind(&body.meeting_link)
    .bind(&body.notes)
    .fetch_one(&state.db)
    .await?;

    info!(session_id = %session_id, counselor_id = %counselor_id, "session scheduled");
    Ok(Json(json!({ "id": session_id, "status": "scheduled" })))
}

#[derive(Deserialize)]
pub struct SessionStatusRequest {
    pub status: SessionStatus,
}

pub async fn update_session_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(body): Json<SessionStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let counselor_id = require_counselor(&state, &user).await?;

    let updated = sqlx::query(
        "UPDATE counseling_sessions SET status = $1
         WHERE id = $2 AND counselor_id = $3",
    )
    .bind(body.status.as_str())
    .bind(session_id)
    .bind(counselor_id)
    .execute(&state.db)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("Session not found"));
    }

    Ok(Json(json!({ "id": session_id, "status": body.status })))
}

pub async fn reports(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Report>>, ApiError> {
    let counselor_id = require_counselor(&state, &user).await?;

    let reports = sqlx::query_as::<_, Report>(
        "SELECT * FROM reports WHERE counselor_id = $1 ORDER BY updated_at DESC",
    )
    .bind(counselor_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(reports))
}
