use axum::Json;
use axum::extract::{Multipart, State};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::auth::session::AuthUser;
use crate::error::ApiError;
use crate::routes::gatekeeper::counselor_exists;
use crate::state::AppState;

/// Summary used when the counselor uploads a file without one.
pub fn default_summary() -> Value {
    json!({
        "name": "Student Report",
        "reportTitle": "Career Assessment Report",
        "assessmentFramework": "ClassMent Career Framework",
        "orientationStyle": {
            "dominantStyle": "Analytical",
            "secondaryStyle": "Creative",
            "description": "Balanced approach combining analytical thinking with creative problem-solving.",
        },
        "interest": {
            "dominantInterestAreas": ["Technology", "Design", "Research"],
        },
        "personality": {
            "dominantTraits": ["Detail-oriented", "Innovative", "Persistent"],
        },
        "aptitude": {
            "dominantStrengths": ["Logical reasoning", "Pattern recognition", "Spatial awareness"],
        },
        "emotionalQuotient": {
            "dominantAttributes": ["Self-awareness", "Empathy", "Adaptability"],
        },
        "careerMatches": [
            {
                "domain": "Software Development",
                "details": "Analytical skills and problem-solving abilities make you well-suited for software development.",
            },
            {
                "domain": "UX/UI Design",
                "details": "Creative thinking and attention to detail align well with user experience design.",
            },
            {
                "domain": "Data Science",
                "details": "Pattern recognition and logical reasoning skills are valuable in data science.",
            },
        ],
    })
}

/// Timestamped so re-uploads never clobber a document a student may still
/// have open.
fn report_file_name(student_id: Uuid, now_millis: i64) -> String {
    format!("{now_millis}_{student_id}.pdf")
}

#[derive(Debug)]
struct UploadFields {
    file: Vec<u8>,
    student_email: String,
    summary: Value,
}

/// Drain the multipart form. The PDF check happens here, before anything is
/// written anywhere.
async fn read_upload(mut multipart: Multipart) -> Result<UploadFields, ApiError> {
    let mut file: Option<Vec<u8>> = None;
    let mut student_email: Option<String> = None;
    let mut summary_raw: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                let content_type = field.content_type().map(str::to_string);
                if content_type.as_deref() != Some(mime::APPLICATION_PDF.as_ref()) {
                    return Err(ApiError::bad_request("Only PDF files are allowed"));
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;
                file = Some(bytes.to_vec());
            }
            "email" => {
                student_email = Some(field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read email field: {e}"))
                })?);
            }
            "summary" => {
                summary_raw = Some(field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read summary field: {e}"))
                })?);
            }
            _ => {}
        }
    }

    let (Some(file), Some(student_email)) = (file, student_email) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    let summary = match summary_raw.as_deref().map(str::trim) {
        None | Some("") | Some("{}") => default_summary(),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|_| ApiError::bad_request("Invalid JSON format for report summary"))?,
    };

    Ok(UploadFields {
        file,
        student_email,
        summary,
    })
}

/// Counselor uploads an assessment report for a student. One report per
/// (student, counselor) pair: re-uploads replace the previous document link
/// and summary.
pub async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    if !counselor_exists(&state, user.id).await? {
        return Err(ApiError::not_found("Counselor not found"));
    }
    let counselor_id = user.id;

    let upload = read_upload(multipart).await?;

    let student_id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM profiles WHERE email = $1")
        .bind(&upload.student_email)
        .fetch_optional(&state.db)
        .await?;
    let Some(student_id) = student_id else {
        return Err(ApiError::not_found("Student not found"));
    };

    let file_name = report_file_name(student_id, Utc::now().timestamp_millis());
    let path = state.config.upload_dir.join(&file_name);
    tokio::fs::write(&path, &upload.file)
        .await
        .map_err(|e| ApiError::Internal(format!("file upload failed: {e}")))?;

    let report_url = format!("{}/uploads/{file_name}", state.config.public_base_url);

    sqlx::query(
        "INSERT INTO reports (student_id, counselor_id, email, report_url, report_summary)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (student_id, counselor_id) DO UPDATE
         SET report_url = EXCLUDED.report_url,
             report_summary = EXCLUDED.report_summary,
             email = EXCLUDED.email,
             updated_at = NOW()",
    )
    .bind(student_id)
    .bind(counselor_id)
    .bind(&upload.student_email)
    .bind(&report_url)
    .bind(&upload.summary)
    .execute(&state.db)
    .await?;

    info!(student_id = %student_id, counselor_id = %counselor_id, "report uploaded");
    Ok(Json(json!({
        "success": true,
        "fileUrl": report_url,
        "message": "Report uploaded successfully",
    })))
}

#[derive(sqlx::FromRow, serde::Serialize)]
pub struct StudentReport {
    report_url: String,
    report_summary: Value,
}

/// Student-facing read: document link plus the structured summary.
pub async fn mine(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<StudentReport>, ApiError> {
    let report = sqlx::query_as::<_, StudentReport>(
        "SELECT report_url, report_summary FROM reports
         WHERE student_id = $1
         ORDER BY updated_at DESC
         LIMIT 1",
    )
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?;

    report
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No report available yet"))
}
