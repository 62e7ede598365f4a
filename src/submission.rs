use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::control::{InFlightControls, control_key};
use crate::db;
use crate::error::AppError;
use crate::models::Submission;
use crate::storage::{ObjectStorage, UploadOptions};

pub const SUBMISSION_BUCKET: &str = "assignment-submissions";
pub const ALLOWED_CONTENT_TYPE: &str = "application/pdf";
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const CACHE_CONTROL_SECS: u32 = 3600;
pub const REFRESH_AFTER_MS: u64 = 1500;

static FORBIDDEN_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("static regex"));
static UNSAFE_STEM_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static regex"));

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Only PDF files can be submitted (got {0})")]
    InvalidFileType(String),

    #[error("File exceeds the 50 MB limit ({0} bytes received)")]
    FileTooLarge(u64),

    #[error("File name contains a forbidden character: {0}")]
    InvalidFileName(String),

    #[error("Assignment {0} not found")]
    AssignmentNotFound(String),

    #[error("A submission for this assignment is already in progress")]
    InProgress,

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Saving the submission failed: {0}")]
    RecordFailed(String),
}

impl From<SubmissionError> for AppError {
    fn from(error: SubmissionError) -> Self {
        let message = error.to_string();
        match error {
            SubmissionError::InvalidFileType(_) | SubmissionError::FileTooLarge(_) => {
                AppError::invalid("file", message)
            }
            SubmissionError::InvalidFileName(_) => AppError::invalid("file_name", message),
            SubmissionError::AssignmentNotFound(_) => AppError::NotFound(message),
            SubmissionError::InProgress => AppError::Conflict(message),
            SubmissionError::UploadFailed(_) => AppError::Storage(message),
            SubmissionError::RecordFailed(_) => AppError::ExternalService(message),
        }
    }
}

/// What the client declared about the uploaded file.
#[derive(Debug, Clone)]
pub struct FileMeta<'a> {
    pub name: &'a str,
    pub content_type: &'a str,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionReceipt {
    pub submission: Submission,
    pub object_key: String,
    pub refresh_after_ms: u64,
}

/// Checks run cheapest first, before anything touches storage.
pub fn validate_file(meta: &FileMeta<'_>) -> Result<(), SubmissionError> {
    if meta.content_type != ALLOWED_CONTENT_TYPE {
        return Err(SubmissionError::InvalidFileType(meta.content_type.to_string()));
    }

    if meta.size > MAX_FILE_SIZE {
        return Err(SubmissionError::FileTooLarge(meta.size));
    }

    if let Some(found) = FORBIDDEN_NAME_CHARS.find(meta.name) {
        return Err(SubmissionError::InvalidFileName(found.as_str().to_string()));
    }

    Ok(())
}

/// Replaces every stem character outside `[A-Za-z0-9_-]` with `_`, keeping
/// the extension after the last dot.
pub fn sanitize_file_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, extension)) => {
            format!("{}.{}", UNSAFE_STEM_CHARS.replace_all(stem, "_"), extension)
        }
        None => UNSAFE_STEM_CHARS.replace_all(name, "_").into_owned(),
    }
}

pub fn object_key(user_id: &str, assignment_id: &str, unix_millis: i64, file_name: &str) -> String {
    format!(
        "{}/{}/{}-{}",
        user_id,
        assignment_id,
        unix_millis,
        sanitize_file_name(file_name)
    )
}

/// Validates, uploads and records one submission. A failed upload stops
/// before the database; a failed record leaves the uploaded object behind.
#[instrument(skip(pool, storage, in_flight, bytes), fields(file_name = %meta.name, size = meta.size))]
pub async fn submit(
    pool: &Pool<Sqlite>,
    storage: &dyn ObjectStorage,
    in_flight: &InFlightControls,
    user_id: &str,
    assignment_id: &str,
    meta: &FileMeta<'_>,
    bytes: &[u8],
) -> Result<SubmissionReceipt, SubmissionError> {
    validate_file(meta)?;

    match db::get_assignment(pool, assignment_id).await {
        Ok(_) => {}
        Err(AppError::NotFound(_)) => {
            return Err(SubmissionError::AssignmentNotFound(assignment_id.to_string()));
        }
        Err(err) => return Err(SubmissionError::RecordFailed(err.to_string())),
    }

    let Some(_guard) = in_flight.try_acquire(control_key(user_id, "submission", assignment_id))
    else {
        return Err(SubmissionError::InProgress);
    };

    let key = object_key(user_id, assignment_id, Utc::now().timestamp_millis(), meta.name);
    let options = UploadOptions {
        overwrite: true,
        cache_control_secs: CACHE_CONTROL_SECS,
    };

    if let Err(err) = storage
        .upload(SUBMISSION_BUCKET, &key, bytes, options)
        .await
    {
        error!(error = %err, object_key = %key, "Submission upload failed");
        return Err(SubmissionError::UploadFailed(err.to_string()));
    }

    let file_url = storage.public_url(SUBMISSION_BUCKET, &key);
    let size = i64::try_from(meta.size).unwrap_or(i64::MAX);

    let submission =
        match db::upsert_submission(pool, user_id, assignment_id, &file_url, meta.name, size).await
        {
            Ok(submission) => submission,
            Err(err) => {
                warn!(error = %err, object_key = %key, "Submission stored but not recorded");
                return Err(SubmissionError::RecordFailed(err.to_string()));
            }
        };

    info!(submission_id = %submission.id, "Submission recorded");

    Ok(SubmissionReceipt {
        submission,
        object_key: key,
        refresh_after_ms: REFRESH_AFTER_MS,
    })
}
