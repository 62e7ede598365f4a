use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::auth::Role;
use crate::db::{self, NewNotification};
use crate::error::AppError;
use crate::models::NotificationKind;

pub const INBOX_LIMIT: i64 = 50;
pub const UNKNOWN_LESSON: &str = "Unknown lesson";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Target {
    Role(Role),
    User(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDraft {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub assignment_id: Option<String>,
}

impl NotificationDraft {
    /// The linked assignment, treating a blank selection as none.
    pub fn linked_assignment(&self) -> Option<&str> {
        self.assignment_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Title and body are required")]
    EmptyContent,

    #[error("Course notifications must link an assignment")]
    MissingAssignmentLink,

    #[error("No users hold the role {0}")]
    NoRecipients(Role),

    #[error("A recipient user id is required")]
    MissingRecipient,

    #[error("Sending failed: {0}")]
    SendFailed(String),
}

impl From<NotificationError> for AppError {
    fn from(error: NotificationError) -> Self {
        let message = error.to_string();
        match error {
            NotificationError::EmptyContent => AppError::invalid("content", message),
            NotificationError::MissingAssignmentLink => AppError::invalid("assignment_id", message),
            NotificationError::NoRecipients(_) | NotificationError::MissingRecipient => {
                AppError::invalid("target", message)
            }
            NotificationError::SendFailed(_) => AppError::ExternalService(message),
        }
    }
}

pub fn validate_draft(draft: &NotificationDraft) -> Result<(), NotificationError> {
    if draft.title.trim().is_empty() || draft.body.trim().is_empty() {
        return Err(NotificationError::EmptyContent);
    }

    if draft.kind == NotificationKind::Course && draft.linked_assignment().is_none() {
        return Err(NotificationError::MissingAssignmentLink);
    }

    Ok(())
}

/// A user target is taken literally; its existence is not checked.
#[instrument(skip(pool))]
pub async fn resolve_recipients(
    pool: &Pool<Sqlite>,
    target: &Target,
) -> Result<Vec<String>, NotificationError> {
    match target {
        Target::Role(role) => {
            let ids = db::get_user_ids_by_role(pool, role.as_str())
                .await
                .map_err(|e| NotificationError::SendFailed(e.to_string()))?;
            if ids.is_empty() {
                return Err(NotificationError::NoRecipients(*role));
            }
            Ok(ids)
        }
        Target::User(user_id) => {
            let user_id = user_id.trim();
            if user_id.is_empty() {
                return Err(NotificationError::MissingRecipient);
            }
            Ok(vec![user_id.to_string()])
        }
    }
}

/// Materializes one unread row per recipient. Returns the number of rows
/// created; on failure nothing is persisted.
#[instrument(skip(pool, draft), fields(kind = ?draft.kind))]
pub async fn dispatch(
    pool: &Pool<Sqlite>,
    draft: &NotificationDraft,
    target: &Target,
) -> Result<u64, NotificationError> {
    validate_draft(draft)?;

    let recipients = resolve_recipients(pool, target).await?;

    let title = draft.title.trim();
    let body = draft.body.trim();
    let assignment_id = draft.linked_assignment();

    let rows: Vec<NewNotification<'_>> = recipients
        .iter()
        .map(|user_id| NewNotification {
            user_id,
            kind: draft.kind,
            title,
            body,
            assignment_id,
        })
        .collect();

    match db::insert_notifications(pool, &rows).await {
        Ok(count) => {
            info!(count, "Notifications sent");
            Ok(count)
        }
        Err(err) => {
            error!(error = %err, "Notification batch rolled back");
            Err(NotificationError::SendFailed(err.to_string()))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipientPreview {
    pub role: Role,
    pub count: usize,
}

#[instrument(skip(pool))]
pub async fn preview_recipients(
    pool: &Pool<Sqlite>,
    role: Role,
) -> Result<RecipientPreview, AppError> {
    let ids = db::get_user_ids_by_role(pool, role.as_str()).await?;
    Ok(RecipientPreview {
        role,
        count: ids.len(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentOption {
    pub id: String,
    pub name: String,
    pub lesson_name: String,
    pub deadline: chrono::DateTime<chrono::Utc>,
}

#[instrument(skip(pool))]
pub async fn assignment_options(pool: &Pool<Sqlite>) -> Result<Vec<AssignmentOption>, AppError> {
    let assignments = db::get_assignments_with_lessons(pool).await?;

    Ok(assignments
        .into_iter()
        .map(|row| AssignmentOption {
            id: row.assignment.id,
            name: row.assignment.name,
            lesson_name: row.lesson_name.unwrap_or_else(|| UNKNOWN_LESSON.to_string()),
            deadline: row.assignment.deadline,
        })
        .collect())
}
