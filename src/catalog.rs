use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{instrument, warn};

use crate::db;
use crate::error::AppError;
use crate::models::{
    Assignment, AssignmentWithLesson, BookmarkKind, Lesson, Material, Submission,
};

/// Time left until a deadline, as shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Overdue,
    Days(i64),
    HoursMinutes { hours: i64, minutes: i64 },
}

impl Countdown {
    pub fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining = deadline - now;
        if remaining < chrono::Duration::zero() {
            return Countdown::Overdue;
        }

        let days = remaining.num_days();
        if days >= 1 {
            return Countdown::Days(days);
        }

        Countdown::HoursMinutes {
            hours: remaining.num_hours(),
            minutes: remaining.num_minutes() % 60,
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Countdown::Overdue => f.write_str("overdue"),
            Countdown::Days(days) => write!(f, "{days}d"),
            Countdown::HoursMinutes { hours, minutes } => write!(f, "{hours:02}:{minutes:02}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterialItem {
    #[serde(flatten)]
    pub material: Material,
    pub bookmarked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentItem {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub bookmarked: bool,
    pub overdue: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonPage {
    pub lesson: Lesson,
    pub materials: Vec<MaterialItem>,
    pub assignments: Vec<AssignmentItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentPage {
    pub lesson: Lesson,
    pub assignment: AssignmentItem,
    pub own_submission: Option<Submission>,
    /// Only present for callers allowed to see everyone's submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_submissions: Option<Vec<Submission>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardAssignment {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub lesson_name: Option<String>,
    pub submitted: bool,
    pub overdue: bool,
    pub countdown: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookmarkListing {
    pub assignments: Vec<AssignmentWithLesson>,
    pub materials: Vec<Material>,
}

#[instrument(skip(pool))]
pub async fn lesson_page(
    pool: &Pool<Sqlite>,
    user_id: &str,
    lesson_id: &str,
    now: DateTime<Utc>,
) -> Result<LessonPage, AppError> {
    let lesson = db::get_lesson(pool, lesson_id).await?;
    let materials = db::get_materials_for_lesson(pool, lesson_id).await?;
    let assignments = db::get_assignments_for_lesson(pool, lesson_id).await?;

    let material_marks = db::get_bookmarked_ids(pool, BookmarkKind::Material, user_id).await?;
    let assignment_marks = db::get_bookmarked_ids(pool, BookmarkKind::Assignment, user_id).await?;

    Ok(LessonPage {
        lesson,
        materials: materials
            .into_iter()
            .map(|material| MaterialItem {
                bookmarked: material_marks.contains(&material.id),
                material,
            })
            .collect(),
        assignments: assignments
            .into_iter()
            .map(|assignment| AssignmentItem {
                bookmarked: assignment_marks.contains(&assignment.id),
                overdue: assignment.is_overdue(now),
                assignment,
            })
            .collect(),
    })
}

#[instrument(skip(pool))]
pub async fn assignment_page(
    pool: &Pool<Sqlite>,
    user_id: &str,
    lesson_id: &str,
    assignment_id: &str,
    include_all_submissions: bool,
    now: DateTime<Utc>,
) -> Result<AssignmentPage, AppError> {
    let lesson = db::get_lesson(pool, lesson_id).await?;
    let assignment = db::get_assignment(pool, assignment_id).await?;

    if assignment.lesson_id != lesson.id {
        warn!("Assignment requested under the wrong lesson");
        return Err(AppError::NotFound(format!(
            "Assignment {} not found in lesson {}",
            assignment_id, lesson_id
        )));
    }

    let bookmarked = db::get_bookmarked_ids(pool, BookmarkKind::Assignment, user_id)
        .await?
        .contains(&assignment.id);
    let own_submission = db::get_submission(pool, user_id, assignment_id).await?;

    let all_submissions = if include_all_submissions {
        Some(db::get_submissions_for_assignment(pool, assignment_id).await?)
    } else {
        None
    };

    Ok(AssignmentPage {
        lesson,
        assignment: AssignmentItem {
            bookmarked,
            overdue: assignment.is_overdue(now),
            assignment,
        },
        own_submission,
        all_submissions,
    })
}

#[instrument(skip(pool))]
pub async fn dashboard_assignments(
    pool: &Pool<Sqlite>,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<DashboardAssignment>, AppError> {
    let rows = db::get_assignments_with_lessons(pool).await?;
    let submitted = db::get_submitted_assignment_ids(pool, user_id).await?;

    Ok(rows
        .into_iter()
        .map(|row| DashboardAssignment {
            submitted: submitted.contains(&row.assignment.id),
            overdue: row.assignment.is_overdue(now),
            countdown: Countdown::until(row.assignment.deadline, now).to_string(),
            lesson_name: row.lesson_name,
            assignment: row.assignment,
        })
        .collect())
}

#[instrument(skip(pool))]
pub async fn bookmark_listing(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<BookmarkListing, AppError> {
    Ok(BookmarkListing {
        assignments: db::get_bookmarked_assignments(pool, user_id).await?,
        materials: db::get_bookmarked_materials(pool, user_id).await?,
    })
}
