use std::collections::HashSet;

use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        Assignment, AssignmentWithLesson, BookmarkKind, DayOfWeek, DbAssignment,
        DbAssignmentWithLesson, DbLesson, DbMaterial, DbNotification, DbScheduleEntry,
        DbSubmission, DbUserProfile, Lesson, Material, Notification, NotificationKind,
        NotificationStatus, ScheduleEntry, School, Submission, Term, UserProfile,
    },
};

const ASSIGNMENT_WITH_LESSON: &str = "SELECT a.id, a.lesson_id, a.name, a.content_url, a.deadline, a.created_at,
        l.name AS lesson_name
 FROM assignments a
 LEFT JOIN lessons l ON l.id = a.lesson_id";

const NOTIFICATION_WITH_ASSIGNMENT: &str = "SELECT n.id, n.user_id, n.type AS kind, n.title, n.body, n.status, n.created_at,
        n.assignment_id, a.lesson_id AS assignment_lesson_id, a.name AS assignment_name,
        l.name AS lesson_name
 FROM notifications n
 LEFT JOIN assignments a ON a.id = n.assignment_id
 LEFT JOIN lessons l ON l.id = a.lesson_id";

#[instrument(skip(pool))]
pub async fn get_role_name(pool: &Pool<Sqlite>, user_id: &str) -> Result<Option<String>, AppError> {
    info!("Resolving role");
    let role = sqlx::query_scalar::<_, String>("SELECT role FROM roles WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(role)
}

#[instrument(skip(pool))]
pub async fn get_user_ids_by_role(
    pool: &Pool<Sqlite>,
    role: &str,
) -> Result<Vec<String>, AppError> {
    info!("Listing users by role");
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM roles
         WHERE lower(trim(role)) = ? OR (? = 'student' AND lower(trim(role)) = 'students')
         ORDER BY user_id",
    )
    .bind(role)
    .bind(role)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

#[instrument(skip(pool))]
pub async fn get_lessons(pool: &Pool<Sqlite>) -> Result<Vec<Lesson>, AppError> {
    info!("Getting all lessons");
    let rows = sqlx::query_as::<_, DbLesson>(
        "SELECT id, name, teacher, syllabus_url FROM lessons ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Lesson::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_lesson(pool: &Pool<Sqlite>, id: &str) -> Result<Lesson, AppError> {
    info!("Getting lesson");
    let row = sqlx::query_as::<_, DbLesson>(
        "SELECT id, name, teacher, syllabus_url FROM lessons WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(lesson) => Ok(Lesson::from(lesson)),
        _ => Err(AppError::NotFound(format!("Lesson {} not found", id))),
    }
}

#[instrument(skip(pool))]
pub async fn get_materials_for_lesson(
    pool: &Pool<Sqlite>,
    lesson_id: &str,
) -> Result<Vec<Material>, AppError> {
    info!("Getting lesson materials");
    let rows = sqlx::query_as::<_, DbMaterial>(
        "SELECT id, lesson_id, name, content_url, created_at
         FROM materials
         WHERE lesson_id = ?
         ORDER BY created_at DESC",
    )
    .bind(lesson_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Material::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_assignments_for_lesson(
    pool: &Pool<Sqlite>,
    lesson_id: &str,
) -> Result<Vec<Assignment>, AppError> {
    info!("Getting lesson assignments");
    let rows = sqlx::query_as::<_, DbAssignment>(
        "SELECT id, lesson_id, name, content_url, deadline, created_at
         FROM assignments
         WHERE lesson_id = ?
         ORDER BY deadline ASC",
    )
    .bind(lesson_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Assignment::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_assignment(pool: &Pool<Sqlite>, id: &str) -> Result<Assignment, AppError> {
    info!("Getting assignment");
    let row = sqlx::query_as::<_, DbAssignment>(
        "SELECT id, lesson_id, name, content_url, deadline, created_at
         FROM assignments WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(assignment) => Ok(Assignment::from(assignment)),
        _ => Err(AppError::NotFound(format!("Assignment {} not found", id))),
    }
}

#[instrument(skip(pool))]
pub async fn get_assignments_with_lessons(
    pool: &Pool<Sqlite>,
) -> Result<Vec<AssignmentWithLesson>, AppError> {
    info!("Getting assignments with lessons");
    let rows = sqlx::query_as::<_, DbAssignmentWithLesson>(&format!(
        "{ASSIGNMENT_WITH_LESSON} ORDER BY a.deadline ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(AssignmentWithLesson::from).collect())
}

#[instrument(skip(pool))]
pub async fn upsert_submission(
    pool: &Pool<Sqlite>,
    user_id: &str,
    assignment_id: &str,
    file_url: &str,
    file_name: &str,
    file_size: i64,
) -> Result<Submission, AppError> {
    info!("Upserting submission");
    let now = Utc::now();

    let row = sqlx::query_as::<_, DbSubmission>(
        "INSERT INTO submissions
         (id, user_id, assignment_id, file_url, file_name, file_size, submitted_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id, assignment_id) DO UPDATE SET
             file_url = excluded.file_url,
             file_name = excluded.file_name,
             file_size = excluded.file_size,
             submitted_at = excluded.submitted_at,
             updated_at = excluded.updated_at
         RETURNING id, user_id, assignment_id, file_url, file_name, file_size, submitted_at, updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(assignment_id)
    .bind(file_url)
    .bind(file_name)
    .bind(file_size)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(Submission::from(row))
}

#[instrument(skip(pool))]
pub async fn get_submission(
    pool: &Pool<Sqlite>,
    user_id: &str,
    assignment_id: &str,
) -> Result<Option<Submission>, AppError> {
    info!("Getting own submission");
    let row = sqlx::query_as::<_, DbSubmission>(
        "SELECT id, user_id, assignment_id, file_url, file_name, file_size, submitted_at, updated_at
         FROM submissions
         WHERE user_id = ? AND assignment_id = ?",
    )
    .bind(user_id)
    .bind(assignment_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Submission::from))
}

#[instrument(skip(pool))]
pub async fn get_submissions_for_assignment(
    pool: &Pool<Sqlite>,
    assignment_id: &str,
) -> Result<Vec<Submission>, AppError> {
    info!("Getting all submissions for assignment");
    let rows = sqlx::query_as::<_, DbSubmission>(
        "SELECT id, user_id, assignment_id, file_url, file_name, file_size, submitted_at, updated_at
         FROM submissions
         WHERE assignment_id = ?
         ORDER BY submitted_at DESC",
    )
    .bind(assignment_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Submission::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_submitted_assignment_ids(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<HashSet<String>, AppError> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT assignment_id FROM submissions WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(ids.into_iter().collect())
}

#[instrument(skip(pool))]
pub async fn insert_bookmark(
    pool: &Pool<Sqlite>,
    kind: BookmarkKind,
    user_id: &str,
    resource_id: &str,
) -> Result<(), AppError> {
    info!("Inserting bookmark");
    sqlx::query(&format!(
        "INSERT INTO {} (user_id, {}, created_at) VALUES (?, ?, ?)",
        kind.table(),
        kind.column()
    ))
    .bind(user_id)
    .bind(resource_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_bookmark(
    pool: &Pool<Sqlite>,
    kind: BookmarkKind,
    user_id: &str,
    resource_id: &str,
) -> Result<(), AppError> {
    info!("Deleting bookmark");
    sqlx::query(&format!(
        "DELETE FROM {} WHERE user_id = ? AND {} = ?",
        kind.table(),
        kind.column()
    ))
    .bind(user_id)
    .bind(resource_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_bookmarked_ids(
    pool: &Pool<Sqlite>,
    kind: BookmarkKind,
    user_id: &str,
) -> Result<HashSet<String>, AppError> {
    let ids = sqlx::query_scalar::<_, String>(&format!(
        "SELECT {} FROM {} WHERE user_id = ?",
        kind.column(),
        kind.table()
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(ids.into_iter().collect())
}

#[instrument(skip(pool))]
pub async fn get_bookmarked_assignments(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Vec<AssignmentWithLesson>, AppError> {
    info!("Getting bookmarked assignments");
    let rows = sqlx::query_as::<_, DbAssignmentWithLesson>(&format!(
        "{ASSIGNMENT_WITH_LESSON}
         JOIN assignment_bookmarks b ON b.assignment_id = a.id
         WHERE b.user_id = ?
         ORDER BY b.created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(AssignmentWithLesson::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_bookmarked_materials(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Vec<Material>, AppError> {
    info!("Getting bookmarked materials");
    let rows = sqlx::query_as::<_, DbMaterial>(
        "SELECT m.id, m.lesson_id, m.name, m.content_url, m.created_at
         FROM materials m
         JOIN material_bookmarks b ON b.material_id = m.id
         WHERE b.user_id = ?
         ORDER BY b.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Material::from).collect())
}

/// One row of a notification fan-out.
#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub user_id: &'a str,
    pub kind: NotificationKind,
    pub title: &'a str,
    pub body: &'a str,
    pub assignment_id: Option<&'a str>,
}

/// Inserts every row in a single transaction; either all rows land or none.
#[instrument(skip_all, fields(count = rows.len()))]
pub async fn insert_notifications(
    pool: &Pool<Sqlite>,
    rows: &[NewNotification<'_>],
) -> Result<u64, AppError> {
    info!("Inserting notification batch");
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for row in rows {
        let res = sqlx::query(
            "INSERT INTO notifications (id, user_id, type, title, body, status, created_at, assignment_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(row.user_id)
        .bind(row.kind.as_str())
        .bind(row.title)
        .bind(row.body)
        .bind(NotificationStatus::Unread.as_str())
        .bind(now)
        .bind(row.assignment_id)
        .execute(&mut *tx)
        .await?;

        inserted += res.rows_affected();
    }

    tx.commit().await?;

    Ok(inserted)
}

#[instrument(skip(pool))]
pub async fn get_notifications_for_user(
    pool: &Pool<Sqlite>,
    user_id: &str,
    limit: i64,
) -> Result<Vec<Notification>, AppError> {
    info!("Getting notifications");
    let rows = sqlx::query_as::<_, DbNotification>(&format!(
        "{NOTIFICATION_WITH_ASSIGNMENT}
         WHERE n.user_id = ?
         ORDER BY n.created_at DESC
         LIMIT ?"
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Notification::from).collect())
}

#[instrument(skip(pool))]
pub async fn mark_notification_read(
    pool: &Pool<Sqlite>,
    user_id: &str,
    notification_id: &str,
) -> Result<(), AppError> {
    info!("Marking notification read");
    let res = sqlx::query("UPDATE notifications SET status = ? WHERE id = ? AND user_id = ?")
        .bind(NotificationStatus::Read.as_str())
        .bind(notification_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Notification {} not found",
            notification_id
        )));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn upsert_schedule_entry(
    pool: &Pool<Sqlite>,
    user_id: &str,
    day_of_week: DayOfWeek,
    period: i64,
    title: &str,
) -> Result<(), AppError> {
    info!("Upserting schedule entry");
    sqlx::query(
        "INSERT INTO schedules (id, user_id, day_of_week, period, title)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(user_id, day_of_week, period) DO UPDATE SET title = excluded.title",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(day_of_week.as_str())
    .bind(period)
    .bind(title)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_schedule_entries(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Vec<ScheduleEntry>, AppError> {
    info!("Getting schedule entries");
    let rows = sqlx::query_as::<_, DbScheduleEntry>(
        "SELECT id, day_of_week, period, title FROM schedules WHERE user_id = ? ORDER BY period",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(DbScheduleEntry::into_entry).collect())
}

#[instrument(skip(pool))]
pub async fn create_school(
    pool: &Pool<Sqlite>,
    name: &str,
    owner_user_id: &str,
) -> Result<String, AppError> {
    info!("Creating school");
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO schools (id, name, owner_user_id, created_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(owner_user_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(id)
}

#[instrument(skip(pool))]
pub async fn get_schools(pool: &Pool<Sqlite>) -> Result<Vec<School>, AppError> {
    info!("Getting schools");
    let schools = sqlx::query_as::<_, School>("SELECT id, name FROM schools ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(schools)
}

#[instrument(skip(pool))]
pub async fn school_exists(pool: &Pool<Sqlite>, id: &str) -> Result<bool, AppError> {
    let found = sqlx::query_scalar::<_, String>("SELECT id FROM schools WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(found.is_some())
}

#[instrument(skip(pool))]
pub async fn get_profile(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Option<UserProfile>, AppError> {
    info!("Getting user profile");
    let row = sqlx::query_as::<_, DbUserProfile>(
        "SELECT school_id, term, grade, class FROM user_profiles WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(UserProfile::from))
}

#[instrument(skip(pool))]
pub async fn upsert_profile(
    pool: &Pool<Sqlite>,
    user_id: &str,
    school_id: &str,
    term: Term,
    grade: &str,
    class: &str,
) -> Result<(), AppError> {
    info!("Upserting user profile");
    sqlx::query(
        "INSERT INTO user_profiles (user_id, school_id, term, grade, class, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
             school_id = excluded.school_id,
             term = excluded.term,
             grade = excluded.grade,
             class = excluded.class,
             updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(school_id)
    .bind(term.as_str())
    .bind(grade)
    .bind(class)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}
