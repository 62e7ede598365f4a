use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Role;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lesson {
    pub id: String,
    pub name: String,
    pub teacher: String,
    pub syllabus_url: Option<String>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLesson {
    pub id: String,
    pub name: Option<String>,
    pub teacher: Option<String>,
    pub syllabus_url: Option<String>,
}

impl From<DbLesson> for Lesson {
    fn from(lesson: DbLesson) -> Self {
        Self {
            id: lesson.id,
            name: lesson.name.unwrap_or_default(),
            teacher: lesson.teacher.unwrap_or_default(),
            syllabus_url: lesson.syllabus_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Material {
    pub id: String,
    pub lesson_id: String,
    pub name: String,
    pub content_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbMaterial {
    pub id: String,
    pub lesson_id: String,
    pub name: Option<String>,
    pub content_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbMaterial> for Material {
    fn from(material: DbMaterial) -> Self {
        Self {
            id: material.id,
            lesson_id: material.lesson_id,
            name: material.name.unwrap_or_default(),
            content_url: material.content_url.unwrap_or_default(),
            created_at: material.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: String,
    pub lesson_id: String,
    pub name: String,
    pub content_url: String,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAssignment {
    pub id: String,
    pub lesson_id: String,
    pub name: Option<String>,
    pub content_url: Option<String>,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<DbAssignment> for Assignment {
    fn from(db: DbAssignment) -> Self {
        Self {
            id: db.id,
            lesson_id: db.lesson_id,
            name: db.name.unwrap_or_default(),
            content_url: db.content_url.unwrap_or_default(),
            deadline: db.deadline,
            created_at: db.created_at,
        }
    }
}

/// An assignment joined with its (optional) lesson. The to-one relation is
/// always a single `Option`, never a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentWithLesson {
    pub assignment: Assignment,
    pub lesson_name: Option<String>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAssignmentWithLesson {
    #[sqlx(flatten)]
    pub assignment: DbAssignment,
    pub lesson_name: Option<String>,
}

impl From<DbAssignmentWithLesson> for AssignmentWithLesson {
    fn from(db: DbAssignmentWithLesson) -> Self {
        Self {
            assignment: Assignment::from(db.assignment),
            lesson_name: db.lesson_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub assignment_id: String,
    pub file_url: String,
    pub file_name: String,
    pub file_size: i64,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSubmission {
    pub id: String,
    pub user_id: String,
    pub assignment_id: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbSubmission> for Submission {
    fn from(db: DbSubmission) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            assignment_id: db.assignment_id,
            file_url: db.file_url.unwrap_or_default(),
            file_name: db.file_name.unwrap_or_default(),
            file_size: db.file_size.unwrap_or_default(),
            submitted_at: db.submitted_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookmarkKind {
    Assignment,
    Material,
}

impl BookmarkKind {
    pub fn table(&self) -> &'static str {
        match self {
            BookmarkKind::Assignment => "assignment_bookmarks",
            BookmarkKind::Material => "material_bookmarks",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            BookmarkKind::Assignment => "assignment_id",
            BookmarkKind::Material => "material_id",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookmarkKind::Assignment => "assignment",
            BookmarkKind::Material => "material",
        }
    }
}

impl<'a> rocket::request::FromParam<'a> for BookmarkKind {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        match param {
            "assignment" | "assignments" => Ok(BookmarkKind::Assignment),
            "material" | "materials" => Ok(BookmarkKind::Material),
            _ => Err(param),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Course,
    System,
    Emergency,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Course => "course",
            NotificationKind::System => "system",
            NotificationKind::Emergency => "emergency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(NotificationKind::Info),
            "course" => Some(NotificationKind::Course),
            "system" => Some(NotificationKind::System),
            "emergency" => Some(NotificationKind::Emergency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Unread => "unread",
            NotificationStatus::Read => "read",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedAssignment {
    pub id: String,
    pub lesson_id: String,
    pub name: String,
    pub lesson_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub assignment: Option<LinkedAssignment>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbNotification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub assignment_id: Option<String>,
    pub assignment_lesson_id: Option<String>,
    pub assignment_name: Option<String>,
    pub lesson_name: Option<String>,
}

impl From<DbNotification> for Notification {
    fn from(db: DbNotification) -> Self {
        // A dangling assignment_id (assignment deleted) yields no link.
        let assignment = match (db.assignment_id, db.assignment_lesson_id) {
            (Some(id), Some(lesson_id)) => Some(LinkedAssignment {
                id,
                lesson_id,
                name: db.assignment_name.unwrap_or_default(),
                lesson_name: db.lesson_name,
            }),
            _ => None,
        };

        Self {
            id: db.id,
            user_id: db.user_id,
            kind: NotificationKind::parse(&db.kind).unwrap_or(NotificationKind::Info),
            title: db.title.unwrap_or_default(),
            body: db.body.unwrap_or_default(),
            status: if db.status == "read" {
                NotificationStatus::Read
            } else {
                NotificationStatus::Unread
            },
            created_at: db.created_at,
            assignment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Mon,
        DayOfWeek::Tue,
        DayOfWeek::Wed,
        DayOfWeek::Thu,
        DayOfWeek::Fri,
        DayOfWeek::Sat,
        DayOfWeek::Sun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Mon => "mon",
            DayOfWeek::Tue => "tue",
            DayOfWeek::Wed => "wed",
            DayOfWeek::Thu => "thu",
            DayOfWeek::Fri => "fri",
            DayOfWeek::Sat => "sat",
            DayOfWeek::Sun => "sun",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        DayOfWeek::ALL.into_iter().find(|day| day.as_str() == s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub id: String,
    pub day_of_week: DayOfWeek,
    pub period: i64,
    pub title: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbScheduleEntry {
    pub id: String,
    pub day_of_week: String,
    pub period: i64,
    pub title: Option<String>,
}

impl DbScheduleEntry {
    /// Rows with an unknown weekday are dropped rather than failing the read.
    pub fn into_entry(self) -> Option<ScheduleEntry> {
        let day_of_week = DayOfWeek::parse(&self.day_of_week)?;
        Some(ScheduleEntry {
            id: self.id,
            day_of_week,
            period: self.period,
            title: self.title.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct School {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    Spring,
    Autumn,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::Spring => "spring",
            Term::Autumn => "autumn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spring" => Some(Term::Spring),
            "autumn" => Some(Term::Autumn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub school_id: Option<String>,
    pub term: Term,
    pub grade: String,
    pub class: String,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            school_id: None,
            term: Term::Spring,
            grade: "1".to_string(),
            class: "A".to_string(),
        }
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserProfile {
    pub school_id: Option<String>,
    pub term: Option<String>,
    pub grade: Option<String>,
    pub class: Option<String>,
}

impl From<DbUserProfile> for UserProfile {
    fn from(db: DbUserProfile) -> Self {
        let defaults = UserProfile::default();
        Self {
            school_id: db.school_id,
            term: db.term.as_deref().and_then(Term::parse).unwrap_or(defaults.term),
            grade: db.grade.unwrap_or(defaults.grade),
            class: db.class.unwrap_or(defaults.class),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<Role>,
}
