use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::db;
use crate::error::AppError;
use crate::models::{School, Term, UserProfile};

pub const GRADES: [&str; 4] = ["1", "2", "3", "4"];
pub const CLASSES: [&str; 4] = ["A", "B", "C", "D"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileInput {
    #[serde(default)]
    pub school_id: Option<String>,
    pub term: Term,
    pub grade: String,
    pub class: String,
}

/// Creates a school owned by `owner_user_id` and returns the refreshed list.
/// Callers check the manage-schools permission first.
#[instrument(skip(pool))]
pub async fn create_school(
    pool: &Pool<Sqlite>,
    owner_user_id: &str,
    name: &str,
) -> Result<Vec<School>, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::invalid("name", "School name is required"));
    }

    let id = db::create_school(pool, name, owner_user_id).await?;
    info!(school_id = %id, "School created");

    db::get_schools(pool).await
}

/// The caller's profile, or the defaults when none was saved yet.
#[instrument(skip(pool))]
pub async fn load_profile(pool: &Pool<Sqlite>, user_id: &str) -> Result<UserProfile, AppError> {
    Ok(db::get_profile(pool, user_id).await?.unwrap_or_default())
}

#[instrument(skip(pool))]
pub async fn save_profile(
    pool: &Pool<Sqlite>,
    user_id: &str,
    input: &ProfileInput,
) -> Result<UserProfile, AppError> {
    let school_id = input
        .school_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::invalid("school_id", "Choose a school"))?;

    if !GRADES.contains(&input.grade.as_str()) {
        return Err(AppError::invalid("grade", "Grade must be 1 to 4"));
    }

    if !CLASSES.contains(&input.class.as_str()) {
        return Err(AppError::invalid("class", "Class must be A to D"));
    }

    if !db::school_exists(pool, school_id).await? {
        return Err(AppError::invalid("school_id", "Unknown school"));
    }

    db::upsert_profile(pool, user_id, school_id, input.term, &input.grade, &input.class).await?;

    Ok(UserProfile {
        school_id: Some(school_id.to_string()),
        term: input.term,
        grade: input.grade.clone(),
        class: input.class.clone(),
    })
}
