use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::instrument;

use crate::db;
use crate::error::AppError;
use crate::models::{DayOfWeek, ScheduleEntry};

pub const MIN_PERIOD: i64 = 1;
pub const MAX_PERIOD: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleInput {
    pub day_of_week: DayOfWeek,
    pub period: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleDay {
    pub day_of_week: DayOfWeek,
    pub entries: Vec<ScheduleEntry>,
}

/// Groups entries Monday through Sunday, keeping empty days, each day
/// ordered by period.
pub fn group_by_day(entries: Vec<ScheduleEntry>) -> Vec<ScheduleDay> {
    let mut days: Vec<ScheduleDay> = DayOfWeek::ALL
        .into_iter()
        .map(|day_of_week| ScheduleDay {
            day_of_week,
            entries: Vec::new(),
        })
        .collect();

    for entry in entries {
        if let Some(day) = days.iter_mut().find(|d| d.day_of_week == entry.day_of_week) {
            day.entries.push(entry);
        }
    }

    for day in &mut days {
        day.entries.sort_by_key(|entry| entry.period);
    }

    days
}

#[instrument(skip(pool))]
pub async fn weekly_schedule(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Vec<ScheduleDay>, AppError> {
    let entries = db::get_schedule_entries(pool, user_id).await?;
    Ok(group_by_day(entries))
}

/// Upserts one (day, period) slot and returns the refetched week.
#[instrument(skip(pool))]
pub async fn save_entry(
    pool: &Pool<Sqlite>,
    user_id: &str,
    input: &ScheduleInput,
) -> Result<Vec<ScheduleDay>, AppError> {
    if !(MIN_PERIOD..=MAX_PERIOD).contains(&input.period) {
        return Err(AppError::invalid(
            "period",
            format!("Period must be between {MIN_PERIOD} and {MAX_PERIOD}"),
        ));
    }

    let title = input.title.trim();
    if title.is_empty() {
        return Err(AppError::invalid("title", "Title is required"));
    }

    db::upsert_schedule_entry(pool, user_id, input.day_of_week, input.period, title).await?;

    weekly_schedule(pool, user_id).await
}
