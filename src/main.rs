#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod bookmark;
mod catalog;
mod config;
mod control;
mod database;
mod db;
mod error;
mod models;
mod notification;
mod schedule;
mod school;
mod storage;
mod submission;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use std::sync::Arc;

use api::{
    SharedStorage, api_assignment_options, api_create_school, api_get_assignment,
    api_get_assignments, api_get_bookmarks, api_get_lesson, api_get_lessons,
    api_get_notifications, api_get_profile, api_get_schedule, api_get_schools, api_login,
    api_logout, api_mark_notification_read, api_me, api_preview_recipients, api_save_profile,
    api_save_schedule, api_send_notification, api_submit_assignment, api_toggle_bookmark,
    auth_callback, auth_callback_event, health, serve_object,
};
use auth::{SharedIdentity, SqliteIdentity, default_api, forbidden_api, unauthorized_api};
use config::{AppConfig, load_environment};
use control::InFlightControls;
use database::apply_schema;
use rocket::data::{Limits, ToByteUnit};
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use storage::LocalObjectStorage;
use telemetry::{TelemetryFairing, init_tracing};
use tracing::{error, info};

/// Multipart uploads carry up to a 50 MiB file plus form overhead.
const UPLOAD_LIMIT_MIB: u64 = 60;
/// Just above the 50 MiB submission cap, so an oversize file part is cut off
/// and reported before the whole form limit is reached.
const FILE_LIMIT_MIB: u64 = 51;

#[launch]
async fn rocket() -> _ {
    if let Err(e) = load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    init_tracing();

    let config = AppConfig::from_env();

    let pool = match connect(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to prepare database: {:#}", e);
            panic!("Database setup failed: {:#}", e);
        }
    };

    let identity: SharedIdentity = Arc::new(SqliteIdentity::new(
        pool.clone(),
        config.access_token_ttl,
        config.refresh_token_ttl,
    ));
    let storage: SharedStorage = Arc::new(LocalObjectStorage::new(
        config.storage_root.clone(),
        &config.public_base_url,
    ));

    init_rocket(pool, identity, storage, config).await
}

async fn connect(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    info!("Applying schema...");
    apply_schema(&pool).await?;

    Ok(pool)
}

pub async fn init_rocket(
    pool: SqlitePool,
    identity: SharedIdentity,
    storage: SharedStorage,
    config: AppConfig,
) -> Rocket<Build> {
    info!("Starting webcampus");

    let limits = Limits::default()
        .limit("file", FILE_LIMIT_MIB.mebibytes())
        .limit("data-form", UPLOAD_LIMIT_MIB.mebibytes());
    let figment = rocket::Config::figment().merge(("limits", limits));

    rocket::custom(figment)
        .manage(pool)
        .manage(identity)
        .manage(storage)
        .manage(config)
        .manage(InFlightControls::new())
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_get_lessons,
                api_get_lesson,
                api_get_assignment,
                api_get_assignments,
                api_submit_assignment,
                api_toggle_bookmark,
                api_get_bookmarks,
                api_get_notifications,
                api_mark_notification_read,
                api_send_notification,
                api_preview_recipients,
                api_assignment_options,
                api_get_schedule,
                api_save_schedule,
                api_get_schools,
                api_create_school,
                api_get_profile,
                api_save_profile,
                health,
            ],
        )
        .mount("/auth", routes![auth_callback, auth_callback_event])
        .mount("/storage", routes![serve_object])
        .register("/api", catchers![unauthorized_api, forbidden_api, default_api])
        .attach(TelemetryFairing)
}
