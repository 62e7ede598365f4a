use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Duration;
use tracing::{info, warn};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://webcampus.db?mode=rwc";
pub const DEFAULT_STORAGE_ROOT: &str = "storage";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://127.0.0.1:8000";

/// Runtime settings read from the process environment after the env files
/// have been layered in by [`load_environment`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub storage_root: PathBuf,
    pub public_base_url: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            access_token_ttl: Duration::hours(1),
            refresh_token_ttl: Duration::days(30),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: dotenvy::var("DATABASE_URL").unwrap_or(defaults.database_url),
            storage_root: dotenvy::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            public_base_url: dotenvy::var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            access_token_ttl: seconds_var("ACCESS_TOKEN_TTL_SECS")
                .unwrap_or(defaults.access_token_ttl),
            refresh_token_ttl: seconds_var("REFRESH_TOKEN_TTL_SECS")
                .unwrap_or(defaults.refresh_token_ttl),
        }
    }
}

fn seconds_var(name: &str) -> Option<Duration> {
    let raw = dotenvy::var(name).ok()?;
    match i64::from_str(raw.trim()) {
        Ok(secs) if secs > 0 => Some(Duration::seconds(secs)),
        _ => {
            warn!(variable = %name, value = %raw, "Ignoring invalid duration");
            None
        }
    }
}

pub fn load_environment() -> Result<(), dotenvy::Error> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        ["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        ["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), dotenvy::Error> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}
