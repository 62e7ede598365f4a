//! Identity provider contract and its SQLite-backed implementation.
//!
//! Handlers never touch the `auth_users` / `auth_sessions` tables directly;
//! they go through [`IdentityProvider`] so the backend can be swapped for a
//! hosted auth service.

use chrono::{DateTime, Duration, Utc};
use rand::distr::{Alphanumeric, SampleString};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const TOKEN_LENGTH: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Email(String),
    Phone(String),
}

impl Identifier {
    /// Anything containing `@` is treated as an email address.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.contains('@') {
            Some(Identifier::Email(trimmed.to_lowercase()))
        } else {
            Some(Identifier::Phone(trimmed.to_string()))
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Identity backend error: {0}")]
    Backend(String),
}

impl AuthError {
    /// Error code in the provider's vocabulary.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::UserNotFound => "user_not_found",
            AuthError::SessionExpired => "session_expired",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::Backend(_) => "unexpected_failure",
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(error: sqlx::Error) -> Self {
        AuthError::Backend(error.to_string())
    }
}

impl From<bcrypt::BcryptError> for AuthError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AuthError::Backend(error.to_string())
    }
}

#[rocket::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_password(
        &self,
        identifier: &Identifier,
        password: &str,
    ) -> Result<AuthSession, AuthError>;

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthSession, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

#[derive(sqlx::FromRow)]
struct DbAuthUser {
    id: String,
    email: Option<String>,
    phone: Option<String>,
    password_hash: String,
}

impl From<DbAuthUser> for AuthUser {
    fn from(row: DbAuthUser) -> Self {
        Self {
            id: row.id,
            email: row.email,
            phone: row.phone,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DbAuthSession {
    id: String,
    user_id: String,
    access_expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
}

pub struct SqliteIdentity {
    pool: Pool<Sqlite>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SqliteIdentity {
    pub fn new(pool: Pool<Sqlite>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            pool,
            access_ttl,
            refresh_ttl,
        }
    }

    async fn find_user(&self, identifier: &Identifier) -> Result<Option<DbAuthUser>, AuthError> {
        let (column, value) = match identifier {
            Identifier::Email(email) => ("email", email),
            Identifier::Phone(phone) => ("phone", phone),
        };

        let row = sqlx::query_as::<_, DbAuthUser>(&format!(
            "SELECT id, email, phone, password_hash FROM auth_users WHERE {column} = ?"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn user_by_id(&self, user_id: &str) -> Result<AuthUser, AuthError> {
        sqlx::query_as::<_, DbAuthUser>(
            "SELECT id, email, phone, password_hash FROM auth_users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(AuthUser::from)
        .ok_or(AuthError::UserNotFound)
    }

    async fn issue_session(&self, user: AuthUser) -> Result<AuthSession, AuthError> {
        let now = Utc::now();
        let access_token = generate_token();
        let refresh_token = generate_token();
        let expires_at = now + self.access_ttl;

        sqlx::query(
            "INSERT INTO auth_sessions
             (id, user_id, access_token, refresh_token, access_expires_at, refresh_expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&user.id)
        .bind(&access_token)
        .bind(&refresh_token)
        .bind(expires_at)
        .bind(now + self.refresh_ttl)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(AuthSession {
            access_token,
            refresh_token,
            expires_at,
            user,
        })
    }
}

fn generate_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), TOKEN_LENGTH)
}

#[rocket::async_trait]
impl IdentityProvider for SqliteIdentity {
    #[instrument(skip(self, password))]
    async fn sign_in_with_password(
        &self,
        identifier: &Identifier,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        info!("Password sign-in");
        let Some(row) = self.find_user(identifier).await? else {
            warn!("Unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        let valid = bcrypt::verify(password, &row.password_hash)?;
        if !valid {
            warn!(user_id = %row.id, "Password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        self.issue_session(AuthUser::from(row)).await
    }

    #[instrument(skip_all)]
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let session = sqlx::query_as::<_, DbAuthSession>(
            "SELECT id, user_id, access_expires_at, refresh_expires_at
             FROM auth_sessions WHERE access_token = ?",
        )
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::SessionNotFound)?;

        if session.access_expires_at <= Utc::now() {
            return Err(AuthError::SessionExpired);
        }

        self.user_by_id(&session.user_id).await
    }

    #[instrument(skip_all)]
    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        info!("Refreshing session");
        let session = sqlx::query_as::<_, DbAuthSession>(
            "SELECT id, user_id, access_expires_at, refresh_expires_at
             FROM auth_sessions WHERE refresh_token = ?",
        )
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::SessionNotFound)?;

        // Refresh tokens are single use.
        sqlx::query("DELETE FROM auth_sessions WHERE id = ?")
            .bind(&session.id)
            .execute(&self.pool)
            .await?;

        if session.refresh_expires_at <= Utc::now() {
            return Err(AuthError::SessionExpired);
        }

        let user = self.user_by_id(&session.user_id).await?;
        self.issue_session(user).await
    }

    #[instrument(skip_all)]
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        info!("Signing out");
        sqlx::query("DELETE FROM auth_sessions WHERE access_token = ?")
            .bind(access_token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
