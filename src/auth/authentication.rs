use std::sync::Arc;

use rocket::Request;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use sqlx::{Pool, Sqlite};
use tracing::{Instrument, error, info, warn};

use crate::config::AppConfig;
use crate::db::get_role_name;
use crate::validation::{ToValidationResponse, ValidationResponse};

use super::{AuthError, AuthSession, AuthUser, IdentityProvider, Role, SessionUser};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

pub type SharedIdentity = Arc<dyn IdentityProvider>;

pub fn store_session(cookies: &CookieJar<'_>, session: &AuthSession, max_age: chrono::Duration) {
    store_tokens(cookies, &session.access_token, &session.refresh_token, max_age);
}

pub fn store_tokens(
    cookies: &CookieJar<'_>,
    access_token: &str,
    refresh_token: &str,
    max_age: chrono::Duration,
) {
    let max_age = rocket::time::Duration::seconds(max_age.num_seconds());

    cookies.add_private(
        Cookie::build((ACCESS_COOKIE, access_token.to_string()))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(max_age),
    );
    cookies.add_private(
        Cookie::build((REFRESH_COOKIE, refresh_token.to_string()))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(max_age),
    );
}

pub fn clear_session(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::build(ACCESS_COOKIE));
    cookies.remove_private(Cookie::build(REFRESH_COOKIE));
}

/// The identity behind the request's cookies, refreshed through the
/// provider when the access token has lapsed.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user: AuthUser,
    pub access_token: String,
}

/// Resolved once per request so a single-use refresh token is never spent
/// twice when several guards ask for the session.
struct CachedSession(Result<SessionContext, Status>);

async fn resolve_session(request: &Request<'_>) -> Result<SessionContext, Status> {
    let Some(identity) = request.rocket().state::<SharedIdentity>() else {
        error!("Identity provider not found in managed state");
        return Err(Status::InternalServerError);
    };

    let cookies = request.cookies();

    if let Some(token) = cookies
        .get_private(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
    {
        match identity.get_user(&token).await {
            Ok(user) => {
                return Ok(SessionContext {
                    user,
                    access_token: token,
                });
            }
            Err(AuthError::Backend(msg)) => {
                error!(error = %msg, "Identity provider unavailable");
                return Err(Status::ServiceUnavailable);
            }
            Err(err) => info!(reason = %err, "Access token rejected, trying refresh"),
        }
    }

    let Some(refresh_token) = cookies
        .get_private(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
    else {
        return Err(Status::Unauthorized);
    };

    match identity.refresh_session(&refresh_token).await {
        Ok(session) => {
            let ttl = request
                .rocket()
                .state::<AppConfig>()
                .map(|config| config.refresh_token_ttl)
                .unwrap_or_else(|| AppConfig::default().refresh_token_ttl);

            store_session(cookies, &session, ttl);
            info!(user_id = %session.user.id, "Session refreshed");

            Ok(SessionContext {
                user: session.user,
                access_token: session.access_token,
            })
        }
        Err(AuthError::Backend(msg)) => {
            error!(error = %msg, "Identity provider unavailable during refresh");
            Err(Status::ServiceUnavailable)
        }
        Err(err) => {
            warn!(reason = %err, "Refresh token rejected");
            clear_session(cookies);
            Err(Status::Unauthorized)
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionContext {
    type Error = Status;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let cached = request
            .local_cache_async(async {
                CachedSession(
                    resolve_session(request)
                        .instrument(tracing::info_span!("session_guard"))
                        .await,
                )
            })
            .await;

        match &cached.0 {
            Ok(context) => Outcome::Success(context.clone()),
            Err(status) => Outcome::Error((*status, *status)),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let context = match request.guard::<SessionContext>().await {
            Outcome::Success(context) => context,
            Outcome::Error((status, _)) => return Outcome::Error((status, ())),
            Outcome::Forward(status) => return Outcome::Forward(status),
        };

        let Some(pool) = request.rocket().state::<Pool<Sqlite>>() else {
            error!("Database pool not found in managed state");
            return Outcome::Error((Status::InternalServerError, ()));
        };

        match get_role_name(pool, &context.user.id).await {
            Ok(role) => {
                let role = role.as_deref().and_then(Role::parse);
                info!(user_id = %context.user.id, role = ?role, "User authenticated");

                Outcome::Success(SessionUser {
                    id: context.user.id,
                    email: context.user.email,
                    phone: context.user.phone,
                    role,
                })
            }
            Err(err) => {
                err.log_and_record("Role lookup in session guard");
                Outcome::Error((Status::ServiceUnavailable, ()))
            }
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<ValidationResponse>> {
    warn!("Unauthorized API request");
    Status::Unauthorized.to_validation_response()
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<ValidationResponse>> {
    warn!("Forbidden API request");
    Status::Forbidden.to_validation_response()
}

#[catch(default)]
pub fn default_api(status: Status, _req: &Request) -> Custom<Json<ValidationResponse>> {
    status.to_validation_response()
}
