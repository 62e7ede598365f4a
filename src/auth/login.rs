use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::db::get_role_name;
use crate::error::AppError;

use super::{AuthError, AuthSession, Identifier, IdentityProvider, Role};

pub const GENERIC_LOGIN_FAILURE: &str = "Sign-in failed. Please wait a moment and try again.";
pub const MISSING_ROLE_MESSAGE: &str =
    "No role is assigned to this account. Please contact the administrator.";
pub const MISSING_CREDENTIALS_MESSAGE: &str = "Enter your user ID and password.";

/// Maps a provider error code to the message shown on the login form.
/// Unknown codes fall back to the provider's own message.
pub fn translate_auth_error(code: Option<&str>, fallback: Option<&str>) -> String {
    let known = match code {
        Some("invalid_credentials") => {
            Some("The user ID or password is incorrect. Please try again.")
        }
        Some("email_not_confirmed") => Some(
            "The email address has not been confirmed. Use the link in the confirmation email to activate it.",
        ),
        Some("user_not_found") => Some("No matching user was found. Check what you entered."),
        Some("over_email_send_rate_limit") => {
            Some("Too many attempts were made. Please try again in a few minutes.")
        }
        Some("mfa_required") => Some(
            "Multi-factor authentication is required. Complete the extra step with your registered method.",
        ),
        _ => None,
    };

    known
        .or(fallback)
        .unwrap_or(GENERIC_LOGIN_FAILURE)
        .to_string()
}

#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated {
        session: AuthSession,
        role: Option<Role>,
        redirect: &'static str,
    },
    Rejected {
        message: String,
    },
}

/// Runs one password login attempt. Validation problems are returned as
/// errors; credential and role problems become [`LoginOutcome::Rejected`].
#[instrument(skip(identity, pool, password))]
pub async fn attempt_login(
    identity: &dyn IdentityProvider,
    pool: &Pool<Sqlite>,
    raw_identifier: &str,
    password: &str,
) -> Result<LoginOutcome, AppError> {
    let identifier = match Identifier::parse(raw_identifier) {
        Some(identifier) if !password.is_empty() => identifier,
        _ => return Err(AppError::invalid("identifier", MISSING_CREDENTIALS_MESSAGE)),
    };

    let session = match identity.sign_in_with_password(&identifier, password).await {
        Ok(session) => session,
        Err(err) => {
            warn!(code = err.code(), "Sign-in rejected");
            let fallback = match &err {
                AuthError::Backend(_) => None,
                other => Some(other.to_string()),
            };
            return Ok(LoginOutcome::Rejected {
                message: translate_auth_error(Some(err.code()), fallback.as_deref()),
            });
        }
    };

    let role_name = match get_role_name(pool, &session.user.id).await {
        Ok(role_name) => role_name,
        Err(err) => {
            err.log_and_record("Role lookup during login");
            None
        }
    };

    let Some(role_name) = role_name else {
        warn!(user_id = %session.user.id, "Signed in without a role row");
        if let Err(err) = identity.sign_out(&session.access_token).await {
            warn!(error = %err, "Failed to discard session of user without role");
        }
        return Ok(LoginOutcome::Rejected {
            message: MISSING_ROLE_MESSAGE.to_string(),
        });
    };

    let role = Role::parse(&role_name);
    let redirect = Role::dashboard_path(role);
    info!(user_id = %session.user.id, role = %role_name, redirect, "Login succeeded");

    Ok(LoginOutcome::Authenticated {
        session,
        role,
        redirect,
    })
}
