use serde::Serialize;

use crate::error::AppError;
use crate::models::UserSummary;

use super::{Permission, Role};

/// The authenticated caller with their resolved role. A user without a role
/// row is still authenticated but holds no permissions.
#[derive(Debug, Serialize, Clone)]
pub struct SessionUser {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
}

impl SessionUser {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role
            .map(|role| role.has_permission(permission))
            .unwrap_or(false)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %self.id,
                role = ?self.role,
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(format!(
                "Missing permission {:?}",
                permission
            )))
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            email: self.email.clone().or_else(|| self.phone.clone()),
            role: self.role,
        }
    }
}
