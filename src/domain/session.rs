//! Authenticated caller identity carried through a request.

use serde::{Deserialize, Serialize};

const ADMIN_ROLES: [&str; 3] = ["admin", "superAdmin", "moderator"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub role_id: Option<String>,
    pub tenant_id: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub mobile_verified: bool,
    pub email_two_factor_pending: bool,
    pub mobile_two_factor_pending: bool,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        !self.session_id.is_empty()
    }

    pub fn is_admin(&self) -> bool {
        self.role_id
            .as_deref()
            .is_some_and(|role| ADMIN_ROLES.contains(&role))
    }

    pub fn has_role(&self, roles: &[&str]) -> bool {
        self.role_id
            .as_deref()
            .is_some_and(|role| roles.contains(&role))
    }

    pub fn two_factor_pending(&self) -> bool {
        self.email_two_factor_pending || self.mobile_two_factor_pending
    }
}
