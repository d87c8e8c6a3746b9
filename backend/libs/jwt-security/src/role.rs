//! Storefront roles and the identity summary derived from a credential

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Claims;

/// The three storefront roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Organizer,
    Admin,
}

impl Role {
    /// Normalize a backend role string
    ///
    /// `"admin"`, `"ADMIN"` and `"ROLE_ADMIN"` all map to [`Role::Admin`].
    /// Strings that do not start with a known role name map to [`Role::User`].
    pub fn normalize(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("ROLE_").unwrap_or(&upper);

        if name.starts_with("ADMIN") {
            Role::Admin
        } else if name.starts_with("ORGANIZER") {
            Role::Organizer
        } else {
            Role::User
        }
    }

    /// Canonical backend spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Organizer => "ORGANIZER",
            Role::Admin => "ADMIN",
        }
    }

    /// Landing page for this role
    pub fn home_path(&self) -> &'static str {
        match self {
            Role::Admin => "/admin/dashboard",
            Role::Organizer => "/organizer/dashboard",
            Role::User => "/user/profile",
        }
    }

    /// Organizers and admins may manage shows
    pub fn can_manage_shows(&self) -> bool {
        matches!(self, Role::Organizer | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated identity summary
///
/// Lives exactly as long as the credential it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Option<String>,
    pub username: Option<String>,
    pub role: Role,
    /// Role string exactly as the backend sent it
    pub raw_role: Option<String>,
}

impl Identity {
    pub fn new(
        id: Option<String>,
        username: Option<String>,
        raw_role: Option<String>,
    ) -> Self {
        let role = raw_role.as_deref().map(Role::normalize).unwrap_or(Role::User);
        Self {
            id,
            username,
            role,
            raw_role,
        }
    }

    pub fn from_claims(claims: &Claims) -> Self {
        Self::new(
            claims.user_id().map(str::to_owned),
            claims.username.clone().or_else(|| claims.sub.clone()),
            claims.raw_role().map(str::to_owned),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_admin_spellings() {
        assert_eq!(Role::normalize("admin"), Role::Admin);
        assert_eq!(Role::normalize("ADMIN"), Role::Admin);
        assert_eq!(Role::normalize("ROLE_ADMIN"), Role::Admin);
        assert_eq!(Role::normalize(" role_admin "), Role::Admin);
    }

    #[test]
    fn test_normalize_prefix_match() {
        assert_eq!(Role::normalize("ORGANIZER_PENDING"), Role::Organizer);
        assert_eq!(Role::normalize("ROLE_ADMINISTRATOR"), Role::Admin);
    }

    #[test]
    fn test_normalize_unknown_defaults_to_user() {
        assert_eq!(Role::normalize("ROLE_GUEST"), Role::User);
        assert_eq!(Role::normalize(""), Role::User);
        assert_eq!(Role::normalize("superuser"), Role::User);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["admin", "ROLE_ORGANIZER", "user", "whatever"] {
            let once = Role::normalize(raw);
            assert_eq!(Role::normalize(once.as_str()), once);
        }
    }

    #[test]
    fn test_home_paths() {
        assert_eq!(Role::Admin.home_path(), "/admin/dashboard");
        assert_eq!(Role::Organizer.home_path(), "/organizer/dashboard");
        assert_eq!(Role::User.home_path(), "/user/profile");
    }

    #[test]
    fn test_show_management_rights() {
        assert!(Role::Admin.can_manage_shows());
        assert!(Role::Organizer.can_manage_shows());
        assert!(!Role::User.can_manage_shows());
    }

    #[test]
    fn test_identity_from_claims() {
        let claims = Claims {
            exp: 0,
            sub: Some("bob".to_string()),
            id: Some("7".to_string()),
            roles: vec!["ROLE_ORGANIZER".to_string()],
            ..Default::default()
        };

        let identity = Identity::from_claims(&claims);
        assert_eq!(identity.id.as_deref(), Some("7"));
        assert_eq!(identity.username.as_deref(), Some("bob"));
        assert_eq!(identity.role, Role::Organizer);
        assert_eq!(identity.raw_role.as_deref(), Some("ROLE_ORGANIZER"));
    }

    #[test]
    fn test_identity_without_role_is_user() {
        let identity = Identity::new(None, None, None);
        assert_eq!(identity.role, Role::User);
    }

    #[test]
    fn test_identity_serde_uses_camel_case() {
        let identity = Identity::new(Some("1".into()), None, Some("ROLE_ADMIN".into()));
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["rawRole"], "ROLE_ADMIN");
        assert_eq!(json["role"], "ADMIN");
    }
}
