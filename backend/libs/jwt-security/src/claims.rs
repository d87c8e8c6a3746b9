//! JWT claims as issued by the box-office backend
//!
//! Only `exp` is mandatory. The backend has shipped several payload shapes over
//! time (`role` string, `roles` list, Spring-style `authorities`), so every
//! identity field is optional and unknown fields are ignored.

use serde::{Deserialize, Serialize};

/// Claims read from a bearer credential payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiration time (Unix timestamp, seconds)
    pub exp: i64,

    /// Issued at (Unix timestamp, seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Subject, usually the username or the user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Explicit user id, preferred over `sub` when present
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Single role string, e.g. `ROLE_ADMIN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorities: Vec<String>,
}

impl Claims {
    /// Raw role string as the backend sent it
    ///
    /// Lookup order: `role`, then the first of `roles`, then the first of `authorities`.
    pub fn raw_role(&self) -> Option<&str> {
        self.role
            .as_deref()
            .or_else(|| self.roles.first().map(String::as_str))
            .or_else(|| self.authorities.first().map(String::as_str))
    }

    /// User id, falling back to the subject
    pub fn user_id(&self) -> Option<&str> {
        self.id.as_deref().or(self.sub.as_deref())
    }
}

// Numeric ids are common in this backend (`"id": 42`); keep them as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
