//! Route Access Guard
//!
//! Evaluated before navigation, not per request. Checks the stored identity's
//! role against the roles a route declares.

use jwt_security::Role;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::GatekeeperConfig;
use crate::credential_store::CredentialStore;
use crate::failure::LoginRedirect;

const LOGIN_REASON: &str = "Please log in to continue.";
const BOOKINGS_LOGIN_REASON: &str = "Please log in again to view your bookings.";

/// Static access metadata for one navigable route
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAccessRule {
    pub path: String,
    /// Empty means any signed-in user
    #[serde(default, deserialize_with = "normalized_roles")]
    pub allowed_roles: HashSet<Role>,
}

impl RouteAccessRule {
    pub fn new(path: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            path: path.into(),
            allowed_roles: roles.into_iter().collect(),
        }
    }

    pub fn admits(&self, role: Role) -> bool {
        self.allowed_roles.is_empty() || self.allowed_roles.contains(&role)
    }
}

fn normalized_roles<'de, D>(deserializer: D) -> Result<HashSet<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(raw.iter().map(|r| Role::normalize(r)).collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    RedirectLogin(LoginRedirect),
    /// Signed in, but the route belongs to another role
    RedirectHome(&'static str),
}

pub struct RouteGuard {
    store: Arc<CredentialStore>,
    login_route: String,
}

impl RouteGuard {
    pub fn new(store: Arc<CredentialStore>, config: &GatekeeperConfig) -> Self {
        Self {
            store,
            login_route: config.login_route.clone(),
        }
    }

    /// Decide whether navigation to `target` may proceed under `rule`
    pub fn evaluate(&self, target: &str, rule: &RouteAccessRule) -> GuardDecision {
        let identity = self
            .store
            .snapshot()
            .and_then(|session| session.identity.clone());

        let Some(identity) = identity else {
            debug!(route = target, "Navigation requires login");
            return GuardDecision::RedirectLogin(self.login_redirect(target));
        };

        if rule.admits(identity.role) {
            return GuardDecision::Proceed;
        }

        let home = identity.role.home_path();
        debug!(route = target, role = %identity.role, home, "Role not admitted, redirecting home");
        GuardDecision::RedirectHome(home)
    }

    fn login_redirect(&self, target: &str) -> LoginRedirect {
        if is_bookings_view(target) {
            if let Some(username) = self.store.remembered_username() {
                return LoginRedirect::new(&self.login_route, BOOKINGS_LOGIN_REASON)
                    .with_return_url(Some(target.to_string()))
                    .with_username(Some(username));
            }
        }
        LoginRedirect::new(&self.login_route, LOGIN_REASON).with_return_url(Some(target.to_string()))
    }
}

fn is_bookings_view(target: &str) -> bool {
    target
        .split(['?', '#'])
        .next()
        .is_some_and(|path| path.contains("/bookings"))
}
