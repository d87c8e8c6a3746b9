//! Failure Classifier
//!
//! Maps a terminal 401/403 plus the shape of the failed call to what the user
//! should see. A 403 on a show mutation means the session is fine but the
//! action is not allowed, so it becomes a role-aware message instead of a
//! logout.

use jwt_security::Role;
use reqwest::{Method, StatusCode};
use url::form_urlencoded;

use crate::classifier::{EndpointLocator, PathPattern, Target};
use crate::config::GatekeeperConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    ForceLogoutRedirect,
    DomainPermissionError(String),
    PassThrough,
}

/// Navigation target after a logout or a failed route check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    pub login_route: String,
    /// Route to come back to after signing in
    pub return_url: Option<String>,
    pub reason: String,
    /// Remembered username, pre-filled on the login form
    pub username: Option<String>,
}

impl LoginRedirect {
    pub fn new(login_route: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            login_route: login_route.into(),
            return_url: None,
            reason: reason.into(),
            username: None,
        }
    }

    pub fn with_return_url(mut self, return_url: Option<String>) -> Self {
        self.return_url = return_url;
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// `/login?returnUrl=..&reason=..&username=..`
    pub fn location(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(return_url) = &self.return_url {
            query.append_pair("returnUrl", return_url);
        }
        query.append_pair("reason", &self.reason);
        if let Some(username) = &self.username {
            query.append_pair("username", username);
        }
        format!("{}?{}", self.login_route, query.finish())
    }
}

#[derive(Debug, Clone)]
pub struct FailureClassifier {
    locator: EndpointLocator,
    show: PathPattern,
    graceful_routes: Vec<String>,
}

impl FailureClassifier {
    pub fn new(config: &GatekeeperConfig) -> Self {
        Self {
            locator: EndpointLocator::new(config),
            show: PathPattern::parse("/shows/{id}"),
            graceful_routes: config.graceful_auth_routes.clone(),
        }
    }

    /// Decide the outcome of a terminal failure
    ///
    /// `role` is `None` when no one is signed in. `route` is the screen the
    /// call was made from and only matters for 401.
    pub fn classify(
        &self,
        status: StatusCode,
        url: &str,
        method: &Method,
        role: Option<Role>,
        route: Option<&str>,
    ) -> FailureAction {
        match status {
            StatusCode::UNAUTHORIZED => {
                if route.is_some_and(|r| self.is_graceful_route(r)) {
                    FailureAction::PassThrough
                } else {
                    FailureAction::ForceLogoutRedirect
                }
            }
            StatusCode::FORBIDDEN => match self.show_mutation_verb(url, method) {
                Some(verb) => FailureAction::DomainPermissionError(show_permission_message(verb, role)),
                None => FailureAction::ForceLogoutRedirect,
            },
            _ => FailureAction::PassThrough,
        }
    }

    /// Routes on the exemption list handle a terminal 401 themselves
    pub fn is_graceful_route(&self, route: &str) -> bool {
        let path = route.split(['?', '#']).next().unwrap_or_default();
        self.graceful_routes.iter().any(|r| path.contains(r.as_str()))
    }

    fn show_mutation_verb(&self, url: &str, method: &Method) -> Option<&'static str> {
        let verb = match *method {
            Method::PUT | Method::PATCH => "update",
            Method::DELETE => "delete",
            _ => return None,
        };
        match self.locator.locate(url) {
            Target::Api(segments) if self.show.matches(&segments) => Some(verb),
            _ => None,
        }
    }
}

fn show_permission_message(verb: &str, role: Option<Role>) -> String {
    match role {
        None => format!("You must be logged in with an Organizer or Admin role to {verb} shows."),
        Some(role) if role.can_manage_shows() => format!(
            "You do not have permission to {verb} this show. You may not be its creator."
        ),
        Some(_) => format!(
            "Regular users cannot {verb} shows. Only Organizer or Admin accounts can manage shows."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FailureClassifier {
        FailureClassifier::new(&GatekeeperConfig::development())
    }

    #[test]
    fn test_show_update_forbidden_for_user() {
        let action = classifier().classify(
            StatusCode::FORBIDDEN,
            "/api/shows/7",
            &Method::PUT,
            Some(Role::User),
            None,
        );
        match action {
            FailureAction::DomainPermissionError(message) => {
                assert!(message.contains("Organizer or Admin"));
                assert!(message.contains("Regular users"));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_show_update_forbidden_for_organizer_differs() {
        let c = classifier();
        let user = c.classify(StatusCode::FORBIDDEN, "/api/shows/7", &Method::PUT, Some(Role::User), None);
        let organizer = c.classify(
            StatusCode::FORBIDDEN,
            "/api/shows/7",
            &Method::PUT,
            Some(Role::Organizer),
            None,
        );

        assert_ne!(user, organizer);
        assert!(matches!(
            organizer,
            FailureAction::DomainPermissionError(ref m) if m.contains("creator")
        ));
    }

    #[test]
    fn test_show_mutation_messages_follow_show_management_rights() {
        let c = classifier();
        let message = |role| match c.classify(
            StatusCode::FORBIDDEN,
            "/api/shows/7",
            &Method::PATCH,
            Some(role),
            None,
        ) {
            FailureAction::DomainPermissionError(message) => message,
            other => panic!("unexpected action {other:?}"),
        };

        assert_eq!(message(Role::Admin), message(Role::Organizer));
        assert_eq!(
            message(Role::Admin),
            "You do not have permission to update this show. You may not be its creator."
        );
        assert_eq!(
            message(Role::User),
            "Regular users cannot update shows. Only Organizer or Admin accounts can manage shows."
        );
    }

    #[test]
    fn test_show_delete_forbidden_when_signed_out() {
        let action = classifier().classify(
            StatusCode::FORBIDDEN,
            "/api/shows/7",
            &Method::DELETE,
            None,
            None,
        );
        assert_eq!(
            action,
            FailureAction::DomainPermissionError(
                "You must be logged in with an Organizer or Admin role to delete shows.".into()
            )
        );
    }

    #[test]
    fn test_forbidden_elsewhere_forces_logout() {
        let c = classifier();
        assert_eq!(
            c.classify(StatusCode::FORBIDDEN, "/api/bookings", &Method::GET, Some(Role::User), None),
            FailureAction::ForceLogoutRedirect
        );
        // Creating a show is not a mutation of a specific show
        assert_eq!(
            c.classify(StatusCode::FORBIDDEN, "/api/shows", &Method::POST, Some(Role::User), None),
            FailureAction::ForceLogoutRedirect
        );
        assert_eq!(
            c.classify(StatusCode::FORBIDDEN, "/api/shows/7/reviews", &Method::DELETE, Some(Role::User), None),
            FailureAction::ForceLogoutRedirect
        );
    }

    #[test]
    fn test_unauthorized_respects_graceful_routes() {
        let c = classifier();
        assert_eq!(
            c.classify(StatusCode::UNAUTHORIZED, "/api/bookings", &Method::GET, None, Some("/user/bookings")),
            FailureAction::PassThrough
        );
        assert_eq!(
            c.classify(StatusCode::UNAUTHORIZED, "/api/shows/3", &Method::PUT, None, Some("/organizer/shows/edit/3")),
            FailureAction::PassThrough
        );
        assert_eq!(
            c.classify(StatusCode::UNAUTHORIZED, "/api/bookings", &Method::GET, None, Some("/user/profile")),
            FailureAction::ForceLogoutRedirect
        );
        assert_eq!(
            c.classify(StatusCode::UNAUTHORIZED, "/api/bookings", &Method::GET, None, None),
            FailureAction::ForceLogoutRedirect
        );
    }

    #[test]
    fn test_other_statuses_pass_through() {
        let c = classifier();
        for status in [StatusCode::NOT_FOUND, StatusCode::INTERNAL_SERVER_ERROR, StatusCode::OK] {
            assert_eq!(
                c.classify(status, "/api/shows/7", &Method::PUT, Some(Role::Admin), None),
                FailureAction::PassThrough
            );
        }
    }

    #[test]
    fn test_login_redirect_location() {
        let redirect = LoginRedirect::new("/login", "Your session has expired.")
            .with_return_url(Some("/user/bookings?page=2".into()))
            .with_username(Some("alice".into()));

        assert_eq!(
            redirect.location(),
            "/login?returnUrl=%2Fuser%2Fbookings%3Fpage%3D2&reason=Your+session+has+expired.&username=alice"
        );
    }
}
