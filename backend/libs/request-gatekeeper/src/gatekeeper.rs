//! Request Gatekeeper
//!
//! Every backend call goes through [`Gatekeeper::send`]:
//!
//! ```text
//! classify ─ public ──────────────────────────────► send bare
//!          └ protected ─ no credential ───────────► escalate (401-equivalent)
//!                       └ check expiry ─ stale ─► refresh ─┐
//!                                      └ fresh ────────────┴► attach & send
//! response ─ 401 ─ refresh endpoint / already refreshed ─► escalate
//!                └ otherwise ─► refresh once, resend ─► settle
//!          ─ 403 ─► failure classifier
//!          ─ other ─► caller
//! ```
//!
//! At most one refresh happens per call, whether it ran before the first send
//! or after a 401, so a backend that keeps answering 401 cannot loop us.

use chrono::Utc;
use jwt_security::{decode_unverified, inspect, Identity};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::classifier::{Access, EndpointClassifier};
use crate::config::GatekeeperConfig;
use crate::credential_store::{Credential, CredentialStore, Session};
use crate::error::{AuthFailure, GatekeeperError, RefreshError, Result};
use crate::failure::{FailureAction, FailureClassifier, LoginRedirect};
use crate::refresh::{HttpTokenRefresher, RefreshCoordinator, TokenRefresher};

/// An outbound call, cloned for every attempt
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl PendingRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| GatekeeperError::InvalidRequest(format!("Body not serializable: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(bytes);
        Ok(self)
    }
}

/// Where the call is made from
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Current screen route, used for the 401 exemption list and as the return URL
    pub route: Option<String>,
}

impl RequestContext {
    pub fn route(route: impl Into<String>) -> Self {
        Self {
            route: Some(route.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInReply {
    #[serde(alias = "accessToken", alias = "access_token")]
    token: Option<String>,
    #[serde(alias = "refresh_token")]
    refresh_token: Option<String>,
    id: Option<serde_json::Value>,
    username: Option<String>,
    role: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

pub struct Gatekeeper {
    client: Client,
    config: GatekeeperConfig,
    classifier: EndpointClassifier,
    failures: FailureClassifier,
    store: Arc<CredentialStore>,
    refresh: RefreshCoordinator,
}

impl Gatekeeper {
    /// Gatekeeper that refreshes through the backend refresh endpoint
    pub fn new(config: GatekeeperConfig, store: Arc<CredentialStore>) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        let refresher = Arc::new(HttpTokenRefresher::new(client.clone(), &config));
        Ok(Self::with_refresher(config, store, client, refresher))
    }

    pub fn with_refresher(
        config: GatekeeperConfig,
        store: Arc<CredentialStore>,
        client: Client,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            classifier: EndpointClassifier::new(&config),
            failures: FailureClassifier::new(&config),
            refresh: RefreshCoordinator::new(refresher, store.clone(), &config),
            client,
            config,
            store,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn classifier(&self) -> &EndpointClassifier {
        &self.classifier
    }

    pub fn config(&self) -> &GatekeeperConfig {
        &self.config
    }

    /// Send `request`, authenticating it when its endpoint requires it
    pub async fn send(&self, request: PendingRequest, ctx: &RequestContext) -> Result<Response> {
        let classification = self.classifier.explain(&request.url, &request.method);

        if classification.access == Access::Public {
            return self.send_public(request, ctx).await;
        }

        let (session, epoch) = self.store.snapshot_with_epoch();
        let Some(session) = session else {
            debug!(method = %request.method, url = %request.url, "Protected call without credential");
            return Err(self.escalate_unauthorized(AuthFailure::NoCredential, None, ctx).await);
        };

        let is_refresh_call = self.classifier.is_refresh_endpoint(&request.url);
        let mut credential = session.credential.clone();
        let mut refreshed = false;

        let state = inspect(credential.as_str(), Utc::now(), self.config.expiry_leeway());
        if state.needs_refresh() {
            debug!(?state, "Credential stale before send");
            credential = self.refresh_or_escalate(&credential, epoch, ctx).await?;
            refreshed = true;
        }

        let mut response = self.dispatch(&request, Some(&credential)).await?;

        if response.status() == StatusCode::UNAUTHORIZED && !is_refresh_call && !refreshed {
            if self.store.epoch() != epoch {
                return Err(GatekeeperError::SessionEnded);
            }
            info!(method = %request.method, url = %request.url, "401 received, refreshing once");
            credential = self.refresh_or_escalate(&credential, epoch, ctx).await?;
            response = self.dispatch(&request, Some(&credential)).await?;
        }

        self.settle(response, &request, epoch, ctx).await
    }

    /// [`send`](Self::send), then decode a successful JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: PendingRequest,
        ctx: &RequestContext,
    ) -> Result<T> {
        let response = self.send(request, ctx).await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    /// Sign in and install the resulting session
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<Identity> {
        let url = self.config.endpoint_url(&self.config.signin_path);
        let request = PendingRequest::post(url)
            .json(&json!({ "username": username, "password": password }))?;

        let response = self
            .send(request, &RequestContext::default())
            .await?
            .error_for_status()?;
        let reply: SignInReply = response.json().await?;

        let token = reply
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatekeeperError::InvalidRequest("Sign-in reply carried no token".into()))?;
        let claims = decode_unverified(&token).map_err(|e| {
            GatekeeperError::InvalidRequest(format!("Sign-in returned an unusable credential: {e}"))
        })?;

        let reply_id = reply.id.map(|id| match id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        let identity = Identity::new(
            claims.user_id().map(str::to_owned).or(reply_id),
            claims
                .username
                .clone()
                .or(reply.username)
                .or_else(|| claims.sub.clone())
                .or_else(|| Some(username.to_string())),
            claims
                .raw_role()
                .map(str::to_owned)
                .or(reply.role)
                .or_else(|| reply.roles.into_iter().next()),
        );

        self.store
            .install(Session {
                credential: Credential::new(token),
                refresh_handle: reply.refresh_token,
                identity: Some(identity.clone()),
            })
            .await?;

        info!(role = %identity.role, "Signed in");
        Ok(identity)
    }

    /// Voluntary logout; leaves no forced-logout marker
    pub async fn sign_out(&self) -> Result<()> {
        if self.store.clear().await? {
            info!("Signed out");
        }
        Ok(())
    }

    async fn send_public(&self, request: PendingRequest, ctx: &RequestContext) -> Result<Response> {
        let epoch = self.store.epoch();
        let response = self.dispatch(&request, None).await?;

        // A 401 from the refresh endpoint means the session cannot be renewed
        if response.status() == StatusCode::UNAUTHORIZED
            && self.classifier.is_refresh_endpoint(&request.url)
        {
            warn!("Refresh endpoint answered 401");
            return Err(self
                .escalate(AuthFailure::SessionInvalid, Some(epoch), ctx)
                .await);
        }

        Ok(response)
    }

    async fn refresh_or_escalate(
        &self,
        stale: &Credential,
        epoch: u64,
        ctx: &RequestContext,
    ) -> Result<Credential> {
        match self.refresh.refresh(stale, epoch).await {
            Ok(credential) => Ok(credential),
            Err(RefreshError::NoSession) if self.store.epoch() != epoch => {
                Err(GatekeeperError::SessionEnded)
            }
            Err(e) => {
                warn!(error = %e, "Credential refresh failed");
                Err(self.escalate(AuthFailure::RefreshFailed, Some(epoch), ctx).await)
            }
        }
    }

    async fn settle(
        &self,
        response: Response,
        request: &PendingRequest,
        epoch: u64,
        ctx: &RequestContext,
    ) -> Result<Response> {
        if self.store.epoch() != epoch {
            debug!(url = %request.url, "Dropping response for an ended session");
            return Err(GatekeeperError::SessionEnded);
        }

        let status = response.status();
        if status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN {
            return Ok(response);
        }

        let role = self.store.identity().map(|identity| identity.role);
        let action = self.failures.classify(
            status,
            &request.url,
            &request.method,
            role,
            ctx.route.as_deref(),
        );

        match action {
            FailureAction::PassThrough if status == StatusCode::UNAUTHORIZED => {
                info!(route = ?ctx.route, "401 left to the calling screen");
                Err(GatekeeperError::Unauthorized)
            }
            FailureAction::PassThrough => Ok(response),
            FailureAction::DomainPermissionError(message) => {
                info!(method = %request.method, url = %request.url, "Action not permitted");
                Err(GatekeeperError::PermissionDenied { message })
            }
            FailureAction::ForceLogoutRedirect => {
                let cause = if status == StatusCode::FORBIDDEN {
                    AuthFailure::Forbidden
                } else {
                    AuthFailure::SessionInvalid
                };
                Err(self.escalate(cause, Some(epoch), ctx).await)
            }
        }
    }

    /// Terminal 401 equivalent that still honours the exemption list
    async fn escalate_unauthorized(
        &self,
        cause: AuthFailure,
        epoch: Option<u64>,
        ctx: &RequestContext,
    ) -> GatekeeperError {
        if ctx
            .route
            .as_deref()
            .is_some_and(|route| self.failures.is_graceful_route(route))
        {
            return GatekeeperError::Unauthorized;
        }
        self.escalate(cause, epoch, ctx).await
    }

    /// Clear the session, leave the marker and build the login redirect
    async fn escalate(
        &self,
        cause: AuthFailure,
        epoch: Option<u64>,
        ctx: &RequestContext,
    ) -> GatekeeperError {
        match self.store.force_logout_at(epoch).await {
            Ok(true) => warn!(?cause, "Forced logout"),
            Ok(false) => debug!(?cause, "Session already ended"),
            Err(e) => warn!(error = %e, ?cause, "Forced logout could not be persisted"),
        }

        // A session signed in after this request started is not ours to end
        if self.store.is_authenticated() {
            return GatekeeperError::SessionEnded;
        }

        GatekeeperError::ForcedLogout {
            cause,
            redirect: LoginRedirect::new(&self.config.login_route, cause.reason())
                .with_return_url(ctx.route.clone()),
        }
    }

    async fn dispatch(
        &self,
        request: &PendingRequest,
        credential: Option<&Credential>,
    ) -> Result<Response> {
        let url = self.resolve(&request.url)?;

        let mut headers = request.headers.clone();
        headers.remove(AUTHORIZATION);

        if let Some(credential) = credential {
            if url.origin() != self.config.api_base_url.origin() {
                warn!(host = ?url.host_str(), "Refusing to send a credential off the API origin");
                return Err(GatekeeperError::InvalidRequest(format!(
                    "Credential not sent to foreign origin {}",
                    url.origin().ascii_serialization()
                )));
            }
            let bearer = HeaderValue::from_str(&credential.bearer()).map_err(|_| {
                GatekeeperError::InvalidRequest("Credential is not a valid header value".into())
            })?;
            headers.insert(AUTHORIZATION, bearer);
            headers.insert(
                CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            );
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        debug!(
            method = %request.method,
            url = %request.url,
            status = response.status().as_u16(),
            authenticated = credential.is_some(),
            "Response received"
        );
        Ok(response)
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        self.config
            .api_base_url
            .join(url)
            .map_err(|e| GatekeeperError::InvalidRequest(format!("Bad URL {url:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn gatekeeper() -> Gatekeeper {
        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStorage::new())));
        let config = GatekeeperConfig::for_base_url("https://api.boxoffice.test").unwrap();
        Gatekeeper::new(config, store).unwrap()
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let gk = gatekeeper();
        assert_eq!(
            gk.resolve("/api/shows/1").unwrap().as_str(),
            "https://api.boxoffice.test/api/shows/1"
        );
        assert_eq!(
            gk.resolve("https://cdn.example.com/a.png").unwrap().as_str(),
            "https://cdn.example.com/a.png"
        );
        assert_eq!(
            gk.resolve("//cdn.example.com/a.png").unwrap().as_str(),
            "https://cdn.example.com/a.png"
        );
    }

    #[tokio::test]
    async fn test_credential_never_leaves_the_api_origin() {
        let gk = gatekeeper();
        let credential = Credential::new("secret");

        for url in [
            "https://elsewhere.test/api/bookings",
            "//elsewhere.test/api/bookings",
            "http://api.boxoffice.test/api/bookings",
        ] {
            let err = gk
                .dispatch(&PendingRequest::get(url), Some(&credential))
                .await
                .unwrap_err();
            assert!(matches!(err, GatekeeperError::InvalidRequest(_)), "{url}: {err:?}");
        }
    }

    #[test]
    fn test_pending_request_json_sets_content_type() {
        let request = PendingRequest::post("/api/bookings")
            .json(&json!({"scheduleId": 3}))
            .unwrap();

        assert_eq!(request.headers[CONTENT_TYPE], "application/json");
        assert_eq!(request.body.as_deref(), Some(br#"{"scheduleId":3}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_protected_call_without_credential_never_leaves_the_process() {
        // No server is listening on api.boxoffice.test; any network attempt would
        // surface as a transport error instead.
        let gk = gatekeeper();
        let err = gk
            .send(PendingRequest::get("/api/bookings"), &RequestContext::route("/checkout"))
            .await
            .unwrap_err();

        match err {
            GatekeeperError::ForcedLogout { cause, redirect } => {
                assert_eq!(cause, AuthFailure::NoCredential);
                assert_eq!(redirect.return_url.as_deref(), Some("/checkout"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_credential_on_graceful_route() {
        let gk = gatekeeper();
        let err = gk
            .send(PendingRequest::get("/api/bookings"), &RequestContext::route("/user/bookings"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatekeeperError::Unauthorized));
    }
}
