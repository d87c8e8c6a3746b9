//! Refresh Coordinator
//!
//! Exchanges a stale credential for a new one. Concurrent callers that observe
//! the same stale credential share one refresh call; a failed refresh is
//! terminal and is never retried here.

use async_trait::async_trait;
use chrono::Utc;
use jwt_security::is_expired;
use resilience::{with_timeout_result, SingleFlight, TimeoutConfig, TimeoutError};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::GatekeeperConfig;
use crate::credential_store::{Credential, CredentialStore, Session};
use crate::error::RefreshError;

/// Result of a successful refresh exchange
#[derive(Debug, Clone)]
pub struct RefreshedCredential {
    pub credential: Credential,
    /// Rotated refresh handle, when the backend issues a new one
    pub refresh_handle: Option<String>,
}

/// Performs the network exchange
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, session: &Session) -> Result<RefreshedCredential, RefreshError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshReply {
    #[serde(alias = "accessToken", alias = "access_token")]
    token: Option<String>,
    #[serde(alias = "refresh_token")]
    refresh_token: Option<String>,
}

/// Calls the backend refresh endpoint
///
/// The request carries no `Authorization` header; the credential may already
/// be expired. The refresh handle goes in the body when the backend issued
/// one, otherwise the current token does.
pub struct HttpTokenRefresher {
    client: Client,
    url: String,
}

impl HttpTokenRefresher {
    pub fn new(client: Client, config: &GatekeeperConfig) -> Self {
        Self {
            client,
            url: config.endpoint_url(&config.refresh_path),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, session: &Session) -> Result<RefreshedCredential, RefreshError> {
        let body = match &session.refresh_handle {
            Some(handle) => json!({ "refreshToken": handle }),
            None => json!({ "token": session.credential.as_str() }),
        };

        let response = self
            .client
            .post(&self.url)
            .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache")
            .json(&body)
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected { status });
        }

        let reply: RefreshReply = response
            .json()
            .await
            .map_err(|_| RefreshError::MissingToken)?;

        match reply.token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(RefreshedCredential {
                credential: Credential::new(token),
                refresh_handle: reply.refresh_token,
            }),
            None => Err(RefreshError::MissingToken),
        }
    }
}

type FlightResult = Result<Credential, RefreshError>;

pub struct RefreshCoordinator {
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<CredentialStore>,
    flights: SingleFlight<FlightResult>,
    timeout: TimeoutConfig,
    leeway: chrono::Duration,
}

impl RefreshCoordinator {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<CredentialStore>,
        config: &GatekeeperConfig,
    ) -> Self {
        Self {
            refresher,
            store,
            flights: SingleFlight::new("credential-refresh"),
            timeout: TimeoutConfig::from_secs(config.refresh_timeout_secs),
            leeway: config.expiry_leeway(),
        }
    }

    /// Obtain a usable credential in place of `stale` for the session at `epoch`
    ///
    /// When another caller already replaced `stale` with a credential that is
    /// still valid, that one is returned without a network call. Once the
    /// session at `epoch` has ended this fails with `NoSession`.
    pub async fn refresh(&self, stale: &Credential, epoch: u64) -> Result<Credential, RefreshError> {
        let (session, current) = self.store.snapshot_with_epoch();
        let session = session.ok_or(RefreshError::NoSession)?;
        if current != epoch {
            debug!(expected = epoch, current, "Refresh requested for an ended session");
            return Err(RefreshError::NoSession);
        }

        if session.credential != *stale
            && !is_expired(session.credential.as_str(), Utc::now(), self.leeway)
        {
            debug!("Credential already refreshed by a concurrent request");
            return Ok(session.credential.clone());
        }

        let refresher = self.refresher.clone();
        let store = self.store.clone();
        let timeout = self.timeout.clone();

        self.flights
            .run_keyed(epoch, move || async move {
                info!("Refreshing credential");
                let refreshed = match with_timeout_result(&timeout, refresher.refresh(&session)).await {
                    Ok(refreshed) => refreshed,
                    Err(TimeoutError::Elapsed(after)) => {
                        warn!(?after, "Credential refresh timed out");
                        return Err(RefreshError::TimedOut);
                    }
                    Err(TimeoutError::OperationFailed(e)) => {
                        warn!(error = %e, "Credential refresh failed");
                        return Err(e);
                    }
                };

                match store
                    .replace_credential(epoch, refreshed.credential, refreshed.refresh_handle)
                    .await
                {
                    Ok(Some(updated)) => {
                        info!("Credential refreshed");
                        Ok(updated.credential.clone())
                    }
                    Ok(None) => Err(RefreshError::NoSession),
                    Err(e) => {
                        warn!(error = %e, "Refreshed credential could not be persisted");
                        Err(RefreshError::Transport(e.to_string()))
                    }
                }
            })
            .await
    }
}
