//! Credential Store
//!
//! Holds the current bearer credential and identity summary for one client
//! session. Readers always see either the previous or the next whole
//! [`Session`]; every mutation swaps an `Arc` under a write lock.
//!
//! ## Epochs
//!
//! The epoch advances on login and on logout, never on refresh. A request that
//! started under one epoch and completes under another belongs to a session
//! that no longer exists; the gatekeeper drops its outcome.

use jwt_security::{decode_unverified, Identity};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::storage::{
    SessionStorage, FORCED_LOGOUT_KEY, IDENTITY_KEY, REFRESH_HANDLE_KEY, REMEMBERED_USERNAME_KEY,
    TOKEN_KEY,
};

/// Opaque bearer credential
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Everything the pipeline knows about the signed-in user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub credential: Credential,
    /// Side-channel handle the refresh endpoint accepts, if the backend issued one
    pub refresh_handle: Option<String>,
    pub identity: Option<Identity>,
}

impl Session {
    /// Session whose identity is read from the credential payload
    pub fn from_credential(credential: Credential, refresh_handle: Option<String>) -> Self {
        let identity = decode_unverified(credential.as_str())
            .ok()
            .map(|claims| Identity::from_claims(&claims));
        Self {
            credential,
            refresh_handle,
            identity,
        }
    }
}

#[derive(Default)]
struct State {
    session: Option<Arc<Session>>,
    epoch: u64,
}

pub struct CredentialStore {
    state: RwLock<State>,
    remembered_username: RwLock<Option<String>>,
    storage: Arc<dyn SessionStorage>,
    // Keeps persisted state in the same order as in-memory swaps
    persist: AsyncMutex<()>,
}

impl CredentialStore {
    /// Empty store backed by `storage`
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            remembered_username: RwLock::new(None),
            storage,
            persist: AsyncMutex::new(()),
        }
    }

    /// Load the persisted session
    ///
    /// An undecodable token is discarded rather than restored. An expired one
    /// is kept; the first protected request refreshes it.
    pub async fn restore(storage: Arc<dyn SessionStorage>) -> Result<Self, StorageError> {
        let store = Self::new(storage.clone());

        let remembered = storage.get(REMEMBERED_USERNAME_KEY).await?;
        *store.remembered_username.write() = remembered;

        let Some(token) = storage.get(TOKEN_KEY).await? else {
            return Ok(store);
        };

        let claims = match decode_unverified(&token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Discarding undecodable persisted credential");
                storage.remove(TOKEN_KEY).await?;
                storage.remove(REFRESH_HANDLE_KEY).await?;
                storage.remove(IDENTITY_KEY).await?;
                return Ok(store);
            }
        };

        let identity = match storage.get(IDENTITY_KEY).await? {
            Some(raw) => serde_json::from_str::<Identity>(&raw)
                .unwrap_or_else(|_| Identity::from_claims(&claims)),
            None => Identity::from_claims(&claims),
        };

        let session = Session {
            credential: Credential::new(token),
            refresh_handle: storage.get(REFRESH_HANDLE_KEY).await?,
            identity: Some(identity),
        };

        {
            let mut state = store.state.write();
            state.session = Some(Arc::new(session));
            state.epoch += 1;
        }

        info!("Restored persisted session");
        Ok(store)
    }

    /// Read and clear the forced-logout marker left by the previous run
    pub async fn take_forced_logout_marker(&self) -> Result<bool, StorageError> {
        let _guard = self.persist.lock().await;
        let marked = self.storage.get(FORCED_LOGOUT_KEY).await?.is_some();
        if marked {
            self.storage.remove(FORCED_LOGOUT_KEY).await?;
        }
        Ok(marked)
    }

    pub fn snapshot(&self) -> Option<Arc<Session>> {
        self.state.read().session.clone()
    }

    /// Current session together with the epoch it belongs to
    pub fn snapshot_with_epoch(&self) -> (Option<Arc<Session>>, u64) {
        let state = self.state.read();
        (state.session.clone(), state.epoch)
    }

    pub fn epoch(&self) -> u64 {
        self.state.read().epoch
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().session.is_some()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.snapshot().and_then(|s| s.identity.clone())
    }

    /// Username of the last signed-in user, kept across logout
    pub fn remembered_username(&self) -> Option<String> {
        self.remembered_username.read().clone()
    }

    /// Install a freshly signed-in session, replacing any previous one
    pub async fn install(&self, session: Session) -> Result<(), StorageError> {
        let _guard = self.persist.lock().await;
        let session = Arc::new(session);

        {
            let mut state = self.state.write();
            state.session = Some(session.clone());
            state.epoch += 1;
        }

        self.persist_session(&session).await?;

        if let Some(username) = session.identity.as_ref().and_then(|i| i.username.clone()) {
            self.storage.set(REMEMBERED_USERNAME_KEY, &username).await?;
            *self.remembered_username.write() = Some(username);
        }

        info!(
            role = ?session.identity.as_ref().map(|i| i.role),
            "Session installed"
        );
        Ok(())
    }

    /// Swap in a credential refreshed for the session at `epoch`
    ///
    /// Returns `None` without touching anything when that session ended while
    /// the refresh was in flight. A logout is never undone by a refresh, and a
    /// later sign-in never receives another session's credential.
    pub async fn replace_credential(
        &self,
        epoch: u64,
        credential: Credential,
        refresh_handle: Option<String>,
    ) -> Result<Option<Arc<Session>>, StorageError> {
        let _guard = self.persist.lock().await;

        let updated = {
            let mut state = self.state.write();
            if state.epoch != epoch {
                debug!(
                    expected = epoch,
                    current = state.epoch,
                    "Refreshed credential belongs to an ended session, dropping it"
                );
                return Ok(None);
            }
            let Some(current) = state.session.as_ref() else {
                debug!("Refreshed credential arrived after logout, dropping it");
                return Ok(None);
            };

            let identity = decode_unverified(credential.as_str())
                .ok()
                .map(|claims| Identity::from_claims(&claims))
                .or_else(|| current.identity.clone());

            let updated = Arc::new(Session {
                credential,
                refresh_handle: refresh_handle.or_else(|| current.refresh_handle.clone()),
                identity,
            });
            state.session = Some(updated.clone());
            updated
        };

        self.persist_session(&updated).await?;
        debug!("Credential replaced after refresh");
        Ok(Some(updated))
    }

    /// Remove the session; returns whether there was one
    pub async fn clear(&self) -> Result<bool, StorageError> {
        let _guard = self.persist.lock().await;
        self.clear_locked().await
    }

    /// Clear the session and leave the forced-logout marker for the next start
    ///
    /// With `Some(epoch)` nothing happens once the store has moved past that
    /// epoch, so a session installed after the failing request is left alone.
    /// Only the call that actually removes a session writes the marker, so
    /// concurrent escalations collapse into one logout.
    pub async fn force_logout_at(&self, epoch: Option<u64>) -> Result<bool, StorageError> {
        let _guard = self.persist.lock().await;
        let current = self.epoch();
        if epoch.is_some_and(|expected| expected != current) {
            debug!(expected = ?epoch, current, "Skipping logout for an ended session");
            return Ok(false);
        }

        let cleared = self.clear_locked().await?;
        if cleared {
            self.storage.set(FORCED_LOGOUT_KEY, "true").await?;
            warn!("Session force-terminated");
        }
        Ok(cleared)
    }

    async fn clear_locked(&self) -> Result<bool, StorageError> {
        let removed = {
            let mut state = self.state.write();
            let removed = state.session.take().is_some();
            if removed {
                state.epoch += 1;
            }
            removed
        };

        if removed {
            self.storage.remove(TOKEN_KEY).await?;
            self.storage.remove(REFRESH_HANDLE_KEY).await?;
            self.storage.remove(IDENTITY_KEY).await?;
        }
        Ok(removed)
    }

    async fn persist_session(&self, session: &Session) -> Result<(), StorageError> {
        self.storage
            .set(TOKEN_KEY, session.credential.as_str())
            .await?;

        match &session.refresh_handle {
            Some(handle) => self.storage.set(REFRESH_HANDLE_KEY, handle).await?,
            None => self.storage.remove(REFRESH_HANDLE_KEY).await?,
        }

        match &session.identity {
            Some(identity) => {
                self.storage
                    .set(IDENTITY_KEY, &serde_json::to_string(identity)?)
                    .await?
            }
            None => self.storage.remove(IDENTITY_KEY).await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use jwt_security::Role;
    use serde_json::json;

    fn token(username: &str, role: &str) -> Credential {
        let payload = json!({
            "sub": username,
            "role": role,
            "exp": chrono::Utc::now().timestamp() + 600,
        });
        Credential::new(
            encode(&Header::default(), &payload, &EncodingKey::from_secret(b"k")).unwrap(),
        )
    }

    fn memory() -> Arc<MemoryStorage> {
        Arc::new(MemoryStorage::new())
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("secret-token");
        assert!(!format!("{credential:?}").contains("secret-token"));
        assert_eq!(credential.bearer(), "Bearer secret-token");
    }

    #[tokio::test]
    async fn test_install_persists_and_remembers_username() {
        let storage = memory();
        let store = CredentialStore::new(storage.clone());

        store
            .install(Session::from_credential(token("alice", "ROLE_USER"), None))
            .await
            .unwrap();

        assert!(store.is_authenticated());
        assert_eq!(store.identity().unwrap().role, Role::User);
        assert_eq!(store.remembered_username().as_deref(), Some("alice"));
        assert!(storage.get(TOKEN_KEY).await.unwrap().is_some());
        assert!(storage.get(IDENTITY_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = CredentialStore::new(memory());
        store
            .install(Session::from_credential(token("alice", "USER"), None))
            .await
            .unwrap();
        let epoch = store.epoch();

        assert!(store.clear().await.unwrap());
        assert!(!store.clear().await.unwrap());
        assert_eq!(store.epoch(), epoch + 1);
        assert!(store.snapshot().is_none());
        assert_eq!(store.remembered_username().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_force_logout_marker_written_once_and_read_once() {
        let storage = memory();
        let store = CredentialStore::new(storage.clone());
        store
            .install(Session::from_credential(token("alice", "USER"), None))
            .await
            .unwrap();

        assert!(store.force_logout_at(None).await.unwrap());
        assert!(!store.force_logout_at(None).await.unwrap());

        let restored = CredentialStore::restore(storage.clone()).await.unwrap();
        assert!(!restored.is_authenticated());
        assert!(restored.take_forced_logout_marker().await.unwrap());
        assert!(!restored.take_forced_logout_marker().await.unwrap());
    }

    #[tokio::test]
    async fn test_force_logout_at_stale_epoch_keeps_new_session() {
        let store = CredentialStore::new(memory());
        store
            .install(Session::from_credential(token("alice", "USER"), None))
            .await
            .unwrap();
        let old_epoch = store.epoch();

        store
            .install(Session::from_credential(token("bob", "ADMIN"), None))
            .await
            .unwrap();

        assert!(!store.force_logout_at(Some(old_epoch)).await.unwrap());
        assert_eq!(store.identity().unwrap().username.as_deref(), Some("bob"));

        assert!(store.force_logout_at(Some(store.epoch())).await.unwrap());
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_replace_credential_keeps_epoch_and_handle() {
        let store = CredentialStore::new(memory());
        store
            .install(Session::from_credential(
                token("alice", "ROLE_USER"),
                Some("handle-1".into()),
            ))
            .await
            .unwrap();
        let epoch = store.epoch();

        let replaced = store
            .replace_credential(epoch, token("alice", "ROLE_ORGANIZER"), None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.epoch(), epoch);
        assert_eq!(replaced.refresh_handle.as_deref(), Some("handle-1"));
        assert_eq!(replaced.identity.as_ref().unwrap().role, Role::Organizer);
    }

    #[tokio::test]
    async fn test_replace_after_logout_does_not_resurrect() {
        let store = CredentialStore::new(memory());
        store
            .install(Session::from_credential(token("alice", "USER"), None))
            .await
            .unwrap();
        let epoch = store.epoch();
        store.clear().await.unwrap();

        let replaced = store
            .replace_credential(epoch, token("alice", "USER"), None)
            .await
            .unwrap();

        assert!(replaced.is_none());
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_replace_for_ended_session_leaves_new_sign_in_alone() {
        let store = CredentialStore::new(memory());
        store
            .install(Session::from_credential(token("alice", "USER"), None))
            .await
            .unwrap();
        let alice_epoch = store.epoch();

        store.clear().await.unwrap();
        let bob = token("bob", "ADMIN");
        store
            .install(Session::from_credential(bob.clone(), None))
            .await
            .unwrap();

        let replaced = store
            .replace_credential(alice_epoch, token("alice", "USER"), None)
            .await
            .unwrap();

        assert!(replaced.is_none());
        let session = store.snapshot().unwrap();
        assert_eq!(session.credential, bob);
        assert_eq!(session.identity.as_ref().unwrap().username.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let storage = memory();
        let store = CredentialStore::new(storage.clone());
        store
            .install(Session::from_credential(
                token("carol", "ROLE_ADMIN"),
                Some("handle".into()),
            ))
            .await
            .unwrap();

        let restored = CredentialStore::restore(storage).await.unwrap();
        let session = restored.snapshot().unwrap();
        assert_eq!(session.identity.as_ref().unwrap().role, Role::Admin);
        assert_eq!(session.refresh_handle.as_deref(), Some("handle"));
        assert!(!restored.take_forced_logout_marker().await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_discards_malformed_token() {
        let storage = memory();
        storage.set(TOKEN_KEY, "garbage").await.unwrap();
        storage.set(IDENTITY_KEY, "{}").await.unwrap();

        let restored = CredentialStore::restore(storage.clone()).await.unwrap();
        assert!(!restored.is_authenticated());
        assert_eq!(storage.get(TOKEN_KEY).await.unwrap(), None);
        assert_eq!(storage.get(IDENTITY_KEY).await.unwrap(), None);
    }
}
