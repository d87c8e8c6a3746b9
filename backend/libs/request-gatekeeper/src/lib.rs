//! Request Gatekeeper for the box-office storefront client
//!
//! Every outbound backend call passes through [`Gatekeeper::send`], which
//! decides whether the endpoint needs a credential, refreshes an expired one
//! before sending, retries exactly once after a 401 and turns terminal
//! failures into either a typed error or a forced logout with a login redirect.
//!
//! # Example
//!
//! ```rust,no_run
//! use request_gatekeeper::{
//!     CredentialStore, Gatekeeper, GatekeeperConfig, MemoryStorage, PendingRequest,
//!     RequestContext,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> request_gatekeeper::Result<()> {
//! let store = Arc::new(CredentialStore::new(Arc::new(MemoryStorage::new())));
//! let gatekeeper = Gatekeeper::new(GatekeeperConfig::development(), store)?;
//!
//! gatekeeper.sign_in("alice", "secret").await?;
//! let response = gatekeeper
//!     .send(PendingRequest::get("/api/bookings"), &RequestContext::route("/user/bookings"))
//!     .await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod failure;
pub mod gatekeeper;
pub mod refresh;
pub mod route_guard;
pub mod storage;

pub use classifier::{Access, Classification, EndpointClassifier};
pub use config::{ConfigError, GatekeeperConfig};
pub use credential_store::{Credential, CredentialStore, Session};
pub use error::{AuthFailure, GatekeeperError, RefreshError, Result, StorageError};
pub use failure::{FailureAction, FailureClassifier, LoginRedirect};
pub use gatekeeper::{Gatekeeper, PendingRequest, RequestContext};
pub use refresh::{HttpTokenRefresher, RefreshCoordinator, RefreshedCredential, TokenRefresher};
pub use route_guard::{GuardDecision, RouteAccessRule, RouteGuard};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};

pub use jwt_security::{Identity, Role};
