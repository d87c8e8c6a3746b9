//! Client-side JWT inspection for the box-office request pipeline
//!
//! **Scope**:
//! - Read the `exp` claim of a bearer credential without network access
//! - Derive the authenticated identity (id, username, role) from its payload
//! - Normalize backend role strings onto the three storefront roles
//!
//! Signatures are never verified here. The backend owns verification; this
//! crate only short-circuits credentials that are obviously stale so the
//! pipeline does not waste a round trip on them.
//!
//! ## Fail-closed decoding
//!
//! A credential that cannot be decoded is reported as [`CredentialState::Malformed`]
//! and [`is_expired`] returns `true` for it, so callers re-authenticate instead of
//! sending the request without a credential.

mod claims;
mod inspect;
mod role;

pub use claims::Claims;
pub use inspect::{decode_unverified, inspect, is_expired, CredentialError, CredentialState};
pub use role::{Identity, Role};
