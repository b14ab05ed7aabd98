//! Session domain model and the shared session store.
//!
//! A session is one login attempt. Its published state lives in the
//! [`SessionStore`] as a [`SessionRecord`]; everything that must not leak
//! across sessions (cookie jar, remote client, raw credential) stays inside
//! the orchestrator worker that owns it.

/// Whole-record snapshot type.
pub mod record;
/// Shared in-memory store.
pub mod store;
/// Keys, validated inputs, states, failures, credential.
pub mod types;

pub use record::{SessionRecord, Transition, now_ms};
pub use store::SessionStore;
pub use types::{Credential, Failure, FailureKind, OtpCode, PhoneNumber, RemoteIdentifier, SessionKey, SessionState, excerpt};
