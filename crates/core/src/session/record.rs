//! The whole-record snapshot kept in the [`SessionStore`](super::SessionStore).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use otpgate_protocol::{CredentialSummary, StateChange, StatusResponse};

use super::types::{Failure, RemoteIdentifier, SessionKey, SessionState};

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
	pub state: SessionState,
	pub at: u64,
}

/// Published view of one login attempt.
///
/// Records are immutable once stored; every change replaces the whole record
/// so readers always see a consistent snapshot. The cookie jar, the remote
/// client, and the raw credential never appear here: they stay private to the
/// worker that owns the session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
	pub key: SessionKey,
	pub state: SessionState,
	pub remote_identifier: Option<RemoteIdentifier>,
	pub credential: Option<CredentialSummary>,
	pub public_url: Option<String>,
	pub log: Vec<String>,
	pub snapshot: Option<Arc<[u8]>>,
	pub failure: Option<Failure>,
	pub retries: u32,
	pub history: Vec<Transition>,
	/// Set while a step is queued or running for this session.
	pub in_flight: bool,
	pub created_at: u64,
	pub updated_at: u64,
	/// Last time a client read this session; shared by every snapshot of the
	/// same session so reads never have to republish the record.
	last_seen: Arc<AtomicU64>,
}

impl SessionRecord {
	pub fn new(key: SessionKey) -> Self {
		let now = now_ms();
		Self {
			key,
			state: SessionState::Created,
			remote_identifier: None,
			credential: None,
			public_url: None,
			log: Vec::new(),
			snapshot: None,
			failure: None,
			retries: 0,
			history: vec![Transition {
				state: SessionState::Created,
				at: now,
			}],
			in_flight: false,
			created_at: now,
			updated_at: now,
			last_seen: Arc::new(AtomicU64::new(now)),
		}
	}

	/// Records a client read.
	pub fn touch(&self) {
		self.last_seen.fetch_max(now_ms(), Ordering::Relaxed);
	}

	pub fn last_seen(&self) -> u64 {
		self.last_seen.load(Ordering::Relaxed)
	}

	/// Latest write or client read, whichever is newer.
	pub fn last_activity(&self) -> u64 {
		self.updated_at.max(self.last_seen())
	}

	/// Number of times the record entered `state`.
	pub fn visits(&self, state: SessionState) -> usize {
		self.history.iter().filter(|t| t.state == state).count()
	}

	pub fn to_status(&self) -> StatusResponse {
		StatusResponse {
			session_key: self.key.to_string(),
			found: true,
			state: self.state.into(),
			log: self.log.clone(),
			snapshot: self.snapshot.as_ref().map(|png| STANDARD.encode(png)),
			remote_identifier: self.remote_identifier.as_ref().map(ToString::to_string),
			credential: self.credential.clone(),
			public_url: self.public_url.clone(),
			error: self.failure.as_ref().map(Failure::report),
			retries: self.retries,
			history: self
				.history
				.iter()
				.map(|t| StateChange {
					state: t.state.into(),
					at: t.at,
				})
				.collect(),
			updated_at: self.updated_at,
		}
	}
}
