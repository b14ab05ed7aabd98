use thiserror::Error;

use crate::session::SessionState;

/// Errors raised by the orchestrator and its collaborators.
///
/// Session-level outcomes (a rejected dispatch, a failed token exchange) are
/// not errors of this type; they are recorded on the session as a
/// [`Failure`](crate::session::Failure).
#[derive(Debug, Error)]
pub enum Error {
	#[error("Unknown session: {0}")]
	UnknownSession(String),

	#[error("Session {0} already exists")]
	DuplicateSession(String),

	#[error("Session {key} is {actual} (busy: {busy}); expected one of: {expected}")]
	InvalidState {
		key: String,
		actual: SessionState,
		busy: bool,
		expected: String,
	},

	#[error("Illegal transition {from} -> {to}")]
	IllegalTransition { from: SessionState, to: SessionState },

	#[error("{0} is already set for this session")]
	AlreadySet(&'static str),

	#[error("Invalid phone number: {0}")]
	InvalidPhone(String),

	#[error("Invalid verification code: expected 4-8 digits")]
	InvalidCode,

	#[error("Invalid session key: {0}")]
	InvalidSessionKey(String),

	#[error("Invalid URL {url}: {reason}")]
	InvalidUrl { url: String, reason: String },

	#[error("Unresolved placeholder in template: {0}")]
	Template(String),

	#[error("Invalid header {name}: {reason}")]
	InvalidHeader { name: String, reason: String },

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("Browser error: {0}")]
	Browser(String),

	#[error("Timed out after {waited_ms}ms waiting for URL matching {pattern}")]
	AcquisitionTimeout {
		waited_ms: u64,
		pattern: String,
		last_url: Option<String>,
	},

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
