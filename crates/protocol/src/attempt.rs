use serde::{Deserialize, Serialize};

use crate::types::{AttemptState, FailureCode};

/// Body of `StartAttempt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAttemptRequest {
	pub phone: String,
	/// Caller-chosen correlation key; generated when omitted.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_key: Option<String>,
}

/// Result of `StartAttempt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAttemptResponse {
	pub session_key: String,
	pub state: AttemptState,
}

/// Body of `SubmitCode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCodeRequest {
	pub code: String,
}

/// Acknowledgment for work enqueued on a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
	pub session_key: String,
	pub accepted: bool,
	/// State observed at enqueue time; may already be stale when read.
	pub state: AttemptState,
}

/// Result of `DiscardAttempt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardResponse {
	pub session_key: String,
	pub discarded: bool,
}

/// Terminal failure details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
	pub kind: FailureCode,
	pub detail: String,
}

/// Masked view of the credential; raw values never leave the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
	pub validation_key: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_cookie: Option<String>,
	pub obtained_at: u64,
}

/// One recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
	pub state: AttemptState,
	pub at: u64,
}

/// Latest-state view returned by `GetStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
	pub session_key: String,
	pub found: bool,
	pub state: AttemptState,
	#[serde(default)]
	pub log: Vec<String>,
	/// Base64-encoded PNG of the browser while acquisition runs.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub snapshot: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remote_identifier: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub credential: Option<CredentialSummary>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub public_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<FailureReport>,
	#[serde(default)]
	pub retries: u32,
	#[serde(default)]
	pub history: Vec<StateChange>,
	#[serde(default)]
	pub updated_at: u64,
}

impl StatusResponse {
	/// Status reported for a key the store does not hold.
	pub fn unknown(session_key: impl Into<String>) -> Self {
		Self {
			session_key: session_key.into(),
			found: false,
			state: AttemptState::Unknown,
			log: Vec::new(),
			snapshot: None,
			remote_identifier: None,
			credential: None,
			public_url: None,
			error: None,
			retries: 0,
			history: Vec::new(),
			updated_at: 0,
		}
	}
}
