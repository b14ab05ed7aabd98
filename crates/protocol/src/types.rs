use serde::{Deserialize, Serialize};

/// Wire name of a session state.
///
/// `Unknown` is only ever reported for keys the store has never seen (or has
/// already discarded); it is not a state a session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
	Unknown,
	Created,
	AcquiringId,
	IdAcquired,
	OtpRequested,
	Verifying,
	RetryOtp,
	Authenticating,
	Authenticated,
	Uploading,
	Published,
	Failed,
}

impl AttemptState {
	/// Returns `true` for `Published` and `Failed`.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Published | Self::Failed)
	}
}

/// Failure taxonomy as reported to polling clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
	AcquisitionTimeout,
	DispatchRejected,
	VerificationError,
	TokenExchangeError,
	UploadError,
	PublishError,
}

/// Standardized error codes for rejected control-surface calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	UnknownSession,
	DuplicateSession,
	InvalidState,
	InvalidInput,
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorCode::UnknownSession => write!(f, "UNKNOWN_SESSION"),
			ErrorCode::DuplicateSession => write!(f, "DUPLICATE_SESSION"),
			ErrorCode::InvalidState => write!(f, "INVALID_STATE"),
			ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
			ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn state_names_are_snake_case() {
		assert_eq!(serde_json::to_string(&AttemptState::RetryOtp).unwrap(), "\"retry_otp\"");
		assert_eq!(serde_json::to_string(&AttemptState::AcquiringId).unwrap(), "\"acquiring_id\"");
	}

	#[test]
	fn failure_codes_are_screaming_snake_case() {
		assert_eq!(serde_json::to_string(&FailureCode::TokenExchangeError).unwrap(), "\"TOKEN_EXCHANGE_ERROR\"");
	}

	#[test]
	fn error_code_display_matches_wire_name() {
		for code in [ErrorCode::UnknownSession, ErrorCode::InvalidState, ErrorCode::InternalError] {
			let wire = serde_json::to_string(&code).unwrap();
			assert_eq!(wire.trim_matches('"'), code.to_string());
		}
	}

	#[test]
	fn only_published_and_failed_are_terminal() {
		assert!(AttemptState::Published.is_terminal());
		assert!(AttemptState::Failed.is_terminal());
		assert!(!AttemptState::Authenticated.is_terminal());
		assert!(!AttemptState::Unknown.is_terminal());
	}
}
