//! Session domain types: keys, validated inputs, states, failures, credential.

use std::fmt;
use std::str::FromStr;

use otpgate_protocol::{AttemptState, CredentialSummary, FailureCode, FailureReport};

use crate::error::Error;

/// Upper bound for diagnostic excerpts copied from remote responses.
pub const EXCERPT_LIMIT: usize = 512;

/// Caller-visible correlation key of one login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
	/// Generates a fresh random key.
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().simple().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl TryFrom<String> for SessionKey {
	type Error = Error;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		let valid = !s.is_empty() && s.len() <= 128 && s.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
		if valid { Ok(Self(s)) } else { Err(Error::InvalidSessionKey(s)) }
	}
}

impl FromStr for SessionKey {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::try_from(s.to_owned())
	}
}

impl From<SessionKey> for String {
	fn from(key: SessionKey) -> Self {
		key.0
	}
}

/// Opaque per-attempt token issued by the remote service on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteIdentifier(String);

impl RemoteIdentifier {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RemoteIdentifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Validated phone number: 10-15 digits, optional leading `+`.
///
/// Spaces and dashes are stripped on parse, so `"0300-123 4567"` and
/// `"03001234567"` are the same number.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Returns the number with all but the last four digits hidden.
	pub fn masked(&self) -> String {
		let visible = self.0.len().saturating_sub(4);
		format!("{}{}", "*".repeat(visible), &self.0[visible..])
	}
}

impl fmt::Debug for PhoneNumber {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("PhoneNumber").field(&self.masked()).finish()
	}
}

impl FromStr for PhoneNumber {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let compact: String = s.trim().chars().filter(|c| !matches!(c, ' ' | '-')).collect();
		let digits = compact.strip_prefix('+').unwrap_or(&compact);
		if (10..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) {
			Ok(Self(compact))
		} else {
			Err(Error::InvalidPhone(s.to_string()))
		}
	}
}

/// Validated one-time code: 4-8 ASCII digits.
#[derive(Clone, PartialEq, Eq)]
pub struct OtpCode(String);

impl OtpCode {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for OtpCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("OtpCode(****)")
	}
}

impl FromStr for OtpCode {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if (4..=8).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit()) {
			Ok(Self(s.to_string()))
		} else {
			Err(Error::InvalidCode)
		}
	}
}

/// Position of a session in the login state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
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

impl SessionState {
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Published | Self::Failed)
	}

	/// Whether `self -> next` is a legal edge.
	///
	/// Every edge moves forward except the `Verifying -> RetryOtp -> OtpRequested`
	/// cycle. Any non-terminal state may fail.
	pub fn can_advance_to(self, next: SessionState) -> bool {
		use SessionState::*;
		match (self, next) {
			(from, Failed) => !from.is_terminal(),
			(Created, AcquiringId)
			| (AcquiringId, IdAcquired)
			| (IdAcquired, OtpRequested)
			| (OtpRequested, Verifying)
			| (Verifying, Authenticating)
			| (Verifying, RetryOtp)
			| (RetryOtp, OtpRequested)
			| (Authenticating, Authenticated)
			| (Authenticated, Uploading)
			| (Uploading, Published) => true,
			_ => false,
		}
	}

	/// States in which a verification code may be submitted.
	pub const ACCEPTS_CODE: &'static [SessionState] = &[SessionState::OtpRequested, SessionState::RetryOtp];

	/// States in which an upload may be submitted.
	pub const ACCEPTS_UPLOAD: &'static [SessionState] = &[SessionState::Authenticated];
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SessionState::Created => "created",
			SessionState::AcquiringId => "acquiring_id",
			SessionState::IdAcquired => "id_acquired",
			SessionState::OtpRequested => "otp_requested",
			SessionState::Verifying => "verifying",
			SessionState::RetryOtp => "retry_otp",
			SessionState::Authenticating => "authenticating",
			SessionState::Authenticated => "authenticated",
			SessionState::Uploading => "uploading",
			SessionState::Published => "published",
			SessionState::Failed => "failed",
		};
		f.write_str(name)
	}
}

impl From<SessionState> for AttemptState {
	fn from(state: SessionState) -> Self {
		match state {
			SessionState::Created => AttemptState::Created,
			SessionState::AcquiringId => AttemptState::AcquiringId,
			SessionState::IdAcquired => AttemptState::IdAcquired,
			SessionState::OtpRequested => AttemptState::OtpRequested,
			SessionState::Verifying => AttemptState::Verifying,
			SessionState::RetryOtp => AttemptState::RetryOtp,
			SessionState::Authenticating => AttemptState::Authenticating,
			SessionState::Authenticated => AttemptState::Authenticated,
			SessionState::Uploading => AttemptState::Uploading,
			SessionState::Published => AttemptState::Published,
			SessionState::Failed => AttemptState::Failed,
		}
	}
}

/// Terminal failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
	/// Browser never reached the destination pattern.
	AcquisitionTimeout,
	/// Remote service declined the phone number.
	DispatchRejected,
	/// Unclassifiable response to an OTP submission.
	VerificationError,
	/// Authorization code rejected or credential missing from response.
	TokenExchangeError,
	UploadError,
	PublishError,
}

impl From<FailureKind> for FailureCode {
	fn from(kind: FailureKind) -> Self {
		match kind {
			FailureKind::AcquisitionTimeout => FailureCode::AcquisitionTimeout,
			FailureKind::DispatchRejected => FailureCode::DispatchRejected,
			FailureKind::VerificationError => FailureCode::VerificationError,
			FailureKind::TokenExchangeError => FailureCode::TokenExchangeError,
			FailureKind::UploadError => FailureCode::UploadError,
			FailureKind::PublishError => FailureCode::PublishError,
		}
	}
}

/// A terminal failure with the best available diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
	pub kind: FailureKind,
	pub detail: String,
}

impl Failure {
	pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
		Self { kind, detail: detail.into() }
	}

	pub fn report(&self) -> FailureReport {
		FailureReport {
			kind: self.kind.into(),
			detail: self.detail.clone(),
		}
	}
}

impl fmt::Display for Failure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}: {}", self.kind, self.detail)
	}
}

/// Validation key plus refreshed session cookie authorizing upload/publish.
///
/// Built once by the token exchange and never mutated afterwards.
#[derive(Clone)]
pub struct Credential {
	validation_key: String,
	session_cookie: Option<(String, String)>,
	obtained_at: u64,
}

impl Credential {
	pub fn new(validation_key: impl Into<String>, session_cookie: Option<(String, String)>, obtained_at: u64) -> Self {
		Self {
			validation_key: validation_key.into(),
			session_cookie,
			obtained_at,
		}
	}

	pub fn validation_key(&self) -> &str {
		&self.validation_key
	}

	/// Cookie `(name, value)` captured at token exchange, when the contract names one.
	pub fn session_cookie(&self) -> Option<(&str, &str)> {
		self.session_cookie.as_ref().map(|(n, v)| (n.as_str(), v.as_str()))
	}

	pub fn summary(&self) -> CredentialSummary {
		CredentialSummary {
			validation_key: mask(&self.validation_key),
			session_cookie: self.session_cookie.as_ref().map(|(name, _)| name.clone()),
			obtained_at: self.obtained_at,
		}
	}
}

impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credential")
			.field("validation_key", &mask(&self.validation_key))
			.field("session_cookie", &self.session_cookie.as_ref().map(|(name, _)| name))
			.field("obtained_at", &self.obtained_at)
			.finish()
	}
}

/// Shows a four-character prefix only for secrets longer than eight characters.
fn mask(secret: &str) -> String {
	if secret.chars().count() <= 8 {
		return "****".to_string();
	}
	let shown: String = secret.chars().take(4).collect();
	format!("{shown}****")
}

/// Truncates `text` to [`EXCERPT_LIMIT`] bytes on a char boundary.
pub fn excerpt(text: &str) -> String {
	let text = text.trim();
	if text.len() <= EXCERPT_LIMIT {
		return text.to_string();
	}
	let mut end = EXCERPT_LIMIT;
	while !text.is_char_boundary(end) {
		end -= 1;
	}
	format!("{}...", &text[..end])
}
