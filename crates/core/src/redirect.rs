//! Redirect-chain interpretation.
//!
//! Every function here is pure: it looks at a URL, a `Location` value, or a
//! response body and pulls out a token or a verdict. Absence is always `None`,
//! never an error, and a key present with an empty value is `Some("")`.

use serde_json::Value;
use url::Url;

use crate::contract::FailurePolicy;

/// Value of the query parameter `key` in `url`, percent-decoded.
///
/// Works on absolute URLs, relative `Location` values, and bare query
/// strings. Fragment parameters are searched after the query.
pub fn query_value(url: &str, key: &str) -> Option<String> {
	let (_, tail) = url.split_once(['?', '#'])?;
	tail.split(['&', '?', '#'])
		.filter(|pair| !pair.is_empty())
		.find_map(|pair| url::form_urlencoded::parse(pair.as_bytes()).next().filter(|(name, _)| name == key).map(|(_, value)| value.into_owned()))
}

/// Opaque per-attempt identifier carried under `key` (normally `id`).
pub fn extract_identifier(url: &str, key: &str) -> Option<String> {
	query_value(url, key)
}

/// Authorization code produced after a successful verification.
pub fn extract_authorization_code(url: &str, key: &str) -> Option<String> {
	query_value(url, key)
}

/// String at a JSON pointer; numbers are rendered as their decimal text.
pub fn json_string_at(body: &Value, pointer: &str) -> Option<String> {
	match body.pointer(pointer)? {
		Value::String(s) if !s.is_empty() => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

/// Validation key from a token response.
///
/// The JSON body wins; otherwise each URL in `urls` is searched for the query
/// parameter `param`, in order.
pub fn extract_validation_key<'a>(body: Option<&Value>, pointer: &str, urls: impl IntoIterator<Item = &'a str>, param: &str) -> Option<String> {
	body.and_then(|json| json_string_at(json, pointer))
		.or_else(|| urls.into_iter().find_map(|url| query_value(url, param)))
		.filter(|key| !key.is_empty())
}

/// True when both URLs address the same resource, ignoring query and fragment.
pub fn same_endpoint(a: &Url, b: &Url) -> bool {
	a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default() && a.path() == b.path()
}

/// What the orchestrator saw after submitting a verification code.
#[derive(Debug, Clone, Copy)]
pub struct VerificationObservation<'a> {
	/// Endpoint the code was submitted to.
	pub endpoint: &'a Url,
	/// Status of the submission itself, before any followed hop.
	pub status: u16,
	/// Redirect target if there was one, else the URL of the final page.
	pub destination: Option<&'a Url>,
	pub body: &'a str,
}

impl VerificationObservation<'_> {
	fn is_redirect(&self) -> bool {
		(300..400).contains(&self.status)
	}
}

/// Why a submission was classified as a wrong code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignal {
	/// No forward progress: the destination is the verification endpoint again.
	UrlUnchanged,
	/// The body contains this failure keyword.
	Keyword(String),
	/// The response was not a redirect.
	NoRedirect,
}

impl std::fmt::Display for FailureSignal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FailureSignal::UrlUnchanged => f.write_str("destination unchanged"),
			FailureSignal::Keyword(word) => write!(f, "body contains {word:?}"),
			FailureSignal::NoRedirect => f.write_str("no redirect"),
		}
	}
}

/// Classifies a verification response under `policy`.
///
/// Missing evidence counts against the submission: an observation with no
/// destination is treated as unchanged.
pub fn classify_failure_signal(observation: &VerificationObservation<'_>, policy: FailurePolicy, keywords: &[String]) -> Option<FailureSignal> {
	let unchanged = || {
		observation
			.destination
			.is_none_or(|destination| same_endpoint(destination, observation.endpoint))
			.then_some(FailureSignal::UrlUnchanged)
	};
	let keyword = || {
		let body = observation.body.to_lowercase();
		keywords
			.iter()
			.find(|word| !word.is_empty() && body.contains(&word.to_lowercase()))
			.map(|word| FailureSignal::Keyword(word.clone()))
	};

	match policy {
		FailurePolicy::UrlUnchanged => unchanged(),
		FailurePolicy::Keywords => keyword(),
		FailurePolicy::Either => unchanged().or_else(keyword),
		FailurePolicy::NoRedirect => (!observation.is_redirect()).then_some(FailureSignal::NoRedirect),
	}
}

/// Boolean form of [`classify_failure_signal`].
pub fn is_verification_failure_signal(observation: &VerificationObservation<'_>, policy: FailurePolicy, keywords: &[String]) -> bool {
	classify_failure_signal(observation, policy, keywords).is_some()
}
