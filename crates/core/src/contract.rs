//! Remote-service contract: endpoint templates, header set, token locations.
//!
//! Nothing in the orchestrator hard-codes the remote service's shape. Every
//! URL, form field, query key, and JSON pointer comes from a
//! [`ServiceContract`], so a contract revision is a config change.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

/// URL pattern the browser must reach before acquisition completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UrlPattern {
	/// Matches when the URL contains the substring.
	Contains(String),
	/// Matches when the regular expression finds a match in the URL.
	Regex(String),
}

impl UrlPattern {
	pub fn matches(&self, url: &str) -> bool {
		match self {
			UrlPattern::Contains(needle) => url.contains(needle.as_str()),
			UrlPattern::Regex(pattern) => Regex::new(pattern).map(|re| re.is_match(url)).unwrap_or(false),
		}
	}

	/// Fails for regex patterns that do not compile.
	pub fn validate(&self) -> Result<()> {
		if let UrlPattern::Regex(pattern) = self {
			Regex::new(pattern).map_err(|e| Error::InvalidUrl {
				url: pattern.clone(),
				reason: format!("bad destination pattern: {e}"),
			})?;
		}
		Ok(())
	}
}

impl std::fmt::Display for UrlPattern {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			UrlPattern::Contains(needle) => write!(f, "*{needle}*"),
			UrlPattern::Regex(pattern) => write!(f, "/{pattern}/"),
		}
	}
}

/// Which signal marks a verification submission as a wrong code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
	/// The response landed back on the verification endpoint.
	UrlUnchanged,
	/// The response body contains one of the failure keywords.
	Keywords,
	/// Either of the above.
	#[default]
	Either,
	/// Anything other than a redirect counts as a wrong code.
	NoRedirect,
}

/// Optional form interaction performed in the browser after navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EntryInput {
	/// CSS selector of the field that receives the phone number.
	pub selector: String,
	/// CSS selector clicked after filling; Enter is pressed when absent.
	#[serde(default)]
	pub submit_selector: Option<String>,
}

/// Fixed contract with the remote service.
///
/// URL templates accept `{id}`, `{code}` and `{validation_key}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServiceContract {
	pub entry_url: String,
	pub destination_pattern: UrlPattern,
	pub entry_input: Option<EntryInput>,

	pub dispatch_url: String,
	pub phone_field: String,
	pub extra_dispatch_fields: Vec<(String, String)>,

	pub verify_url: String,
	pub fallback_verify_url: Option<String>,
	pub code_field: String,

	pub token_url: String,
	/// Form field carrying the authorization code; the token call is a GET when absent.
	pub token_code_field: Option<String>,

	pub upload_url: String,
	pub publish_url: String,
	/// JSON body of the publish call; string leaves equal to `"{id}"` are replaced.
	pub publish_body: Value,

	pub user_agent: String,
	pub origin: Option<String>,
	pub referer: Option<String>,
	pub extra_headers: Vec<(String, String)>,

	pub identifier_key: String,
	pub authorization_code_key: String,
	pub validation_key_param: String,
	pub validation_key_pointer: String,
	pub upload_id_pointer: String,
	pub public_url_pointer: String,
	pub session_cookie: Option<String>,

	pub failure_keywords: Vec<String>,
	pub failure_policy: FailurePolicy,
}

impl Default for ServiceContract {
	fn default() -> Self {
		Self {
			entry_url: "https://cloud.jazzdrive.com.pk".into(),
			destination_pattern: UrlPattern::Contains("id=".into()),
			entry_input: None,
			dispatch_url: "https://jazzdrive.com.pk/oauth2/signup.php?id={id}".into(),
			phone_field: "msisdn".into(),
			extra_dispatch_fields: vec![("enrichment_status".into(), String::new())],
			verify_url: "https://jazzdrive.com.pk/verify.php?id={id}".into(),
			fallback_verify_url: Some("https://jazzdrive.com.pk/oauth2/signup.php?id={id}".into()),
			code_field: "otp".into(),
			token_url: "https://cloud.jazzdrive.com.pk/sapi/login/oauth?action=login&platform=web&keyticket={code}".into(),
			token_code_field: None,
			upload_url: "https://cloud.jazzdrive.com.pk/sapi/upload/file?action=save&acceptasynchronous=true&validationkey={validation_key}".into(),
			publish_url: "https://cloud.jazzdrive.com.pk/sapi/link?action=save&validationkey={validation_key}".into(),
			publish_body: serde_json::json!({ "data": { "items": [{ "id": "{id}" }] } }),
			user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
			origin: Some("https://jazzdrive.com.pk".into()),
			referer: Some("https://jazzdrive.com.pk".into()),
			extra_headers: Vec::new(),
			identifier_key: "id".into(),
			authorization_code_key: "code".into(),
			validation_key_param: "validationkey".into(),
			validation_key_pointer: "/data/validationkey".into(),
			upload_id_pointer: "/id".into(),
			public_url_pointer: "/data/url".into(),
			session_cookie: Some("JSESSIONID".into()),
			failure_keywords: ["invalid", "incorrect", "wrong", "expired", "try again"].map(String::from).to_vec(),
			failure_policy: FailurePolicy::Either,
		}
	}
}

impl ServiceContract {
	/// Checks that every template renders and the destination pattern compiles.
	pub fn validate(&self) -> Result<()> {
		self.destination_pattern.validate()?;
		parse_url(&self.entry_url)?;
		let sample = [("id", "x"), ("code", "x"), ("validation_key", "x")];
		for template in [&self.dispatch_url, &self.verify_url, &self.token_url, &self.upload_url, &self.publish_url] {
			render_url(template, &sample)?;
		}
		if let Some(fallback) = &self.fallback_verify_url {
			render_url(fallback, &sample)?;
		}
		Ok(())
	}

	pub fn entry_url(&self) -> Result<Url> {
		parse_url(&self.entry_url)
	}

	/// Renders the publish body for `id`.
	pub fn publish_body_for(&self, id: &str) -> Value {
		substitute_json(&self.publish_body, "{id}", id)
	}
}

/// Renders `template`, percent-encoding each substituted value.
///
/// Fails when a `{...}` placeholder remains after substitution.
pub fn render_url(template: &str, vars: &[(&str, &str)]) -> Result<Url> {
	let mut rendered = template.to_string();
	for (name, value) in vars {
		let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
		rendered = rendered.replace(&format!("{{{name}}}"), &encoded);
	}
	if let Some(start) = rendered.find('{') {
		if rendered[start..].contains('}') {
			return Err(Error::Template(template.to_string()));
		}
	}
	parse_url(&rendered)
}

fn parse_url(raw: &str) -> Result<Url> {
	Url::parse(raw).map_err(|e| Error::InvalidUrl {
		url: raw.to_string(),
		reason: e.to_string(),
	})
}

fn substitute_json(value: &Value, placeholder: &str, replacement: &str) -> Value {
	match value {
		Value::String(s) if s == placeholder => Value::String(replacement.to_string()),
		Value::Array(items) => Value::Array(items.iter().map(|v| substitute_json(v, placeholder, replacement)).collect()),
		Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), substitute_json(v, placeholder, replacement))).collect()),
		other => other.clone(),
	}
}
