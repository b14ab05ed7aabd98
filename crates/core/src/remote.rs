//! One HTTP exchange at a time against the remote service.
//!
//! A [`RemoteClient`] is created per session and owns that session's cookie
//! jar. It never retries and never follows redirects unless an [`Exchange`]
//! asks for it, so callers can read tokens out of `Location` headers.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION, ORIGIN, REFERER};
use reqwest::{Client, Method, redirect};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::browser::BrowserCookie;
use crate::contract::ServiceContract;
use crate::error::{Error, Result};

/// Request body of an [`Exchange`].
#[derive(Debug, Default)]
pub enum Body {
	#[default]
	Empty,
	Form(Vec<(String, String)>),
	Json(Value),
	Multipart(reqwest::multipart::Form),
}

/// A single request description.
#[derive(Debug)]
pub struct Exchange {
	pub method: Method,
	pub url: Url,
	pub headers: Vec<(String, String)>,
	pub body: Body,
	/// Follow at most one redirect hop before returning.
	pub follow_redirect: bool,
}

impl Exchange {
	pub fn new(method: Method, url: Url) -> Self {
		Self {
			method,
			url,
			headers: Vec::new(),
			body: Body::Empty,
			follow_redirect: false,
		}
	}

	pub fn get(url: Url) -> Self {
		Self::new(Method::GET, url)
	}

	pub fn post(url: Url) -> Self {
		Self::new(Method::POST, url)
	}

	pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
		self.body = Body::Form(fields);
		self
	}

	pub fn json(mut self, value: Value) -> Self {
		self.body = Body::Json(value);
		self
	}

	pub fn multipart(mut self, form: reqwest::multipart::Form) -> Self {
		self.body = Body::Multipart(form);
		self
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	pub fn follow_redirect(mut self) -> Self {
		self.follow_redirect = true;
		self
	}
}

/// Result of an exchange: the last response observed.
#[derive(Debug, Clone)]
pub struct ExchangeResponse {
	pub status: u16,
	pub headers: HeaderMap,
	pub body: String,
	/// URL of the response that produced `status` and `body`.
	pub final_url: Url,
	/// `Location` header resolved against `final_url`.
	pub location: Option<Url>,
}

impl ExchangeResponse {
	pub fn is_redirect(&self) -> bool {
		(300..400).contains(&self.status)
	}

	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Body parsed as JSON, if it is JSON.
	pub fn json(&self) -> Option<Value> {
		serde_json::from_str(&self.body).ok()
	}

	/// Where this response points: the redirect target or the page itself.
	pub fn destination(&self) -> &Url {
		self.location.as_ref().unwrap_or(&self.final_url)
	}
}

/// Per-session HTTP client with its own cookie jar.
pub struct RemoteClient {
	session: String,
	client: Client,
	jar: Arc<Jar>,
}

impl std::fmt::Debug for RemoteClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RemoteClient").field("session", &self.session).finish_non_exhaustive()
	}
}

impl RemoteClient {
	/// Builds a client carrying the contract's header set on every request.
	pub fn new(session: impl Into<String>, contract: &ServiceContract, timeout: Duration) -> Result<Self> {
		let mut headers = HeaderMap::new();
		if let Some(origin) = &contract.origin {
			headers.insert(ORIGIN, header_value("origin", origin)?);
		}
		if let Some(referer) = &contract.referer {
			headers.insert(REFERER, header_value("referer", referer)?);
		}
		for (name, value) in &contract.extra_headers {
			let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidHeader {
				name: name.clone(),
				reason: e.to_string(),
			})?;
			headers.insert(header, header_value(name, value)?);
		}

		let jar = Arc::new(Jar::default());
		let client = Client::builder()
			.cookie_provider(Arc::clone(&jar))
			.redirect(redirect::Policy::none())
			.timeout(timeout)
			.user_agent(contract.user_agent.as_str())
			.default_headers(headers)
			.build()?;

		Ok(Self {
			session: session.into(),
			client,
			jar,
		})
	}

	/// Performs one exchange, plus one redirect hop when requested.
	///
	/// Cookies from every response land in this client's jar.
	pub async fn exchange(&self, exchange: Exchange) -> Result<ExchangeResponse> {
		let Exchange {
			method,
			url,
			headers,
			body,
			follow_redirect,
		} = exchange;

		let mut request = self.client.request(method.clone(), url.clone());
		for (name, value) in &headers {
			request = request.header(name.as_str(), value.as_str());
		}
		request = match body {
			Body::Empty => request,
			Body::Form(fields) => request.form(&fields),
			Body::Json(value) => request.json(&value),
			Body::Multipart(form) => request.multipart(form),
		};

		let response = read(request.send().await?).await?;
		debug!(
			target: "otpgate.remote",
			session = %self.session,
			%method,
			url = %loggable(&url),
			status = response.status,
			location = ?response.location.as_ref().map(loggable),
			"exchange"
		);

		let next = match (&response.location, follow_redirect && response.is_redirect()) {
			(Some(next), true) => next.clone(),
			_ => return Ok(response),
		};

		let mut request = self.client.get(next.clone());
		for (name, value) in &headers {
			request = request.header(name.as_str(), value.as_str());
		}
		let followed = read(request.send().await?).await?;
		debug!(
			target: "otpgate.remote",
			session = %self.session,
			url = %loggable(&next),
			status = followed.status,
			"followed redirect"
		);
		Ok(followed)
	}

	/// Seeds the jar with cookies captured by the browser.
	///
	/// `origin` supplies the scheme and the host for cookies without a domain.
	pub fn import_cookies(&self, cookies: &[BrowserCookie], origin: &Url) -> usize {
		let mut imported = 0;
		for cookie in cookies {
			let host = cookie.domain.trim_start_matches('.');
			let host = if host.is_empty() { origin.host_str().unwrap_or_default() } else { host };
			let Ok(url) = Url::parse(&format!("{}://{}{}", origin.scheme(), host, cookie.path_or_root())) else {
				continue;
			};

			let mut line = format!("{}={}; Path={}", cookie.name, cookie.value, cookie.path_or_root());
			if cookie.domain.starts_with('.') {
				line.push_str(&format!("; Domain={host}"));
			}
			if cookie.secure && url.scheme() == "https" {
				line.push_str("; Secure");
			}
			if cookie.http_only {
				line.push_str("; HttpOnly");
			}
			self.jar.add_cookie_str(&line, &url);
			imported += 1;
		}
		debug!(target: "otpgate.remote", session = %self.session, imported, "imported browser cookies");
		imported
	}

	/// Value of the cookie `name` the jar would send to `url`.
	pub fn cookie_value(&self, url: &Url, name: &str) -> Option<String> {
		let header = self.jar.cookies(url)?;
		header
			.to_str()
			.ok()?
			.split(';')
			.filter_map(|pair| pair.trim().split_once('='))
			.find(|(n, _)| *n == name)
			.map(|(_, v)| v.to_string())
	}

	/// Names of all cookies the jar would send to `url`.
	pub fn cookie_names(&self, url: &Url) -> Vec<String> {
		self.jar
			.cookies(url)
			.and_then(|header| header.to_str().ok().map(str::to_owned))
			.map(|header| header.split(';').filter_map(|pair| pair.trim().split_once('=')).map(|(n, _)| n.to_string()).collect())
			.unwrap_or_default()
	}
}

async fn read(response: reqwest::Response) -> Result<ExchangeResponse> {
	let status = response.status().as_u16();
	let headers = response.headers().clone();
	let final_url = response.url().clone();
	let location = headers
		.get(LOCATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| final_url.join(value).ok());
	let body = response.text().await?;
	Ok(ExchangeResponse {
		status,
		headers,
		body,
		final_url,
		location,
	})
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
	HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader {
		name: name.to_string(),
		reason: e.to_string(),
	})
}

/// Host and path only; query strings carry identifiers and keys.
fn loggable(url: &Url) -> String {
	format!("{}{}", url.host_str().unwrap_or_default(), url.path())
}
