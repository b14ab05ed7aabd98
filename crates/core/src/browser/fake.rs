//! In-memory browser for exercising acquisition without a real engine.
//!
//! # Example
//!
//! ```ignore
//! let browser = FakeBrowser::landing_on("http://127.0.0.1:8080/signup.php?id=ID{n}")
//!     .with_cookie("sid", "S{n}");
//! let orchestrator = Orchestrator::new(contract, settings, Arc::new(browser.clone()));
//! // ... drive attempts ...
//! assert_eq!(browser.open_contexts(), 0);
//! ```
//!
//! `{n}` in templates is replaced by the 1-based index of the context, so
//! concurrent attempts see distinct identifiers and cookies.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use url::Url;

use super::{BrowserCookie, BrowserLauncher, BrowserPage, InputAction};
use crate::error::Result;

/// Smallest valid PNG signature; enough for callers that only pass bytes along.
const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Debug, Default)]
struct Stats {
	opened: AtomicUsize,
	closed: AtomicUsize,
	snapshots: AtomicUsize,
	fills: Mutex<Vec<String>>,
	user_agents: Mutex<Vec<String>>,
}

/// Scripted [`BrowserLauncher`] that counts contexts.
#[derive(Debug, Clone, Default)]
pub struct FakeBrowser {
	landing: Option<String>,
	landing_delay: Duration,
	cookie_domain: Option<String>,
	cookies: Vec<(String, String)>,
	stats: Arc<Stats>,
}

impl FakeBrowser {
	/// Every navigation ends on `template`.
	pub fn landing_on(template: impl Into<String>) -> Self {
		Self {
			landing: Some(template.into()),
			..Self::default()
		}
	}

	/// Navigations stay on the entry URL forever.
	pub fn never_landing() -> Self {
		Self::default()
	}

	/// Keeps the entry URL for `delay` before switching to the landing URL.
	pub fn with_landing_delay(mut self, delay: Duration) -> Self {
		self.landing_delay = delay;
		self
	}

	/// Adds a cookie reported by every context; `{n}` is allowed in the value.
	pub fn with_cookie(mut self, name: impl Into<String>, value_template: impl Into<String>) -> Self {
		self.cookies.push((name.into(), value_template.into()));
		self
	}

	/// Domain attached to reported cookies; defaults to the landing host.
	pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
		self.cookie_domain = Some(domain.into());
		self
	}

	pub fn opened(&self) -> usize {
		self.stats.opened.load(Ordering::SeqCst)
	}

	pub fn closed(&self) -> usize {
		self.stats.closed.load(Ordering::SeqCst)
	}

	/// Contexts opened but not yet closed.
	pub fn open_contexts(&self) -> usize {
		self.opened().saturating_sub(self.closed())
	}

	pub fn snapshots(&self) -> usize {
		self.stats.snapshots.load(Ordering::SeqCst)
	}

	/// Values typed into entry forms, in order.
	pub fn fills(&self) -> Vec<String> {
		self.stats.fills.lock().clone()
	}

	pub fn user_agents(&self) -> Vec<String> {
		self.stats.user_agents.lock().clone()
	}
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
	async fn open(&self, user_agent: &str) -> Result<Box<dyn BrowserPage>> {
		let n = self.stats.opened.fetch_add(1, Ordering::SeqCst) + 1;
		self.stats.user_agents.lock().push(user_agent.to_string());
		Ok(Box::new(FakePage {
			n,
			browser: self.clone(),
			state: Mutex::new(PageState::default()),
		}))
	}
}

#[derive(Debug, Default)]
struct PageState {
	entry: Option<String>,
	navigated_at: Option<Instant>,
}

struct FakePage {
	n: usize,
	browser: FakeBrowser,
	state: Mutex<PageState>,
}

impl FakePage {
	fn render(&self, template: &str) -> String {
		template.replace("{n}", &self.n.to_string())
	}

	fn url_now(&self) -> Option<String> {
		let state = self.state.lock();
		let entry = state.entry.clone()?;
		let landed = state.navigated_at.is_some_and(|at| at.elapsed() >= self.browser.landing_delay);
		match &self.browser.landing {
			Some(template) if landed => Some(self.render(template)),
			_ => Some(entry),
		}
	}
}

#[async_trait]
impl BrowserPage for FakePage {
	async fn goto(&self, url: &Url) -> Result<()> {
		let mut state = self.state.lock();
		state.entry = Some(url.to_string());
		state.navigated_at = Some(Instant::now());
		Ok(())
	}

	async fn current_url(&self) -> Result<Option<String>> {
		Ok(self.url_now())
	}

	async fn fill_and_submit(&self, action: &InputAction) -> Result<()> {
		self.browser.stats.fills.lock().push(action.value.clone());
		Ok(())
	}

	async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
		let domain = match &self.browser.cookie_domain {
			Some(domain) => domain.clone(),
			None => self
				.url_now()
				.and_then(|url| Url::parse(&url).ok())
				.and_then(|url| url.host_str().map(str::to_owned))
				.unwrap_or_default(),
		};
		Ok(self
			.browser
			.cookies
			.iter()
			.map(|(name, value)| BrowserCookie {
				name: name.clone(),
				value: self.render(value),
				domain: domain.clone(),
				path: "/".into(),
				secure: false,
				http_only: true,
			})
			.collect())
	}

	async fn snapshot(&self) -> Result<Vec<u8>> {
		self.browser.stats.snapshots.fetch_add(1, Ordering::SeqCst);
		Ok(FAKE_PNG.to_vec())
	}

	async fn close(self: Box<Self>) -> Result<()> {
		self.browser.stats.closed.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn contexts_get_distinct_indices() {
		let browser = FakeBrowser::landing_on("http://h/?id={n}").with_cookie("sid", "v{n}");
		let url = Url::parse("http://h/start").unwrap();

		let first = browser.open("ua").await.unwrap();
		let second = browser.open("ua").await.unwrap();
		first.goto(&url).await.unwrap();
		second.goto(&url).await.unwrap();

		assert_eq!(first.current_url().await.unwrap().as_deref(), Some("http://h/?id=1"));
		assert_eq!(second.cookies().await.unwrap()[0].value, "v2");
		assert_eq!(browser.open_contexts(), 2);

		first.close().await.unwrap();
		second.close().await.unwrap();
		assert_eq!(browser.open_contexts(), 0);
	}

	#[tokio::test]
	async fn url_is_none_before_navigation() {
		let browser = FakeBrowser::never_landing();
		let page = browser.open("ua").await.unwrap();
		assert_eq!(page.current_url().await.unwrap(), None);
		page.close().await.unwrap();
	}
}
