//! Browser capability used for the one step a raw HTTP client cannot do.
//!
//! The orchestrator only needs "navigate, read URL, fill input, read cookies,
//! screenshot". Concrete engines implement [`BrowserLauncher`]; the
//! [`acquire`] driver owns the wait loop and the always-close guarantee.

mod acquire;
mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

pub use acquire::acquire;
pub use fake::FakeBrowser;

use crate::contract::UrlPattern;
use crate::error::Result;

/// Opens fresh, isolated browser contexts.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
	/// Opens a new context with its own cookies and storage.
	async fn open(&self, user_agent: &str) -> Result<Box<dyn BrowserPage>>;
}

/// One page inside an isolated context.
///
/// Methods take `&self` so a snapshot can be taken while a navigation is
/// still pending.
#[async_trait]
pub trait BrowserPage: Send + Sync {
	async fn goto(&self, url: &Url) -> Result<()>;

	/// Current page URL, `None` before the first navigation commits.
	async fn current_url(&self) -> Result<Option<String>>;

	async fn fill_and_submit(&self, action: &InputAction) -> Result<()>;

	async fn cookies(&self) -> Result<Vec<BrowserCookie>>;

	/// PNG screenshot of the viewport.
	async fn snapshot(&self) -> Result<Vec<u8>>;

	/// Releases the context and everything it owns.
	async fn close(self: Box<Self>) -> Result<()>;
}

/// A cookie as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
	pub name: String,
	pub value: String,
	pub domain: String,
	pub path: String,
	pub secure: bool,
	pub http_only: bool,
}

impl BrowserCookie {
	pub fn path_or_root(&self) -> &str {
		if self.path.starts_with('/') { &self.path } else { "/" }
	}
}

/// Fill `selector` with `value`, then click `submit_selector` or press Enter.
#[derive(Debug, Clone)]
pub struct InputAction {
	pub selector: String,
	pub value: String,
	pub submit_selector: Option<String>,
}

/// Everything the acquisition driver needs for one run.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
	pub entry_url: Url,
	pub pattern: UrlPattern,
	pub input: Option<InputAction>,
	pub user_agent: String,
	pub timeout: Duration,
	pub poll_interval: Duration,
	pub snapshot_interval: Duration,
	/// On timeout, accept the last URL anyway if it carries this query key.
	pub salvage_key: Option<String>,
}

/// Outcome of a successful acquisition.
#[derive(Debug, Clone)]
pub struct Acquired {
	pub matched_url: String,
	pub cookies: Vec<BrowserCookie>,
	/// The pattern never matched; `matched_url` was salvaged after the timeout.
	pub salvaged: bool,
}

/// Receives progress screenshots during acquisition.
pub type SnapshotSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
