use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use otpgate::{BrowserCookie, BrowserLauncher, BrowserPage, Error, InputAction, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// How Chromium processes are started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromiumOptions {
	/// Browser binary; detected from the usual install locations when unset.
	pub executable: Option<PathBuf>,
	/// Show the browser window instead of running headless.
	pub headful: bool,
	/// Parent directory for per-context profiles.
	pub profile_root: PathBuf,
	/// Extra command-line switches appended after the defaults.
	pub extra_args: Vec<String>,
	#[serde(with = "otpgate::settings::duration_ms")]
	pub launch_timeout: Duration,
}

impl Default for ChromiumOptions {
	fn default() -> Self {
		Self {
			executable: None,
			headful: false,
			profile_root: std::env::temp_dir(),
			extra_args: Vec::new(),
			launch_timeout: Duration::from_secs(20),
		}
	}
}

impl ChromiumOptions {
	/// Switches passed to every launch, `--user-agent` included.
	pub fn launch_args(&self, user_agent: &str) -> Vec<String> {
		let mut args = vec![
			"--disable-blink-features=AutomationControlled".to_string(),
			"--disable-setuid-sandbox".to_string(),
			"--disable-dev-shm-usage".to_string(),
			"--disable-infobars".to_string(),
			"--no-first-run".to_string(),
			"--no-default-browser-check".to_string(),
			format!("--user-agent={user_agent}"),
		];
		args.extend(self.extra_args.iter().cloned());
		args
	}

	fn profile_dir(&self) -> PathBuf {
		self.profile_root.join(format!("otpgate-profile-{}", Uuid::new_v4()))
	}
}

fn browser_err(context: &str, e: impl std::fmt::Display) -> Error {
	Error::Browser(format!("{context}: {e}"))
}

/// [`BrowserLauncher`] backed by locally installed Chromium.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher {
	options: ChromiumOptions,
}

impl ChromiumLauncher {
	pub fn new(options: ChromiumOptions) -> Self {
		Self { options }
	}

	pub fn options(&self) -> &ChromiumOptions {
		&self.options
	}

	fn config(&self, profile_dir: &Path, user_agent: &str) -> Result<BrowserConfig> {
		let mut builder = BrowserConfig::builder()
			.no_sandbox()
			.viewport(None)
			.user_data_dir(profile_dir)
			.launch_timeout(self.options.launch_timeout)
			.args(self.options.launch_args(user_agent));
		if let Some(executable) = &self.options.executable {
			builder = builder.chrome_executable(executable);
		}
		if self.options.headful {
			builder = builder.with_head();
		}
		builder.build().map_err(|e| browser_err("invalid browser configuration", e))
	}
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
	async fn open(&self, user_agent: &str) -> Result<Box<dyn BrowserPage>> {
		let profile_dir = self.options.profile_dir();
		let config = self.config(&profile_dir, user_agent)?;

		let (browser, mut handler) = match Browser::launch(config).await {
			Ok(launched) => launched,
			Err(e) => {
				remove_profile(&profile_dir);
				return Err(browser_err("failed to launch browser", e));
			}
		};
		let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

		let page = browser.new_page("about:blank").await;
		let mut context = ChromiumPage {
			browser: Some(browser),
			handler_task,
			page: None,
			profile_dir: Some(profile_dir),
		};
		match page {
			Ok(page) => context.page = Some(page),
			Err(e) => {
				context.shutdown().await;
				return Err(browser_err("failed to open page", e));
			}
		}
		info!(target: "otpgate.browser", profile = ?context.profile_dir, "browser context opened");
		Ok(Box::new(context))
	}
}

/// One Chromium process with a single page.
struct ChromiumPage {
	browser: Option<Browser>,
	handler_task: JoinHandle<()>,
	page: Option<Page>,
	profile_dir: Option<PathBuf>,
}

impl ChromiumPage {
	fn page(&self) -> Result<&Page> {
		self.page.as_ref().ok_or_else(|| Error::Browser("page already closed".into()))
	}

	async fn shutdown(&mut self) {
		self.page = None;
		if let Some(mut browser) = self.browser.take() {
			if let Err(e) = browser.close().await {
				debug!(target: "otpgate.browser", error = %e, "browser close request failed");
			}
			if let Err(e) = browser.wait().await {
				debug!(target: "otpgate.browser", error = %e, "waiting for browser exit failed");
			}
		}
		self.handler_task.abort();
		if let Some(dir) = self.profile_dir.take() {
			remove_profile(&dir);
		}
	}
}

impl Drop for ChromiumPage {
	fn drop(&mut self) {
		self.handler_task.abort();
		if let Some(dir) = self.profile_dir.take() {
			remove_profile(&dir);
		}
	}
}

fn remove_profile(dir: &Path) {
	if let Err(e) = std::fs::remove_dir_all(dir) {
		if e.kind() != std::io::ErrorKind::NotFound {
			warn!(target: "otpgate.browser", dir = %dir.display(), error = %e, "failed to remove browser profile");
		}
	}
}

#[async_trait]
impl BrowserPage for ChromiumPage {
	async fn goto(&self, url: &Url) -> Result<()> {
		self.page()?.goto(url.as_str()).await.map_err(|e| browser_err("navigation failed", e))?;
		Ok(())
	}

	async fn current_url(&self) -> Result<Option<String>> {
		let url = self.page()?.url().await.map_err(|e| browser_err("reading URL failed", e))?;
		Ok(url.filter(|url| url != "about:blank"))
	}

	async fn fill_and_submit(&self, action: &InputAction) -> Result<()> {
		let page = self.page()?;
		let input = page
			.find_element(action.selector.as_str())
			.await
			.map_err(|e| browser_err(&format!("input {} not found", action.selector), e))?;
		input.click().await.map_err(|e| browser_err("focusing input failed", e))?;
		input.type_str(&action.value).await.map_err(|e| browser_err("typing failed", e))?;

		match &action.submit_selector {
			Some(selector) => {
				let button = page
					.find_element(selector.as_str())
					.await
					.map_err(|e| browser_err(&format!("submit control {selector} not found"), e))?;
				button.click().await.map_err(|e| browser_err("submit click failed", e))?;
			}
			None => {
				input.press_key("Enter").await.map_err(|e| browser_err("pressing Enter failed", e))?;
			}
		}
		Ok(())
	}

	async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
		let cookies = self.page()?.get_cookies().await.map_err(|e| browser_err("reading cookies failed", e))?;
		Ok(cookies
			.into_iter()
			.map(|cookie| BrowserCookie {
				name: cookie.name,
				value: cookie.value,
				domain: cookie.domain,
				path: cookie.path,
				secure: cookie.secure,
				http_only: cookie.http_only,
			})
			.collect())
	}

	async fn snapshot(&self) -> Result<Vec<u8>> {
		let params = ScreenshotParams::builder().format(CaptureScreenshotFormat::Png).build();
		self.page()?.screenshot(params).await.map_err(|e| browser_err("screenshot failed", e))
	}

	async fn close(mut self: Box<Self>) -> Result<()> {
		self.shutdown().await;
		debug!(target: "otpgate.browser", "browser context closed");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_agent_is_passed_as_switch() {
		let options = ChromiumOptions {
			extra_args: vec!["--lang=en-US".into()],
			..ChromiumOptions::default()
		};
		let args = options.launch_args("Mozilla/5.0 Test");
		assert!(args.contains(&"--user-agent=Mozilla/5.0 Test".to_string()));
		assert_eq!(args.last().map(String::as_str), Some("--lang=en-US"));
	}

	#[test]
	fn every_context_gets_its_own_profile() {
		let options = ChromiumOptions {
			profile_root: PathBuf::from("/tmp/profiles"),
			..ChromiumOptions::default()
		};
		let first = options.profile_dir();
		let second = options.profile_dir();
		assert_ne!(first, second);
		assert!(first.starts_with("/tmp/profiles"));
	}

	#[test]
	fn options_deserialize_with_defaults() {
		let options: ChromiumOptions = serde_json::from_str(r#"{"headful": true, "launch_timeout": 5000}"#).unwrap();
		assert!(options.headful);
		assert_eq!(options.launch_timeout, Duration::from_secs(5));
		assert!(options.executable.is_none());
	}

	#[test]
	fn launch_timeout_serializes_as_millis() {
		let options = ChromiumOptions {
			launch_timeout: Duration::from_millis(1500),
			..ChromiumOptions::default()
		};
		let value = serde_json::to_value(&options).unwrap();
		assert_eq!(value["launch_timeout"], 1500);
	}
}
