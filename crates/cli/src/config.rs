//! Configuration file loading.
//!
//! The file is JSON with four optional sections; anything left out keeps its
//! default, so a file that only sets `server.port` is valid.

use std::path::Path;

use anyhow::{Context, Result};
use otpgate::{OrchestratorSettings, ServiceContract};
use otpgate_runtime::ChromiumOptions;
use serde::{Deserialize, Serialize};

use crate::cli::ServeArgs;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
	/// Largest accepted upload request body.
	pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".into(),
			port: 8080,
			max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub contract: ServiceContract,
	pub settings: OrchestratorSettings,
	pub server: ServerConfig,
	pub browser: ChromiumOptions,
}

impl Config {
	/// Reads `path` if given, otherwise returns the defaults.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let Some(path) = path else {
			return Ok(Self::default());
		};
		let raw = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
		let config: Self = serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
		Ok(config)
	}

	/// Applies command-line overrides on top of file values.
	pub fn apply(&mut self, args: &ServeArgs) {
		if let Some(host) = &args.host {
			self.server.host = host.clone();
		}
		if let Some(port) = args.port {
			self.server.port = port;
		}
		if args.headful {
			self.browser.headful = true;
		}
		if let Some(chrome) = &args.chrome {
			self.browser.executable = Some(chrome.clone());
		}
	}

	pub fn validate(&self) -> Result<()> {
		self.contract.validate().context("invalid service contract")?;
		Ok(())
	}

	pub fn to_pretty_json(&self) -> Result<String> {
		Ok(serde_json::to_string_pretty(self)?)
	}
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;

	#[test]
	fn no_file_means_defaults() {
		let config = Config::load(None).unwrap();
		assert_eq!(config.server.port, 8080);
		assert_eq!(config.settings.max_concurrent_acquisitions, 4);
		config.validate().unwrap();
	}

	#[test]
	fn flags_override_file_values() {
		let mut config = Config::default();
		config.apply(&ServeArgs {
			host: Some("0.0.0.0".into()),
			port: Some(9100),
			headful: true,
			chrome: Some(PathBuf::from("/usr/bin/chromium")),
		});
		assert_eq!(config.server.host, "0.0.0.0");
		assert_eq!(config.server.port, 9100);
		assert!(config.browser.headful);
		assert_eq!(config.browser.executable, Some(PathBuf::from("/usr/bin/chromium")));
	}

	#[test]
	fn empty_overrides_keep_file_values() {
		let mut config = Config::default();
		config.server.port = 7000;
		config.apply(&ServeArgs::default());
		assert_eq!(config.server.port, 7000);
		assert!(!config.browser.headful);
	}
}
