//! Timing and capacity knobs for the orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Orchestrator timing and capacity settings.
///
/// Durations are (de)serialized as integer milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct OrchestratorSettings {
	/// Upper bound for the browser to reach the destination pattern.
	#[serde(with = "duration_ms")]
	pub acquisition_timeout: Duration,
	/// How often the browser URL is checked while waiting.
	#[serde(with = "duration_ms")]
	pub url_poll_interval: Duration,
	/// How often a progress screenshot is taken while waiting.
	#[serde(with = "duration_ms")]
	pub snapshot_interval: Duration,
	/// Per-request timeout for remote exchanges.
	#[serde(with = "duration_ms")]
	pub request_timeout: Duration,
	/// Idle records older than this are removed by the sweeper.
	#[serde(with = "duration_ms")]
	pub retention: Duration,
	#[serde(with = "duration_ms")]
	pub sweep_interval: Duration,
	/// Concurrent browser acquisitions across all sessions.
	pub max_concurrent_acquisitions: usize,
}

impl Default for OrchestratorSettings {
	fn default() -> Self {
		Self {
			acquisition_timeout: Duration::from_secs(60),
			url_poll_interval: Duration::from_millis(250),
			snapshot_interval: Duration::from_secs(1),
			request_timeout: Duration::from_secs(30),
			retention: Duration::from_secs(15 * 60),
			sweep_interval: Duration::from_secs(60),
			max_concurrent_acquisitions: 4,
		}
	}
}

/// `#[serde(with = "...")]` helper storing a [`Duration`](std::time::Duration) as integer milliseconds.
pub mod duration_ms {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
