use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval, sleep, sleep_until};
use tracing::{debug, info, warn};

use super::{Acquired, AcquisitionRequest, BrowserLauncher, BrowserPage, SnapshotSink};
use crate::error::{Error, Result};
use crate::redirect;

const MIN_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(50);

/// Runs one browser-assisted acquisition.
///
/// Opens a fresh context, navigates to the entry URL, optionally fills the
/// entry form, then waits for the URL to match the pattern. The context is
/// closed on every return path.
pub async fn acquire(launcher: &dyn BrowserLauncher, request: &AcquisitionRequest, sink: Option<&SnapshotSink>) -> Result<Acquired> {
	let page = launcher.open(&request.user_agent).await?;
	let outcome = drive(page.as_ref(), request, sink).await;
	if let Err(e) = page.close().await {
		warn!(target: "otpgate.browser", error = %e, "failed to close browser context");
	}
	outcome
}

async fn drive(page: &dyn BrowserPage, request: &AcquisitionRequest, sink: Option<&SnapshotSink>) -> Result<Acquired> {
	let started = Instant::now();
	let deadline = started + request.timeout;
	let mut shots = interval(request.snapshot_interval.max(MIN_SNAPSHOT_INTERVAL));
	shots.set_missed_tick_behavior(MissedTickBehavior::Skip);

	info!(target: "otpgate.browser", url = %request.entry_url, pattern = %request.pattern, "navigating");
	{
		let navigation = page.goto(&request.entry_url);
		tokio::pin!(navigation);
		loop {
			tokio::select! {
				result = &mut navigation => {
					if let Err(e) = result {
						warn!(target: "otpgate.browser", error = %e, "navigation error, still waiting for pattern");
					}
					break;
				}
				_ = shots.tick() => capture(page, sink).await,
				_ = sleep_until(deadline) => break,
			}
		}
	}

	if let Some(action) = &request.input {
		match page.fill_and_submit(action).await {
			Ok(()) => debug!(target: "otpgate.browser", selector = %action.selector, "submitted entry form"),
			Err(e) => warn!(target: "otpgate.browser", error = %e, "entry form interaction failed"),
		}
	}

	let mut last_url = None;
	loop {
		match page.current_url().await {
			Ok(Some(url)) => {
				if request.pattern.matches(&url) {
					info!(target: "otpgate.browser", elapsed_ms = started.elapsed().as_millis() as u64, "destination reached");
					return Ok(Acquired {
						matched_url: url,
						cookies: page.cookies().await?,
						salvaged: false,
					});
				}
				last_url = Some(url);
			}
			Ok(None) => {}
			Err(e) => debug!(target: "otpgate.browser", error = %e, "url read failed"),
		}

		if Instant::now() >= deadline {
			break;
		}
		tokio::select! {
			_ = sleep(request.poll_interval) => {}
			_ = shots.tick() => capture(page, sink).await,
		}
	}

	if let (Some(url), Some(key)) = (&last_url, &request.salvage_key) {
		if redirect::extract_identifier(url, key).is_some_and(|id| !id.is_empty()) {
			warn!(target: "otpgate.browser", "pattern not reached, salvaging identifier from last URL");
			return Ok(Acquired {
				matched_url: url.clone(),
				cookies: page.cookies().await?,
				salvaged: true,
			});
		}
	}

	Err(Error::AcquisitionTimeout {
		waited_ms: started.elapsed().as_millis() as u64,
		pattern: request.pattern.to_string(),
		last_url,
	})
}

async fn capture(page: &dyn BrowserPage, sink: Option<&SnapshotSink>) {
	let Some(sink) = sink else { return };
	match page.snapshot().await {
		Ok(png) => (**sink)(png),
		Err(e) => debug!(target: "otpgate.browser", error = %e, "snapshot failed"),
	}
}
