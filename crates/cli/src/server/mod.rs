//! HTTP binding of the attempt operations.

mod error;
mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use otpgate::Orchestrator;
use otpgate_runtime::ChromiumLauncher;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use self::error::{ApiError, ApiResult};
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
	pub orchestrator: Orchestrator,
}

/// Routes for the control surface; `max_upload_bytes` bounds upload bodies.
pub fn router(orchestrator: Orchestrator, max_upload_bytes: usize) -> Router {
	Router::new()
		.route("/health", get(handlers::health))
		.route("/attempts", post(handlers::start_attempt))
		.route("/attempts/{key}", get(handlers::status).delete(handlers::discard))
		.route("/attempts/{key}/code", post(handlers::submit_code))
		.route(
			"/attempts/{key}/upload",
			post(handlers::submit_upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
		)
		.layer(TraceLayer::new_for_http())
		.with_state(AppState { orchestrator })
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve(config: Config) -> Result<()> {
	config.validate()?;
	let launcher = ChromiumLauncher::new(config.browser.clone());
	let orchestrator = Orchestrator::new(config.contract, config.settings, Arc::new(launcher));
	let sweeper = orchestrator.spawn_sweeper();

	let app = router(orchestrator, config.server.max_upload_bytes);
	let address = (config.server.host.as_str(), config.server.port);
	let listener = TcpListener::bind(address)
		.await
		.with_context(|| format!("binding {}:{}", config.server.host, config.server.port))?;
	info!(target: "otpgate.http", address = %listener.local_addr()?, "control surface listening");

	let served = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;
	sweeper.abort();
	served.context("control surface stopped")
}

async fn shutdown_signal() {
	if tokio::signal::ctrl_c().await.is_ok() {
		info!(target: "otpgate.http", "shutting down");
	}
}
