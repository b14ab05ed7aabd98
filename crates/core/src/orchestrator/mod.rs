//! Session orchestration.
//!
//! [`Orchestrator`] is the handle the control surface talks to. Every attempt
//! gets its own worker task fed through a command queue; commands are only
//! accepted after [`SessionStore::claim`] succeeds, so at most one step per
//! session is ever queued or running.

mod recorder;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use otpgate_protocol::StatusResponse;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use self::worker::{Command, SessionWorker};
use crate::browser::BrowserLauncher;
use crate::contract::ServiceContract;
use crate::error::{Error, Result};
use crate::session::{OtpCode, PhoneNumber, SessionKey, SessionRecord, SessionState, SessionStore};
use crate::settings::OrchestratorSettings;
use crate::upload::UploadRequest;

/// Command queue of a live worker; `None` once the session was discarded
/// and the worker is winding down.
type WorkerSlot = Option<mpsc::UnboundedSender<Command>>;

pub(crate) struct Shared {
	pub(crate) store: SessionStore,
	pub(crate) contract: Arc<ServiceContract>,
	pub(crate) settings: Arc<OrchestratorSettings>,
	pub(crate) browser: Arc<dyn BrowserLauncher>,
	pub(crate) acquisition_slots: Arc<Semaphore>,
	pub(crate) workers: Mutex<HashMap<SessionKey, WorkerSlot>>,
}

/// Entry point for starting and advancing login attempts.
///
/// Cheap to clone; clones share the same store and workers. All methods
/// that enqueue work must be called from within a tokio runtime.
#[derive(Clone)]
pub struct Orchestrator {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for Orchestrator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Orchestrator")
			.field("sessions", &self.shared.store.len())
			.field("workers", &self.shared.workers.lock().len())
			.finish()
	}
}

impl Orchestrator {
	pub fn new(contract: ServiceContract, settings: OrchestratorSettings, browser: Arc<dyn BrowserLauncher>) -> Self {
		let slots = settings.max_concurrent_acquisitions.max(1);
		Self {
			shared: Arc::new(Shared {
				store: SessionStore::new(),
				contract: Arc::new(contract),
				settings: Arc::new(settings),
				browser,
				acquisition_slots: Arc::new(Semaphore::new(slots)),
				workers: Mutex::new(HashMap::new()),
			}),
		}
	}

	pub fn store(&self) -> &SessionStore {
		&self.shared.store
	}

	pub fn contract(&self) -> &ServiceContract {
		&self.shared.contract
	}

	pub fn settings(&self) -> &OrchestratorSettings {
		&self.shared.settings
	}

	/// Registers a new attempt and queues the acquisition.
	///
	/// Returns immediately; progress is observed through [`Self::status`].
	pub fn start_attempt(&self, phone: PhoneNumber, key: Option<SessionKey>) -> Result<SessionKey> {
		let key = key.unwrap_or_else(SessionKey::generate);
		let mut workers = self.shared.workers.lock();
		if workers.contains_key(&key) {
			return Err(Error::DuplicateSession(key.to_string()));
		}

		let mut record = SessionRecord::new(key.clone());
		record.in_flight = true;
		self.shared.store.insert(record)?;

		let (commands, queue) = mpsc::unbounded_channel();
		let _ = commands.send(Command::Start(phone));
		workers.insert(key.clone(), Some(commands));
		drop(workers);

		tokio::spawn(SessionWorker::new(key.clone(), Arc::clone(&self.shared)).run(queue));
		info!(target: "otpgate.session", session = %key, "attempt started");
		Ok(key)
	}

	/// Queues verification of `code`; valid in `OtpRequested` or `RetryOtp`.
	pub fn submit_code(&self, key: &SessionKey, code: OtpCode) -> Result<()> {
		self.enqueue(key, SessionState::ACCEPTS_CODE, Command::Verify(code))
	}

	/// Queues upload and publish of a file; valid in `Authenticated`.
	pub fn submit_upload(&self, key: &SessionKey, request: UploadRequest) -> Result<()> {
		self.enqueue(key, SessionState::ACCEPTS_UPLOAD, Command::Upload(request))
	}

	fn enqueue(&self, key: &SessionKey, allowed: &[SessionState], command: Command) -> Result<()> {
		self.shared.store.claim(key, allowed)?;
		let sent = match self.shared.workers.lock().get(key) {
			Some(Some(commands)) => commands.send(command).is_ok(),
			_ => false,
		};
		if !sent {
			let _ = self.shared.store.modify(key, |record| {
				record.in_flight = false;
				Ok(())
			});
			return Err(Error::UnknownSession(key.to_string()));
		}
		debug!(target: "otpgate.session", session = %key, "command queued");
		Ok(())
	}

	/// Latest status for `key`; unknown keys yield a `found: false` status.
	///
	/// Each read counts as activity for the retention sweep.
	pub fn status(&self, key: &str) -> StatusResponse {
		self.shared
			.store
			.get_str(key)
			.map(|record| {
				record.touch();
				record.to_status()
			})
			.unwrap_or_else(|| StatusResponse::unknown(key))
	}

	pub fn record(&self, key: &SessionKey) -> Option<Arc<SessionRecord>> {
		self.shared.store.get(key)
	}

	/// Removes the record and closes the worker's queue.
	///
	/// A step already running still completes; its writes are dropped.
	pub fn discard(&self, key: &SessionKey) -> bool {
		let removed = self.shared.store.remove(key);
		if let Some(slot) = self.shared.workers.lock().get_mut(key) {
			slot.take();
		}
		if removed {
			info!(target: "otpgate.session", session = %key, "attempt discarded");
		}
		removed
	}

	/// Discards idle records older than the retention window.
	pub fn sweep(&self) -> Vec<SessionKey> {
		let expired = self.shared.store.expired(self.shared.settings.retention);
		for key in &expired {
			self.discard(key);
		}
		if !expired.is_empty() {
			info!(target: "otpgate.session", count = expired.len(), "swept idle sessions");
		}
		expired
	}

	/// Runs [`Self::sweep`] every `sweep_interval` until the task is aborted.
	pub fn spawn_sweeper(&self) -> JoinHandle<()> {
		let orchestrator = self.clone();
		let period = self.shared.settings.sweep_interval.max(Duration::from_millis(10));
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				orchestrator.sweep();
			}
		})
	}

	/// Number of sessions whose worker task is still alive.
	pub fn active_workers(&self) -> usize {
		self.shared.workers.lock().len()
	}
}
