//! Writes one session's progress into the shared store.

use std::sync::Arc;

use otpgate_protocol::CredentialSummary;
use tracing::{error, info, warn};

use crate::browser::SnapshotSink;
use crate::error::{Error, Result};
use crate::session::{Failure, RemoteIdentifier, SessionKey, SessionRecord, SessionState, SessionStore, Transition, now_ms};

/// The single writer for one session key.
///
/// Writes to a key that was discarded while work was in flight are dropped.
pub(crate) struct Recorder {
	key: SessionKey,
	store: SessionStore,
	state: SessionState,
	detached: bool,
}

impl Recorder {
	pub(crate) fn new(key: SessionKey, store: SessionStore, state: SessionState) -> Self {
		Self {
			key,
			store,
			state,
			detached: false,
		}
	}

	pub(crate) fn state(&self) -> SessionState {
		self.state
	}

	pub(crate) fn is_attached(&self) -> bool {
		!self.detached && self.store.contains(&self.key)
	}

	fn write(&mut self, f: impl FnOnce(&mut SessionRecord) -> Result<()>) -> Result<()> {
		if self.detached {
			return Ok(());
		}
		match self.store.modify(&self.key, f) {
			Err(Error::UnknownSession(_)) => {
				warn!(target: "otpgate.session", session = %self.key, "session discarded, dropping further updates");
				self.detached = true;
				Ok(())
			}
			other => other,
		}
	}

	/// Moves to `next` if the edge is legal and appends it to the history.
	///
	/// Entering `RetryOtp` bumps the retry counter and clears the log.
	pub(crate) fn advance(&mut self, next: SessionState) -> Result<()> {
		let from = self.state;
		if !from.can_advance_to(next) {
			return Err(Error::IllegalTransition { from, to: next });
		}
		self.write(|record| {
			record.state = next;
			record.history.push(Transition { state: next, at: now_ms() });
			if next == SessionState::RetryOtp {
				record.retries += 1;
				record.log.clear();
			}
			Ok(())
		})?;
		self.state = next;
		info!(target: "otpgate.session", session = %self.key, %from, to = %next, "state changed");
		Ok(())
	}

	pub(crate) fn log(&mut self, line: impl Into<String>) {
		let line = line.into();
		info!(target: "otpgate.session", session = %self.key, state = %self.state, "{line}");
		let _ = self.write(|record| {
			record.log.push(line);
			Ok(())
		});
	}

	pub(crate) fn clear_snapshot(&mut self) {
		let _ = self.write(|record| {
			record.snapshot = None;
			Ok(())
		});
	}

	/// Sink that publishes each screenshot over the previous one.
	pub(crate) fn snapshot_sink(&self) -> SnapshotSink {
		let store = self.store.clone();
		let key = self.key.clone();
		Arc::new(move |png: Vec<u8>| {
			let _ = store.modify(&key, |record| {
				record.snapshot = Some(Arc::from(png));
				Ok(())
			});
		})
	}

	pub(crate) fn set_identifier(&mut self, identifier: &RemoteIdentifier) -> Result<()> {
		self.write(|record| {
			if record.remote_identifier.is_some() {
				return Err(Error::AlreadySet("remote identifier"));
			}
			record.remote_identifier = Some(identifier.clone());
			Ok(())
		})
	}

	pub(crate) fn set_credential(&mut self, summary: CredentialSummary) -> Result<()> {
		self.write(|record| {
			if record.credential.is_some() {
				return Err(Error::AlreadySet("credential"));
			}
			record.credential = Some(summary);
			Ok(())
		})
	}

	pub(crate) fn set_public_url(&mut self, url: &str) -> Result<()> {
		self.write(|record| {
			record.public_url = Some(url.to_string());
			Ok(())
		})
	}

	/// Records a terminal failure unless the session already ended.
	pub(crate) fn fail(&mut self, failure: Failure) {
		if self.state.is_terminal() {
			return;
		}
		error!(target: "otpgate.session", session = %self.key, state = %self.state, kind = ?failure.kind, detail = %failure.detail, "attempt failed");
		let _ = self.write(|record| {
			record.state = SessionState::Failed;
			record.history.push(Transition {
				state: SessionState::Failed,
				at: now_ms(),
			});
			record.failure = Some(failure);
			Ok(())
		});
		self.state = SessionState::Failed;
	}

	/// Marks the current step finished so the next command may be claimed.
	pub(crate) fn finish_step(&mut self) {
		let _ = self.write(|record| {
			record.in_flight = false;
			Ok(())
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session::FailureKind;

	fn recorder() -> (SessionStore, Recorder) {
		let store = SessionStore::new();
		let key: SessionKey = "rec".parse().unwrap();
		store.insert(SessionRecord::new(key.clone())).unwrap();
		let recorder = Recorder::new(key, store.clone(), SessionState::Created);
		(store, recorder)
	}

	#[test]
	fn retry_clears_log_and_counts() {
		let (store, mut rec) = recorder();
		for state in [SessionState::AcquiringId, SessionState::IdAcquired, SessionState::OtpRequested, SessionState::Verifying] {
			rec.advance(state).unwrap();
		}
		rec.log("submitting code");
		rec.advance(SessionState::RetryOtp).unwrap();

		let record = store.get_str("rec").unwrap();
		assert_eq!(record.retries, 1);
		assert!(record.log.is_empty());
		assert_eq!(record.visits(SessionState::RetryOtp), 1);
	}

	#[test]
	fn illegal_edge_is_rejected_without_writing() {
		let (store, mut rec) = recorder();
		let err = rec.advance(SessionState::Authenticated).unwrap_err();
		assert!(matches!(err, Error::IllegalTransition { .. }));
		assert_eq!(store.get_str("rec").unwrap().state, SessionState::Created);
	}

	#[test]
	fn failure_is_recorded_once() {
		let (store, mut rec) = recorder();
		rec.fail(Failure::new(FailureKind::DispatchRejected, "HTTP 403"));
		rec.fail(Failure::new(FailureKind::UploadError, "ignored"));

		let record = store.get_str("rec").unwrap();
		assert_eq!(record.state, SessionState::Failed);
		assert_eq!(record.failure.as_ref().unwrap().kind, FailureKind::DispatchRejected);
		assert_eq!(record.visits(SessionState::Failed), 1);
	}

	#[test]
	fn writes_after_discard_are_dropped() {
		let (store, mut rec) = recorder();
		store.remove(&"rec".parse().unwrap());
		rec.advance(SessionState::AcquiringId).unwrap();
		rec.log("late line");
		assert!(!rec.is_attached());
		assert!(store.is_empty());
	}

	#[test]
	fn identifier_is_set_once() {
		let (_, mut rec) = recorder();
		rec.set_identifier(&RemoteIdentifier::new("a")).unwrap();
		assert!(rec.set_identifier(&RemoteIdentifier::new("b")).is_err());
	}
}
