//! In-memory session store shared between workers and status readers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::record::{SessionRecord, now_ms};
use super::types::{SessionKey, SessionState};
use crate::error::{Error, Result};

/// Map from session key to the latest published [`SessionRecord`].
///
/// The store is the only structure shared across sessions. Writes clone the
/// current record, mutate the clone, and swap it in under the write lock, so a
/// reader holding an `Arc<SessionRecord>` never observes a half-applied change.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
	records: Arc<RwLock<HashMap<SessionKey, Arc<SessionRecord>>>>,
}

impl SessionStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new record; fails when the key is already taken.
	pub fn insert(&self, record: SessionRecord) -> Result<Arc<SessionRecord>> {
		let mut records = self.records.write();
		if records.contains_key(&record.key) {
			return Err(Error::DuplicateSession(record.key.to_string()));
		}
		let record = Arc::new(record);
		records.insert(record.key.clone(), Arc::clone(&record));
		Ok(record)
	}

	/// Returns the latest snapshot for `key`.
	pub fn get(&self, key: &SessionKey) -> Option<Arc<SessionRecord>> {
		self.records.read().get(key).cloned()
	}

	/// Looks a record up by its raw key string.
	pub fn get_str(&self, key: &str) -> Option<Arc<SessionRecord>> {
		let key: SessionKey = key.parse().ok()?;
		self.get(&key)
	}

	pub fn contains(&self, key: &SessionKey) -> bool {
		self.records.read().contains_key(key)
	}

	/// Applies `f` to a copy of the record and publishes the copy.
	///
	/// When `f` fails the stored record is left untouched.
	pub fn modify<R>(&self, key: &SessionKey, f: impl FnOnce(&mut SessionRecord) -> Result<R>) -> Result<R> {
		let mut records = self.records.write();
		let current = records.get(key).ok_or_else(|| Error::UnknownSession(key.to_string()))?;
		let mut next = SessionRecord::clone(current);
		let out = f(&mut next)?;
		next.updated_at = now_ms();
		records.insert(key.clone(), Arc::new(next));
		Ok(out)
	}

	/// Marks the session busy if it is idle and in one of `allowed`.
	///
	/// Claiming is what serializes work per session: a second submission
	/// arriving while a step is queued or running is rejected here instead of
	/// racing the first one.
	pub fn claim(&self, key: &SessionKey, allowed: &[SessionState]) -> Result<SessionState> {
		self.modify(key, |record| {
			if record.in_flight || !allowed.contains(&record.state) {
				return Err(Error::InvalidState {
					key: key.to_string(),
					actual: record.state,
					busy: record.in_flight,
					expected: allowed.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
				});
			}
			record.in_flight = true;
			Ok(record.state)
		})
	}

	pub fn remove(&self, key: &SessionKey) -> bool {
		self.records.write().remove(key).is_some()
	}

	/// Keys of idle records neither written nor read within `retention`.
	pub fn expired(&self, retention: Duration) -> Vec<SessionKey> {
		let cutoff = now_ms().saturating_sub(u64::try_from(retention.as_millis()).unwrap_or(u64::MAX));
		self.records
			.read()
			.values()
			.filter(|record| !record.in_flight && record.last_activity() <= cutoff)
			.map(|record| record.key.clone())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.records.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.read().is_empty()
	}
}
