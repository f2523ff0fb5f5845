//! Analysis result store
//!
//! Idempotent `get_or_compute` over a keyed slot map. For any key at most one
//! computation runs at a time; concurrent callers for the same key wait on
//! the in-flight computation and receive the same `Arc<AnalysisRecord>`.
//! Successful records are cached in memory and written to the durable
//! repository; failures are delivered to the callers waiting at that moment
//! and then forgotten, so the next request recomputes.

pub mod repository;
pub mod sqlite;

pub use repository::{MemoryRepository, RecordRepository};
pub use sqlite::{init_database_pool, SqliteRepository};

use crate::error::{AnalysisError, AnalysisResult};
use crate::models::{AnalysisRecord, RecordKey};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

type Outcome = Option<Result<Arc<AnalysisRecord>, AnalysisError>>;

enum Slot {
    InFlight(watch::Receiver<Outcome>),
    Ready(Arc<AnalysisRecord>),
}

enum Claim {
    Hit(Arc<AnalysisRecord>),
    Wait(watch::Receiver<Outcome>),
    Lead(watch::Sender<Outcome>),
}

pub struct AnalysisStore {
    slots: Mutex<HashMap<RecordKey, Slot>>,
    repository: Arc<dyn RecordRepository>,
}

impl AnalysisStore {
    pub fn new(repository: Arc<dyn RecordRepository>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            repository,
        }
    }

    /// Store backed only by process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRepository::new()))
    }

    pub fn repository(&self) -> &Arc<dyn RecordRepository> {
        &self.repository
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<RecordKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, key: &RecordKey) -> Claim {
        let mut slots = self.lock_slots();
        match slots.get(key) {
            Some(Slot::Ready(record)) => return Claim::Hit(Arc::clone(record)),
            Some(Slot::InFlight(rx)) if rx.has_changed().is_ok() => {
                return Claim::Wait(rx.clone());
            }
            _ => {}
        }
        let (tx, rx) = watch::channel(None);
        slots.insert(key.clone(), Slot::InFlight(rx));
        Claim::Lead(tx)
    }

    /// Wait for the leader's outcome; `None` if the leader was abandoned
    async fn wait(mut rx: watch::Receiver<Outcome>) -> Outcome {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return Some(outcome);
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Return the record for `key`, computing it at most once
    ///
    /// Lookup order: in-memory slot, in-flight computation, durable
    /// repository, then `compute`. The computed record is persisted with
    /// insert-if-absent and the stored record is returned.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: RecordKey,
        compute: F,
    ) -> AnalysisResult<Arc<AnalysisRecord>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AnalysisResult<AnalysisRecord>>,
    {
        let sender = loop {
            match self.claim(&key) {
                Claim::Hit(record) => {
                    debug!(key = %key, "Analysis cache hit");
                    return Ok(record);
                }
                Claim::Wait(rx) => match Self::wait(rx).await {
                    Some(Err(AnalysisError::Cancelled)) | None => {
                        debug!(key = %key, "In-flight analysis abandoned, retrying");
                        continue;
                    }
                    Some(outcome) => return outcome,
                },
                Claim::Lead(tx) => break tx,
            }
        };

        // Declared after `sender` so the slot is cleared before waiters wake
        let mut guard = LeaderGuard {
            store: self,
            key: &key,
            armed: true,
        };

        let outcome = self.load_or_compute(&key, compute).await;

        {
            let mut slots = self.lock_slots();
            match &outcome {
                Ok(record) => {
                    slots.insert(key.clone(), Slot::Ready(Arc::clone(record)));
                }
                Err(e) => {
                    slots.remove(&key);
                    warn!(key = %key, error = %e, "Analysis failed, not cached");
                }
            }
        }
        guard.armed = false;

        let _ = sender.send(Some(outcome.clone()));
        outcome
    }

    async fn load_or_compute<F, Fut>(
        &self,
        key: &RecordKey,
        compute: F,
    ) -> AnalysisResult<Arc<AnalysisRecord>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AnalysisResult<AnalysisRecord>>,
    {
        if let Some(record) = self.repository.get(key).await? {
            debug!(key = %key, "Loaded analysis record from repository");
            return Ok(Arc::new(record));
        }

        let record = compute().await?;
        if record.key() != *key {
            return Err(AnalysisError::PipelineTransient(format!(
                "computed record {} does not match requested key {}",
                record.key(),
                key
            )));
        }
        let stored = self.repository.insert_if_absent(record).await?;
        Ok(Arc::new(stored))
    }

    /// Fetch without computing
    pub async fn lookup(&self, key: &RecordKey) -> AnalysisResult<Option<Arc<AnalysisRecord>>> {
        if let Some(Slot::Ready(record)) = self.lock_slots().get(key) {
            return Ok(Some(Arc::clone(record)));
        }

        let Some(record) = self.repository.get(key).await? else {
            return Ok(None);
        };
        let record = Arc::new(record);

        let mut slots = self.lock_slots();
        match slots.get(key) {
            Some(Slot::Ready(existing)) => Ok(Some(Arc::clone(existing))),
            Some(Slot::InFlight(_)) => Ok(Some(record)),
            None => {
                slots.insert(key.clone(), Slot::Ready(Arc::clone(&record)));
                Ok(Some(record))
            }
        }
    }

    pub async fn list_fingerprints(&self, model_version: &str) -> AnalysisResult<Vec<String>> {
        self.repository.list_fingerprints(model_version).await
    }

    /// Number of computations currently in flight
    pub fn in_flight(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|s| matches!(s, Slot::InFlight(_)))
            .count()
    }
}

/// Clears an abandoned leader's slot
struct LeaderGuard<'a> {
    store: &'a AnalysisStore,
    key: &'a RecordKey,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.store.lock_slots();
        if matches!(slots.get(self.key), Some(Slot::InFlight(_))) {
            slots.remove(self.key);
        }
        debug!(key = %self.key, "Abandoned in-flight analysis slot cleared");
    }
}
