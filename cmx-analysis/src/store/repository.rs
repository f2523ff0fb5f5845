//! Durable record repository abstraction

use crate::error::AnalysisResult;
use crate::models::{AnalysisRecord, RecordKey};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable storage for analysis records
///
/// Records are immutable: `insert_if_absent` never overwrites and always
/// returns the record that is stored after the call.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn get(&self, key: &RecordKey) -> AnalysisResult<Option<AnalysisRecord>>;

    /// Store `record` unless one already exists under its key; return the stored record
    async fn insert_if_absent(&self, record: AnalysisRecord) -> AnalysisResult<AnalysisRecord>;

    /// Fingerprints with a record under `model_version`, sorted
    async fn list_fingerprints(&self, model_version: &str) -> AnalysisResult<Vec<String>>;
}

/// Process-local repository
#[derive(Default)]
pub struct MemoryRepository {
    records: RwLock<HashMap<RecordKey, AnalysisRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn get(&self, key: &RecordKey) -> AnalysisResult<Option<AnalysisRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn insert_if_absent(&self, record: AnalysisRecord) -> AnalysisResult<AnalysisRecord> {
        let mut records = self.records.write().await;
        let stored = records.entry(record.key()).or_insert(record);
        Ok(stored.clone())
    }

    async fn list_fingerprints(&self, model_version: &str) -> AnalysisResult<Vec<String>> {
        let records = self.records.read().await;
        let mut fingerprints: Vec<String> = records
            .keys()
            .filter(|k| k.model_version == model_version)
            .map(|k| k.fingerprint.clone())
            .collect();
        fingerprints.sort();
        Ok(fingerprints)
    }
}
