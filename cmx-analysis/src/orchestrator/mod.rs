//! Analysis orchestrator
//!
//! Accepts single and batch submissions, enforces the concurrency budget and
//! queue depth, runs extraction on the blocking pool under a per-item timeout,
//! and routes every request through the [`AnalysisStore`] so identical content
//! is analyzed once.
//!
//! Admission: `concurrency_limit + queue_depth` permits, taken without
//! waiting; a full budget rejects immediately with `BackpressureRejected`.
//! Execution: `concurrency_limit` worker permits, taken only when a
//! computation actually has to run, so cache hits never occupy a worker.

pub mod pipeline;

pub use pipeline::{AnalysisPipeline, FeaturePipeline};

use crate::config::EngineConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::models::{AnalysisRecord, AudioAsset, RecordKey};
use crate::store::AnalysisStore;
use chrono::Utc;
use cmx_common::events::{AnalysisEvent, EventBus};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one batch item, in submission order
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub index: usize,
    pub result: AnalysisResult<Arc<AnalysisRecord>>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    fn from_items(items: Vec<BatchItem>) -> Self {
        let succeeded = items.iter().filter(|i| i.result.is_ok()).count();
        let failed = items.len() - succeeded;
        Self {
            items,
            succeeded,
            failed,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<AnalysisRecord>> {
        self.items.iter().filter_map(|i| i.result.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = (usize, &AnalysisError)> {
        self.items
            .iter()
            .filter_map(|i| i.result.as_ref().err().map(|e| (i.index, e)))
    }
}

pub struct AnalysisOrchestrator {
    config: EngineConfig,
    pipeline: Arc<dyn AnalysisPipeline>,
    store: Arc<AnalysisStore>,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    event_bus: EventBus,
}

impl AnalysisOrchestrator {
    /// Orchestrator running the standard feature pipeline
    pub fn new(
        config: EngineConfig,
        store: Arc<AnalysisStore>,
        event_bus: EventBus,
    ) -> cmx_common::Result<Self> {
        let pipeline = Arc::new(FeaturePipeline::new(&config));
        Self::with_pipeline(config, store, event_bus, pipeline)
    }

    pub fn with_pipeline(
        config: EngineConfig,
        store: Arc<AnalysisStore>,
        event_bus: EventBus,
        pipeline: Arc<dyn AnalysisPipeline>,
    ) -> cmx_common::Result<Self> {
        config.validate()?;
        info!(
            concurrency_limit = config.concurrency_limit,
            queue_depth = config.queue_depth,
            per_item_timeout_ms = config.per_item_timeout_ms,
            model_version = pipeline.model_version(),
            "Analysis orchestrator ready"
        );
        Ok(Self {
            admission: Arc::new(Semaphore::new(config.admission_capacity())),
            workers: Arc::new(Semaphore::new(config.concurrency_limit)),
            config,
            pipeline,
            store,
            event_bus,
        })
    }

    pub fn store(&self) -> &Arc<AnalysisStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model_version(&self) -> &str {
        self.pipeline.model_version()
    }

    /// Submissions currently admitted (running or queued)
    pub fn in_flight(&self) -> usize {
        self.config
            .admission_capacity()
            .saturating_sub(self.admission.available_permits())
    }

    pub async fn submit(&self, asset: AudioAsset) -> AnalysisResult<Arc<AnalysisRecord>> {
        self.submit_with_cancel(asset, CancellationToken::new()).await
    }

    /// Submit one asset; `cancel` aborts it at any point before completion
    ///
    /// # Errors
    /// Validation errors and `BackpressureRejected` are returned before any
    /// work is queued. Pipeline errors, `AnalysisTimeout` and `Cancelled`
    /// follow admission.
    pub async fn submit_with_cancel(
        &self,
        asset: AudioAsset,
        cancel: CancellationToken,
    ) -> AnalysisResult<Arc<AnalysisRecord>> {
        let submission_id = Uuid::new_v4();

        if let Err(e) = self.pipeline.validate(asset.metadata()) {
            self.reject(submission_id, &e);
            return Err(e);
        }

        let permit = match self.try_admit(1) {
            Ok(permit) => permit,
            Err(e) => {
                self.reject(submission_id, &e);
                return Err(e);
            }
        };

        let result = self.run_admitted(submission_id, asset, &cancel).await;
        drop(permit);
        result
    }

    pub async fn submit_batch(&self, assets: Vec<AudioAsset>) -> AnalysisResult<BatchReport> {
        self.submit_batch_with_cancel(assets, CancellationToken::new())
            .await
    }

    /// Submit a batch; results keep submission order
    ///
    /// The batch is admitted as a unit (one admission permit per concurrently
    /// running item). Per-item failures are reported in the batch and never
    /// abort sibling items.
    ///
    /// # Errors
    /// `BatchTooLarge` or `BackpressureRejected` for the batch as a whole.
    pub async fn submit_batch_with_cancel(
        &self,
        assets: Vec<AudioAsset>,
        cancel: CancellationToken,
    ) -> AnalysisResult<BatchReport> {
        if assets.len() > self.config.max_batch_size {
            return Err(AnalysisError::BatchTooLarge {
                size: assets.len(),
                max: self.config.max_batch_size,
            });
        }
        if assets.is_empty() {
            return Ok(BatchReport::default());
        }

        let width = assets.len().min(self.config.concurrency_limit);
        let permits = self.try_admit(width)?;
        let batch_started = Instant::now();

        info!(
            items = assets.len(),
            concurrency = width,
            "Batch admitted"
        );

        let items: Vec<BatchItem> = stream::iter(assets.into_iter().enumerate())
            .map(|(index, asset)| {
                let cancel = cancel.child_token();
                async move {
                    let submission_id = Uuid::new_v4();
                    let result = match self.pipeline.validate(asset.metadata()) {
                        Ok(()) => self.run_admitted(submission_id, asset, &cancel).await,
                        Err(e) => {
                            self.reject(submission_id, &e);
                            Err(e)
                        }
                    };
                    BatchItem { index, result }
                }
            })
            .buffered(width)
            .collect()
            .await;
        drop(permits);

        let report = BatchReport::from_items(items);
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = batch_started.elapsed().as_millis() as u64,
            "Batch complete"
        );
        Ok(report)
    }

    fn try_admit(&self, permits: usize) -> AnalysisResult<OwnedSemaphorePermit> {
        let capacity = self.config.admission_capacity();
        let backpressure = || AnalysisError::BackpressureRejected {
            in_flight: self.in_flight(),
            capacity,
        };
        let count = u32::try_from(permits).map_err(|_| backpressure())?;
        match Arc::clone(&self.admission).try_acquire_many_owned(count) {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::NoPermits) => {
                let err = backpressure();
                debug!(error = %err, "Submission rejected");
                Err(err)
            }
            Err(TryAcquireError::Closed) => Err(AnalysisError::PipelineTransient(
                "admission closed".to_string(),
            )),
        }
    }

    async fn run_admitted(
        &self,
        submission_id: Uuid,
        asset: AudioAsset,
        cancel: &CancellationToken,
    ) -> AnalysisResult<Arc<AnalysisRecord>> {
        let started = Instant::now();
        let fingerprint = {
            let asset = asset.clone();
            tokio::task::spawn_blocking(move || asset.fingerprint()).await?
        };

        self.emit(AnalysisEvent::Submitted {
            submission_id,
            fingerprint: fingerprint.clone(),
            timestamp: Utc::now(),
        });

        let key = RecordKey::new(fingerprint.clone(), self.pipeline.model_version());
        let computed = AtomicBool::new(false);
        let compute = || {
            computed.store(true, Ordering::Relaxed);
            self.compute(submission_id, asset, fingerprint.clone(), cancel)
        };

        let lookup = self.store.get_or_compute(key, compute);
        tokio::pin!(lookup);
        let mut computing_on_cancel = false;
        let result = loop {
            tokio::select! {
                biased;
                r = &mut lookup => break r,
                _ = cancel.cancelled(), if !computing_on_cancel => {
                    // A running computation observes the token and returns once its worker is free
                    if computed.load(Ordering::Relaxed) {
                        computing_on_cancel = true;
                        continue;
                    }
                    break Err(AnalysisError::Cancelled);
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(record) if computed.load(Ordering::Relaxed) => {
                self.emit(AnalysisEvent::Completed {
                    submission_id,
                    fingerprint: fingerprint.clone(),
                    model_version: record.model_version.clone(),
                    confidence: record.confidence,
                    elapsed_ms,
                    timestamp: Utc::now(),
                });
            }
            Ok(record) => {
                self.emit(AnalysisEvent::CacheHit {
                    submission_id,
                    fingerprint: fingerprint.clone(),
                    model_version: record.model_version.clone(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(
                    submission_id = %submission_id,
                    fingerprint = %fingerprint,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Analysis failed"
                );
                self.emit(AnalysisEvent::Failed {
                    submission_id,
                    fingerprint: fingerprint.clone(),
                    error_kind: e.kind().to_string(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        result
    }

    /// Run the pipeline on a worker, bounded by the per-item timeout
    ///
    /// The worker permit is held until the blocking task has returned, so a
    /// timed-out or cancelled item never frees its slot while still running.
    async fn compute(
        &self,
        submission_id: Uuid,
        asset: AudioAsset,
        fingerprint: String,
        cancel: &CancellationToken,
    ) -> AnalysisResult<AnalysisRecord> {
        let _worker = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
            permit = Arc::clone(&self.workers).acquire_owned() => permit.map_err(|_| {
                AnalysisError::PipelineTransient("worker pool closed".to_string())
            })?,
        };

        self.emit(AnalysisEvent::Started {
            submission_id,
            fingerprint: fingerprint.clone(),
            timestamp: Utc::now(),
        });
        debug!(submission_id = %submission_id, fingerprint = %fingerprint, "Extraction started");

        let token = cancel.child_token();
        let pipeline = Arc::clone(&self.pipeline);
        let task_token = token.clone();
        let mut handle = tokio::task::spawn_blocking(move || {
            pipeline.analyze(&asset, &fingerprint, &task_token)
        });

        let deadline = tokio::time::sleep(self.config.per_item_timeout());
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            joined = &mut handle => return joined?,
            _ = &mut deadline => AnalysisError::AnalysisTimeout {
                timeout_ms: self.config.per_item_timeout_ms,
            },
            _ = cancel.cancelled() => AnalysisError::Cancelled,
        };

        token.cancel();
        let drain_started = Instant::now();
        let _ = handle.await;
        debug!(
            submission_id = %submission_id,
            error = %outcome,
            drain_ms = drain_started.elapsed().as_millis() as u64,
            "Extraction stopped, worker released"
        );
        Err(outcome)
    }

    fn reject(&self, submission_id: Uuid, error: &AnalysisError) {
        self.emit(AnalysisEvent::Rejected {
            submission_id,
            reason: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: AnalysisEvent) {
        self.event_bus.emit_lossy(event);
    }
}
