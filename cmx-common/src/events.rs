//! Event types for the CMX event system
//!
//! The orchestrator reports submission lifecycle transitions on an [`EventBus`].
//! Subscribers (progress displays, audit logging, an external API layer) observe
//! them without coupling to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Analysis lifecycle events
///
/// Events are broadcast via EventBus and can be serialized for transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnalysisEvent {
    /// Asset passed validation and was admitted
    Submitted {
        submission_id: Uuid,
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },

    /// Asset was rejected before admission (validation or backpressure)
    Rejected {
        submission_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A worker started the extraction pipeline
    Started {
        submission_id: Uuid,
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },

    /// Record was served without running the pipeline
    CacheHit {
        submission_id: Uuid,
        fingerprint: String,
        model_version: String,
        timestamp: DateTime<Utc>,
    },

    /// Submission finished with a record
    Completed {
        submission_id: Uuid,
        fingerprint: String,
        model_version: String,
        confidence: f32,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Submission failed
    Failed {
        submission_id: Uuid,
        fingerprint: String,
        error_kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl AnalysisEvent {
    /// Submission this event belongs to
    pub fn submission_id(&self) -> Uuid {
        match self {
            AnalysisEvent::Submitted { submission_id, .. }
            | AnalysisEvent::Rejected { submission_id, .. }
            | AnalysisEvent::Started { submission_id, .. }
            | AnalysisEvent::CacheHit { submission_id, .. }
            | AnalysisEvent::Completed { submission_id, .. }
            | AnalysisEvent::Failed { submission_id, .. } => *submission_id,
        }
    }
}

/// Broadcast bus for analysis events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AnalysisEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers start lagging
    ///
    /// # Examples
    ///
    /// ```
    /// use cmx_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AnalysisEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
