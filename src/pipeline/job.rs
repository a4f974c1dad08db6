//! Document job types.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HeError;

/// Identifier of a submitted document (uuid v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = HeError;

    fn from_str(s: &str) -> Result<Self, HeError> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|e| HeError::InvalidArgument(format!("malformed job id '{}': {}", s, e)))
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled,
    Parameter(String),
    Range(String),
    DepthExceeded(String),
    StaleContext(String),
    Internal(String),
}

impl From<&HeError> for FailureReason {
    fn from(err: &HeError) -> Self {
        match err.root() {
            HeError::Parameter(msg) => FailureReason::Parameter(msg.clone()),
            HeError::Range(msg) => FailureReason::Range(msg.clone()),
            HeError::DepthExceeded(msg) => FailureReason::DepthExceeded(msg.clone()),
            HeError::StaleContext(msg) => FailureReason::StaleContext(msg.clone()),
            e @ HeError::NotInitialized => FailureReason::StaleContext(e.to_string()),
            other => FailureReason::Internal(other.to_string()),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Parameter(msg) => write!(f, "invalid parameters: {}", msg),
            FailureReason::Range(msg) => write!(f, "value out of range: {}", msg),
            FailureReason::DepthExceeded(msg) => write!(f, "depth exceeded: {}", msg),
            FailureReason::StaleContext(msg) => write!(f, "stale context: {}", msg),
            FailureReason::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

/// Lifecycle of a document job.
///
/// ```text
/// queued → chunked → encrypted → computed → decrypted → completed
///    └─────────┴──────────┴──────────┴──────────┴──▶ failed(reason)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Chunked,
    Encrypted,
    Computed,
    Decrypted,
    Completed,
    Failed(FailureReason),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed(_))
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (s, Failed(_)) => !s.is_terminal(),
            (Queued, Chunked)
            | (Chunked, Encrypted)
            | (Encrypted, Computed)
            | (Computed, Decrypted)
            | (Decrypted, Completed) => true,
            _ => false,
        }
    }
}

/// Decrypted count of one feature lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneCount {
    pub lane: usize,
    /// Vocabulary term, or `None` for a hash bucket
    pub term: Option<String>,
    pub count: u64,
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub bytes: usize,
    pub chars: usize,
    pub chunks: usize,
    pub tokens: u64,
    /// Non-zero lanes of the aggregate histogram
    pub lanes: Vec<LaneCount>,
    /// Weighted relevance score when term weights are configured
    pub score: Option<f64>,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub chunks_encrypted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DocumentReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cooperative cancellation flag shared with a job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Hooks into job progress. All methods default to no-ops.
pub trait JobObserver: Send + Sync {
    fn state_changed(&self, _id: JobId, _state: &JobState) {}

    /// Called after chunk `index` of job `id` has been encrypted and stored.
    fn chunk_encrypted(&self, _id: JobId, _index: usize, _cancel: &CancelToken) {}
}
