//! Job domain types for budget-generation work items.

use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

/// Monotonic ULID source so ids enqueued by one process sort in insertion order.
static ID_GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

pub(crate) fn next_ulid() -> Ulid {
    match ID_GENERATOR.lock() {
        Ok(mut generator) => generator.generate().unwrap_or_else(|_| Ulid::new()),
        Err(_) => Ulid::new(),
    }
}

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(next_ulid())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level used to order claims. Never preempts running work.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

impl Priority {
    /// Numeric rank stored next to the priority so stores can sort on it.
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    #[default]
    Queued,
    /// Claimed and owned by exactly one worker.
    InProgress,
    /// Budget produced; terminal.
    Completed,
    /// Gave up; terminal.
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Get a simple status string for display and queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result payload stored on a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Budget produced (or found) for the briefing.
    pub budget_id: String,
    /// Wall-clock time spent by the worker, in milliseconds.
    pub processing_time_ms: u64,
    /// True when the job closed on an already generated budget.
    #[serde(default)]
    pub reused_existing: bool,
}

impl JobResult {
    pub fn new(budget_id: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            budget_id: budget_id.into(),
            processing_time_ms,
            reused_existing: false,
        }
    }

    pub fn reused(budget_id: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            reused_existing: true,
            ..Self::new(budget_id, processing_time_ms)
        }
    }
}

/// Free-form job metadata (trigger source, timestamps, ...).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// What a producer hands to the queue when requesting a budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub briefing_id: String,
    pub user_id: String,
    /// Office (escritório) the briefing belongs to.
    pub office_id: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Metadata,
    /// Attempt cap for retryable failures.
    pub max_attempts: u32,
}

impl NewJob {
    /// Create a job request with default priority and three attempts.
    pub fn new(
        briefing_id: impl Into<String>,
        user_id: impl Into<String>,
        office_id: impl Into<String>,
    ) -> Self {
        Self {
            briefing_id: briefing_id.into(),
            user_id: user_id.into(),
            office_id: office_id.into(),
            priority: Priority::default(),
            metadata: Metadata::new(),
            max_attempts: 3,
        }
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the attempt cap for this job.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Materialize the queued job this request describes.
    pub fn into_job(self) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            briefing_id: self.briefing_id,
            user_id: self.user_id,
            office_id: self.office_id,
            priority: self.priority,
            metadata: self.metadata,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: self.max_attempts,
            last_error: None,
            result: None,
            worker_id: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A request to generate a budget from a briefing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub briefing_id: String,
    pub user_id: String,
    pub office_id: String,
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Metadata,
    pub status: JobStatus,
    /// Number of claims so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<JobResult>,
    /// Worker currently holding the claim.
    pub worker_id: Option<String>,
    /// Claim lease; an expired lease lets the reaper take the job back.
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether another retryable failure may still re-queue the job.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}
