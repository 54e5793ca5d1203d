//! Message types for actor communication.

use pipeline_core::{FullPoolStats, PoolStats};
use ractor::RpcReplyPort;

use crate::config::StartOptions;
use crate::error::PoolError;

/// Messages for the BudgetWorker.
#[derive(Debug)]
pub enum BudgetWorkerMessage {
    /// Claim and process the next job, then schedule the next poll.
    Poll,
}

/// Messages for the NotificationWorker.
#[derive(Debug)]
pub enum NotificationWorkerMessage {
    /// Run one delivery cycle, then schedule the next one.
    Poll,
}

pub type PoolReply<T> = RpcReplyPort<Result<T, PoolError>>;

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Spawn the workers. No-op when already running.
    Start {
        options: StartOptions,
        reply: PoolReply<()>,
    },

    /// Stop every worker, waiting for in-flight work. No-op when stopped.
    Stop { reply: PoolReply<()> },

    /// Per-worker stats plus queue counts.
    GetStats { reply: PoolReply<PoolStats> },

    /// Stats with uptime and totals.
    GetFullStats { reply: PoolReply<FullPoolStats> },

    /// Replace a worker with a fresh instance under the same id.
    RestartWorker {
        worker_id: String,
        reply: PoolReply<()>,
    },

    /// Add a budget worker and return its id.
    AddWorker { reply: PoolReply<String> },

    /// Remove a budget worker. Refused for the last one.
    RemoveWorker {
        worker_id: String,
        reply: PoolReply<()>,
    },

    /// Run the queue cleanup now and return how many jobs were removed.
    RunCleanup { reply: PoolReply<usize> },

    /// Periodic tick: reclaim expired job leases.
    Maintenance,

    /// Periodic tick: remove old terminal jobs.
    Cleanup,
}
