//! Actor system for the budget-generation pipeline.
//!
//! This crate provides the Ractor-based workers that drain the job and
//! notification stores, and the supervisor that manages them.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns pool membership and runs the
//!   lease reaper and queue cleanup ticks
//! - `BudgetWorker` - Claims jobs and turns briefings into budgets
//! - `NotificationWorker` - Delivers stored notifications over real time
//!   and email
//!
//! # Usage
//!
//! ```ignore
//! use actors::{PipelineDeps, PoolConfig, WorkerPool};
//!
//! let deps = PipelineDeps::from_database(&db, analyzer, calculator, realtime);
//! let config = PoolConfig::from_env()?;
//! let (pool, handle) = WorkerPool::spawn(deps, config.clone()).await?;
//! pool.start(config.start_options()).await?;
//! ```

mod budget_worker;
mod config;
mod deps;
mod email;
mod error;
mod estimator;
mod messages;
mod notification_worker;
mod realtime;
mod supervisor;

pub use budget_worker::{BudgetJobProcessor, BudgetWorker, JobReport};
pub use config::{
    BudgetWorkerConfig, NotificationWorkerConfig, PoolConfig, PoolConfigBuilder, SmtpConfig,
    StartOptions,
};
pub use deps::PipelineDeps;
pub use email::{EmailTemplate, SmtpMailer, render_email};
pub use error::{ConfigError, EmailError, JobError, PoolError};
pub use estimator::AreaBasedEstimator;
pub use messages::{BudgetWorkerMessage, NotificationWorkerMessage, PoolReply, SupervisorMessage};
pub use notification_worker::{CycleReport, NotificationDispatcher, NotificationWorker};
pub use realtime::{RealtimeEnvelope, RealtimeHub, format_sse_event};
pub use supervisor::{NOTIFICATION_WORKER_ID, Supervisor, SupervisorArgs, WorkerPool};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
