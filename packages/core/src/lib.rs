//! Core domain types for the budget-generation pipeline.
//!
//! This crate contains shared types used across all packages:
//! - Job and JobStatus for budget-generation requests
//! - Notification and its real-time payload
//! - Briefing/budget types exchanged with external collaborators
//! - Worker, queue and pool statistics
//! - Port traits for the collaborators the pipeline calls

mod budget;
mod job;
mod notification;
pub mod ports;
mod stats;

pub use budget::{
    AreaItem, Briefing, BudgetStatus, DisciplineHours, DisciplineRate, DisciplineValue,
    HoursBreakdown, NewBudget, OfficeConfig, ProjectData, UserContact, ValuesBreakdown,
};
pub use job::{Job, JobId, JobResult, JobStatus, Metadata, NewJob, Priority};
pub use notification::{
    NewNotification, Notification, NotificationId, NotificationKind, RealtimeMessage, user_channel,
};
pub use ports::{PortError, PortResult};
pub use stats::{FullPoolStats, PoolStats, QueueCounts, WorkerStats};
