//! Repository implementations for database operations.

mod briefing_repo;
mod budget_repo;
mod job_repo;
mod notification_repo;
mod office_repo;
mod trigger_repo;
mod user_repo;

pub use briefing_repo::BriefingRepository;
pub use budget_repo::{BudgetRepository, StoredBudget};
pub use job_repo::{FailOutcome, JobRepository, ReapReport};
pub use notification_repo::NotificationRepository;
pub use office_repo::OfficeRepository;
pub use trigger_repo::{TriggerEvent, TriggerRecord, TriggerRepository};
pub use user_repo::UserRepository;
