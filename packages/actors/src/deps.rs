//! Collaborators shared by every worker of a pool.

use std::sync::Arc;

use db::Database;
use db::repositories::{
    BriefingRepository, BudgetRepository, JobRepository, NotificationRepository,
    OfficeRepository, TriggerRepository, UserRepository,
};
use pipeline_core::ports::{
    BriefingAnalyzer, BriefingSource, BudgetCalculator, BudgetSink, EmailTransport,
    OfficeDirectory, RealtimePublisher, TriggerSink, UserDirectory,
};

/// Everything the workers talk to. Cheap to clone.
#[derive(Clone)]
pub struct PipelineDeps {
    pub jobs: JobRepository,
    pub notifications: NotificationRepository,
    pub briefings: Arc<dyn BriefingSource>,
    pub analyzer: Arc<dyn BriefingAnalyzer>,
    pub offices: Arc<dyn OfficeDirectory>,
    pub calculator: Arc<dyn BudgetCalculator>,
    pub budgets: Arc<dyn BudgetSink>,
    pub triggers: Arc<dyn TriggerSink>,
    pub users: Arc<dyn UserDirectory>,
    pub realtime: Arc<dyn RealtimePublisher>,
    /// Email is skipped entirely when absent.
    pub email: Option<Arc<dyn EmailTransport>>,
}

impl PipelineDeps {
    /// Wire the SurrealDB-backed collaborators of `db` with the given
    /// analysis, pricing and real-time implementations.
    pub fn from_database(
        db: &Database,
        analyzer: Arc<dyn BriefingAnalyzer>,
        calculator: Arc<dyn BudgetCalculator>,
        realtime: Arc<dyn RealtimePublisher>,
    ) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            notifications: NotificationRepository::new(db.clone()),
            briefings: Arc::new(BriefingRepository::new(db.clone())),
            analyzer,
            offices: Arc::new(OfficeRepository::new(db.clone())),
            calculator,
            budgets: Arc::new(BudgetRepository::new(db.clone())),
            triggers: Arc::new(TriggerRepository::new(db.clone())),
            users: Arc::new(UserRepository::new(db.clone())),
            realtime,
            email: None,
        }
    }

    pub fn with_email(mut self, transport: Arc<dyn EmailTransport>) -> Self {
        self.email = Some(transport);
        self
    }
}
