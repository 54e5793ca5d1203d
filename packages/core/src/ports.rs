//! Boundaries to the collaborators the pipeline consumes but does not own.
//!
//! Every method returns a boxed `Send` future so implementations can be
//! stored as `Arc<dyn Trait>` and driven from actor handlers.

use futures_util::future::BoxFuture;

use crate::budget::{
    Briefing, HoursBreakdown, NewBudget, OfficeConfig, ProjectData, UserContact, ValuesBreakdown,
};
use crate::notification::RealtimeMessage;

/// Error returned by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

impl PortError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type PortResult<T> = Result<T, PortError>;

/// Read access to briefings plus the cache the pipeline writes back.
pub trait BriefingSource: Send + Sync + 'static {
    /// Fetch a briefing; `Ok(None)` when it does not exist.
    fn get_briefing<'a>(&'a self, briefing_id: &'a str) -> BoxFuture<'a, PortResult<Option<Briefing>>>;

    /// Mark the briefing as having a generated budget and cache the analysis.
    fn record_budget<'a>(
        &'a self,
        briefing_id: &'a str,
        budget_id: &'a str,
        analysis: &'a ProjectData,
    ) -> BoxFuture<'a, PortResult<()>>;
}

/// Extracts structured project data from a briefing.
pub trait BriefingAnalyzer: Send + Sync + 'static {
    fn analyze<'a>(&'a self, briefing: &'a Briefing) -> BoxFuture<'a, PortResult<ProjectData>>;
}

/// Office configuration needed for pricing.
pub trait OfficeDirectory: Send + Sync + 'static {
    fn office_config<'a>(&'a self, office_id: &'a str) -> BoxFuture<'a, PortResult<OfficeConfig>>;
}

/// Hour and value computation. Hours are always computed first.
pub trait BudgetCalculator: Send + Sync + 'static {
    fn calculate_hours<'a>(
        &'a self,
        project: &'a ProjectData,
        office: &'a OfficeConfig,
    ) -> BoxFuture<'a, PortResult<HoursBreakdown>>;

    fn calculate_values<'a>(
        &'a self,
        project: &'a ProjectData,
        hours: &'a HoursBreakdown,
        office: &'a OfficeConfig,
    ) -> BoxFuture<'a, PortResult<ValuesBreakdown>>;
}

/// Persistent budget storage.
pub trait BudgetSink: Send + Sync + 'static {
    /// Store a budget and return its id.
    fn create(&self, budget: NewBudget) -> BoxFuture<'_, PortResult<String>>;

    /// Latest automatically generated budget for a briefing, if any.
    fn find_generated_for_briefing<'a>(
        &'a self,
        briefing_id: &'a str,
    ) -> BoxFuture<'a, PortResult<Option<String>>>;
}

/// Audit and fan-out calls made on job outcomes.
pub trait TriggerSink: Send + Sync + 'static {
    fn on_budget_generated<'a>(
        &'a self,
        budget_id: &'a str,
        briefing_id: &'a str,
    ) -> BoxFuture<'a, PortResult<()>>;

    fn on_budget_failed<'a>(&'a self, briefing_id: &'a str, error: &'a str) -> BoxFuture<'a, PortResult<()>>;
}

/// Resolves notification recipients.
pub trait UserDirectory: Send + Sync + 'static {
    fn get_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, PortResult<Option<UserContact>>>;
}

/// Fire-and-forget publish on a named channel.
pub trait RealtimePublisher: Send + Sync + 'static {
    fn publish<'a>(&'a self, channel: &'a str, message: RealtimeMessage) -> BoxFuture<'a, PortResult<()>>;
}

/// A rendered email ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Outbound email transport.
pub trait EmailTransport: Send + Sync + 'static {
    fn send(&self, email: EmailMessage) -> BoxFuture<'_, PortResult<()>>;
}
