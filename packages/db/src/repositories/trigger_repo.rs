//! Trigger log, the default [`TriggerSink`].
//!
//! Each outcome is appended to `budget_trigger` for audit.

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use pipeline_core::ports::TriggerSink;
use pipeline_core::{PortError, PortResult};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

#[derive(Debug, Clone)]
pub struct TriggerRepository {
    db: Database,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    BudgetGenerated,
    BudgetFailed,
}

/// One audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub event: TriggerEvent,
    pub briefing_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl TriggerRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record(&self, record: TriggerRecord) -> Result<(), DbError> {
        tracing::debug!(event = ?record.event, briefing_id = %record.briefing_id, "Trigger recorded");
        self.db
            .client()
            .query("CREATE budget_trigger CONTENT $content")
            .bind(("content", record))
            .await?
            .check()?;
        Ok(())
    }

    /// Audit rows for a briefing, oldest first.
    pub async fn list_for_briefing(&self, briefing_id: &str) -> Result<Vec<TriggerRecord>, DbError> {
        let mut response = self
            .db
            .client()
            .query("SELECT * FROM budget_trigger WHERE briefing_id = $briefing_id ORDER BY created_at ASC")
            .bind(("briefing_id", briefing_id.to_string()))
            .await?;
        let records: Vec<TriggerRecord> = response.take(0)?;
        Ok(records)
    }
}

impl TriggerSink for TriggerRepository {
    fn on_budget_generated<'a>(
        &'a self,
        budget_id: &'a str,
        briefing_id: &'a str,
    ) -> BoxFuture<'a, PortResult<()>> {
        Box::pin(async move {
            self.record(TriggerRecord {
                event: TriggerEvent::BudgetGenerated,
                briefing_id: briefing_id.to_string(),
                budget_id: Some(budget_id.to_string()),
                error: None,
                created_at: Utc::now(),
            })
            .await
            .map_err(PortError::from)
        })
    }

    fn on_budget_failed<'a>(&'a self, briefing_id: &'a str, error: &'a str) -> BoxFuture<'a, PortResult<()>> {
        Box::pin(async move {
            self.record(TriggerRecord {
                event: TriggerEvent::BudgetFailed,
                briefing_id: briefing_id.to_string(),
                budget_id: None,
                error: Some(error.to_string()),
                created_at: Utc::now(),
            })
            .await
            .map_err(PortError::from)
        })
    }
}
