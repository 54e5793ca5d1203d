//! Budget repository, the default [`BudgetSink`].

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use pipeline_core::ports::BudgetSink;
use pipeline_core::{
    AreaItem, BudgetStatus, HoursBreakdown, NewBudget, PortError, PortResult, ValuesBreakdown,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Database, DbError};

#[derive(Debug, Clone)]
pub struct BudgetRepository {
    db: Database,
}

/// A budget as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBudget {
    pub budget_id: String,
    pub budget: NewBudget,
    pub created_at: DateTime<Utc>,
}

/// Budget row, written and read with the columns spelled out.
///
/// The record id is a `Thing`; it stays out of the struct and is skipped on read.
#[derive(Debug, Serialize, Deserialize)]
struct BudgetRecord {
    budget_id: String,
    briefing_id: String,
    office_id: String,
    created_by: String,
    project_name: String,
    typology: String,
    areas: Vec<AreaItem>,
    hours: HoursBreakdown,
    values: ValuesBreakdown,
    #[serde(default)]
    calculation_inputs: Value,
    status: BudgetStatus,
    generated_automatically: bool,
    version: u32,
    #[serde(with = "ts_milliseconds")]
    created_at: DateTime<Utc>,
}

impl BudgetRecord {
    fn new(budget_id: String, budget: NewBudget, created_at: DateTime<Utc>) -> Self {
        Self {
            budget_id,
            briefing_id: budget.briefing_id,
            office_id: budget.office_id,
            created_by: budget.created_by,
            project_name: budget.project_name,
            typology: budget.typology,
            areas: budget.areas,
            hours: budget.hours,
            values: budget.values,
            calculation_inputs: budget.calculation_inputs,
            status: budget.status,
            generated_automatically: budget.generated_automatically,
            version: budget.version,
            created_at,
        }
    }

    fn into_stored(self) -> StoredBudget {
        StoredBudget {
            budget_id: self.budget_id,
            budget: NewBudget {
                briefing_id: self.briefing_id,
                office_id: self.office_id,
                created_by: self.created_by,
                project_name: self.project_name,
                typology: self.typology,
                areas: self.areas,
                hours: self.hours,
                values: self.values,
                calculation_inputs: self.calculation_inputs,
                status: self.status,
                generated_automatically: self.generated_automatically,
                version: self.version,
            },
            created_at: self.created_at,
        }
    }
}

impl BudgetRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a budget under a fresh id and return the id.
    pub async fn insert(&self, budget: NewBudget) -> Result<String, DbError> {
        let budget_id = ulid::Ulid::new().to_string();
        let stored = BudgetRecord::new(budget_id.clone(), budget, Utc::now());

        self.db
            .client()
            .query(r#"CREATE type::thing("budget", $id) CONTENT $content"#)
            .bind(("id", budget_id.clone()))
            .bind(("content", stored))
            .await?
            .check()?;

        tracing::debug!(budget_id = %budget_id, "Budget stored");
        Ok(budget_id)
    }

    /// Every budget stored for a briefing, oldest first.
    pub async fn list_for_briefing(&self, briefing_id: &str) -> Result<Vec<StoredBudget>, DbError> {
        let mut response = self
            .db
            .client()
            .query("SELECT * FROM budget WHERE briefing_id = $briefing_id ORDER BY created_at ASC, budget_id ASC")
            .bind(("briefing_id", briefing_id.to_string()))
            .await?;
        let records: Vec<BudgetRecord> = response.take(0)?;
        Ok(records.into_iter().map(BudgetRecord::into_stored).collect())
    }

    /// Latest automatically generated budget for a briefing.
    pub async fn latest_generated(&self, briefing_id: &str) -> Result<Option<String>, DbError> {
        #[derive(Deserialize)]
        struct Found {
            budget_id: String,
        }

        let mut response = self
            .db
            .client()
            .query(
                r#"
                SELECT budget_id, created_at FROM budget
                WHERE briefing_id = $briefing_id AND generated_automatically = true
                ORDER BY created_at DESC
                LIMIT 1
                "#,
            )
            .bind(("briefing_id", briefing_id.to_string()))
            .await?;
        let found: Vec<Found> = response.take(0)?;

        Ok(found.into_iter().next().map(|f| f.budget_id))
    }
}

impl BudgetSink for BudgetRepository {
    fn create(&self, budget: NewBudget) -> BoxFuture<'_, PortResult<String>> {
        Box::pin(async move { self.insert(budget).await.map_err(PortError::from) })
    }

    fn find_generated_for_briefing<'a>(
        &'a self,
        briefing_id: &'a str,
    ) -> BoxFuture<'a, PortResult<Option<String>>> {
        Box::pin(async move { self.latest_generated(briefing_id).await.map_err(PortError::from) })
    }
}
