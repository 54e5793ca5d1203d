//! Briefing repository, the default [`BriefingSource`].

use futures_util::future::BoxFuture;
use pipeline_core::ports::BriefingSource;
use pipeline_core::{Briefing, PortError, PortResult, ProjectData};
use serde::{Deserialize, Serialize};

use crate::record::now_millis;
use crate::{Database, DbError};

#[derive(Debug, Clone)]
pub struct BriefingRepository {
    db: Database,
}

#[derive(Debug, Serialize, Deserialize)]
struct BriefingRecord {
    briefing_id: String,
    office_id: String,
    user_id: String,
    project_name: String,
    #[serde(default)]
    answers: serde_json::Value,
    #[serde(default)]
    budget_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    budget_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_analysis: Option<ProjectData>,
}

impl From<Briefing> for BriefingRecord {
    fn from(b: Briefing) -> Self {
        Self {
            briefing_id: b.id,
            office_id: b.office_id,
            user_id: b.user_id,
            project_name: b.project_name,
            answers: b.answers,
            budget_generated: b.budget_generated,
            budget_id: b.budget_id,
            last_analysis: b.last_analysis,
        }
    }
}

impl From<BriefingRecord> for Briefing {
    fn from(r: BriefingRecord) -> Self {
        Self {
            id: r.briefing_id,
            office_id: r.office_id,
            user_id: r.user_id,
            project_name: r.project_name,
            answers: r.answers,
            budget_generated: r.budget_generated,
            budget_id: r.budget_id,
            last_analysis: r.last_analysis,
        }
    }
}

impl BriefingRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a briefing.
    pub async fn save(&self, briefing: Briefing) -> Result<(), DbError> {
        let id = briefing.id.clone();
        self.db
            .client()
            .query(r#"UPSERT type::thing("briefing", $id) CONTENT $content"#)
            .bind(("id", id))
            .bind(("content", BriefingRecord::from(briefing)))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn get(&self, briefing_id: &str) -> Result<Option<Briefing>, DbError> {
        let mut response = self
            .db
            .client()
            .query(r#"SELECT * FROM type::thing("briefing", $id)"#)
            .bind(("id", briefing_id.to_string()))
            .await?;
        let records: Vec<BriefingRecord> = response.take(0)?;

        Ok(records.into_iter().next().map(Briefing::from))
    }

    /// Flag the briefing as budgeted and cache the analysis it was priced from.
    pub async fn mark_budget_generated(
        &self,
        briefing_id: &str,
        budget_id: &str,
        analysis: &ProjectData,
    ) -> Result<(), DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing("briefing", $id) SET
                    budget_generated = true,
                    budget_id = $budget_id,
                    last_analysis = $analysis,
                    analyzed_at = $now
                RETURN AFTER
                "#,
            )
            .bind(("id", briefing_id.to_string()))
            .bind(("budget_id", budget_id.to_string()))
            .bind(("analysis", analysis.clone()))
            .bind(("now", now_millis()))
            .await?;
        let records: Vec<BriefingRecord> = response.take(0)?;

        if records.is_empty() {
            return Err(DbError::NotFound(format!("briefing {briefing_id}")));
        }
        Ok(())
    }
}

impl BriefingSource for BriefingRepository {
    fn get_briefing<'a>(&'a self, briefing_id: &'a str) -> BoxFuture<'a, PortResult<Option<Briefing>>> {
        Box::pin(async move { self.get(briefing_id).await.map_err(PortError::from) })
    }

    fn record_budget<'a>(
        &'a self,
        briefing_id: &'a str,
        budget_id: &'a str,
        analysis: &'a ProjectData,
    ) -> BoxFuture<'a, PortResult<()>> {
        Box::pin(async move {
            self.mark_budget_generated(briefing_id, budget_id, analysis)
                .await
                .map_err(PortError::from)
        })
    }
}
