#![allow(dead_code)]

use db::{Database, DbError};
use pipeline_core::{Briefing, NewJob, OfficeConfig, Priority};

/// Fresh in-memory database with the schema applied.
///
/// Every call gets its own datastore, so tests never share state.
pub async fn setup_db() -> Result<Database, DbError> {
    Database::memory().await
}

pub fn job_for(briefing_id: &str) -> NewJob {
    NewJob::new(briefing_id, "user-1", "office-1")
}

pub fn job_with_priority(briefing_id: &str, priority: Priority) -> NewJob {
    job_for(briefing_id).with_priority(priority)
}

pub fn briefing(id: &str) -> Briefing {
    Briefing {
        id: id.to_string(),
        office_id: "office-1".to_string(),
        user_id: "user-1".to_string(),
        project_name: format!("Project {id}"),
        answers: serde_json::json!({ "area_m2": 120.0 }),
        budget_generated: false,
        budget_id: None,
        last_analysis: None,
    }
}

pub fn office(id: &str) -> OfficeConfig {
    OfficeConfig {
        office_id: id.to_string(),
        currency: "BRL".to_string(),
        default_hourly_rate: 180.0,
        default_hours_per_m2: 0.8,
        discipline_rates: Vec::new(),
    }
}
