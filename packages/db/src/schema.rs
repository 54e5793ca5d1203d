//! Database schema definitions using SurrealQL.
//!
//! Tables are schemaless; records carry their own string id next to the
//! SurrealDB record id and timestamps are stored as epoch milliseconds.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// Creates every table and index the pipeline uses. Safe to run repeatedly.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.client().query(JOB_SCHEMA).await?.check()?;
    db.client().query(NOTIFICATION_SCHEMA).await?.check()?;
    db.client().query(COLLABORATOR_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job queue table.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE INDEX IF NOT EXISTS job_id ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_briefing ON job FIELDS briefing_id;

-- Claim order: priority first, then age
DEFINE INDEX IF NOT EXISTS job_claim ON job FIELDS status, priority_rank, created_at;
DEFINE INDEX IF NOT EXISTS job_lease ON job FIELDS status, lease_expires_at;
"#;

/// Notification outbox table.
const NOTIFICATION_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS notification SCHEMALESS;

DEFINE INDEX IF NOT EXISTS notification_id ON notification FIELDS notification_id UNIQUE;
DEFINE INDEX IF NOT EXISTS notification_user ON notification FIELDS user_id;
DEFINE INDEX IF NOT EXISTS notification_pending ON notification FIELDS sent, processing, abandoned, priority_rank, created_at;
"#;

/// Tables backing the default collaborator implementations.
const COLLABORATOR_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS briefing SCHEMALESS;
DEFINE INDEX IF NOT EXISTS briefing_id ON briefing FIELDS briefing_id UNIQUE;

DEFINE TABLE IF NOT EXISTS budget SCHEMALESS;
DEFINE INDEX IF NOT EXISTS budget_id ON budget FIELDS budget_id UNIQUE;
DEFINE INDEX IF NOT EXISTS budget_briefing ON budget FIELDS briefing_id, generated_automatically;

DEFINE TABLE IF NOT EXISTS office SCHEMALESS;
DEFINE INDEX IF NOT EXISTS office_id ON office FIELDS office_id UNIQUE;

DEFINE TABLE IF NOT EXISTS user_account SCHEMALESS;
DEFINE INDEX IF NOT EXISTS user_account_id ON user_account FIELDS user_id UNIQUE;

-- Audit trail of job outcomes
DEFINE TABLE IF NOT EXISTS budget_trigger SCHEMALESS;
DEFINE INDEX IF NOT EXISTS budget_trigger_briefing ON budget_trigger FIELDS briefing_id;
"#;
