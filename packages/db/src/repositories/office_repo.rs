//! Office repository, the default [`OfficeDirectory`].

use futures_util::future::BoxFuture;
use pipeline_core::ports::OfficeDirectory;
use pipeline_core::{OfficeConfig, PortError, PortResult};

use crate::{Database, DbError};

#[derive(Debug, Clone)]
pub struct OfficeRepository {
    db: Database,
}

impl OfficeRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace an office configuration.
    pub async fn save(&self, office: OfficeConfig) -> Result<(), DbError> {
        let id = office.office_id.clone();
        self.db
            .client()
            .query(r#"UPSERT type::thing("office", $id) CONTENT $content"#)
            .bind(("id", id))
            .bind(("content", office))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn get(&self, office_id: &str) -> Result<OfficeConfig, DbError> {
        let mut response = self
            .db
            .client()
            .query(r#"SELECT * FROM type::thing("office", $id)"#)
            .bind(("id", office_id.to_string()))
            .await?;
        let offices: Vec<OfficeConfig> = response.take(0)?;

        offices
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("office {office_id}")))
    }
}

impl OfficeDirectory for OfficeRepository {
    fn office_config<'a>(&'a self, office_id: &'a str) -> BoxFuture<'a, PortResult<OfficeConfig>> {
        Box::pin(async move { self.get(office_id).await.map_err(PortError::from) })
    }
}
