//! User repository, the default [`UserDirectory`].

use futures_util::future::BoxFuture;
use pipeline_core::ports::UserDirectory;
use pipeline_core::{PortError, PortResult, UserContact};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

#[derive(Debug, Clone)]
pub struct UserRepository {
    db: Database,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserRecord {
    user_id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a user's contact data.
    pub async fn save(&self, user: UserContact) -> Result<(), DbError> {
        let record = UserRecord {
            user_id: user.id.clone(),
            name: user.name,
            email: user.email,
        };
        self.db
            .client()
            .query(r#"UPSERT type::thing("user_account", $id) CONTENT $content"#)
            .bind(("id", user.id))
            .bind(("content", record))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserContact>, DbError> {
        let mut response = self
            .db
            .client()
            .query(r#"SELECT * FROM type::thing("user_account", $id)"#)
            .bind(("id", user_id.to_string()))
            .await?;
        let records: Vec<UserRecord> = response.take(0)?;

        Ok(records.into_iter().next().map(|r| UserContact {
            id: r.user_id,
            name: r.name,
            email: r.email,
        }))
    }
}

impl UserDirectory for UserRepository {
    fn get_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, PortResult<Option<UserContact>>> {
        Box::pin(async move { self.get(user_id).await.map_err(PortError::from) })
    }
}
