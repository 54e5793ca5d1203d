//! Notification repository: the outbox drained by the notification worker.

use std::time::Duration;

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use pipeline_core::{
    Metadata, NewNotification, Notification, NotificationId, NotificationKind, Priority,
};
use serde::{Deserialize, Serialize};

use crate::record::{is_write_conflict, millis, millis_ago, now_millis};
use crate::{Database, DbError};

/// Repository for notification persistence operations.
#[derive(Debug, Clone)]
pub struct NotificationRepository {
    db: Database,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct NotificationRecord {
    notification_id: String,
    kind: NotificationKind,
    user_id: String,
    title: String,
    message: String,
    #[serde(default)]
    data: Metadata,
    priority: Priority,
    #[serde(default, with = "ts_milliseconds_option")]
    scheduled_for: Option<DateTime<Utc>>,
    sent: bool,
    processing: bool,
    #[serde(default, with = "ts_milliseconds_option")]
    sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error_message: Option<String>,
    attempts: u32,
    #[serde(default)]
    abandoned: bool,
    #[serde(default)]
    realtime_delivered: bool,
    #[serde(default, with = "ts_milliseconds_option")]
    processing_started_at: Option<DateTime<Utc>>,
    #[serde(with = "ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    fn into_notification(self) -> Result<Notification, DbError> {
        let id = NotificationId::parse(&self.notification_id).map_err(|e| {
            DbError::Serialization(format!("invalid notification id {}: {e}", self.notification_id))
        })?;

        Ok(Notification {
            id,
            kind: self.kind,
            user_id: self.user_id,
            title: self.title,
            message: self.message,
            data: self.data,
            priority: self.priority,
            scheduled_for: self.scheduled_for,
            sent: self.sent,
            processing: self.processing,
            sent_at: self.sent_at,
            error_message: self.error_message,
            attempts: self.attempts,
            abandoned: self.abandoned,
            realtime_delivered: self.realtime_delivered,
            processing_started_at: self.processing_started_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Struct for creating notifications.
#[derive(Debug, Serialize)]
struct NotificationCreate {
    notification_id: String,
    kind: NotificationKind,
    user_id: String,
    title: String,
    message: String,
    data: Metadata,
    priority: Priority,
    priority_rank: u8,
    #[serde(with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
    scheduled_for: Option<DateTime<Utc>>,
    sent: bool,
    processing: bool,
    attempts: u32,
    abandoned: bool,
    realtime_delivered: bool,
    #[serde(with = "ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    updated_at: DateTime<Utc>,
}

impl From<&Notification> for NotificationCreate {
    fn from(n: &Notification) -> Self {
        Self {
            notification_id: n.id.to_string(),
            kind: n.kind,
            user_id: n.user_id.clone(),
            title: n.title.clone(),
            message: n.message.clone(),
            data: n.data.clone(),
            priority: n.priority,
            priority_rank: n.priority.rank(),
            scheduled_for: n.scheduled_for,
            sent: n.sent,
            processing: n.processing,
            attempts: n.attempts,
            abandoned: n.abandoned,
            realtime_delivered: n.realtime_delivered,
            created_at: n.created_at,
            updated_at: n.updated_at,
        }
    }
}

impl NotificationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a pending notification and return it.
    pub async fn create(&self, new_notification: NewNotification) -> Result<Notification, DbError> {
        let notification = new_notification.into_notification();
        let content = NotificationCreate::from(&notification);

        let mut response = self
            .db
            .client()
            .query(r#"CREATE type::thing("notification", $id) CONTENT $content"#)
            .bind(("id", notification.id.to_string()))
            .bind(("content", content))
            .await?;
        let records: Vec<NotificationRecord> = response.take(0)?;

        let created = records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Query("Failed to create notification".into()))?
            .into_notification()?;

        tracing::debug!(notification_id = %created.id, kind = %created.kind, user_id = %created.user_id, "Notification created");
        Ok(created)
    }

    /// Get a notification by ID.
    pub async fn get(&self, id: NotificationId) -> Result<Notification, DbError> {
        let mut response = self
            .db
            .client()
            .query(r#"SELECT * FROM type::thing("notification", $id)"#)
            .bind(("id", id.to_string()))
            .await?;
        let records: Vec<NotificationRecord> = response.take(0)?;

        records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Notification not found: {}", id)))?
            .into_notification()
    }

    /// Notifications addressed to a user, oldest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Notification>, DbError> {
        let mut response = self
            .db
            .client()
            .query("SELECT * FROM notification WHERE user_id = $user_id ORDER BY created_at ASC, notification_id ASC")
            .bind(("user_id", user_id.to_string()))
            .await?;
        let records: Vec<NotificationRecord> = response.take(0)?;

        records.into_iter().map(NotificationRecord::into_notification).collect()
    }

    /// Claim up to `limit` eligible notifications for delivery.
    ///
    /// Eligible: not sent, not processing, not abandoned, and not scheduled
    /// in the future. Ordered by priority (high first) then creation time.
    /// Each claim sets `processing` and counts a delivery attempt.
    pub async fn claim_batch(&self, limit: usize) -> Result<Vec<Notification>, DbError> {
        #[derive(Deserialize)]
        struct Candidate {
            notification_id: String,
        }

        let mut response = self
            .db
            .client()
            .query(
                r#"
                SELECT * FROM notification
                WHERE sent = false
                    AND processing = false
                    AND abandoned = false
                    AND (scheduled_for = NONE OR scheduled_for <= $now)
                ORDER BY priority_rank DESC, created_at ASC, notification_id ASC
                LIMIT $limit
                "#,
            )
            .bind(("now", now_millis()))
            .bind(("limit", limit as i64))
            .await?;
        let candidates: Vec<Candidate> = response.take(0)?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Some(notification) = self.try_claim(&candidate.notification_id).await? {
                claimed.push(notification);
            }
        }
        Ok(claimed)
    }

    async fn try_claim(&self, notification_id: &str) -> Result<Option<Notification>, DbError> {
        let now = now_millis();
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing("notification", $id) SET
                    processing = true,
                    attempts += 1,
                    processing_started_at = $now,
                    updated_at = $now
                WHERE processing = false AND sent = false AND abandoned = false
                RETURN AFTER
                "#,
            )
            .bind(("id", notification_id.to_string()))
            .bind(("now", now))
            .await?;

        match response.take::<Vec<NotificationRecord>>(0) {
            Ok(records) => records
                .into_iter()
                .next()
                .map(NotificationRecord::into_notification)
                .transpose(),
            Err(e) if is_write_conflict(&e) => {
                tracing::debug!(notification_id, error = %e, "Notification claim lost");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every channel succeeded.
    pub async fn mark_sent(&self, id: NotificationId) -> Result<(), DbError> {
        let now = now_millis();
        self.db
            .client()
            .query(
                r#"
                UPDATE type::thing("notification", $id) SET
                    sent = true,
                    sent_at = $now,
                    processing = false,
                    processing_started_at = NONE,
                    error_message = NONE,
                    realtime_delivered = true,
                    updated_at = $now
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("now", now))
            .await?
            .check()?;
        Ok(())
    }

    /// At least one channel failed, or the recipient could not be resolved.
    ///
    /// Clears `processing` and keeps the notification eligible unless the
    /// attempt count has reached `max_attempts`, in which case it is
    /// abandoned. `realtime_delivered` is sticky once set.
    ///
    /// Returns `true` when the notification was abandoned.
    pub async fn record_failure(
        &self,
        id: NotificationId,
        error: &str,
        realtime_delivered: bool,
        max_attempts: u32,
    ) -> Result<bool, DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing("notification", $id) SET
                    processing = false,
                    processing_started_at = NONE,
                    error_message = $error,
                    realtime_delivered = realtime_delivered OR $realtime_delivered,
                    abandoned = attempts >= $max_attempts,
                    updated_at = $now
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("error", error.to_string()))
            .bind(("realtime_delivered", realtime_delivered))
            .bind(("max_attempts", i64::from(max_attempts)))
            .bind(("now", now_millis()))
            .await?;
        let records: Vec<NotificationRecord> = response.take(0)?;

        Ok(records.first().is_some_and(|r| r.abandoned))
    }

    /// Release notifications stuck in `processing` since before `stale_after` ago.
    ///
    /// Returns how many were released.
    pub async fn recover_stale(&self, stale_after: Duration) -> Result<usize, DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE notification SET
                    processing = false,
                    processing_started_at = NONE,
                    updated_at = $now
                WHERE processing = true
                    AND (processing_started_at = NONE OR processing_started_at < $cutoff)
                RETURN AFTER
                "#,
            )
            .bind(("cutoff", millis_ago(stale_after)))
            .bind(("now", now_millis()))
            .await?;
        let records: Vec<NotificationRecord> = response.take(0)?;

        for record in &records {
            tracing::warn!(notification_id = %record.notification_id, "Released stale notification claim");
        }
        Ok(records.len())
    }

    /// Force a claim start time, used to simulate a crashed worker.
    #[doc(hidden)]
    pub async fn backdate_processing(&self, id: NotificationId, started_at: DateTime<Utc>) -> Result<(), DbError> {
        self.db
            .client()
            .query(
                r#"UPDATE type::thing("notification", $id) SET processing = true, processing_started_at = $started_at"#,
            )
            .bind(("id", id.to_string()))
            .bind(("started_at", millis(started_at)))
            .await?
            .check()?;
        Ok(())
    }
}
