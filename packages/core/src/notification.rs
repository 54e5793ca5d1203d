//! Notification domain types for outbound user communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::job::{Metadata, Priority, next_ulid};

/// Unique identifier for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub Ulid);

impl NotificationId {
    /// Create a new unique notification ID.
    pub fn new() -> Self {
        Self(next_ulid())
    }

    /// Parse a notification ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a notification is about. Decides which channels deliver it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BudgetGenerated,
    BudgetFailed,
    /// Transient status; real-time only.
    BudgetProcessing,
    #[default]
    Generic,
}

impl NotificationKind {
    /// Whether this kind may also go out by email.
    pub fn is_emailable(self) -> bool {
        matches!(
            self,
            NotificationKind::BudgetGenerated | NotificationKind::BudgetFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::BudgetGenerated => "budget_generated",
            NotificationKind::BudgetFailed => "budget_failed",
            NotificationKind::BudgetProcessing => "budget_processing",
            NotificationKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification waiting for (or done with) delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Metadata,
    pub priority: Priority,
    /// Not eligible before this instant.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub sent: bool,
    /// Claimed by a notification worker right now.
    pub processing: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Delivery attempts so far.
    pub attempts: u32,
    /// Delivery attempt cap reached; never picked up again.
    pub abandoned: bool,
    /// The real-time channel already succeeded on an earlier attempt.
    pub realtime_delivered: bool,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Real-time payload for this notification.
    pub fn realtime_message(&self) -> RealtimeMessage {
        RealtimeMessage {
            kind: self.kind,
            title: self.title.clone(),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }

    /// String field from `data`, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// What a producer hands to the notification store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Metadata,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl NewNotification {
    pub fn new(
        kind: NotificationKind,
        user_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            title: title.into(),
            message: message.into(),
            data: Metadata::new(),
            priority: Priority::Normal,
            scheduled_for: None,
        }
    }

    /// Success notice with a link to the generated budget.
    pub fn budget_generated(
        user_id: impl Into<String>,
        briefing_id: &str,
        budget_id: &str,
        project_name: &str,
        link: String,
    ) -> Self {
        Self::new(
            NotificationKind::BudgetGenerated,
            user_id,
            "Budget generated",
            format!("The budget for \"{project_name}\" is ready for review."),
        )
        .with_priority(Priority::High)
        .with_data("briefing_id", briefing_id)
        .with_data("budget_id", budget_id)
        .with_data("project_name", project_name)
        .with_data("link", link)
    }

    /// Failure notice suggesting manual generation or support.
    pub fn budget_failed(user_id: impl Into<String>, briefing_id: &str, error: &str) -> Self {
        Self::new(
            NotificationKind::BudgetFailed,
            user_id,
            "Budget generation failed",
            "We could not generate the budget automatically. You can create it manually \
             from the briefing or contact support.",
        )
        .with_priority(Priority::High)
        .with_data("briefing_id", briefing_id)
        .with_data("error", error)
    }

    /// Transient status notice.
    pub fn budget_processing(user_id: impl Into<String>, briefing_id: &str) -> Self {
        Self::new(
            NotificationKind::BudgetProcessing,
            user_id,
            "Generating budget",
            "Your briefing is being analyzed and the budget is being calculated.",
        )
        .with_priority(Priority::Low)
        .with_data("briefing_id", briefing_id)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Defer delivery until `at`.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Materialize the pending notification this request describes.
    pub fn into_notification(self) -> Notification {
        let now = Utc::now();
        Notification {
            id: NotificationId::new(),
            kind: self.kind,
            user_id: self.user_id,
            title: self.title,
            message: self.message,
            data: self.data,
            priority: self.priority,
            scheduled_for: self.scheduled_for,
            sent: false,
            processing: false,
            sent_at: None,
            error_message: None,
            attempts: 0,
            abandoned: false,
            realtime_delivered: false,
            processing_started_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Payload published on a user's real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: Metadata,
}

/// Channel name for a user's real-time events.
pub fn user_channel(user_id: &str) -> String {
    format!("user:{user_id}")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn only_outcome_kinds_are_emailable() {
        assert!(NotificationKind::BudgetGenerated.is_emailable());
        assert!(NotificationKind::BudgetFailed.is_emailable());
        assert!(!NotificationKind::BudgetProcessing.is_emailable());
        assert!(!NotificationKind::Generic.is_emailable());
    }

    #[test]
    fn realtime_payload_uses_type_key() {
        let notification =
            NewNotification::budget_generated("u-1", "b-1", "budget-9", "Casa Azul", "/budgets/budget-9".into())
                .into_notification();

        let payload = serde_json::to_value(notification.realtime_message()).unwrap();
        assert_eq!(payload["type"], "budget_generated");
        assert_eq!(payload["data"]["budget_id"], "budget-9");
        assert_eq!(notification.data_str("link"), Some("/budgets/budget-9"));
        assert!(!notification.sent);
        assert!(!notification.processing);
    }
}
