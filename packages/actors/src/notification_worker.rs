//! Notification worker.
//!
//! Each cycle releases stale claims, claims a batch and delivers every
//! notification over real time (always) and email (outcome kinds only,
//! when a transport is configured and the user has an address). Channel
//! failures are collected, never propagated.

use std::time::{Duration, Instant};

use db::DbError;
use pipeline_core::{Notification, UserContact, WorkerStats, user_channel};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::watch;
use tracing::Instrument;

use crate::config::NotificationWorkerConfig;
use crate::deps::PipelineDeps;
use crate::email::render_email;
use crate::messages::NotificationWorkerMessage;

/// Counts from one delivery cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub released: usize,
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub abandoned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Failed { abandoned: bool },
}

/// Delivers notifications for one worker id.
pub struct NotificationDispatcher {
    worker_id: String,
    deps: PipelineDeps,
    config: NotificationWorkerConfig,
    stats: watch::Sender<WorkerStats>,
}

impl NotificationDispatcher {
    pub fn new(worker_id: impl Into<String>, deps: PipelineDeps, config: NotificationWorkerConfig) -> Self {
        let worker_id = worker_id.into();
        let (stats, _) = watch::channel(WorkerStats::new(worker_id.clone()));
        Self {
            worker_id,
            deps,
            config,
            stats,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &NotificationWorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.borrow().clone()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<WorkerStats> {
        self.stats.subscribe()
    }

    /// Run one delivery cycle.
    ///
    /// Errors are store failures that prevented the cycle; per-notification
    /// store errors are logged and the notification is left to stale recovery.
    pub async fn run_cycle(&self) -> Result<CycleReport, DbError> {
        let notifications = &self.deps.notifications;
        let mut report = CycleReport {
            released: notifications
                .recover_stale(self.config.stale_processing_after)
                .await?,
            ..Default::default()
        };

        let batch = notifications.claim_batch(self.config.batch_size).await?;
        report.claimed = batch.len();

        for notification in batch {
            let span = tracing::info_span!(
                "notification",
                worker_id = %self.worker_id,
                notification_id = %notification.id,
                kind = %notification.kind,
                attempt = notification.attempts,
            );
            match self.deliver(notification).instrument(span).await {
                Ok(Delivery::Sent) => report.sent += 1,
                Ok(Delivery::Failed { abandoned }) => {
                    report.failed += 1;
                    if abandoned {
                        report.abandoned += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(worker_id = %self.worker_id, error = %e, "Failed to record delivery result");
                }
            }
        }

        if report.claimed > 0 {
            tracing::info!(
                worker_id = %self.worker_id,
                claimed = report.claimed,
                sent = report.sent,
                failed = report.failed,
                "Notification cycle finished"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, notification: Notification) -> Result<Delivery, DbError> {
        let started = Instant::now();

        let user = match self.deps.users.get_user(&notification.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                let error = format!("user {} not found", notification.user_id);
                tracing::error!(user_id = %notification.user_id, "Notification recipient not found");
                return self.record_failure(&notification, &error, false, started).await;
            }
            Err(e) => {
                let error = format!("user lookup: {e}");
                tracing::error!(user_id = %notification.user_id, error = %e, "Failed to resolve recipient");
                return self.record_failure(&notification, &error, false, started).await;
            }
        };

        let mut errors = Vec::new();

        let realtime_delivered = notification.realtime_delivered || {
            match self
                .deps
                .realtime
                .publish(&user_channel(&notification.user_id), notification.realtime_message())
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Real-time delivery failed");
                    errors.push(format!("realtime: {e}"));
                    false
                }
            }
        };

        if let Some(error) = self.send_email(&notification, &user).await {
            errors.push(error);
        }

        if errors.is_empty() {
            self.deps.notifications.mark_sent(notification.id).await?;
            self.stats.send_modify(|s| s.record_success(started.elapsed()));
            tracing::debug!("Notification delivered");
            Ok(Delivery::Sent)
        } else {
            self.record_failure(&notification, &errors.join("; "), realtime_delivered, started)
                .await
        }
    }

    /// Send the email when this notification calls for one. Returns the error, if any.
    async fn send_email(&self, notification: &Notification, user: &UserContact) -> Option<String> {
        if !notification.kind.is_emailable() {
            return None;
        }
        let Some(transport) = &self.deps.email else {
            tracing::debug!("Email transport not configured; skipping email");
            return None;
        };
        let Some(email) = render_email(notification, user) else {
            tracing::debug!(user_id = %user.id, "User has no email address; skipping email");
            return None;
        };

        match transport.send(email).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Email delivery failed");
                Some(format!("email: {e}"))
            }
        }
    }

    async fn record_failure(
        &self,
        notification: &Notification,
        error: &str,
        realtime_delivered: bool,
        started: Instant,
    ) -> Result<Delivery, DbError> {
        let abandoned = self
            .deps
            .notifications
            .record_failure(
                notification.id,
                error,
                realtime_delivered,
                self.config.max_delivery_attempts,
            )
            .await?;
        self.stats.send_modify(|s| s.record_failure(started.elapsed()));

        if abandoned {
            tracing::error!(error, attempts = notification.attempts, "Notification abandoned");
        }
        Ok(Delivery::Failed { abandoned })
    }

    fn next_poll(&self, result: &Result<CycleReport, DbError>) -> Duration {
        match result {
            Ok(_) => self.config.poll_interval,
            Err(_) => self.config.error_backoff,
        }
    }
}

/// Actor wrapping a [`NotificationDispatcher`].
pub struct NotificationWorker;

impl Actor for NotificationWorker {
    type Msg = NotificationWorkerMessage;
    type State = NotificationDispatcher;
    type Arguments = NotificationDispatcher;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        dispatcher: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(worker_id = %dispatcher.worker_id(), "Starting notification worker");
        Ok(dispatcher)
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(NotificationWorkerMessage::Poll)?;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            NotificationWorkerMessage::Poll => {
                let result = state.run_cycle().await;
                if let Err(e) = &result {
                    tracing::error!(worker_id = %state.worker_id(), error = %e, "Notification worker loop error");
                }
                myself.send_after(state.next_poll(&result), || NotificationWorkerMessage::Poll);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(worker_id = %state.worker_id(), "Notification worker stopped");
        Ok(())
    }
}
