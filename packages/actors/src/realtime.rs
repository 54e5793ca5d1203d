//! In-process real-time hub.
//!
//! Publishes are fire-and-forget: a message sent while nobody listens is
//! dropped. A transport (SSE, WebSocket) subscribes and forwards by channel.

use futures_util::future::BoxFuture;
use pipeline_core::ports::RealtimePublisher;
use pipeline_core::{PortResult, RealtimeMessage};
use tokio::sync::broadcast;

/// A message addressed to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEnvelope {
    pub channel: String,
    pub message: RealtimeMessage,
}

/// Broadcast hub implementing [`RealtimePublisher`].
#[derive(Debug, Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<RealtimeEnvelope>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every channel.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl RealtimePublisher for RealtimeHub {
    fn publish<'a>(&'a self, channel: &'a str, message: RealtimeMessage) -> BoxFuture<'a, PortResult<()>> {
        Box::pin(async move {
            let receivers = self
                .tx
                .send(RealtimeEnvelope {
                    channel: channel.to_string(),
                    message,
                })
                .unwrap_or(0);
            tracing::debug!(channel, receivers, "Published real-time message");
            Ok(())
        })
    }
}

/// Format an envelope as a server-sent event.
pub fn format_sse_event(envelope: &RealtimeEnvelope) -> String {
    let json = serde_json::to_string(&envelope.message).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", envelope.channel, json)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use pipeline_core::{NewNotification, user_channel};

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let hub = RealtimeHub::default();
        let mut rx = hub.subscribe();
        let message = NewNotification::budget_processing("u-1", "b-1")
            .into_notification()
            .realtime_message();

        hub.publish(&user_channel("u-1"), message.clone()).await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.channel, "user:u-1");
        assert_eq!(envelope.message, message);
        assert!(format_sse_event(&envelope).contains("\"type\":\"budget_processing\""));
    }

    #[tokio::test]
    async fn publishing_without_listeners_succeeds() {
        let hub = RealtimeHub::new(4);
        let message = NewNotification::budget_processing("u-1", "b-1")
            .into_notification()
            .realtime_message();
        assert!(hub.publish("user:u-1", message).await.is_ok());
    }
}
