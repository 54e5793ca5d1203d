#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use chrono::Utc;
use db::repositories::NotificationRepository;
use pipeline_core::{NewNotification, NotificationKind, Priority};

fn generic(user_id: &str, title: &str) -> NewNotification {
    NewNotification::new(NotificationKind::Generic, user_id, title, "body")
}

#[tokio::test]
async fn claim_batch_orders_and_skips_future_notifications() -> Result<(), Box<dyn Error>> {
    let notifications = NotificationRepository::new(common::setup_db().await?);

    let low = notifications
        .create(generic("u-1", "low").with_priority(Priority::Low))
        .await?;
    let normal = notifications.create(generic("u-1", "normal")).await?;
    let high = notifications
        .create(generic("u-1", "high").with_priority(Priority::High))
        .await?;
    let future = notifications
        .create(generic("u-1", "later").scheduled_for(Utc::now() + chrono::Duration::hours(1)))
        .await?;
    let due = notifications
        .create(generic("u-1", "due").scheduled_for(Utc::now() - chrono::Duration::minutes(1)))
        .await?;

    let claimed = notifications.claim_batch(10).await?;
    let ids: Vec<_> = claimed.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![high.id, normal.id, due.id, low.id]);
    assert!(claimed.iter().all(|n| n.processing && n.attempts == 1));

    // Claimed notifications are invisible until released.
    assert!(notifications.claim_batch(10).await?.is_empty());
    assert!(!notifications.get(future.id).await?.processing);
    Ok(())
}

#[tokio::test]
async fn claim_batch_respects_the_limit() -> Result<(), Box<dyn Error>> {
    let notifications = NotificationRepository::new(common::setup_db().await?);
    for i in 0..12 {
        notifications.create(generic("u-1", &format!("n-{i}"))).await?;
    }

    assert_eq!(notifications.claim_batch(10).await?.len(), 10);
    assert_eq!(notifications.claim_batch(10).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn mark_sent_clears_processing() -> Result<(), Box<dyn Error>> {
    let notifications = NotificationRepository::new(common::setup_db().await?);
    let created = notifications
        .create(NewNotification::budget_processing("u-1", "b-1"))
        .await?;
    notifications.claim_batch(10).await?;

    notifications.mark_sent(created.id).await?;

    let stored = notifications.get(created.id).await?;
    assert!(stored.sent);
    assert!(!stored.processing);
    assert!(stored.sent_at.is_some());
    assert!(stored.error_message.is_none());
    assert!(notifications.claim_batch(10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn failures_stay_eligible_until_the_cap() -> Result<(), Box<dyn Error>> {
    let notifications = NotificationRepository::new(common::setup_db().await?);
    let created = notifications
        .create(NewNotification::budget_failed("u-1", "b-1", "boom"))
        .await?;

    for attempt in 1..=3u32 {
        let claimed = notifications.claim_batch(10).await?;
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, attempt);

        let abandoned = notifications
            .record_failure(created.id, "email: connection refused", attempt == 1, 3)
            .await?;
        assert_eq!(abandoned, attempt == 3);

        let stored = notifications.get(created.id).await?;
        assert!(!stored.processing);
        assert!(!stored.sent);
        // Stays set after the first attempt succeeded on real time.
        assert!(stored.realtime_delivered);
        assert_eq!(stored.error_message.as_deref(), Some("email: connection refused"));
    }

    assert!(notifications.get(created.id).await?.abandoned);
    assert!(notifications.claim_batch(10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn stale_processing_is_released() -> Result<(), Box<dyn Error>> {
    let notifications = NotificationRepository::new(common::setup_db().await?);
    let stale = notifications.create(generic("u-1", "stale")).await?;
    let fresh = notifications.create(generic("u-1", "fresh")).await?;
    notifications.claim_batch(10).await?;

    notifications
        .backdate_processing(stale.id, Utc::now() - chrono::Duration::minutes(10))
        .await?;

    let released = notifications.recover_stale(Duration::from_secs(300)).await?;
    assert_eq!(released, 1);
    assert!(!notifications.get(stale.id).await?.processing);
    assert!(notifications.get(fresh.id).await?.processing);

    let reclaimed = notifications.claim_batch(10).await?;
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, stale.id);
    assert_eq!(reclaimed[0].attempts, 2);
    Ok(())
}

#[tokio::test]
async fn list_for_user_returns_oldest_first() -> Result<(), Box<dyn Error>> {
    let notifications = NotificationRepository::new(common::setup_db().await?);
    let first = notifications.create(generic("u-1", "first")).await?;
    notifications.create(generic("u-2", "other")).await?;
    let second = notifications.create(generic("u-1", "second")).await?;

    let listed = notifications.list_for_user("u-1").await?;
    let ids: Vec<_> = listed.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    Ok(())
}
