//! In-process publish/subscribe fan-out.
//!
//! One broadcast channel carries every event; subscribers are SSE client
//! streams. Delivery is best-effort and at-most-once: a subscriber that
//! connects after an event was published never sees it, and a lagging or
//! dropped subscriber only affects itself.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HubEvent {
    FeedsRefreshed {
        total_added: usize,
        failed: usize,
    },
    ArticlesUpdated {
        feed_id: i64,
        count: usize,
    },
    JobCompleted {
        job_id: i64,
        article_id: i64,
        kind: String,
    },
    JobFailed {
        job_id: i64,
        article_id: i64,
        kind: String,
        error: String,
    },
}

impl HubEvent {
    pub fn type_str(&self) -> &'static str {
        match self {
            HubEvent::FeedsRefreshed { .. } => "feeds-refreshed",
            HubEvent::ArticlesUpdated { .. } => "articles-updated",
            HubEvent::JobCompleted { .. } => "job-completed",
            HubEvent::JobFailed { .. } => "job-failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Delivers to every current subscriber. Publishing with no
    /// subscribers is not an error.
    pub fn publish(&self, event: HubEvent) {
        let delivered = self.tx.send(event).unwrap_or(0);
        tracing::debug!(subscribers = delivered, "published event");
    }

    /// Dropping the returned receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_all_live_subscribers() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let dead = bus.subscribe();
        drop(dead);

        bus.publish(HubEvent::ArticlesUpdated { feed_id: 1, count: 3 });

        let expected = HubEvent::ArticlesUpdated { feed_id: 1, count: 3 };
        assert_eq!(first.recv().await.expect("first must receive"), expected);
        assert_eq!(second.recv().await.expect("second must receive"), expected);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn late_subscriber_receives_nothing_prior() {
        let bus = EventBus::new(16);
        bus.publish(HubEvent::FeedsRefreshed {
            total_added: 1,
            failed: 0,
        });

        let mut late = bus.subscribe();
        bus.publish(HubEvent::FeedsRefreshed {
            total_added: 2,
            failed: 0,
        });

        let event = late.recv().await.expect("late subscriber must receive");
        assert_eq!(
            event,
            HubEvent::FeedsRefreshed {
                total_added: 2,
                failed: 0
            }
        );
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = HubEvent::JobCompleted {
            job_id: 7,
            article_id: 9,
            kind: "extraction".to_string(),
        };
        let json = serde_json::to_value(&event).expect("event must serialize");
        assert_eq!(json["type"], "job-completed");
        assert_eq!(event.type_str(), "job-completed");
    }
}
