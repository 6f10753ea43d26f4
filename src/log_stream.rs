use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub text: String,
}

impl LogLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct LogSubscription {
    pub id: SubscriptionId,
    pub lines: mpsc::UnboundedReceiver<LogLine>,
}

/// Host boundary delivering raw log lines to the engine.
pub trait LogSource: Send + Sync {
    fn subscribe(&self) -> LogSubscription;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-process fan-out from a single producer to any number of subscribers.
#[derive(Clone, Default)]
pub struct LogBus {
    subscribers: Arc<Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<LogLine>>>>,
    next_id: Arc<AtomicU64>,
}

impl LogBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, line: LogLine) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, sender| {
            if sender.send(line.clone()).is_err() {
                tracing::debug!(subscription = id.0, "Dropping closed log subscription");
                return false;
            }
            true
        });
    }

    pub fn publish_text(&self, text: impl Into<String>) {
        self.publish(LogLine::new(text));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl LogSource for LogBus {
    fn subscribe(&self) -> LogSubscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(id, sender);
        LogSubscription {
            id,
            lines: receiver,
        }
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::{LogBus, LogSource};

    #[test]
    fn delivers_to_every_subscriber_until_unsubscribed() {
        let bus = LogBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish_text("00:0039:Boss casts Meteor");
        assert_eq!(
            first.lines.try_recv().unwrap().text,
            "00:0039:Boss casts Meteor"
        );
        assert_eq!(
            second.lines.try_recv().unwrap().text,
            "00:0039:Boss casts Meteor"
        );

        bus.unsubscribe(first.id);
        bus.publish_text("next");
        assert!(first.lines.try_recv().is_err());
        assert_eq!(second.lines.try_recv().unwrap().text, "next");
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn dropped_receivers_are_pruned_on_publish() {
        let bus = LogBus::new();
        let subscription = bus.subscribe();
        drop(subscription);

        bus.publish_text("line");
        assert_eq!(bus.subscriber_count(), 0);
    }
}
