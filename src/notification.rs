use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::timeline::{ElementId, NoticeDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationSource {
    Activity,
    Trigger,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineNotification {
    #[serde(skip)]
    pub element: ElementId,
    pub timeline: String,
    pub source: NotificationSource,
    pub text: String,
    pub device: NoticeDevice,
    pub clock_seconds: f64,
    pub dispatched_at: DateTime<Local>,
}

/// Receives notifications as they are dispatched. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn dispatch(&self, notification: TimelineNotification);
}

pub struct ChannelSink {
    sender: mpsc::UnboundedSender<TimelineNotification>,
}

pub fn notification_channel() -> (ChannelSink, mpsc::UnboundedReceiver<TimelineNotification>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChannelSink { sender }, receiver)
}

impl NotificationSink for ChannelSink {
    fn dispatch(&self, notification: TimelineNotification) {
        if self.sender.send(notification).is_err() {
            tracing::debug!("Notification receiver dropped");
        }
    }
}

/// Sink that only logs; used when the host has not attached one.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn dispatch(&self, notification: TimelineNotification) {
        tracing::info!(
            timeline = %notification.timeline,
            device = notification.device.as_str(),
            clock = notification.clock_seconds,
            "{}",
            notification.text
        );
    }
}
