use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::handle::TimelineHandle;
use crate::clock::{HostClock, VirtualClock};
use crate::engine::TimelineRuntime;
use crate::log_stream::LogLine;
use crate::notification::{NotificationSink, TimelineNotification};

pub(crate) struct WorkerContext {
    pub handle: Arc<TimelineHandle>,
    pub clock: VirtualClock,
    pub host_clock: Arc<dyn HostClock>,
    pub sink: Arc<dyn NotificationSink>,
    pub tick_interval: Duration,
}

/// Collects notifications raised while the definition is locked. The host sink runs
/// only after the lock is released.
#[derive(Default)]
struct PendingNotifications {
    queued: Mutex<Vec<TimelineNotification>>,
}

impl PendingNotifications {
    fn flush(&self, sink: &dyn NotificationSink) {
        let queued = std::mem::take(&mut *self.queued.lock());
        for notification in queued {
            sink.dispatch(notification);
        }
    }
}

impl NotificationSink for PendingNotifications {
    fn dispatch(&self, notification: TimelineNotification) {
        self.queued.lock().push(notification);
    }
}

/// Drives one active definition until the stop signal changes or its sender is dropped.
pub(crate) async fn run_worker(
    context: WorkerContext,
    mut runtime: TimelineRuntime,
    mut lines: mpsc::UnboundedReceiver<LogLine>,
    mut stop: watch::Receiver<bool>,
) {
    let timeline = context.handle.name();
    let mut interval = tokio::time::interval(context.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stream_open = true;
    let pending = PendingNotifications::default();

    tracing::debug!(timeline = %timeline, "Timeline worker started");

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            line = lines.recv(), if stream_open => {
                let Some(line) = line else {
                    tracing::warn!(timeline = %timeline, "Log stream closed; continuing on clock only");
                    stream_open = false;
                    continue;
                };

                let host_now = context.host_clock.elapsed();
                let outcome = {
                    let mut definition = context.handle.write();
                    runtime.process_line(&mut definition, &context.clock, &line, host_now, &pending)
                };
                pending.flush(context.sink.as_ref());
                if let Some(element) = outcome.synced {
                    tracing::info!(
                        timeline = %timeline,
                        element = %element,
                        clock = context.clock.now(),
                        "Timeline synchronized"
                    );
                }
            }
            _ = interval.tick() => {
                let host_now = context.host_clock.elapsed();
                {
                    let mut definition = context.handle.write();
                    runtime.tick(&mut definition, &context.clock, host_now, &pending);
                }
                pending.flush(context.sink.as_ref());
            }
        }
    }

    tracing::debug!(timeline = %timeline, "Timeline worker stopped");
}
