//! Playback of one active definition: clock advance, resynchronization, control flow
//! and notification dispatch. Everything here is synchronous; the controller's worker
//! drives it from the log stream and a tick interval.

mod cursor;
mod matcher;

pub use cursor::{Cursor, Frame, Jump, Transfer};
pub use matcher::SyncMatch;

use chrono::Local;
use std::time::Duration;

use crate::clock::VirtualClock;
use crate::log_stream::LogLine;
use crate::notification::{NotificationSink, NotificationSource, TimelineNotification};
use crate::settings::TimelineSettings;
use crate::timeline::{ActivityElement, Element, ElementId, TimelineDefinition};

use self::matcher::{find_sync_match, window_indices};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LineOutcome {
    pub synced: Option<ElementId>,
    pub triggers_fired: Vec<ElementId>,
}

pub struct TimelineRuntime {
    cursor: Cursor,
    look_ahead_window: f64,
    visible_activities: usize,
    max_steps_per_tick: usize,
    max_tick_step: Duration,
    last_host: Duration,
}

impl TimelineRuntime {
    pub fn new(settings: &TimelineSettings) -> Self {
        Self {
            cursor: Cursor::new(),
            look_ahead_window: settings.look_ahead_window(),
            visible_activities: settings.visible_activities.max(1),
            max_steps_per_tick: settings.max_steps_per_tick.max(1),
            max_tick_step: settings.max_tick_step(),
            last_host: Duration::ZERO,
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Resets latches, zeroes the clock and places the cursor on the first statement.
    pub fn start(
        &mut self,
        definition: &mut TimelineDefinition,
        clock: &VirtualClock,
        host_now: Duration,
    ) {
        definition.init_runtime();
        clock.reset();
        self.last_host = host_now;
        self.cursor.reset(definition);
        self.refresh_window(definition, clock.now(), None);
    }

    /// Advances the clock by the host time passed since the previous tick and runs
    /// every statement that has come due.
    pub fn tick(
        &mut self,
        definition: &mut TimelineDefinition,
        clock: &VirtualClock,
        host_now: Duration,
        sink: &dyn NotificationSink,
    ) {
        let delta = host_now
            .saturating_sub(self.last_host)
            .min(self.max_tick_step);
        self.last_host = host_now;
        clock.advance(delta);
        self.step(definition, clock, sink);
    }

    pub fn process_line(
        &mut self,
        definition: &mut TimelineDefinition,
        clock: &VirtualClock,
        line: &LogLine,
        host_now: Duration,
        sink: &dyn NotificationSink,
    ) -> LineOutcome {
        let mut outcome = LineOutcome::default();

        if let Some(frame) = self.cursor.current() {
            if let Some(matched) =
                find_sync_match(definition, frame, self.visible_activities, &line.text)
            {
                outcome.synced = self.apply_sync(definition, clock, frame, matched, host_now);
            }
        }

        outcome.triggers_fired = self.fire_triggers(definition, clock, &line.text, sink);
        self.step(definition, clock, sink);
        outcome
    }

    /// The matched line marks the activity's scripted moment: the clock moves to its
    /// effective time shifted by `sync-s`, and every later cue keeps its spacing.
    fn apply_sync(
        &mut self,
        definition: &mut TimelineDefinition,
        clock: &VirtualClock,
        frame: Frame,
        matched: SyncMatch,
        host_now: Duration,
    ) -> Option<ElementId> {
        for skipped in frame.index..matched.index {
            if let Some(activity) = definition.statement_mut(frame.scope, skipped) {
                activity.runtime.is_done = true;
                activity.runtime.is_active = false;
            }
        }

        let timeline_name = definition.name.clone();
        let activity = definition.statement_mut(matched.scope, matched.index)?;
        let rebased = matched.effective_time + activity.sync_offset_start.unwrap_or(0.0);
        clock.rebase(rebased);
        self.last_host = host_now;
        activity.runtime.is_synced = true;
        activity.runtime.is_active = true;
        self.cursor.move_to(matched.index);

        tracing::debug!(
            timeline = %timeline_name,
            element = %activity.id,
            text = activity.text.as_deref().unwrap_or_default(),
            clock = rebased,
            "Synchronized timeline clock"
        );
        Some(activity.id)
    }

    fn fire_triggers(
        &mut self,
        definition: &mut TimelineDefinition,
        clock: &VirtualClock,
        line: &str,
        sink: &dyn NotificationSink,
    ) -> Vec<ElementId> {
        let timeline_name = definition.name.clone();
        let clock_now = clock.now();
        let mut fired = Vec::new();
        let mut jumps = Vec::new();

        for element in definition.elements_mut() {
            let Element::Trigger(trigger) = element else {
                continue;
            };
            if !trigger.is_match(line) {
                continue;
            }

            trigger.fired_count += 1;
            fired.push(trigger.id);
            if let Some(notice) = trigger.notice.as_deref().filter(|text| !text.is_empty()) {
                sink.dispatch(TimelineNotification {
                    element: trigger.id,
                    timeline: timeline_name.clone(),
                    source: NotificationSource::Trigger,
                    text: notice.to_string(),
                    device: trigger.notice_device.unwrap_or_default(),
                    clock_seconds: clock_now,
                    dispatched_at: Local::now(),
                });
            }
            if let Some(target) = trigger.jump_destination() {
                jumps.push(Jump::from_target(target));
            }
        }

        for jump in &jumps {
            self.cursor.follow(definition, Some(jump), clock_now, 0);
        }

        fired
    }

    /// Executes due statements at the cursor, then refreshes the visible window.
    pub fn step(
        &mut self,
        definition: &mut TimelineDefinition,
        clock: &VirtualClock,
        sink: &dyn NotificationSink,
    ) {
        let timeline_name = definition.name.clone();
        let mut steps = 0;

        while let Some(frame) = self.cursor.current() {
            if steps >= self.max_steps_per_tick {
                tracing::warn!(
                    timeline = %timeline_name,
                    steps,
                    "Stopped executing statements for this tick; possible jump loop"
                );
                break;
            }
            steps += 1;

            let clock_now = clock.now();
            let Some(activity) = definition.statement_mut(frame.scope, frame.index) else {
                self.cursor.advance(definition);
                continue;
            };

            activity.refresh_progress(clock_now, frame.base, self.look_ahead_window);
            activity.runtime.is_active = true;
            let before = activity.before(clock_now, frame.base);
            if before > -activity.expiry_grace() {
                check_notice(activity, before, false, &timeline_name, clock_now, sink);
                break;
            }

            check_notice(activity, before, true, &timeline_name, clock_now, sink);
            activity.runtime.is_done = true;
            activity.runtime.is_active = false;
            let jump = activity.jump_destination().map(Jump::from_target);
            tracing::debug!(
                timeline = %timeline_name,
                element = %activity.id,
                text = activity.text.as_deref().unwrap_or_default(),
                "Executed activity"
            );

            self.cursor.follow(definition, jump.as_ref(), clock_now, 1);
        }

        self.refresh_window(definition, clock.now(), Some(sink));
    }

    fn refresh_window(
        &self,
        definition: &mut TimelineDefinition,
        clock_now: f64,
        sink: Option<&dyn NotificationSink>,
    ) {
        let Some(frame) = self.cursor.current() else {
            return;
        };
        let timeline_name = definition.name.clone();

        for index in window_indices(definition, frame, self.visible_activities) {
            let Some(activity) = definition.statement_mut(frame.scope, index) else {
                continue;
            };
            activity.refresh_progress(clock_now, frame.base, self.look_ahead_window);
            activity.runtime.is_active = true;
            if let Some(sink) = sink {
                let before = activity.before(clock_now, frame.base);
                check_notice(activity, before, false, &timeline_name, clock_now, sink);
            }
        }
    }
}

/// One-shot notice dispatch. `force` fires a pending notice when its activity executes.
fn check_notice(
    activity: &mut ActivityElement,
    before: f64,
    force: bool,
    timeline_name: &str,
    clock_now: f64,
    sink: &dyn NotificationSink,
) {
    if activity.runtime.is_notified {
        return;
    }
    if !force && before > activity.notify_threshold() {
        return;
    }

    activity.runtime.is_notified = true;
    let Some(notice) = activity.notice.as_deref().filter(|text| !text.is_empty()) else {
        return;
    };

    sink.dispatch(TimelineNotification {
        element: activity.id,
        timeline: timeline_name.to_string(),
        source: NotificationSource::Activity,
        text: notice.to_string(),
        device: activity.notice_device.unwrap_or_default(),
        clock_seconds: clock_now,
        dispatched_at: Local::now(),
    });
}
