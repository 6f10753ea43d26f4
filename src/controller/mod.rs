//! Owns the registered definitions, the virtual clock and the single active run.
//!
//! Lifecycle work is spawned onto the tokio runtime and serialized on one async lock,
//! so the caller returns immediately and two lifecycles never interleave.

mod handle;
mod worker;

pub use handle::{LifecycleState, TimelineHandle, TimelineKey};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::clock::{HostClock, SystemHostClock, VirtualClock};
use crate::engine::TimelineRuntime;
use crate::error::{Result, TimelineError};
use crate::log_stream::{LogSource, SubscriptionId};
use crate::notification::{LogSink, NotificationSink};
use crate::settings::TimelineSettings;
use crate::timeline::TimelineDefinition;

use self::worker::{run_worker, WorkerContext};

/// Background lifecycle work started by `set_active` or `reload`.
pub struct Transition {
    task: JoinHandle<Result<()>>,
}

impl Transition {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<()> {
        self.task
            .await
            .map_err(|error| TimelineError::WorkerJoin(error.to_string()))?
    }
}

struct ActiveRun {
    key: TimelineKey,
    handle: Arc<TimelineHandle>,
    stop: watch::Sender<bool>,
    worker: JoinHandle<()>,
    subscription: SubscriptionId,
}

struct Shared {
    settings: TimelineSettings,
    clock: VirtualClock,
    host_clock: Arc<dyn HostClock>,
    log_source: Arc<dyn LogSource>,
    sink: Arc<dyn NotificationSink>,
    registry: RwLock<HashMap<TimelineKey, Arc<TimelineHandle>>>,
    active: Mutex<Option<ActiveRun>>,
}

#[derive(Clone)]
pub struct TimelineController {
    shared: Arc<Shared>,
}

impl TimelineController {
    /// A controller whose notifications only go to the tracing log.
    pub fn new(settings: TimelineSettings, log_source: Arc<dyn LogSource>) -> Self {
        Self::with_sink(settings, log_source, Arc::new(LogSink))
    }

    pub fn with_sink(
        settings: TimelineSettings,
        log_source: Arc<dyn LogSource>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::with_host_clock(settings, log_source, sink, Arc::new(SystemHostClock::new()))
    }

    pub fn with_host_clock(
        settings: TimelineSettings,
        log_source: Arc<dyn LogSource>,
        sink: Arc<dyn NotificationSink>,
        host_clock: Arc<dyn HostClock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                clock: VirtualClock::new(),
                host_clock,
                log_source,
                sink,
                registry: RwLock::new(HashMap::new()),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &TimelineSettings {
        &self.shared.settings
    }

    /// The playback clock. Readers get one consistent value per call.
    pub fn clock(&self) -> &VirtualClock {
        &self.shared.clock
    }

    pub fn register(&self, mut definition: TimelineDefinition) -> TimelineKey {
        definition.is_active = false;
        let handle = Arc::new(TimelineHandle::new(definition));
        let key = handle.key();
        tracing::debug!(timeline = %handle.name(), key = %key, "Registered timeline");
        self.shared.registry.write().insert(key, handle);
        key
    }

    /// Loads and registers a definition file. A missing or empty file registers nothing.
    pub fn load_file(&self, path: &Path) -> Result<Option<TimelineKey>> {
        let Some(definition) = TimelineDefinition::load(path)? else {
            tracing::info!(file = %path.display(), "No timeline definition in file");
            return Ok(None);
        };

        Ok(Some(self.register(definition)))
    }

    pub fn handle(&self, key: TimelineKey) -> Option<Arc<TimelineHandle>> {
        self.shared.registry.read().get(&key).cloned()
    }

    pub fn keys(&self) -> Vec<TimelineKey> {
        self.shared.registry.read().keys().copied().collect()
    }

    pub fn active_key(&self) -> Option<TimelineKey> {
        self.shared
            .registry
            .read()
            .values()
            .find(|handle| handle.state() == LifecycleState::Active)
            .map(|handle| handle.key())
    }

    pub fn state(&self, key: TimelineKey) -> Option<LifecycleState> {
        self.handle(key).map(|handle| handle.state())
    }

    pub fn save(&self, key: TimelineKey) -> Result<()> {
        self.require(key)?.save()
    }

    /// Sets a definition's active flag. Activating deactivates whichever definition is
    /// currently active first.
    ///
    /// Fails with `LifecycleConflict` while a load or unload of `key` is in flight.
    /// Must be called from within a tokio runtime.
    pub fn set_active(&self, key: TimelineKey, is_active: bool) -> Result<Transition> {
        let handle = self.require(key)?;
        if !handle.begin_transition(is_active)? {
            return Ok(Transition {
                task: tokio::spawn(async { Ok(()) }),
            });
        }

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            if is_active {
                shared.activate(handle).await
            } else {
                shared.deactivate(handle).await
            }
        });
        Ok(Transition { task })
    }

    /// Re-reads the definition from its source file, keeping it active if it was.
    pub fn reload(&self, key: TimelineKey) -> Result<Transition> {
        let handle = self.require(key)?;
        let source = handle.read().source_path();
        let Some(path) = source else {
            return Err(TimelineError::NoSourceFile {
                name: handle.name(),
            });
        };
        let was_active = handle.begin_reload()?;

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { shared.reload(handle, &path, was_active).await });
        Ok(Transition { task })
    }

    /// Stops the active run, if any, and waits for it.
    pub async fn shutdown(&self) {
        let mut active = self.shared.active.lock().await;
        if let Some(run) = active.take() {
            self.shared.stop_run(run).await;
        }
    }

    fn require(&self, key: TimelineKey) -> Result<Arc<TimelineHandle>> {
        self.handle(key).ok_or(TimelineError::UnknownTimeline(key))
    }
}

impl Shared {
    async fn activate(&self, handle: Arc<TimelineHandle>) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(run) = active.take() {
            self.stop_run(run).await;
        }

        *active = Some(self.start_run(handle));
        Ok(())
    }

    async fn deactivate(&self, handle: Arc<TimelineHandle>) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.as_ref().map(|run| run.key) == Some(handle.key()) {
            if let Some(run) = active.take() {
                self.stop_run(run).await;
            }
        }

        handle.set_active_flag(false);
        handle.set_state(LifecycleState::Idle);
        Ok(())
    }

    async fn reload(&self, handle: Arc<TimelineHandle>, path: &Path, was_active: bool) -> Result<()> {
        let mut active = self.active.lock().await;
        if was_active && active.as_ref().map(|run| run.key) == Some(handle.key()) {
            if let Some(run) = active.take() {
                self.stop_run(run).await;
            }
        }

        let outcome = match TimelineDefinition::load(path) {
            Ok(Some(loaded)) => {
                handle.write().replace_with(loaded);
                tracing::info!(timeline = %handle.name(), file = %path.display(), "Reloaded timeline");
                Ok(())
            }
            Ok(None) => {
                tracing::warn!(
                    timeline = %handle.name(),
                    file = %path.display(),
                    "Timeline source is missing or empty; keeping the definition in memory"
                );
                Ok(())
            }
            Err(error) => {
                tracing::warn!(timeline = %handle.name(), error = %error, "Failed to reload timeline");
                Err(error)
            }
        };

        if was_active {
            if let Some(run) = active.take() {
                self.stop_run(run).await;
            }
            *active = Some(self.start_run(handle));
        } else {
            handle.set_state(LifecycleState::Idle);
        }

        outcome
    }

    fn start_run(&self, handle: Arc<TimelineHandle>) -> ActiveRun {
        let host_now = self.host_clock.elapsed();
        let mut runtime = TimelineRuntime::new(&self.settings);
        {
            let mut definition = handle.write();
            runtime.start(&mut definition, &self.clock, host_now);
            definition.is_active = true;
        }

        let subscription = self.log_source.subscribe();
        let (stop, stop_receiver) = watch::channel(false);
        let context = WorkerContext {
            handle: Arc::clone(&handle),
            clock: self.clock.clone(),
            host_clock: Arc::clone(&self.host_clock),
            sink: Arc::clone(&self.sink),
            tick_interval: self.settings.tick_interval(),
        };
        let worker = tokio::spawn(run_worker(context, runtime, subscription.lines, stop_receiver));

        handle.set_state(LifecycleState::Active);
        tracing::info!(timeline = %handle.name(), key = %handle.key(), "Timeline activated");

        ActiveRun {
            key: handle.key(),
            handle,
            stop,
            worker,
            subscription: subscription.id,
        }
    }

    async fn stop_run(&self, mut run: ActiveRun) {
        if run.stop.send(true).is_err() {
            tracing::debug!(timeline = %run.handle.name(), "Timeline worker already gone");
        }

        match tokio::time::timeout(self.settings.worker_stop_timeout(), &mut run.worker).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(timeline = %run.handle.name(), error = %error, "Timeline worker failed");
            }
            Err(_) => {
                tracing::warn!(
                    timeline = %run.handle.name(),
                    "Timeline worker did not stop in time; aborting it"
                );
                run.worker.abort();
            }
        }

        self.log_source.unsubscribe(run.subscription);
        run.handle.set_active_flag(false);
        run.handle
            .settle_from(LifecycleState::Active, LifecycleState::Idle);
        tracing::info!(timeline = %run.handle.name(), key = %run.key, "Timeline deactivated");
    }
}

#[cfg(test)]
mod tests {
    use super::{LifecycleState, TimelineController, TimelineKey};
    use crate::clock::ManualHostClock;
    use crate::error::TimelineError;
    use crate::log_stream::LogBus;
    use crate::notification::{notification_channel, NotificationSink, TimelineNotification};
    use crate::settings::TimelineSettings;
    use crate::timeline::{ActivityElement, Element, TimelineDefinition};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;

    struct Fixture {
        controller: TimelineController,
        bus: LogBus,
        host: ManualHostClock,
        notifications: mpsc::UnboundedReceiver<TimelineNotification>,
    }

    fn fixture() -> Fixture {
        let bus = LogBus::new();
        let host = ManualHostClock::new();
        let (sink, notifications) = notification_channel();
        let settings = TimelineSettings {
            tick_interval_ms: 5,
            ..TimelineSettings::default()
        };
        let controller = TimelineController::with_host_clock(
            settings,
            Arc::new(bus.clone()),
            Arc::new(sink),
            Arc::new(host.clone()),
        );
        Fixture {
            controller,
            bus,
            host,
            notifications,
        }
    }

    fn raid(name: &str) -> TimelineDefinition {
        let mut definition = TimelineDefinition::new(name);
        let mut meteor = ActivityElement::new(Duration::from_secs(45), "Meteor");
        meteor.set_sync(Some("Boss casts (?<x>.+)"));
        meteor.sync_offset_start = Some(-2.0);
        meteor.notice = Some("Meteor soon".to_string());
        meteor.notice_offset = Some(10.0);
        definition.add(Element::Activity(meteor));
        definition
    }

    async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn activating_a_second_timeline_deactivates_the_first() {
        let fixture = fixture();
        let first = fixture.controller.register(raid("First"));
        let second = fixture.controller.register(raid("Second"));

        fixture.controller.set_active(first, true).unwrap().wait().await.unwrap();
        assert_eq!(fixture.controller.active_key(), Some(first));
        assert_eq!(fixture.bus.subscriber_count(), 1);

        fixture.controller.set_active(second, true).unwrap().wait().await.unwrap();

        assert_eq!(fixture.controller.active_key(), Some(second));
        assert_eq!(fixture.controller.state(first), Some(LifecycleState::Idle));
        assert!(!fixture.controller.handle(first).unwrap().read().is_active());
        assert!(fixture.controller.handle(second).unwrap().read().is_active());
        assert_eq!(fixture.bus.subscriber_count(), 1);

        fixture.controller.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_toggle_while_loading_is_a_conflict() {
        let fixture = fixture();
        let key = fixture.controller.register(raid("Raid"));

        let in_flight = fixture.controller.shared.active.lock().await;
        let activation = fixture.controller.set_active(key, true).unwrap();
        let conflict = fixture.controller.set_active(key, false);
        assert_eq!(fixture.controller.state(key), Some(LifecycleState::Loading));
        drop(in_flight);

        assert!(matches!(conflict, Err(TimelineError::LifecycleConflict { .. })));
        activation.wait().await.unwrap();
        assert_eq!(fixture.controller.state(key), Some(LifecycleState::Active));

        fixture.controller.set_active(key, true).unwrap().wait().await.unwrap();
        assert_eq!(fixture.controller.state(key), Some(LifecycleState::Active));

        fixture.controller.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn log_lines_resynchronize_and_notify() {
        let mut fixture = fixture();
        let key = fixture.controller.register(raid("Raid"));
        fixture.controller.set_active(key, true).unwrap().wait().await.unwrap();

        fixture.host.set(Duration::from_secs(40));
        fixture.bus.publish_text("12:00:40.000 Boss casts Meteor");

        let handle = fixture.controller.handle(key).unwrap();
        assert!(eventually(|| handle.read().activities().all(ActivityElement::is_synced)).await);
        assert_eq!(fixture.controller.clock().now(), 43.0);

        let notification = fixture.notifications.recv().await.unwrap();
        assert_eq!(notification.text, "Meteor soon");
        assert_eq!(notification.timeline, "Raid");

        fixture.controller.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deactivation_unsubscribes_and_stops_the_clock() {
        let fixture = fixture();
        let key = fixture.controller.register(raid("Raid"));
        fixture.controller.set_active(key, true).unwrap().wait().await.unwrap();

        fixture.controller.set_active(key, false).unwrap().wait().await.unwrap();
        let stopped_at = fixture.controller.clock().now();
        fixture.host.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(fixture.bus.subscriber_count(), 0);
        assert_eq!(fixture.controller.active_key(), None);
        assert_eq!(fixture.controller.clock().now(), stopped_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reload_swaps_content_and_keeps_the_timeline_active() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("raid.xml");
        raid("Raid").save(&path).unwrap();

        let fixture = fixture();
        let key = fixture.controller.load_file(&path).unwrap().unwrap();
        fixture.controller.set_active(key, true).unwrap().wait().await.unwrap();

        let mut edited = raid("Raid");
        edited.add(Element::Activity(ActivityElement::new(
            Duration::from_secs(300),
            "Enrage",
        )));
        edited.save(&path).unwrap();

        fixture.controller.reload(key).unwrap().wait().await.unwrap();

        let handle = fixture.controller.handle(key).unwrap();
        assert_eq!(handle.read().elements().len(), 2);
        assert!(handle.read().is_active());
        assert_eq!(handle.state(), LifecycleState::Active);
        assert_eq!(handle.read().file(), Some(path.as_path()));
        assert_eq!(fixture.bus.subscriber_count(), 1);

        fixture.controller.shutdown().await;
    }

    /// Blocks the calling worker thread for every notification it receives.
    #[derive(Default)]
    struct StallingSink {
        entered: AtomicBool,
    }

    impl NotificationSink for StallingSink {
        fn dispatch(&self, _notification: TimelineNotification) {
            self.entered.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1_500));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stuck_worker_is_aborted_after_the_stop_timeout() {
        let bus = LogBus::new();
        let sink = Arc::new(StallingSink::default());
        let settings = TimelineSettings {
            tick_interval_ms: 5,
            worker_stop_timeout_ms: 50,
            ..TimelineSettings::default()
        };
        let controller = TimelineController::with_host_clock(
            settings,
            Arc::new(bus.clone()),
            sink.clone(),
            Arc::new(ManualHostClock::new()),
        );
        let mut definition = TimelineDefinition::new("Stall");
        let mut pull = ActivityElement::new(Duration::ZERO, "Pull");
        pull.notice = Some("Pull!".to_string());
        definition.add(Element::Activity(pull));
        let key = controller.register(definition);

        controller.set_active(key, true).unwrap().wait().await.unwrap();
        assert!(eventually(|| sink.entered.load(Ordering::SeqCst)).await);

        let started = Instant::now();
        controller.set_active(key, false).unwrap().wait().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1), "stop did not wait out the sink");
        assert_eq!(controller.state(key), Some(LifecycleState::Idle));
        assert!(!controller.handle(key).unwrap().read().is_active());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_reload_keeps_the_timeline_active() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("raid.xml");
        raid("Raid").save(&path).unwrap();

        let fixture = fixture();
        let key = fixture.controller.load_file(&path).unwrap().unwrap();
        fixture.controller.set_active(key, true).unwrap().wait().await.unwrap();

        std::fs::write(&path, "<timeline><name>Broken</name><a time=\"soon\" /></timeline>").unwrap();
        let error = fixture.controller.reload(key).unwrap().wait().await.unwrap_err();

        assert!(matches!(error, TimelineError::Parse { .. }));
        let handle = fixture.controller.handle(key).unwrap();
        assert_eq!(handle.state(), LifecycleState::Active);
        assert!(handle.read().is_active());
        assert_eq!(handle.read().elements().len(), 1);
        assert_eq!(handle.read().name, "Raid");
        assert_eq!(fixture.bus.subscriber_count(), 1);

        fixture.controller.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn active_timeline_cannot_be_edited() {
        let fixture = fixture();
        let key = fixture.controller.register(raid("Raid"));
        fixture.controller.set_active(key, true).unwrap().wait().await.unwrap();

        let handle = fixture.controller.handle(key).unwrap();
        assert!(matches!(handle.edit(), Err(TimelineError::EditWhileLoaded { .. })));

        fixture.controller.set_active(key, false).unwrap().wait().await.unwrap();
        handle.edit().unwrap().add(Element::Activity(ActivityElement::new(
            Duration::from_secs(300),
            "Enrage",
        )));
        fixture.controller.set_active(key, true).unwrap().wait().await.unwrap();

        assert_eq!(handle.read().elements().len(), 2);
        assert_eq!(handle.state(), LifecycleState::Active);

        fixture.controller.shutdown().await;
    }

    #[tokio::test]
    async fn default_controller_logs_notifications() {
        let bus = LogBus::new();
        let controller = TimelineController::new(TimelineSettings::default(), Arc::new(bus.clone()));
        let key = controller.register(raid("Raid"));

        controller.set_active(key, true).unwrap().wait().await.unwrap();
        assert_eq!(controller.active_key(), Some(key));
        assert_eq!(bus.subscriber_count(), 1);

        controller.shutdown().await;
        assert_eq!(controller.state(key), Some(LifecycleState::Idle));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn saving_writes_back_to_the_source_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("raid.xml");
        raid("Raid").save(&path).unwrap();

        let fixture = fixture();
        let key = fixture.controller.load_file(&path).unwrap().unwrap();
        fixture.controller.handle(key).unwrap().edit().unwrap().zone = "The Sunken Vault".to_string();

        fixture.controller.save(key).unwrap();

        let saved = TimelineDefinition::load(&path).unwrap().unwrap();
        assert_eq!(saved.zone, "The Sunken Vault");
    }

    #[tokio::test]
    async fn empty_file_registers_nothing_and_unknown_keys_fail() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("empty.xml");
        std::fs::write(&path, b"").unwrap();

        let fixture = fixture();
        assert_eq!(fixture.controller.load_file(&path).unwrap(), None);
        assert!(fixture.controller.keys().is_empty());

        let other = TimelineKey::new();
        assert!(matches!(
            fixture.controller.set_active(other, true),
            Err(TimelineError::UnknownTimeline(key)) if key == other
        ));
    }
}
