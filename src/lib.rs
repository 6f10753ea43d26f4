pub mod clock;
pub mod combat_log;
pub mod controller;
pub mod engine;
pub mod error;
pub mod log_stream;
pub mod notification;
pub mod settings;
pub mod timeline;

pub use clock::{HostClock, ManualHostClock, SystemHostClock, VirtualClock};
pub use combat_log::CombatLogTail;
pub use controller::{LifecycleState, TimelineController, TimelineHandle, TimelineKey, Transition};
pub use engine::TimelineRuntime;
pub use error::{Result, TimelineError};
pub use log_stream::{LogBus, LogLine, LogSource, LogSubscription, SubscriptionId};
pub use notification::{
    notification_channel, ChannelSink, LogSink, NotificationSink, NotificationSource,
    TimelineNotification,
};
pub use settings::TimelineSettings;
pub use timeline::{
    ActivityElement, DefaultElement, Element, ElementId, ElementKind, Locale, NoticeDevice,
    SubroutineElement, SyncPattern, TimelineDefinition, TriggerElement,
};

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
