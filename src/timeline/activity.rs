use serde::Serialize;
use std::time::Duration;

use super::sync_pattern::SyncPattern;
use super::time_text::format_time;
use super::ElementId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum NoticeDevice {
    #[default]
    Both,
    Main,
    Sub,
}

impl NoticeDevice {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Both" => Some(Self::Both),
            "Main" => Some(Self::Main),
            "Sub" => Some(Self::Sub),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Both => "Both",
            Self::Main => "Main",
            Self::Sub => "Sub",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTarget<'a> {
    Call(&'a str),
    Goto(&'a str),
}

impl<'a> JumpTarget<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Self::Call(name) | Self::Goto(name) => name,
        }
    }
}

/// Resolves the jump of an element carrying both targets: `call` wins over `goto`.
pub(crate) fn jump_destination<'a>(
    call: Option<&'a str>,
    goto: Option<&'a str>,
) -> Option<JumpTarget<'a>> {
    if let Some(call) = call.filter(|value| !value.is_empty()) {
        return Some(JumpTarget::Call(call));
    }

    goto.filter(|value| !value.is_empty()).map(JumpTarget::Goto)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityRuntime {
    pub(crate) seq: usize,
    pub(crate) remain_time: f64,
    pub(crate) progress: f64,
    pub(crate) is_active: bool,
    pub(crate) is_done: bool,
    pub(crate) is_notified: bool,
    pub(crate) is_synced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityElement {
    pub(crate) id: ElementId,
    pub name: Option<String>,
    pub time: Duration,
    pub text: Option<String>,
    pub sync: Option<SyncPattern>,
    pub sync_offset_start: Option<f64>,
    pub sync_offset_end: Option<f64>,
    pub goto: Option<String>,
    pub call: Option<String>,
    pub notice: Option<String>,
    pub notice_device: Option<NoticeDevice>,
    pub notice_offset: Option<f64>,
    pub style: Option<String>,
    pub(crate) runtime: ActivityRuntime,
}

impl Default for ActivityElement {
    fn default() -> Self {
        Self {
            id: ElementId::new(),
            name: None,
            time: Duration::ZERO,
            text: None,
            sync: None,
            sync_offset_start: None,
            sync_offset_end: None,
            goto: None,
            call: None,
            notice: None,
            notice_device: None,
            notice_offset: None,
            style: None,
            runtime: ActivityRuntime::default(),
        }
    }
}

impl ActivityElement {
    pub fn new(time: Duration, text: impl Into<String>) -> Self {
        Self {
            time,
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.text.as_deref())
    }

    pub fn set_sync(&mut self, source: Option<&str>) {
        self.sync = SyncPattern::from_attribute(source);
    }

    pub fn jump_destination(&self) -> Option<JumpTarget<'_>> {
        jump_destination(self.call.as_deref(), self.goto.as_deref())
    }

    /// Copy with a freshly generated identity; every other field keeps its value.
    pub fn duplicate(&self) -> Self {
        Self {
            id: ElementId::new(),
            ..self.clone()
        }
    }

    pub fn init(&mut self, seq: Option<usize>) {
        if let Some(seq) = seq {
            self.runtime.seq = seq;
        }

        self.runtime.is_active = false;
        self.runtime.is_done = false;
        self.runtime.is_notified = false;
        self.runtime.is_synced = false;
    }

    /// Seconds until the effective scheduled time, negative once it has passed.
    pub fn before(&self, clock: f64, base: f64) -> f64 {
        base + self.time.as_secs_f64() - clock
    }

    pub fn refresh_progress(&mut self, clock: f64, base: f64, look_ahead_window: f64) {
        let before = self.before(clock, base);
        self.runtime.remain_time = before.max(0.0);
        self.runtime.progress = progress_for(before, look_ahead_window);
    }

    pub(crate) fn notify_threshold(&self) -> f64 {
        self.notice_offset.unwrap_or(0.0)
    }

    pub(crate) fn expiry_grace(&self) -> f64 {
        if !self.runtime.is_synced {
            return 0.0;
        }

        self.sync_offset_end
            .filter(|offset| *offset > 0.0)
            .unwrap_or(0.0)
    }

    pub(crate) fn can_sync(&self) -> bool {
        !self.runtime.is_synced
            && !self.runtime.is_done
            && self
                .sync
                .as_ref()
                .map(SyncPattern::is_usable)
                .unwrap_or(false)
    }

    pub fn seq(&self) -> usize {
        self.runtime.seq
    }

    pub fn remain_time(&self) -> f64 {
        self.runtime.remain_time
    }

    pub fn remain_time_text(&self) -> String {
        format!("{:.0}", self.runtime.remain_time.ceil())
    }

    pub fn progress(&self) -> f64 {
        self.runtime.progress
    }

    pub fn is_active(&self) -> bool {
        self.runtime.is_active
    }

    pub fn is_done(&self) -> bool {
        self.runtime.is_done
    }

    pub fn is_notified(&self) -> bool {
        self.runtime.is_notified
    }

    pub fn is_synced(&self) -> bool {
        self.runtime.is_synced
    }

    pub fn time_text(&self) -> String {
        format_time(self.time)
    }
}

pub(crate) fn progress_for(before: f64, look_ahead_window: f64) -> f64 {
    if look_ahead_window <= 0.0 {
        return if before <= 0.0 { 1.0 } else { 0.0 };
    }

    if before > look_ahead_window {
        return 0.0;
    }

    let progress = ((look_ahead_window - before) / look_ahead_window).clamp(0.0, 1.0);
    (progress * 1_000.0).round() / 1_000.0
}

impl std::fmt::Display for ActivityElement {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{} {}",
            self.time_text(),
            self.text.as_deref().unwrap_or_default()
        )
    }
}
