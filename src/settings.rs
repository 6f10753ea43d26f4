use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TimelineError};

const DESIGN_MODE_PROGRESS_WINDOW_SECONDS: f64 = 15.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimelineSettings {
    pub show_progress_bar_time: f64,
    pub design_mode: bool,
    pub visible_activities: usize,
    pub tick_interval_ms: u64,
    pub max_tick_step_ms: u64,
    pub worker_stop_timeout_ms: u64,
    pub max_steps_per_tick: usize,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            show_progress_bar_time: 15.0,
            design_mode: false,
            visible_activities: 8,
            tick_interval_ms: 50,
            max_tick_step_ms: 1_000,
            worker_stop_timeout_ms: 2_000,
            max_steps_per_tick: 256,
        }
    }
}

impl TimelineSettings {
    /// Seconds before an activity's scheduled time at which its progress starts rising.
    pub fn look_ahead_window(&self) -> f64 {
        if self.design_mode {
            return DESIGN_MODE_PROGRESS_WINDOW_SECONDS;
        }

        self.show_progress_bar_time.max(0.0)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn max_tick_step(&self) -> Duration {
        Duration::from_millis(self.max_tick_step_ms)
    }

    pub fn worker_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_stop_timeout_ms)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(error) => return Err(TimelineError::io(path, error)),
        };

        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| TimelineError::io(parent, error))?;
        }

        let serialized = serde_json::to_string_pretty(self)?;
        std::fs::write(path, serialized).map_err(|error| TimelineError::io(path, error))
    }
}
