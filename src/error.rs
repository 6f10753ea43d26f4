use std::path::PathBuf;

use thiserror::Error;

use crate::controller::TimelineKey;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed timeline definition '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid timeline time '{0}'")]
    InvalidTime(String),

    #[error("timeline '{name}' already has a load or unload in flight")]
    LifecycleConflict { name: String },

    #[error("timeline '{name}' cannot be edited while it is loaded")]
    EditWhileLoaded { name: String },

    #[error("timeline {0} is not registered with this controller")]
    UnknownTimeline(TimelineKey),

    #[error("timeline '{name}' has no source file")]
    NoSourceFile { name: String },

    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("log watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("background task failed: {0}")]
    WorkerJoin(String),
}

impl TimelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = TimelineError> = std::result::Result<T, E>;
