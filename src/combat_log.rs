//! Host-side adapter that tails a growing game log and publishes its lines.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, TimelineError};
use crate::log_stream::{LogBus, LogLine};

/// Read position in a tailed file plus any trailing bytes not yet ended by a newline.
#[derive(Debug, Default)]
pub(crate) struct TailCursor {
    offset: u64,
    pending: Vec<u8>,
}

impl TailCursor {
    pub(crate) fn at(offset: u64) -> Self {
        Self {
            offset,
            pending: Vec::new(),
        }
    }

    /// Complete, non-blank lines appended since the last read.
    pub(crate) fn read_new_lines(&mut self, log_path: &Path) -> Result<Vec<String>> {
        let mut file = match File::open(log_path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(TimelineError::io(log_path, error)),
        };
        let file_length = file
            .metadata()
            .map_err(|error| TimelineError::io(log_path, error))?
            .len();

        if file_length < self.offset {
            tracing::debug!(file = %log_path.display(), "Log file truncated; reading from the start");
            self.offset = 0;
            self.pending.clear();
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|error| TimelineError::io(log_path, error))?;
        let mut appended = Vec::new();
        let bytes_read = file
            .read_to_end(&mut appended)
            .map_err(|error| TimelineError::io(log_path, error))?;
        self.offset = self.offset.saturating_add(bytes_read as u64);
        self.pending.extend_from_slice(&appended);

        let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') else {
            return Ok(Vec::new());
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();

        Ok(complete
            .split(|byte| *byte == b'\n')
            .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\r').to_string())
            .filter(|line| !line.trim().is_empty())
            .collect())
    }
}

/// Publishes every line appended to a log file onto a `LogBus`.
pub struct CombatLogTail {
    path: PathBuf,
    handle: JoinHandle<()>,
}

impl CombatLogTail {
    /// Starts tailing at the current end of `path`; the file does not have to exist yet.
    /// Must be called from within a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>, bus: LogBus) -> Result<Self> {
        let path = path.into();
        let initial_offset = match std::fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(error) if error.kind() == ErrorKind::NotFound => 0,
            Err(error) => return Err(TimelineError::io(&path, error)),
        };

        let (notify_sender, notify_receiver) =
            mpsc::unbounded_channel::<std::result::Result<Event, notify::Error>>();
        let mut watcher = notify::recommended_watcher(move |result| {
            if notify_sender.send(result).is_err() {
                tracing::debug!("Log watcher notification receiver dropped");
            }
        })?;

        let watch_directory = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher.watch(watch_directory, RecursiveMode::NonRecursive)?;

        tracing::info!(file = %path.display(), offset = initial_offset, "Tailing log file");
        let handle = tokio::spawn(watch_log(
            watcher,
            notify_receiver,
            path.clone(),
            TailCursor::at(initial_offset),
            bus,
        ));

        Ok(Self { path, handle })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for CombatLogTail {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn watch_log(
    _watcher: RecommendedWatcher,
    mut notify_receiver: mpsc::UnboundedReceiver<std::result::Result<Event, notify::Error>>,
    log_path: PathBuf,
    mut cursor: TailCursor,
    bus: LogBus,
) {
    while let Some(notification_result) = notify_receiver.recv().await {
        match notification_result {
            Ok(event) => {
                if !is_relevant_notification(&event, &log_path) {
                    continue;
                }

                match cursor.read_new_lines(&log_path) {
                    Ok(lines) => {
                        for line in lines {
                            bus.publish(LogLine::new(line));
                        }
                    }
                    Err(error) => {
                        tracing::warn!(file = %log_path.display(), error = %error, "Failed to read log update");
                    }
                }
            }
            Err(error) => {
                tracing::warn!(file = %log_path.display(), error = %error, "Log watcher error");
            }
        }
    }
}

fn is_relevant_notification(event: &Event, log_path: &Path) -> bool {
    let relevant_kind = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
    if !relevant_kind {
        return false;
    }

    let Some(log_file_name) = log_path.file_name() else {
        return false;
    };

    event.paths.iter().any(|path| {
        path == log_path
            || path
                .file_name()
                .map(|file_name| file_name == log_file_name)
                .unwrap_or(false)
    })
}
