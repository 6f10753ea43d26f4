use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Result, TimelineError};
use crate::timeline::TimelineDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimelineKey(Uuid);

impl TimelineKey {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TimelineKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Loading,
    Active,
    Unloading,
}

impl LifecycleState {
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Loading | Self::Unloading)
    }
}

/// A registered definition and its lifecycle.
pub struct TimelineHandle {
    key: TimelineKey,
    definition: RwLock<TimelineDefinition>,
    state: Mutex<LifecycleState>,
    save_lock: Mutex<()>,
}

impl TimelineHandle {
    pub(crate) fn new(definition: TimelineDefinition) -> Self {
        Self {
            key: TimelineKey::new(),
            definition: RwLock::new(definition),
            state: Mutex::new(LifecycleState::Idle),
            save_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> TimelineKey {
        self.key
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn name(&self) -> String {
        self.definition.read().name.clone()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TimelineDefinition> {
        self.definition.read()
    }

    /// Editor access, granted only while the definition is idle. Playback keeps cursor
    /// positions into the element lists, so a loaded definition is read-only until it is
    /// deactivated. The guard also holds off a pending activation until it is dropped.
    pub fn edit(&self) -> Result<RwLockWriteGuard<'_, TimelineDefinition>> {
        let state = self.state.lock();
        if *state != LifecycleState::Idle {
            return Err(TimelineError::EditWhileLoaded {
                name: self.definition.read().name.clone(),
            });
        }

        Ok(self.definition.write())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, TimelineDefinition> {
        self.definition.write()
    }

    /// Saves to the file the definition was loaded from.
    pub fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock();
        let definition = self.definition.read();
        let path = definition
            .source_path()
            .ok_or_else(|| TimelineError::NoSourceFile {
                name: definition.name.clone(),
            })?;
        definition.save(&path)
    }

    /// Saves to `path` and makes it the definition's source file.
    pub fn save_as(&self, path: &Path) -> Result<()> {
        let _guard = self.save_lock.lock();
        let mut definition = self.definition.write();
        definition.save(path)?;
        definition.file = Some(path.to_path_buf());
        Ok(())
    }

    /// Claims the lifecycle for a load or unload.
    ///
    /// `Ok(false)` means the definition already is in the requested state.
    pub(crate) fn begin_transition(&self, activate: bool) -> Result<bool> {
        let mut state = self.state.lock();
        let current = *state;
        match (current, activate) {
            (current, _) if current.is_transitioning() => Err(self.conflict()),
            (LifecycleState::Active, true) | (LifecycleState::Idle, false) => Ok(false),
            (_, true) => {
                *state = LifecycleState::Loading;
                Ok(true)
            }
            (_, false) => {
                *state = LifecycleState::Unloading;
                Ok(true)
            }
        }
    }

    /// Claims the lifecycle for a reload and returns whether the definition was active.
    pub(crate) fn begin_reload(&self) -> Result<bool> {
        let mut state = self.state.lock();
        let current = *state;
        match current {
            LifecycleState::Active => {
                *state = LifecycleState::Unloading;
                Ok(true)
            }
            LifecycleState::Idle => {
                *state = LifecycleState::Loading;
                Ok(false)
            }
            _ => Err(self.conflict()),
        }
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        *self.state.lock() = state;
    }

    /// Moves `from` to `to`, leaving any other state untouched.
    pub(crate) fn settle_from(&self, from: LifecycleState, to: LifecycleState) {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
        }
    }

    pub(crate) fn set_active_flag(&self, is_active: bool) {
        self.definition.write().is_active = is_active;
    }

    fn conflict(&self) -> TimelineError {
        TimelineError::LifecycleConflict {
            name: self.definition.read().name.clone(),
        }
    }
}

impl fmt::Debug for TimelineHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TimelineHandle")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{LifecycleState, TimelineHandle};
    use crate::error::TimelineError;
    use crate::timeline::TimelineDefinition;

    #[test]
    fn transitions_are_claimed_once() {
        let handle = TimelineHandle::new(TimelineDefinition::new("Raid"));

        assert!(!handle.begin_transition(false).unwrap(), "already idle");
        assert!(handle.begin_transition(true).unwrap());
        assert_eq!(handle.state(), LifecycleState::Loading);

        let conflict = handle.begin_transition(false).unwrap_err();
        assert!(matches!(conflict, TimelineError::LifecycleConflict { name } if name == "Raid"));
        assert!(handle.begin_reload().is_err());

        handle.set_state(LifecycleState::Active);
        assert!(!handle.begin_transition(true).unwrap(), "already active");
        assert!(handle.begin_reload().unwrap());
        assert_eq!(handle.state(), LifecycleState::Unloading);
    }

    #[test]
    fn settle_from_only_moves_the_expected_state() {
        let handle = TimelineHandle::new(TimelineDefinition::new("Raid"));
        handle.set_state(LifecycleState::Unloading);

        handle.settle_from(LifecycleState::Active, LifecycleState::Idle);
        assert_eq!(handle.state(), LifecycleState::Unloading);

        handle.settle_from(LifecycleState::Unloading, LifecycleState::Idle);
        assert_eq!(handle.state(), LifecycleState::Idle);
    }

    #[test]
    fn editing_is_refused_unless_idle() {
        let handle = TimelineHandle::new(TimelineDefinition::new("Raid"));
        handle.edit().unwrap().zone = "The Sunken Vault".to_string();

        for state in [
            LifecycleState::Loading,
            LifecycleState::Active,
            LifecycleState::Unloading,
        ] {
            handle.set_state(state);
            assert!(matches!(
                handle.edit(),
                Err(TimelineError::EditWhileLoaded { name }) if name == "Raid"
            ));
        }

        handle.set_state(LifecycleState::Idle);
        assert!(handle.edit().is_ok());
        assert_eq!(handle.read().zone, "The Sunken Vault");
    }

    #[test]
    fn save_without_source_file_is_an_error() {
        let handle = TimelineHandle::new(TimelineDefinition::new("Scratch"));

        assert!(matches!(
            handle.save(),
            Err(TimelineError::NoSourceFile { name }) if name == "Scratch"
        ));
    }

    #[test]
    fn save_as_adopts_the_new_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("raids").join("scratch.xml");
        let handle = TimelineHandle::new(TimelineDefinition::new("Scratch"));

        handle.save_as(&path).unwrap();
        handle.save().unwrap();

        assert_eq!(handle.read().file(), Some(path.as_path()));
        let loaded = TimelineDefinition::load(&path).unwrap().unwrap();
        assert_eq!(loaded.name, "Scratch");
    }
}
