//! Per-probe persisted state.
//!
//! Each probe owns a private directory under the state root. Absence of state
//! is a well-defined default; unparseable state is an error that carries the
//! raw bytes, never a silent reset, since a tampered state file must not wipe
//! the baseline unnoticed. Writes replace the whole file through a temporary
//! file and an atomic rename, so an interrupted write leaves either the old
//! or the new content behind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{EngineError, Result};

const STATE_FILE: &str = "state";
const STEP_STATE_FILE: &str = "step_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Snapshot data of a monitoring probe.
    Plain,
    /// Step cursor (plus cache) of a resumable scan.
    Step,
}

impl StateKind {
    fn file_name(self) -> &'static str {
        match self {
            StateKind::Plain => STATE_FILE,
            StateKind::Step => STEP_STATE_FILE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope(&self, probe: &str) -> StateScope {
        StateScope {
            dir: self.root.join(probe),
        }
    }
}

/// Storage location private to one probe.
#[derive(Debug, Clone)]
pub struct StateScope {
    dir: PathBuf,
}

impl StateScope {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: StateKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Load persisted state, or `T::default()` when none was stored yet.
    pub fn load<T: DeserializeOwned + Default>(&self, kind: StateKind) -> Result<T> {
        let path = self.path(kind);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no state at {}, using default", path.display());
                return Ok(T::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map_err(|source| EngineError::CorruptState {
            path: path.clone(),
            raw: String::from_utf8_lossy(&bytes).into_owned(),
            source,
        })
    }

    /// Replace the persisted state with `value`.
    pub fn store<T: Serialize>(&self, kind: StateKind, value: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.path(kind);
        let data = serde_json::to_vec(value)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        restrict_file(tmp.path())?;
        tmp.persist(&path).map_err(|e| EngineError::Io(e.error))?;
        // Re-apply in case the rename landed on a filesystem that ignores it.
        restrict_file(&path)?;

        debug!("stored {} bytes of state at {}", data.len(), path.display());
        Ok(())
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            restrict_dir(&self.dir)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
