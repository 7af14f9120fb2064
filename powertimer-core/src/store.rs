//! Durable timer file storage.
//!
//! Writes go to `<file>.writing`, are flushed and fsynced, then renamed over
//! the previous file, so a power cut leaves either the old or the new file.
//! A file that does not parse is moved to `<file>_old` and treated as empty.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, warn};

use crate::codec::{decode_timer_file, encode_timer_file, DecodedTimerFile, TimerRecord};
use crate::error::{FormatError, StoreError};

/// What [`TimerStore::load`] found on disk.
#[derive(Debug)]
pub enum StoreLoad {
    /// No timer file yet.
    Missing,
    Loaded(DecodedTimerFile),
    /// The file was unreadable as a timer file and has been set aside.
    Quarantined {
        error: FormatError,
        /// `None` when renaming the broken file failed as well.
        moved_to: Option<PathBuf>,
    },
}

/// Timer file location.
#[derive(Debug, Clone)]
pub struct TimerStore {
    path: PathBuf,
}

impl TimerStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Temporary file used while writing.
    pub fn writing_path(&self) -> PathBuf {
        self.sibling(".writing")
    }

    /// Where a corrupt file is moved.
    pub fn quarantine_path(&self) -> PathBuf {
        self.sibling("_old")
    }

    /// Read and decode the timer file.
    pub fn load(&self) -> Result<StoreLoad, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Timer file {:?} not found", self.path);
                return Ok(StoreLoad::Missing);
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                // Not UTF-8 at all.
                return Ok(self.quarantine(FormatError::Malformed(e.to_string())));
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        match decode_timer_file(&text) {
            Ok(decoded) => Ok(StoreLoad::Loaded(decoded)),
            Err(e) => Ok(self.quarantine(e)),
        }
    }

    fn quarantine(&self, error: FormatError) -> StoreLoad {
        error!("Timer file {:?} is corrupt and could not be loaded: {}", self.path, error);
        let target = self.quarantine_path();
        let moved_to = match fs::rename(&self.path, &target) {
            Ok(()) => Some(target),
            Err(e) => {
                warn!("Renaming broken timer file failed: {}", e);
                None
            }
        };
        StoreLoad::Quarantined { error, moved_to }
    }

    /// Atomically replace the timer file with `records`.
    pub fn save(&self, records: &[TimerRecord]) -> Result<(), StoreError> {
        let text = encode_timer_file(records)?;
        let tmp = self.writing_path();

        if let Err(e) = write_synced(&tmp, text.as_bytes()) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&self.path, e));
        }
        sync_parent(&self.path);

        debug!("Saved {} timer(s) to {:?}", records.len(), self.path);
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}

/// Make the rename itself durable. Best effort.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
