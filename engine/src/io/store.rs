//! Storage backends for save slots

use super::PersistenceError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Where serialized save records live.
///
/// Implementations run on the persistence worker thread only.
pub trait SaveStore: Send {
    /// Replace the contents of `slot`
    fn write(&mut self, slot: &str, data: &[u8]) -> Result<(), PersistenceError>;

    /// Read the contents of `slot`
    fn read(&self, slot: &str) -> Result<Vec<u8>, PersistenceError>;

    /// Shift the current contents of `slot` into its backup chain, keeping
    /// at most `keep` backups and evicting the oldest.
    fn rotate(&mut self, slot: &str, keep: usize) -> Result<(), PersistenceError>;
}

/// Slot names become file names; keep them to a safe alphabet
pub fn validate_slot(slot: &str) -> Result<(), PersistenceError> {
    let valid = !slot.is_empty()
        && slot.len() <= 64
        && slot
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidSlot(slot.to_string()))
    }
}

/// JSON files under a save directory.
///
/// `<dir>/<slot>.json` holds the current record and `<dir>/<slot>.bak<N>.json`
/// the backups, N = 1 being the newest.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slot_path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{slot}.json"))
    }

    pub fn backup_path(&self, slot: &str, generation: usize) -> PathBuf {
        self.dir.join(format!("{slot}.bak{generation}.json"))
    }

    /// Existing backups of `slot`, newest first
    pub fn backups(&self, slot: &str) -> Vec<PathBuf> {
        (1..)
            .map(|generation| self.backup_path(slot, generation))
            .take_while(|path| path.exists())
            .collect()
    }
}

impl SaveStore for FileStore {
    fn write(&mut self, slot: &str, data: &[u8]) -> Result<(), PersistenceError> {
        validate_slot(slot)?;
        fs::create_dir_all(&self.dir)?;

        // Write next to the target and rename so a crash never leaves a
        // half-written slot behind
        let target = self.slot_path(slot);
        let staging = self.dir.join(format!("{slot}.json.tmp"));
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &target)?;

        debug!(path = ?target, bytes = data.len(), "Slot written");
        Ok(())
    }

    fn read(&self, slot: &str) -> Result<Vec<u8>, PersistenceError> {
        validate_slot(slot)?;
        match fs::read(self.slot_path(slot)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(PersistenceError::SlotNotFound(slot.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn rotate(&mut self, slot: &str, keep: usize) -> Result<(), PersistenceError> {
        validate_slot(slot)?;

        // Drop generations beyond the retention count, oldest included
        let mut generation = keep.max(1);
        while self.backup_path(slot, generation).exists() {
            fs::remove_file(self.backup_path(slot, generation))?;
            trace!(slot, generation, "Evicted backup");
            generation += 1;
        }

        let current = self.slot_path(slot);
        if keep == 0 || !current.exists() {
            return Ok(());
        }

        for generation in (1..keep).rev() {
            let from = self.backup_path(slot, generation);
            if from.exists() {
                fs::rename(&from, self.backup_path(slot, generation + 1))?;
            }
        }
        fs::copy(&current, self.backup_path(slot, 1))?;
        Ok(())
    }
}
