//! Byte-blob stores for encoded save games.

use flowcore::PersistenceError;
use std::collections::HashMap;
use std::path::PathBuf;

pub trait SaveStore: Send + Sync {
    fn write(&mut self, slot: &str, bytes: &[u8]) -> Result<(), PersistenceError>;

    fn read(&self, slot: &str) -> Result<Vec<u8>, PersistenceError>;

    fn slots(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct MemorySaveStore {
    slots: HashMap<String, Vec<u8>>,
}

impl MemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SaveStore for MemorySaveStore {
    fn write(&mut self, slot: &str, bytes: &[u8]) -> Result<(), PersistenceError> {
        self.slots.insert(slot.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, slot: &str) -> Result<Vec<u8>, PersistenceError> {
        self.slots
            .get(slot)
            .cloned()
            .ok_or_else(|| PersistenceError::SlotNotFound(slot.to_string()))
    }

    fn slots(&self) -> Vec<String> {
        let mut slots: Vec<String> = self.slots.keys().cloned().collect();
        slots.sort();
        slots
    }
}

/// One `<slot>.sav.json` file per slot.
#[derive(Debug)]
pub struct DirectorySaveStore {
    root: PathBuf,
}

impl DirectorySaveStore {
    const EXTENSION: &'static str = "sav.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_for(&self, slot: &str) -> PathBuf {
        self.root.join(format!("{}.{}", slot, Self::EXTENSION))
    }
}

impl SaveStore for DirectorySaveStore {
    fn write(&mut self, slot: &str, bytes: &[u8]) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.file_for(slot), bytes)?;
        tracing::debug!("Wrote save slot {} to {}", slot, self.root.display());
        Ok(())
    }

    fn read(&self, slot: &str) -> Result<Vec<u8>, PersistenceError> {
        let file = self.file_for(slot);
        if !file.exists() {
            return Err(PersistenceError::SlotNotFound(slot.to_string()));
        }
        Ok(std::fs::read(file)?)
    }

    fn slots(&self) -> Vec<String> {
        let suffix = format!(".{}", Self::EXTENSION);
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut slots: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_suffix(&suffix))
                    .map(str::to_string)
            })
            .collect();
        slots.sort();
        slots
    }
}
