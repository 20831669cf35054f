//! Durable storage for the last batch's state.

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    fs,
    io::{ErrorKind, Write},
    path::PathBuf,
    sync::Mutex,
};

/// The three persisted collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    FileUploads,
    NotificationUploads,
    UploadErrors,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::FileUploads, Slot::NotificationUploads, Slot::UploadErrors];

    /// Row and error slots are fsynced; file progress is rewritten on every
    /// chunk and restored as a best effort only.
    pub fn needs_sync(self) -> bool {
        !matches!(self, Slot::FileUploads)
    }

    pub fn key(self) -> &'static str {
        match self {
            Slot::FileUploads => "IGS_FILE_UPLOADS",
            Slot::NotificationUploads => "IGS_NOTIFICATION_UPLOADS",
            Slot::UploadErrors => "IGS_UPLOAD_ERRORS",
        }
    }
}

/// Key/value storage holding one JSON document per slot.
pub trait StateStore: Send + Sync {
    /// Raw JSON for the slot, `None` when never written.
    fn load(&self, slot: Slot) -> Result<Option<String>>;
    /// Replace the slot's content.
    fn save(&self, slot: Slot, json: &str) -> Result<()>;
}

/// Serialize and store a value.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn StateStore,
    slot: Slot,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    store.save(slot, &json)
}

/// Load and deserialize a value; empty slots yield `None`.
pub fn load_json<T: DeserializeOwned>(store: &dyn StateStore, slot: Slot) -> Result<Option<T>> {
    match store.load(slot)? {
        Some(s) if !s.trim().is_empty() => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("corrupt {} slot", slot.key()))?,
        )),
        _ => Ok(None),
    }
}

/// Stores each slot as `<dir>/<KEY>.json`.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, slot: Slot) -> PathBuf {
        self.dir.join(format!("{}.json", slot.key()))
    }
}

impl StateStore for FileStore {
    fn load(&self, slot: Slot) -> Result<Option<String>> {
        match fs::read_to_string(self.path(slot)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", slot.key())),
        }
    }

    /// Writes a sibling temp file and renames it over the slot.
    fn save(&self, slot: Slot, json: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let target = self.path(slot);
        let tmp = target.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(json.as_bytes())?;
            if slot.needs_sync() {
                f.sync_all()?;
            }
        }
        fs::rename(&tmp, &target)
            .with_context(|| format!("failed to replace {}", target.display()))?;
        Ok(())
    }
}

/// Process-local store, used for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<Slot, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, slot: Slot) -> Result<Option<String>> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(slots.get(&slot).cloned())
    }

    fn save(&self, slot: Slot, json: &str) -> Result<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        slots.insert(slot, json.to_string());
        Ok(())
    }
}
