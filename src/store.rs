//! The persisted registry: one JSON blob under a fixed key.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::schema;
use crate::types::Registry;

pub const DEFAULT_KEY: &str = "verde_digital_registros";

/// Key-value slot holding serialized blobs.
pub trait Storage {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&mut self, key: &str) -> io::Result<()>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        (**self).remove(key)
    }
}

/// One `<key>.json` file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slots: HashMap<String, String>,
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.slots.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        self.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        self.slots.remove(key);
        Ok(())
    }
}

pub struct RegistryStore<S> {
    storage: S,
    key: String,
}

impl<S: Storage> RegistryStore<S> {
    pub fn new(storage: S, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Reads and normalizes the persisted registry. Absent, unreadable or
    /// malformed blobs all come back as an empty registry.
    pub fn load(&self) -> Registry {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %self.key, "No stored registry, starting empty");
                return Registry::new();
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read stored registry");
                return Registry::new();
            }
        };

        let value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Stored registry is not valid JSON");
                return Registry::new();
            }
        };

        schema::migrate(value).unwrap_or_else(|e| {
            warn!(key = %self.key, error = %e, "Stored registry has the wrong shape");
            Registry::new()
        })
    }

    /// Normalizes and overwrites the whole blob.
    pub fn save(&mut self, registry: &Registry) -> Result<(), StoreError> {
        let encoded = encode(registry, false)?;
        self.storage.set(&self.key, &encoded)?;
        Ok(())
    }

    /// Erases the blob entirely.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.storage.remove(&self.key)?;
        Ok(())
    }

    /// Pretty-printed current registry.
    pub fn export(&self) -> Result<String, StoreError> {
        encode(&self.load(), true)
    }
}

fn encode(registry: &Registry, pretty: bool) -> Result<String, StoreError> {
    let mut registry = registry.clone();
    registry.normalize();
    let encoded = if pretty {
        serde_json::to_string_pretty(&registry)
    } else {
        serde_json::to_string(&registry)
    };
    encoded.map_err(StoreError::Encode)
}
