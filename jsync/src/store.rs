//! Settings store backed by a single JSON document
//!
//! All keys live in one JSON object on disk. Readers take a shared lock,
//! writers an exclusive one, and writes go through a temporary file that is
//! synced and renamed over the original.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::collaborators::PersistenceStore;

pub struct JsonFileStore {
    store_file: PathBuf,
}

impl JsonFileStore {
    pub fn new(store_file: PathBuf) -> Self {
        Self { store_file }
    }

    pub fn path(&self) -> &Path {
        &self.store_file
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        if !self.store_file.exists() {
            return Ok(Map::new());
        }

        let mut file = self.locked_file(false)?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read settings store")?;
        fs2::FileExt::unlock(&file).ok();

        parse_document(&content)
    }

    fn locked_file(&self, write: bool) -> Result<fs::File> {
        let file = OpenOptions::new()
            .read(true)
            .write(write)
            .create(write)
            .truncate(false)
            .open(&self.store_file)
            .with_context(|| format!("Failed to open {}", self.store_file.display()))?;

        if write {
            fs2::FileExt::lock_exclusive(&file)
                .context("Failed to lock settings store for writing")?;
        } else {
            fs2::FileExt::lock_shared(&file).context("Failed to lock settings store for reading")?;
        }

        Ok(file)
    }
}

fn parse_document(content: &str) -> Result<Map<String, Value>> {
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(content).context("Failed to parse settings store")
}

impl PersistenceStore for JsonFileStore {
    fn load_value(&self, key: &str) -> Result<Option<Value>> {
        let mut document = self.read_document()?;
        Ok(document.remove(key))
    }

    fn save_value(&mut self, key: &str, value: Value) -> Result<()> {
        if let Some(parent) = self.store_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }

        // Hold the exclusive lock across read-modify-write
        let mut lock = self.locked_file(true)?;
        let mut content = String::new();
        lock.read_to_string(&mut content)
            .context("Failed to read settings store")?;

        let mut document = parse_document(&content)?;
        document.insert(key.to_string(), value);

        let content = serde_json::to_string_pretty(&document)
            .context("Failed to serialize settings store")?;
        let tmp_path = self.store_file.with_extension("tmp");

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| {
                    format!("Failed to open temporary store file {}", tmp_path.display())
                })?;
            file.write_all(content.as_bytes())
                .context("Failed to write settings store")?;
            file.sync_all().context("Failed to sync settings store")?;
        }

        fs::rename(&tmp_path, &self.store_file)
            .with_context(|| format!("Failed to replace {}", self.store_file.display()))?;

        log::debug!("Saved {} to {}", key, self.store_file.display());
        Ok(())
    }
}

/// In-memory store
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    values: std::collections::HashMap<String, Value>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }
}

#[cfg(test)]
impl PersistenceStore for MemoryStore {
    fn load_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn save_value(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{load, save};
    use jsync_common::Preferences;
    use serde_json::json;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("settings.json"));
        assert!(store.load_value("preferences").unwrap().is_none());
    }

    #[test]
    fn test_save_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut store = JsonFileStore::new(path.clone());

        store.save_value("a", json!({"x": 1})).unwrap();
        store.save_value("b", json!([1, 2, 3])).unwrap();
        store.save_value("a", json!({"x": 2})).unwrap();

        assert_eq!(store.load_value("a").unwrap(), Some(json!({"x": 2})));
        assert_eq!(store.load_value("b").unwrap(), Some(json!([1, 2, 3])));
        assert!(!path.with_extension("tmp").exists());

        // A fresh handle sees the same document
        let reopened = JsonFileStore::new(path);
        assert_eq!(reopened.load_value("b").unwrap(), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_typed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("settings.json"));

        let prefs = Preferences {
            interval_minutes: 45,
            notifications_enabled: false,
            ..Preferences::default()
        };
        save(&mut store, Preferences::STORE_KEY, &prefs).unwrap();

        let loaded: Option<Preferences> = load(&store, Preferences::STORE_KEY).unwrap();
        assert_eq!(loaded, Some(prefs));
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(path);
        assert!(store.load_value("preferences").is_err());
    }
}
