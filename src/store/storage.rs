//! Persistent storage seam.
//!
//! The firmware's flash filesystem reduced to the operations the core
//! needs. Paths are absolute, `/`-separated, rooted at the device's
//! data partition. [`DirStorage`] maps them under a host directory;
//! [`MemStorage`] backs tests and storage-less operation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Errors related to persistent storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Key/value-with-directories persistence contract.
pub trait Storage: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;
    fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;
    fn remove(&self, path: &str) -> Result<(), StorageError>;
    /// Entry names (not full paths) under a directory. A missing
    /// directory lists as empty.
    fn list(&self, dir: &str) -> Result<Vec<String>, StorageError>;
    fn exists(&self, path: &str) -> bool;
    fn mkdir(&self, path: &str) -> Result<(), StorageError>;
}

/// Storage rooted at a host directory.
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn io_err(path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl Storage for DirStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path);
        match std::fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(Self::io_err(&full, e)),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Self::io_err(&full, e))?;
        }
        std::fs::write(&full, data).map_err(|e| Self::io_err(&full, e))
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path);
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(Self::io_err(&full, e)),
        }
    }

    fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let full = self.resolve(dir);
        let entries = match std::fs::read_dir(&full) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(&full, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_err(&full, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path);
        std::fs::create_dir_all(&full).map_err(|e| Self::io_err(&full, e))
    }
}

/// In-memory storage. Contents vanish with the process.
#[derive(Default)]
pub struct MemStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        let mut names: Vec<String> = files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(|rest| rest.to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    fn mkdir(&self, _path: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn Storage) {
        assert!(!storage.exists("/presets/a.json"));
        assert!(matches!(
            storage.read("/presets/a.json"),
            Err(StorageError::NotFound(_))
        ));

        storage.mkdir("/presets").unwrap();
        storage.write("/presets/a.json", b"{}").unwrap();
        assert!(storage.exists("/presets/a.json"));
        assert_eq!(storage.read("/presets/a.json").unwrap(), b"{}");

        storage.write("/presets/b.json", b"[]").unwrap();
        assert_eq!(
            storage.list("/presets").unwrap(),
            vec!["a.json".to_string(), "b.json".to_string()]
        );

        storage.remove("/presets/a.json").unwrap();
        assert!(!storage.exists("/presets/a.json"));
        assert!(matches!(
            storage.remove("/presets/a.json"),
            Err(StorageError::NotFound(_))
        ));

        // Missing directories list as empty.
        assert!(storage.list("/nothing").unwrap().is_empty());
    }

    #[test]
    fn test_mem_storage() {
        exercise(&MemStorage::new());
    }

    #[test]
    fn test_dir_storage() {
        let dir = std::env::temp_dir().join(format!(
            "lume-storage-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let storage = DirStorage::new(&dir);
        exercise(&storage);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
