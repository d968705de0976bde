//! JSON file store

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Global config directory name (under the platform config dir)
pub const GLOBAL_DIR_NAME: &str = "deskrun";

/// Project config directory name (under the project root)
pub const PROJECT_DIR_NAME: &str = ".deskrun";

/// Directory of JSON settings files
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Global settings (`<config dir>/deskrun/`)
    pub fn global() -> Result<Self> {
        dirs::config_dir()
            .map(|dir| Self::new(dir.join(GLOBAL_DIR_NAME)))
            .ok_or_else(|| Error::Config("no platform config directory".to_string()))
    }

    /// Project settings (`<root>/.deskrun/`)
    pub fn project(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(PROJECT_DIR_NAME))
    }

    /// Project settings of the working directory
    pub fn current_project() -> Result<Self> {
        std::env::current_dir()
            .map(Self::project)
            .map_err(|e| Error::Config(format!("working directory unavailable: {}", e)))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        read_json(self.file_path(filename))
    }

    /// Missing file is `None`; unreadable or malformed file is an error
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        match std::fs::read_to_string(&path) {
            Ok(content) => parse_json(&path, &content).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_error(&path, e)),
        }
    }

    /// Write through a sibling temp file so readers never see a partial file
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| {
            Error::Config(format!("cannot create {}: {}", self.base_dir.display(), e))
        })?;

        let path = self.file_path(filename);
        let staging = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| Error::Config(format!("cannot encode {}: {}", filename, e)))?;

        std::fs::write(&staging, content)
            .and_then(|_| std::fs::rename(&staging, &path))
            .map_err(|e| Error::Config(format!("cannot write {}: {}", path.display(), e)))
    }
}

/// Read and decode one JSON file
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| read_error(path, e))?;
    parse_json(path, &content)
}

fn parse_json<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    serde_json::from_str(content)
        .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))
}

fn read_error(path: &Path, e: std::io::Error) -> Error {
    Error::Config(format!("cannot read {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::project(dir.path().join("nested"));
        assert!(store.base_dir().ends_with(PROJECT_DIR_NAME));

        let sample = Sample {
            name: "a".to_string(),
            count: 3,
        };
        store.save("sample.json", &sample).unwrap();
        assert!(store.file_path("sample.json").exists());
        assert!(!store.file_path("sample.json.tmp").exists());

        let loaded: Sample = store.load("sample.json").unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_load_optional() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let missing: Option<Sample> = store.load_optional("none.json").unwrap();
        assert!(missing.is_none());

        std::fs::write(store.file_path("bad.json"), "{not json").unwrap();
        let bad: Result<Option<Sample>> = store.load_optional("bad.json");
        assert!(matches!(bad, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        assert!(matches!(store.load::<Sample>("none.json"), Err(Error::Config(_))));
    }
}
