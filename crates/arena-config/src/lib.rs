// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Config service and storage port for Arena services.
//!
//! A [`ConfigStore`] persists raw blobs keyed by logical name; the
//! [`ConfigService`] layers typed JSON (de)serialization on top. Services
//! load their section at boot and persist defaults on first run, so a
//! fresh install leaves an editable file behind.

pub mod sections;

use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Thin service that serializes config values and delegates storage to a
/// `ConfigStore`.
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)`
    /// if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                let value = serde_json::from_slice(&bytes)?;
                Ok(Some(value))
            }
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Load `key`, or persist and return its default.
    pub fn load_or_init<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        if let Some(value) = self.load(key)? {
            return Ok(value);
        }
        let value = T::default();
        self.save(key, &value)?;
        Ok(value)
    }
}

/// Store configs as JSON files under a directory (platform config dir by
/// default).
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Create a store rooted at the user config directory (e.g.,
    /// `~/.config/Arena`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj = ProjectDirs::from("dev", "flyingrobots", "Arena")
            .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))?;
        Self::with_base(proj.config_dir().to_path_buf())
    }

    /// Create a store rooted at an explicit directory (CLI override).
    pub fn with_base(base: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        count: u32,
    }

    fn service() -> (tempfile::TempDir, ConfigService<FsConfigStore>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsConfigStore::with_base(dir.path().to_path_buf()).expect("store");
        (dir, ConfigService::new(store))
    }

    #[test]
    fn load_of_missing_key_is_none() {
        let (_dir, svc) = service();
        let loaded: Option<Sample> = svc.load("absent").expect("load");
        assert_eq!(loaded, None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, svc) = service();
        svc.save("sample", &Sample { count: 7 }).expect("save");
        let loaded: Sample = svc.load("sample").expect("load").expect("present");
        assert_eq!(loaded, Sample { count: 7 });
    }

    #[test]
    fn load_or_init_persists_defaults_once() {
        let (_dir, svc) = service();
        let first: Sample = svc.load_or_init("svc").expect("init");
        assert_eq!(first, Sample::default());
        svc.save("svc", &Sample { count: 3 }).expect("save");
        let second: Sample = svc.load_or_init("svc").expect("load");
        assert_eq!(second, Sample { count: 3 }, "existing value wins");
    }
}
