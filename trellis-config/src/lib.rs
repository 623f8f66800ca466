// Configuration repository for the Trellis framework

pub mod bootstrap;
pub mod env;
pub mod error;
pub mod loader;

pub use bootstrap::{CONFIG, LoadConfiguration};
pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use trellis_core::logging::debug;

/// Key/value configuration shared by every clone.
///
/// Keys are flat (`debug`, `route_cache`) when they come from the environment
/// and nested when they come from files; `get("app.debug")` walks into nested
/// tables. String values parse as JSON on demand, so `APP_DEBUG=true` reads
/// back as a `bool`.
#[derive(Clone, Default)]
pub struct ConfigManager {
    config: Arc<RwLock<HashMap<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only environment variables named `PREFIX_...` are loaded
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    fn env_loader(&self) -> EnvLoader {
        EnvLoader::new(self.env_prefix.clone())
    }

    fn insert_strings(&self, vars: HashMap<String, String>) -> usize {
        let count = vars.len();
        let mut config = self.config.write();
        for (key, value) in vars {
            config.insert(key, Value::String(value));
        }
        count
    }

    /// Load from the process environment
    pub fn load_env(&self) -> Result<()> {
        let count = self.insert_strings(self.env_loader().load());
        debug!(count, prefix = ?self.env_prefix, "Environment configuration loaded");
        Ok(())
    }

    /// Load a `.env` file without touching the process environment.
    ///
    /// With no path, `.env` in the working directory is used if it exists.
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        let path = path.unwrap_or_else(|| Path::new(".env"));
        if !path.exists() {
            debug!(path = %path.display(), "No .env file found");
            return Ok(());
        }

        let entries = dotenvy::from_path_iter(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        let count = self.insert_strings(self.env_loader().load_from(entries));
        debug!(path = %path.display(), count, "Dotenv configuration loaded");
        Ok(())
    }

    /// Merge a file's top-level keys into the repository
    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::new(format).load_file(path)?;

        if let Value::Object(map) = data {
            let count = map.len();
            let mut config = self.config.write();
            for (key, value) in map {
                config.insert(key, value);
            }
            debug!(path = %path.display(), count, "Configuration file loaded");
        }
        Ok(())
    }

    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|e| ConfigError::SerializationError(e.to_string()))?;
        self.config.write().insert(key.to_string(), value);
        Ok(())
    }

    /// Raw value: an exact key first, then a walk through nested tables
    pub fn value(&self, key: &str) -> Option<Value> {
        let config = self.config.read();
        if let Some(value) = config.get(key) {
            return Some(value.clone());
        }

        let mut segments = key.split('.');
        let mut current = config.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .value(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        match serde_json::from_value::<T>(value.clone()) {
            Ok(typed) => Ok(typed),
            Err(err) => match &value {
                Value::String(raw) => serde_json::from_str(raw).map_err(|_| {
                    ConfigError::DeserializationError {
                        key: key.to_string(),
                        message: err.to_string(),
                    }
                }),
                _ => Err(ConfigError::DeserializationError {
                    key: key.to_string(),
                    message: err.to_string(),
                }),
            },
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.config.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy every key from `other`, overwriting existing ones
    pub fn merge(&self, other: &ConfigManager) {
        if Arc::ptr_eq(&self.config, &other.config) {
            return;
        }
        let other = other.config.read();
        let mut config = self.config.write();
        for (key, value) in other.iter() {
            config.insert(key.clone(), value.clone());
        }
    }
}
