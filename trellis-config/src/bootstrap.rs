// Kernel bootstrapper that loads configuration into the container

use crate::{ConfigManager, FileFormat};
use std::path::PathBuf;
use trellis_core::logging::info;
use trellis_core::{APP_CONFIG, AppConfig, Bootstrapper, Container, Error};

/// Container id of the shared [`ConfigManager`]
pub const CONFIG: &str = "config";

#[derive(Debug, Clone)]
enum Dotenv {
    /// `.env` in the working directory, if present
    Default,
    Path(PathBuf),
    Disabled,
}

/// Loads configuration, then binds it as `config` and the derived
/// [`AppConfig`] as `app.config`.
///
/// Sources are applied in order, later ones winning: preset values, files,
/// the `.env` file, then the process environment.
///
/// ```no_run
/// use trellis_config::LoadConfiguration;
/// use trellis_core::{Container, Kernel};
///
/// let kernel = Kernel::new(Container::new())
///     .bootstrapper(LoadConfiguration::new().file("config/app.toml"));
/// ```
#[derive(Clone)]
pub struct LoadConfiguration {
    prefix: Option<String>,
    dotenv: Dotenv,
    read_env: bool,
    files: Vec<(PathBuf, Option<FileFormat>)>,
    preset: Option<ConfigManager>,
}

impl Default for LoadConfiguration {
    fn default() -> Self {
        Self {
            prefix: Some("APP".to_string()),
            dotenv: Dotenv::Default,
            read_env: true,
            files: Vec::new(),
            preset: None,
        }
    }
}

impl LoadConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment prefix, `APP` by default
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn without_prefix(mut self) -> Self {
        self.prefix = None;
        self
    }

    pub fn dotenv(mut self, path: impl Into<PathBuf>) -> Self {
        self.dotenv = Dotenv::Path(path.into());
        self
    }

    pub fn without_dotenv(mut self) -> Self {
        self.dotenv = Dotenv::Disabled;
        self
    }

    /// Skip the process environment
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// A file whose format is detected from its extension
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push((path.into(), None));
        self
    }

    pub fn file_with_format(mut self, path: impl Into<PathBuf>, format: FileFormat) -> Self {
        self.files.push((path.into(), Some(format)));
        self
    }

    /// Start from values already loaded elsewhere
    pub fn with_values(mut self, manager: ConfigManager) -> Self {
        self.preset = Some(manager);
        self
    }

    /// Load every source into a fresh repository
    pub fn load(&self) -> crate::Result<ConfigManager> {
        let manager = match &self.prefix {
            Some(prefix) => ConfigManager::with_prefix(prefix.clone()),
            None => ConfigManager::new(),
        };
        if let Some(preset) = &self.preset {
            manager.merge(preset);
        }

        for (path, format) in &self.files {
            let format = match format {
                Some(format) => *format,
                None => FileFormat::detect(path)?,
            };
            manager.load_file(path, format)?;
        }

        match &self.dotenv {
            Dotenv::Default => manager.load_dotenv(None)?,
            Dotenv::Path(path) => manager.load_dotenv(Some(path.as_path()))?,
            Dotenv::Disabled => {}
        }

        if self.read_env {
            manager.load_env()?;
        }
        Ok(manager)
    }
}

/// Kernel settings from flat (`debug`) or nested (`app.debug`) keys
pub fn app_config(manager: &ConfigManager) -> AppConfig {
    let defaults = AppConfig::default();
    let lookup = |key: &str| -> Option<serde_json::Value> {
        manager
            .value(key)
            .or_else(|| manager.value(&format!("app.{}", key)))
    };
    let read = |key: &str| -> Option<String> {
        lookup(key).map(|value| match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    };

    AppConfig {
        name: read("name").unwrap_or(defaults.name),
        debug: read("debug")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
            .unwrap_or(defaults.debug),
        route_cache: read("route_cache").filter(|v| !v.is_empty()),
    }
}

impl Bootstrapper for LoadConfiguration {
    fn bootstrap(&self, container: &Container) -> Result<(), Error> {
        let manager = self.load()?;
        let app = app_config(&manager);
        info!(
            app = %app.name,
            debug = app.debug,
            keys = manager.keys().len(),
            "Configuration loaded"
        );

        container.instance(CONFIG, manager);
        container.instance(APP_CONFIG, app);
        Ok(())
    }

    fn name(&self) -> &str {
        "LoadConfiguration"
    }
}
