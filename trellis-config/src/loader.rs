// Configuration file loaders

use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Detect the format from a path's extension; `.env` files have none
    pub fn detect(path: &Path) -> Result<Self> {
        if path.file_name().and_then(|n| n.to_str()) == Some(".env") {
            return Ok(FileFormat::Env);
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::LoadError(format!("{} has no extension", path.display())))?;
        Self::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))
    }
}

/// Reads one configuration file into a JSON object
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.parse(&content)
    }

    pub fn parse(&self, content: &str) -> Result<Value> {
        let value = match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))?,
            FileFormat::Toml => {
                let table: toml::Table = toml::from_str(content)
                    .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
                serde_json::to_value(table)
                    .map_err(|e| ConfigError::SerializationError(e.to_string()))?
            }
            FileFormat::Env => parse_env(content),
        };

        if !value.is_object() {
            return Err(ConfigError::ParseError(
                "configuration root must be a table".to_string(),
            ));
        }
        Ok(value)
    }
}

fn parse_env(content: &str) -> Value {
    let mut map = serde_json::Map::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            map.insert(key.trim().to_lowercase(), Value::String(value.to_string()));
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let value = loader.parse(r#"{"app": {"debug": true}}"#).unwrap();
        assert_eq!(value["app"]["debug"], true);
    }

    #[test]
    fn test_parse_toml() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let value = loader
            .parse(
                r#"
                [app]
                name = "Trellis"
                workers = 4
                "#,
            )
            .unwrap();
        assert_eq!(value["app"]["name"], "Trellis");
        assert_eq!(value["app"]["workers"], 4);
    }

    #[test]
    fn test_parse_env() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let value = loader
            .parse(
                r#"
                # Comment
                APP_NAME=Trellis
                export APP_DEBUG=true
                QUOTED="quoted value"
                "#,
            )
            .unwrap();
        assert_eq!(value["app_name"], "Trellis");
        assert_eq!(value["app_debug"], "true");
        assert_eq!(value["quoted"], "quoted value");
    }

    #[test]
    fn test_non_table_root_is_rejected() {
        let loader = ConfigLoader::new(FileFormat::Json);
        assert!(matches!(loader.parse("[1, 2]"), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::detect(Path::new("config/app.json")).unwrap(), FileFormat::Json);
        assert_eq!(FileFormat::detect(Path::new("app.TOML")).unwrap(), FileFormat::Toml);
        assert_eq!(FileFormat::detect(Path::new(".env")).unwrap(), FileFormat::Env);
        assert!(FileFormat::detect(Path::new("app.yaml")).is_err());
        assert!(FileFormat::detect(Path::new("Makefile")).is_err());
    }
}
