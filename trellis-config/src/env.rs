// Environment variable loading

use std::collections::HashMap;
use std::env;

/// Turns `PREFIX_SOME_KEY=value` pairs into `some_key` entries.
///
/// Without a prefix every variable is kept. With one, only variables named
/// `PREFIX_...` are kept and the prefix is stripped.
#[derive(Debug, Clone, Default)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.map(|p| p.trim_end_matches('_').to_uppercase()),
        }
    }

    /// Load from the process environment
    pub fn load(&self) -> HashMap<String, String> {
        self.load_from(env::vars())
    }

    /// Load from any source of variables, such as a parsed `.env` file
    pub fn load_from<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| self.key_for(&key).map(|key| (key, value)))
            .collect()
    }

    /// Configuration key for a variable name, if the prefix admits it
    pub fn key_for(&self, name: &str) -> Option<String> {
        match &self.prefix {
            Some(prefix) => name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .filter(|rest| !rest.is_empty())
                .map(str::to_lowercase),
            None => Some(name.to_lowercase()),
        }
    }

    /// Read one variable, applying the prefix
    pub fn var(&self, key: &str) -> Option<String> {
        let name = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };
        env::var(name).ok()
    }
}
