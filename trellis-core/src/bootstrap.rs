// Kernel bootstrappers and service providers

use crate::logging::debug;
use crate::{Container, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Container id of [`AppConfig`]
pub const APP_CONFIG: &str = "app.config";

/// Application settings the kernel itself consults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    /// Reveal error details on 500 pages
    pub debug: bool,
    /// Route cache artifact consulted at boot
    pub route_cache: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Trellis".to_string(),
            debug: false,
            route_cache: None,
        }
    }
}

/// One step of kernel bootstrap, run once before the first request
pub trait Bootstrapper: Send + Sync {
    fn bootstrap(&self, container: &Container) -> Result<(), Error>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Registers bindings, then boots once every provider has registered
pub trait ServiceProvider: Send + Sync {
    fn register(&self, container: &Container) -> Result<(), Error>;

    fn boot(&self, _container: &Container) -> Result<(), Error> {
        Ok(())
    }
}

/// Bootstrapper running `register` on every provider, then `boot` on every provider
#[derive(Default)]
pub struct RegisterProviders {
    providers: Vec<Arc<dyn ServiceProvider>>,
}

impl RegisterProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider<P: ServiceProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }
}

impl Bootstrapper for RegisterProviders {
    fn bootstrap(&self, container: &Container) -> Result<(), Error> {
        for provider in &self.providers {
            provider.register(container)?;
        }
        for provider in &self.providers {
            provider.boot(container)?;
        }
        debug!(provider_count = self.providers.len(), "Service providers booted");
        Ok(())
    }
}
