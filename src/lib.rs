// Trellis - an MVC request-dispatch framework for Rust
//
// A service container with autowiring, compiled routes with constraints and
// caching, onion-style middleware and an HTTP kernel tying them together.

// Re-export core functionality
pub use trellis_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use trellis_config;

#[cfg(feature = "console")]
pub use trellis_console;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        AppConfig,
        Arguments,
        AuthGuard,
        Bootstrapper,
        Concrete,
        Container,
        Controller,
        Error,
        ExceptionHandler,
        HttpMethod,
        HttpRequest,
        HttpResponse,
        Injectable,
        Kernel,
        Middleware,
        MiddlewareRef,
        Next,
        Parameter,
        Parameters,
        Pipe,
        ResourceOptions,
        Route,
        RouteAction,
        RouteGroup,
        Router,
        ServiceProvider,
        async_trait,
        injectable,
        middleware_fn,
    };

    #[cfg(feature = "config")]
    pub use trellis_config::{ConfigManager, LoadConfiguration};

    #[cfg(feature = "console")]
    pub use trellis_console::Console;
}
