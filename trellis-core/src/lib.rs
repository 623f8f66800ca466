// Core library for the Trellis web framework
// Service container, route compiler and matcher, middleware pipeline and HTTP kernel

pub mod bootstrap;
pub mod container;
pub mod controller;
pub mod error;
pub mod exception_handler;
pub mod guard;
pub mod http;
pub mod kernel;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod route;
pub mod route_cache;
pub mod route_collection;
pub mod route_constraint;
pub mod route_group;
pub mod routing;
#[cfg(feature = "server")]
pub mod server;
pub mod status;
pub mod view;

// Re-export commonly used types
pub use bootstrap::*;
pub use container::*;
pub use controller::*;
pub use error::*;
pub use exception_handler::*;
pub use guard::*;
pub use http::*;
pub use kernel::*;
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use middleware::*; // `Next` here is the HTTP continuation
pub use pipeline::{BoxFuture, Pipe, PipeRef, Pipeline, pipe_fn};
pub use route::*;
pub use route_cache::*;
pub use route_collection::*;
pub use route_constraint::Constraint;
pub use route_group::*;
pub use routing::*;
#[cfg(feature = "server")]
pub use server::serve;
pub use status::*;
pub use view::*;

// Used by `injectable!` and by implementors of the async traits
pub use async_trait::async_trait;
pub use inventory;
