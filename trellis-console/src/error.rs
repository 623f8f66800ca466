//! Error types for the route commands.

use thiserror::Error;

/// Result type for console operations.
pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Console error types.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Booting the application or building its routes failed
    #[error("{0}")]
    Kernel(#[from] trellis_core::Error),

    /// Neither `--path` nor the application configuration names a cache file
    #[error("No route cache path configured. Pass --path or set app.route_cache.")]
    MissingCachePath,

    /// The arguments did not parse
    #[error("{0}")]
    Usage(#[from] clap::Error),

    /// Writing command output failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON rendering of the route table failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConsoleError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            ConsoleError::MissingCachePath => 2,
            ConsoleError::Usage(e) => u8::try_from(e.exit_code()).unwrap_or(2),
            ConsoleError::Io(_) => 74,
            ConsoleError::Kernel(_) | ConsoleError::Serialization(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ConsoleError::MissingCachePath.exit_code(), 2);
        assert_eq!(
            ConsoleError::from(trellis_core::Error::RouteCache("closure".into())).exit_code(),
            1
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert_eq!(ConsoleError::from(io).exit_code(), 74);

        let usage = clap::Error::new(clap::error::ErrorKind::InvalidSubcommand);
        assert_eq!(ConsoleError::from(usage).exit_code(), 2);
    }

    #[test]
    fn test_kernel_errors_display_transparently() {
        let err = ConsoleError::from(trellis_core::Error::RouteCache("route /x uses a closure".into()));
        assert!(err.to_string().contains("route /x uses a closure"));
    }
}
