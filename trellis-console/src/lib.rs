//! Trellis console - route maintenance commands
//!
//! Embed [`Console`] in an application binary to get `route:list`,
//! `route:cache` and `route:clear` against that application's [`Kernel`].
//!
//! ```no_run
//! use std::process::ExitCode;
//! use trellis_console::Console;
//! use trellis_core::{Container, Kernel, RouteAction};
//!
//! fn main() -> ExitCode {
//!     let kernel = Kernel::new(Container::new()).routes(|router| {
//!         router.get("/", RouteAction::controller("HomeController", "index"))?;
//!         Ok(())
//!     });
//!     Console::execute(&kernel, std::env::args_os())
//! }
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use trellis_core::Kernel;

pub mod commands;
pub mod error;

pub use commands::routes::{CacheArgs, RouteListArgs};
pub use error::{ConsoleError, ConsoleResult};

/// Trellis application console
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(version)]
#[command(about = "Route maintenance for Trellis applications")]
#[command(propagate_version = true)]
pub struct Console {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all registered routes
    #[command(name = "route:list")]
    RouteList(RouteListArgs),

    /// Create a route cache file for faster route registration
    #[command(name = "route:cache")]
    RouteCache(CacheArgs),

    /// Remove the route cache file
    #[command(name = "route:clear")]
    RouteClear(CacheArgs),
}

impl Console {
    /// Run the parsed command, writing its output to `out`
    pub fn run(&self, kernel: &Kernel, out: &mut dyn Write) -> ConsoleResult<()> {
        match &self.command {
            Command::RouteList(args) => commands::routes::list(kernel, args, out),
            Command::RouteCache(args) => commands::routes::cache(kernel, args, out),
            Command::RouteClear(args) => commands::routes::clear(kernel, args, out),
        }
    }

    /// Parse `args` and run the command, writing its output to `out`
    pub fn call<I, T>(kernel: &Kernel, args: I, out: &mut dyn Write) -> ConsoleResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Console::try_parse_from(args)?.run(kernel, out)
    }

    /// Parse `args`, run the command on stdout and turn the outcome into an exit code
    pub fn execute<I, T>(kernel: &Kernel, args: I) -> ExitCode
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let console = match Console::try_parse_from(args) {
            Ok(console) => console,
            Err(e) => {
                let _ = e.print();
                return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1));
            }
        };

        let mut stdout = std::io::stdout().lock();
        match console.run(kernel, &mut stdout) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{} {}", "error:".red().bold(), e);
                ExitCode::from(e.exit_code())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition() {
        Console::command().debug_assert();
    }

    #[test]
    fn test_parse_route_list() {
        let console = Console::try_parse_from(["trellis", "route:list", "--json", "--method", "GET"]).unwrap();
        match console.command {
            Command::RouteList(args) => {
                assert!(args.json);
                assert_eq!(args.method.as_deref(), Some("GET"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_cache_path() {
        let console = Console::try_parse_from(["trellis", "route:cache", "--path", "/tmp/routes.json"]).unwrap();
        match console.command {
            Command::RouteCache(args) => {
                assert_eq!(args.path.as_deref(), Some(std::path::Path::new("/tmp/routes.json")))
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Console::try_parse_from(["trellis", "route:warm"]).is_err());
    }

    fn kernel() -> Kernel {
        Kernel::new(trellis_core::Container::new()).routes(|router| {
            router.get("/users", trellis_core::RouteAction::controller("UserController", "index"))?;
            Ok(())
        })
    }

    #[test]
    fn test_call_runs_the_parsed_command() {
        let mut out = Vec::new();
        Console::call(&kernel(), ["trellis", "route:list", "--json"], &mut out).unwrap();

        let rows: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(rows[0]["uri"], "/users");
    }

    #[test]
    fn test_call_reports_usage_errors() {
        let mut out = Vec::new();
        let err = Console::call(&kernel(), ["trellis", "route:warm"], &mut out).unwrap_err();
        assert!(matches!(err, ConsoleError::Usage(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(out.is_empty());
    }
}
