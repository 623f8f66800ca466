//! Route maintenance commands
//!
//! `route:list` prints the route table, `route:cache` writes the compiled
//! route artifact and `route:clear` removes it.

use crate::error::{ConsoleError, ConsoleResult};
use clap::Args;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use trellis_core::{Kernel, RouteListing, Router};

/// Options for `route:list`
#[derive(Args, Debug, Clone, Default)]
pub struct RouteListArgs {
    /// Print the table as JSON
    #[arg(long)]
    pub json: bool,

    /// Only show routes answering this method
    #[arg(long)]
    pub method: Option<String>,

    /// Only show routes whose name contains this text
    #[arg(long)]
    pub name: Option<String>,

    /// Only show routes whose URI contains this text
    #[arg(long)]
    pub path: Option<String>,
}

/// Options shared by `route:cache` and `route:clear`
#[derive(Args, Debug, Clone, Default)]
pub struct CacheArgs {
    /// Cache file, overriding the application's configured location
    #[arg(long, env = "APP_ROUTE_CACHE")]
    pub path: Option<PathBuf>,
}

/// List the application's routes
pub fn list(kernel: &Kernel, args: &RouteListArgs, out: &mut dyn Write) -> ConsoleResult<()> {
    let router = kernel.bootstrap()?;
    let rows: Vec<RouteListing> = router
        .list()
        .into_iter()
        .filter(|row| args.matches(row))
        .collect();

    if args.json {
        serde_json::to_writer_pretty(&mut *out, &rows)?;
        writeln!(out)?;
        return Ok(());
    }

    if rows.is_empty() {
        writeln!(out, "Your application doesn't have any routes matching the given criteria.")?;
        return Ok(());
    }

    print_routes_table(&rows, out)?;
    writeln!(out)?;
    writeln!(out, "Showing [{}] routes", rows.len())?;
    Ok(())
}

/// Write the route cache from live registration
///
/// Any previous artifact is removed first, so a refused cache leaves the
/// application on live routes.
pub fn cache(kernel: &Kernel, args: &CacheArgs, out: &mut dyn Write) -> ConsoleResult<()> {
    let path = cache_path(kernel, args)?;
    Router::clear_cache(&path)?;
    let count = kernel.cache_routes(&path)?;

    writeln!(
        out,
        "{} {} routes written to {}",
        "Routes cached successfully.".green().bold(),
        count,
        path.display()
    )?;
    Ok(())
}

/// Remove the route cache
pub fn clear(kernel: &Kernel, args: &CacheArgs, out: &mut dyn Write) -> ConsoleResult<()> {
    let path = cache_path(kernel, args)?;
    if Router::clear_cache(&path)? {
        writeln!(out, "{}", "Route cache cleared.".green().bold())?;
    } else {
        writeln!(out, "No route cache at {}", path.display())?;
    }
    Ok(())
}

/// Explicit `--path`, then the kernel's setting, then `app.config` once bootstrapped
fn cache_path(kernel: &Kernel, args: &CacheArgs) -> ConsoleResult<PathBuf> {
    if let Some(path) = args.path.clone().or_else(|| kernel.route_cache_path()) {
        return Ok(path);
    }
    kernel.bootstrap()?;
    kernel.route_cache_path().ok_or(ConsoleError::MissingCachePath)
}

impl RouteListArgs {
    fn matches(&self, row: &RouteListing) -> bool {
        let method = self
            .method
            .as_deref()
            .is_none_or(|m| row.methods.iter().any(|candidate| candidate.eq_ignore_ascii_case(m)));
        let name = self
            .name
            .as_deref()
            .is_none_or(|n| row.name.as_deref().is_some_and(|name| name.contains(n)));
        let path = self.path.as_deref().is_none_or(|p| row.uri.contains(p));
        method && name && path
    }
}

fn print_routes_table(rows: &[RouteListing], out: &mut dyn Write) -> std::io::Result<()> {
    let methods: Vec<String> = rows.iter().map(|r| r.methods.join("|")).collect();

    let method_width = methods.iter().map(String::len).max().unwrap_or(0).max(6);
    let uri_width = rows.iter().map(|r| r.uri.len()).max().unwrap_or(0).max(3);
    let name_width = rows
        .iter()
        .map(|r| r.name.as_deref().map_or(0, str::len))
        .max()
        .unwrap_or(0)
        .max(4);

    let header = format!(
        "{:mw$}  {:uw$}  {:nw$}  ACTION",
        "METHOD",
        "URI",
        "NAME",
        mw = method_width,
        uw = uri_width,
        nw = name_width
    );
    writeln!(out, "{}", header.bold())?;
    writeln!(out, "{}", "-".repeat(header.len()))?;

    for (row, method) in rows.iter().zip(&methods) {
        writeln!(
            out,
            "{:mw$}  {:uw$}  {:nw$}  {}",
            method,
            row.uri,
            row.name.as_deref().unwrap_or(""),
            row.action,
            mw = method_width,
            uw = uri_width,
            nw = name_width
        )?;
        if !row.middleware.is_empty() {
            writeln!(out, "  └─ Middleware: {}", row.middleware.join(", "))?;
        }
    }
    Ok(())
}
