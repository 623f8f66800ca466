//! Route groups for routes sharing a prefix, a name prefix or middleware
//!
//! ```
//! use trellis_core::RouteGroup;
//!
//! let admin = RouteGroup::new()
//!     .prefix("admin")
//!     .name("admin.")
//!     .middleware("auth");
//!
//! assert_eq!(admin.apply_prefix("/users"), "/admin/users");
//! ```

use crate::middleware::MiddlewareRef;

/// Shared attributes applied to every route registered inside a group
#[derive(Clone, Debug, Default)]
pub struct RouteGroup {
    /// Path prefix, normalised to `/segment` form (empty for none)
    prefix: String,

    /// Prepended verbatim to route names, e.g. `admin.`
    name_prefix: String,

    middleware: Vec<MiddlewareRef>,
}

impl RouteGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path prefix; leading and trailing slashes are normalised
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim().trim_matches('/');
        self.prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        };
        self
    }

    /// Set the route name prefix
    pub fn name(mut self, name_prefix: impl Into<String>) -> Self {
        self.name_prefix = name_prefix.into();
        self
    }

    pub fn middleware(mut self, middleware: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    pub fn with_middleware(mut self, middleware: Vec<MiddlewareRef>) -> Self {
        self.middleware.extend(middleware);
        self
    }

    pub fn get_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn get_name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub fn get_middleware(&self) -> &[MiddlewareRef] {
        &self.middleware
    }

    /// Prepend the group prefix to a route path
    pub fn apply_prefix(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match (self.prefix.is_empty(), path.is_empty()) {
            (true, _) => format!("/{}", path),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{}", self.prefix, path),
        }
    }

    /// Combine with an enclosing group: prefixes and name prefixes are
    /// concatenated parent-first, middleware runs parent-first.
    pub fn with_parent(self, parent: &RouteGroup) -> Self {
        let mut middleware = parent.middleware.clone();
        middleware.extend(self.middleware);

        Self {
            prefix: format!("{}{}", parent.prefix, self.prefix),
            name_prefix: format!("{}{}", parent.name_prefix, self.name_prefix),
            middleware,
        }
    }
}
