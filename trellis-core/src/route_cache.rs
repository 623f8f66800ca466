//! Route cache artifact
//!
//! A compiled route table can be written to a JSON file and loaded at boot in
//! place of live registration. Only controller actions and named middleware
//! can be represented, so a table containing a closure action or inline
//! middleware refuses to be cached.
//!
//! ```rust,ignore
//! router.cache("bootstrap/cache/routes.json")?;
//! let router = Router::load_cache("bootstrap/cache/routes.json")?;
//! ```

use crate::logging::{debug, info};
use crate::middleware::MiddlewareRef;
use crate::route::{CompiledRoute, Route, RouteAction};
use crate::route_collection::RouteCollection;
use crate::routing::Router;
use crate::{Error, HttpMethod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Format version written into every artifact
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAction {
    pub controller: String,
    pub method: String,
}

/// One serialised route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRoute {
    pub methods: Vec<HttpMethod>,
    pub uri: String,
    pub compiled: String,
    pub parameters: Vec<String>,
    #[serde(default)]
    pub wheres: BTreeMap<String, String>,
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    pub name: Option<String>,
    pub action: CachedAction,
    #[serde(default)]
    pub middleware: Vec<String>,
    #[serde(default)]
    pub without_middleware: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCacheFile {
    pub version: u32,
    pub routes: Vec<CachedRoute>,
}

fn cache_error(message: impl Into<String>) -> Error {
    Error::RouteCache(message.into())
}

impl CachedRoute {
    fn from_route(route: &Route) -> Result<Self, Error> {
        let action = match route.action() {
            RouteAction::Controller { controller, method } => CachedAction {
                controller: controller.clone(),
                method: method.clone(),
            },
            RouteAction::Closure(_) => {
                return Err(cache_error(format!(
                    "Unable to prepare route [{}] for serialization. Uses Closure.",
                    route.uri()
                )));
            }
        };

        let middleware = route
            .get_middleware()
            .iter()
            .map(|m| {
                m.spec().ok_or_else(|| {
                    cache_error(format!(
                        "Unable to prepare route [{}] for serialization. Uses inline middleware.",
                        route.uri()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let compiled = route
            .compiled()
            .ok_or_else(|| cache_error(format!("Route [{}] is not compiled", route.uri())))?;

        Ok(Self {
            methods: route.methods().to_vec(),
            uri: route.uri().to_string(),
            compiled: compiled.pattern().to_string(),
            parameters: compiled.parameters().to_vec(),
            wheres: route.wheres().clone(),
            defaults: route.get_defaults().clone(),
            name: route.get_name().map(String::from),
            action,
            middleware,
            without_middleware: route.excluded_middleware().to_vec(),
        })
    }

    /// Rebuild a route, refusing anything that does not round-trip
    fn into_route(self) -> Result<Route, Error> {
        if self.methods.is_empty() {
            return Err(cache_error(format!("Route [{}] has no methods", self.uri)));
        }

        let compiled = CompiledRoute::from_parts(&self.compiled, self.parameters.clone())
            .map_err(|e| cache_error(e.to_string()))?;
        let recompiled = CompiledRoute::compile(&self.uri, &self.wheres)
            .map_err(|e| cache_error(e.to_string()))?;
        if recompiled.pattern() != compiled.pattern() {
            return Err(cache_error(format!(
                "Route [{}] does not compile to its cached pattern",
                self.uri
            )));
        }

        let action = RouteAction::controller(self.action.controller, self.action.method);
        let mut route = Route::new(self.methods, &self.uri, action);
        for (parameter, pattern) in self.wheres {
            route = route.where_pattern(parameter, pattern);
        }
        for (parameter, value) in self.defaults {
            route = route.defaults(parameter, value);
        }
        if let Some(name) = self.name {
            route = route.name(name);
        }
        for middleware in self.middleware {
            route = route.middleware(MiddlewareRef::named(&middleware));
        }
        for identifier in self.without_middleware {
            route = route.without_middleware(identifier);
        }
        route.set_compiled(compiled);
        Ok(route)
    }
}

/// Write `contents` beside `path` and rename it into place
fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

impl Router {
    /// Serialise the route table; fails without writing if any route cannot be cached
    pub fn to_cache(&self) -> Result<RouteCacheFile, Error> {
        let routes = self
            .routes()
            .routes()
            .iter()
            .map(|route| CachedRoute::from_route(route))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RouteCacheFile {
            version: CACHE_VERSION,
            routes,
        })
    }

    /// Write the route cache artifact, returning the number of routes cached
    pub fn cache(&self, path: impl AsRef<Path>) -> Result<usize, Error> {
        let path = path.as_ref();
        let file = self.to_cache()?;
        let contents =
            serde_json::to_vec_pretty(&file).map_err(|e| Error::Serialization(e.to_string()))?;
        atomic_write(path, &contents)?;

        info!(
            path = %path.display(),
            route_count = file.routes.len(),
            "Route cache written"
        );
        Ok(file.routes.len())
    }

    /// Rebuild a router from a parsed artifact
    pub fn from_cache(file: RouteCacheFile) -> Result<Router, Error> {
        if file.version != CACHE_VERSION {
            return Err(cache_error(format!(
                "unsupported cache version {} (expected {})",
                file.version, CACHE_VERSION
            )));
        }

        let mut routes = RouteCollection::new();
        for cached in file.routes {
            routes
                .add(cached.into_route()?)
                .map_err(|e| cache_error(e.to_string()))?;
        }
        Ok(Router::from_collection(routes))
    }

    /// Load and validate the artifact at `path`
    pub fn load_cache(path: impl AsRef<Path>) -> Result<Router, Error> {
        let path = path.as_ref();
        let contents = std::fs::read(path)
            .map_err(|e| cache_error(format!("cannot read {}: {}", path.display(), e)))?;
        let file: RouteCacheFile = serde_json::from_slice(&contents)
            .map_err(|e| cache_error(format!("corrupt route cache {}: {}", path.display(), e)))?;

        let router = Self::from_cache(file)?;
        debug!(
            path = %path.display(),
            route_count = router.routes().len(),
            "Route cache loaded"
        );
        Ok(router)
    }

    /// Delete the artifact; returns whether a file was removed
    pub fn clear_cache(path: impl AsRef<Path>) -> Result<bool, Error> {
        match std::fs::remove_file(path.as_ref()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cached(uri: &str, compiled: &str, parameters: &[&str]) -> CachedRoute {
        CachedRoute {
            methods: vec![HttpMethod::GET],
            uri: uri.to_string(),
            compiled: compiled.to_string(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            wheres: BTreeMap::new(),
            defaults: BTreeMap::new(),
            name: None,
            action: CachedAction {
                controller: "C".to_string(),
                method: "m".to_string(),
            },
            middleware: Vec::new(),
            without_middleware: Vec::new(),
        }
    }

    #[test]
    fn test_valid_entry_rebuilds() {
        let route = cached("/u/{id}", "^/u/(?P<id>[^/]+)$", &["id"])
            .into_route()
            .unwrap();
        assert_eq!(route.uri(), "/u/{id}");
        assert!(route.matches("/u/5").is_some());
    }

    #[test]
    fn test_tampered_pattern_is_rejected() {
        let err = cached("/u/{id}", "^/u/(?P<id>.*)$", &["id"])
            .into_route()
            .unwrap_err();
        assert!(matches!(err, Error::RouteCache(_)));
    }

    #[test]
    fn test_parameter_mismatch_is_rejected() {
        let err = cached("/u/{id}", "^/u/(?P<id>[^/]+)$", &["user"])
            .into_route()
            .unwrap_err();
        assert!(matches!(err, Error::RouteCache(_)));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let file = RouteCacheFile {
            version: CACHE_VERSION + 1,
            routes: Vec::new(),
        };
        assert!(matches!(Router::from_cache(file), Err(Error::RouteCache(_))));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut a = cached("/a", "^/a$", &[]);
        a.name = Some("dup".into());
        let mut b = cached("/b", "^/b$", &[]);
        b.name = Some("dup".into());
        let file = RouteCacheFile {
            version: CACHE_VERSION,
            routes: vec![a, b],
        };
        assert!(matches!(Router::from_cache(file), Err(Error::RouteCache(_))));
    }
}
