// Ordered route table with name and method indexes

use crate::logging::{debug, trace};
use crate::route::{Route, normalize_uri};
use crate::{Error, HttpMethod};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a successful match
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub parameters: HashMap<String, String>,
}

/// Routes in registration order; earlier registrations win ties
#[derive(Debug, Clone, Default)]
pub struct RouteCollection {
    routes: Vec<Arc<Route>>,
    names: HashMap<String, usize>,
    methods: HashMap<HttpMethod, Vec<usize>>,
}

/// Strip the query string and trailing slash from a request path
pub fn request_path(uri: &str) -> String {
    let path = uri.split_once('?').map(|(path, _)| path).unwrap_or(uri);
    normalize_uri(path)
}

impl RouteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and append a route
    pub fn add(&mut self, mut route: Route) -> Result<Arc<Route>, Error> {
        route.compile()?;

        if let Some(name) = route.get_name() {
            if self.names.contains_key(name) {
                return Err(Error::DuplicateRouteName(name.to_string()));
            }
        }

        let index = self.routes.len();
        if let Some(name) = route.get_name() {
            self.names.insert(name.to_string(), index);
        }
        for method in route.methods() {
            self.methods.entry(*method).or_default().push(index);
        }

        debug!(
            methods = ?route.methods(),
            uri = route.uri(),
            name = route.get_name().unwrap_or(""),
            "Route registered"
        );

        let route = Arc::new(route);
        self.routes.push(route.clone());
        Ok(route)
    }

    /// Find the route for a request.
    ///
    /// Candidates for the request method are tried first, in registration
    /// order. If none matches, every other route whose pattern (constraints
    /// included) matches contributes its methods to a `MethodNotAllowed`.
    pub fn match_route(&self, method: &str, uri: &str) -> Result<RouteMatch, Error> {
        let path = request_path(uri);
        let parsed = HttpMethod::from_str(method);

        if let Some(candidates) = parsed.and_then(|m| self.methods.get(&m)) {
            for &index in candidates {
                let route = &self.routes[index];
                if let Some(parameters) = route.matches(&path) {
                    trace!(method, path = %path, route = route.uri(), "Route matched");
                    return Ok(RouteMatch {
                        route: route.clone(),
                        parameters,
                    });
                }
            }
        }

        let mut allowed: Vec<HttpMethod> = Vec::new();
        for route in &self.routes {
            if route.matches(&path).is_some() {
                for m in route.methods() {
                    if Some(*m) != parsed && !allowed.contains(m) {
                        allowed.push(*m);
                    }
                }
            }
        }

        if allowed.is_empty() {
            debug!(method, path = %path, "No route matched");
            return Err(Error::RouteNotFound(path));
        }

        allowed.sort();
        debug!(method, path = %path, allowed = ?allowed, "Method not allowed");
        Err(Error::MethodNotAllowed {
            method: method.to_uppercase(),
            uri: path,
            allowed: allowed.iter().map(|m| m.as_str().to_string()).collect(),
        })
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<Route>> {
        self.names.get(name).map(|&index| &self.routes[index])
    }

    pub fn has_named(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Routes answering `method`, in registration order
    pub fn get_by_method(&self, method: HttpMethod) -> Vec<&Arc<Route>> {
        self.methods
            .get(&method)
            .map(|indexes| indexes.iter().map(|&i| &self.routes[i]).collect())
            .unwrap_or_default()
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RouteAction;

    fn action(method: &str) -> RouteAction {
        RouteAction::controller("UserController", method)
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut routes = RouteCollection::new();
        routes
            .add(Route::get("/a", action("a")).name("home"))
            .unwrap();
        let err = routes
            .add(Route::get("/b", action("b")).name("home"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRouteName(name) if name == "home"));
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn test_query_and_trailing_slash_are_ignored() {
        let mut routes = RouteCollection::new();
        routes.add(Route::get("/users", action("index"))).unwrap();
        assert!(routes.match_route("GET", "/users/?page=2").is_ok());
    }

    #[test]
    fn test_method_index() {
        let mut routes = RouteCollection::new();
        routes.add(Route::get("/a", action("a"))).unwrap();
        routes.add(Route::post("/b", action("b"))).unwrap();
        assert_eq!(routes.get_by_method(HttpMethod::GET).len(), 1);
        assert_eq!(routes.get_by_method(HttpMethod::HEAD).len(), 1);
        assert_eq!(routes.get_by_method(HttpMethod::POST).len(), 1);
        assert!(routes.get_by_method(HttpMethod::DELETE).is_empty());
    }

    #[test]
    fn test_unknown_method_on_known_uri_is_not_allowed() {
        let mut routes = RouteCollection::new();
        routes.add(Route::get("/a", action("a"))).unwrap();
        match routes.match_route("TRACE", "/a") {
            Err(Error::MethodNotAllowed { allowed, .. }) => {
                assert_eq!(allowed, vec!["GET", "HEAD"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
