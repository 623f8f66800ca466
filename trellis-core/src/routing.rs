// Route registration, resource expansion, reverse routing and dispatch

use crate::controller::call_action;
use crate::http::parse_query_string;
use crate::logging::debug;
use crate::middleware::MiddlewareRef;
use crate::route::{Route, RouteAction};
use crate::route_collection::{RouteCollection, RouteMatch};
use crate::route_constraint::satisfies;
use crate::route_group::RouteGroup;
use crate::{Container, Error, HttpMethod, HttpRequest, HttpResponse};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// The conventional resource actions, in registration order
pub const RESOURCE_ACTIONS: [&str; 7] = [
    "index", "create", "store", "show", "edit", "update", "destroy",
];

/// Filters and overrides for [`Router::resource`]
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    only: Vec<String>,
    except: Vec<String>,
    parameter: Option<String>,
    middleware: Vec<MiddlewareRef>,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn except<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except = actions.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the member parameter, `id` by default
    pub fn parameter(mut self, name: impl Into<String>) -> Self {
        self.parameter = Some(name.into());
        self
    }

    pub fn middleware(mut self, middleware: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    fn includes(&self, action: &str) -> bool {
        (self.only.is_empty() || self.only.iter().any(|a| a == action))
            && !self.except.iter().any(|a| a == action)
    }
}

/// One row of the route table, as shown by tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteListing {
    pub methods: Vec<String>,
    pub uri: String,
    pub name: Option<String>,
    pub action: String,
    pub middleware: Vec<String>,
}

/// Router for registering routes and dispatching requests
#[derive(Debug, Default)]
pub struct Router {
    routes: RouteCollection,
    groups: Vec<RouteGroup>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already compiled collection (e.g. one loaded from the route cache)
    pub fn from_collection(routes: RouteCollection) -> Self {
        Self {
            routes,
            groups: Vec::new(),
        }
    }

    /// Register a route, applying any enclosing group
    pub fn add(&mut self, mut route: Route) -> Result<Arc<Route>, Error> {
        if let Some(group) = self.groups.last() {
            route.apply_group(group);
        }
        self.routes.add(route)
    }

    pub fn get(&mut self, uri: &str, action: RouteAction) -> Result<Arc<Route>, Error> {
        self.add(Route::get(uri, action))
    }

    pub fn post(&mut self, uri: &str, action: RouteAction) -> Result<Arc<Route>, Error> {
        self.add(Route::post(uri, action))
    }

    pub fn put(&mut self, uri: &str, action: RouteAction) -> Result<Arc<Route>, Error> {
        self.add(Route::put(uri, action))
    }

    pub fn patch(&mut self, uri: &str, action: RouteAction) -> Result<Arc<Route>, Error> {
        self.add(Route::patch(uri, action))
    }

    pub fn delete(&mut self, uri: &str, action: RouteAction) -> Result<Arc<Route>, Error> {
        self.add(Route::delete(uri, action))
    }

    /// Register routes inside a group; nested groups inherit from this one
    pub fn group<F>(&mut self, group: RouteGroup, routes: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Router) -> Result<(), Error>,
    {
        let group = match self.groups.last() {
            Some(parent) => group.with_parent(parent),
            None => group,
        };
        self.groups.push(group);
        let result = routes(self);
        self.groups.pop();
        result
    }

    /// Register the conventional CRUD routes for `controller` under `prefix`.
    ///
    /// Routes are named `<prefix>.<action>` with slashes in the prefix turned
    /// into dots; `update` answers both PUT and PATCH.
    pub fn resource(
        &mut self,
        prefix: &str,
        controller: impl Into<String>,
        options: ResourceOptions,
    ) -> Result<Vec<Arc<Route>>, Error> {
        let controller = controller.into();
        let base = prefix.trim().trim_matches('/');
        let base_name = base.replace('/', ".");
        let parameter = options.parameter.clone().unwrap_or_else(|| "id".to_string());
        let member = format!("/{}/{{{}}}", base, parameter);
        let collection = format!("/{}", base);

        let mut registered = Vec::new();
        for action in RESOURCE_ACTIONS {
            if !options.includes(action) {
                continue;
            }

            let target = RouteAction::controller(controller.clone(), action);
            let route = match action {
                "index" => Route::get(&collection, target),
                "create" => Route::get(&format!("{}/create", collection), target),
                "store" => Route::post(&collection, target),
                "show" => Route::get(&member, target),
                "edit" => Route::get(&format!("{}/edit", member), target),
                "update" => Route::matching(&[HttpMethod::PUT, HttpMethod::PATCH], &member, target),
                _ => Route::delete(&member, target),
            };

            let route = options
                .middleware
                .iter()
                .cloned()
                .fold(route, |route, middleware| route.middleware(middleware))
                .name(format!("{}.{}", base_name, action));

            registered.push(self.add(route)?);
        }

        debug!(
            prefix = %collection,
            controller = %controller,
            route_count = registered.len(),
            "Resource routes registered"
        );
        Ok(registered)
    }

    pub fn routes(&self) -> &RouteCollection {
        &self.routes
    }

    pub fn into_routes(self) -> RouteCollection {
        self.routes
    }

    /// Route table rows for tooling
    pub fn list(&self) -> Vec<RouteListing> {
        self.routes
            .routes()
            .iter()
            .map(|route| RouteListing {
                methods: route.methods().iter().map(|m| m.as_str().to_string()).collect(),
                uri: route.uri().to_string(),
                name: route.get_name().map(String::from),
                action: route.action().describe(),
                middleware: route
                    .get_middleware()
                    .iter()
                    .map(|m| m.spec().unwrap_or_else(|| "Closure".to_string()))
                    .collect(),
            })
            .collect()
    }

    pub fn match_route(&self, method: &str, uri: &str) -> Result<RouteMatch, Error> {
        self.routes.match_route(method, uri)
    }

    /// Build the URI of a named route. Unused parameters become the query string.
    pub fn url(&self, name: &str, parameters: &[(&str, &str)]) -> Result<String, Error> {
        let route = self
            .routes
            .get_by_name(name)
            .ok_or_else(|| Error::InvalidRoute(format!("Route [{}] not defined", name)))?;

        let supplied: BTreeMap<&str, &str> = parameters.iter().copied().collect();
        let mut used: HashSet<&str> = HashSet::new();
        let mut uri = String::new();
        let mut rest = route.uri();

        while let Some(open) = rest.find('{') {
            let close = rest[open..]
                .find('}')
                .map(|offset| open + offset)
                .ok_or_else(|| Error::InvalidRoute(route.uri().to_string()))?;
            let literal = &rest[..open];
            let token = &rest[open + 1..close];
            let (parameter, optional) = match token.strip_suffix('?') {
                Some(parameter) => (parameter, true),
                None => (token, false),
            };

            let value = supplied
                .get(parameter)
                .map(|v| v.to_string())
                .or_else(|| route.get_defaults().get(parameter).cloned());

            match value {
                Some(value) => {
                    if let Some(pattern) = route.wheres().get(parameter) {
                        if !satisfies(pattern, &value) {
                            return Err(Error::InvalidRoute(format!(
                                "Parameter [{}] of route [{}] must match {}",
                                parameter, name, pattern
                            )));
                        }
                    }
                    uri.push_str(literal);
                    uri.push_str(&urlencoding::encode(&value));
                    used.insert(parameter);
                }
                None if optional => uri.push_str(literal.strip_suffix('/').unwrap_or(literal)),
                None => {
                    return Err(Error::InvalidRoute(format!(
                        "Missing required parameter [{}] for route [{}]",
                        parameter, name
                    )));
                }
            }
            rest = &rest[close + 1..];
        }
        uri.push_str(rest);
        if uri.is_empty() {
            uri.push('/');
        }

        let query: Vec<String> = supplied
            .iter()
            .filter(|(key, _)| !used.contains(*key))
            .map(|(key, value)| {
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
            })
            .collect();
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query.join("&"));
        }
        Ok(uri)
    }

    /// Fill the request's parameters from a match
    pub fn bind_request(request: &mut HttpRequest, matched: &RouteMatch) {
        request.path_params = matched.parameters.clone();
        if let Some(query) = request.query_string() {
            request.query_params = parse_query_string(query);
        }
    }

    /// Run a route's action for an already bound request
    pub async fn dispatch_to_route(
        container: &Container,
        route: &Route,
        request: HttpRequest,
    ) -> Result<HttpResponse, Error> {
        match route.action() {
            RouteAction::Closure(handler) => handler(request).await,
            RouteAction::Controller { controller, method } => {
                call_action(container, controller, method, request).await
            }
        }
    }

    /// Match and run a request without any middleware
    pub async fn dispatch(
        &self,
        container: &Container,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, Error> {
        let matched = self.match_route(&request.method, &request.path)?;
        Self::bind_request(&mut request, &matched);
        Self::dispatch_to_route(container, &matched.route, request).await
    }
}
