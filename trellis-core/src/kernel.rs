//! HTTP kernel
//!
//! The kernel owns the request lifecycle: bootstrap once, then for every
//! request match a route, send the request through global, group and route
//! middleware, invoke the route's action, and finally run termination hooks.
//!
//! ```
//! use trellis_core::*;
//!
//! # tokio_test::block_on(async {
//! let kernel = Kernel::new(Container::new())
//!     .middleware(REQUEST_ID)
//!     .routes(|router| {
//!         router.get("/", RouteAction::closure(|_req| async { Ok(HttpResponse::text("hi")) }))?;
//!         Ok(())
//!     });
//!
//! let request = HttpRequest::new("GET", "/");
//! let response = kernel.handle(request.clone()).await;
//! assert_eq!(response.body_text(), "hi");
//! assert!(response.header("x-request-id").is_some());
//! kernel.terminate(&request, &response).await;
//! # });
//! ```

use crate::bootstrap::{APP_CONFIG, AppConfig, Bootstrapper};
use crate::exception_handler::{ExceptionHandler, Handler};
use crate::logging::{debug, error, info, warn};
use crate::middleware::{
    AUTHENTICATE, DynMiddleware, MiddlewareRef, Next, REDIRECT_IF_AUTHENTICATED, REQUEST_ID,
    register_builtin_middleware,
};
use crate::pipeline::{Pipe, Pipeline};
use crate::route::Route;
use crate::routing::Router;
use crate::{Container, Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Registers the application's routes
pub type RouteRegistrar = Arc<dyn Fn(&mut Router) -> Result<(), Error> + Send + Sync>;

/// Runs after the response has been sent
pub type TerminateCallback =
    Arc<dyn Fn(&HttpRequest, &HttpResponse, &Container) -> Result<(), Error> + Send + Sync>;

/// Container id of the booted router
pub const ROUTER: &str = "router";

/// Container id of the current request inside a request scope
pub const REQUEST: &str = "request";

/// Container id of the matched route inside a request scope
pub const ROUTE: &str = "route";

pub struct Kernel {
    container: Container,
    registrar: Option<RouteRegistrar>,
    route_cache: Option<PathBuf>,
    middleware: Vec<MiddlewareRef>,
    middleware_groups: HashMap<String, Vec<MiddlewareRef>>,
    aliases: HashMap<String, String>,
    bootstrappers: Vec<Arc<dyn Bootstrapper>>,
    handler: Arc<dyn ExceptionHandler>,
    terminating: Vec<TerminateCallback>,
    router: OnceCell<Arc<Router>>,
}

impl Kernel {
    /// A kernel over `container`, with the built-in middleware registered
    /// under the aliases `auth`, `guest` and `request_id`
    pub fn new(container: Container) -> Self {
        register_builtin_middleware(&container);

        let aliases = [
            ("auth", AUTHENTICATE),
            ("guest", REDIRECT_IF_AUTHENTICATED),
            ("request_id", REQUEST_ID),
        ]
        .into_iter()
        .map(|(alias, id)| (alias.to_string(), id.to_string()))
        .collect();

        Self {
            container,
            registrar: None,
            route_cache: None,
            middleware: Vec::new(),
            middleware_groups: HashMap::new(),
            aliases,
            bootstrappers: Vec::new(),
            handler: Arc::new(Handler::new()),
            terminating: Vec::new(),
            router: OnceCell::new(),
        }
    }

    pub fn routes<F>(mut self, registrar: F) -> Self
    where
        F: Fn(&mut Router) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.registrar = Some(Arc::new(registrar));
        self
    }

    /// Load routes from this artifact when it exists and validates
    pub fn route_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.route_cache = Some(path.into());
        self
    }

    /// Append global middleware
    pub fn middleware(mut self, middleware: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    pub fn middleware_group(mut self, name: impl Into<String>, middleware: Vec<MiddlewareRef>) -> Self {
        self.middleware_groups.insert(name.into(), middleware);
        self
    }

    /// Let routes refer to the middleware bound as `id` by a short name
    pub fn alias_middleware(mut self, alias: impl Into<String>, id: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), id.into());
        self
    }

    pub fn bootstrapper<B: Bootstrapper + 'static>(mut self, bootstrapper: B) -> Self {
        self.bootstrappers.push(Arc::new(bootstrapper));
        self
    }

    pub fn exception_handler<H: ExceptionHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn terminating<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HttpRequest, &HttpResponse, &Container) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.terminating.push(Arc::new(callback));
        self
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The router, once bootstrapped
    pub fn router(&self) -> Option<&Arc<Router>> {
        self.router.get()
    }

    /// Register routes live, ignoring any cache
    pub fn build_router(&self) -> Result<Router, Error> {
        let mut router = Router::new();
        if let Some(registrar) = &self.registrar {
            registrar(&mut router)?;
        }
        Ok(router)
    }

    /// Route cache location: explicit setting first, then `app.config`
    pub fn route_cache_path(&self) -> Option<PathBuf> {
        self.route_cache.clone().or_else(|| {
            self.container
                .make_as::<AppConfig>(APP_CONFIG)
                .ok()
                .and_then(|config| config.route_cache.clone())
                .map(PathBuf::from)
        })
    }

    /// Run the bootstrappers and load routes. Only the first call does any work.
    pub fn bootstrap(&self) -> Result<Arc<Router>, Error> {
        self.router
            .get_or_try_init(|| {
                for bootstrapper in &self.bootstrappers {
                    debug!(bootstrapper = bootstrapper.name(), "Bootstrapping");
                    bootstrapper.bootstrap(&self.container)?;
                }

                let router = Arc::new(self.load_routes()?);
                self.container.instance(ROUTER, router.clone());
                info!(route_count = router.routes().len(), "Kernel bootstrapped");
                Ok(router)
            })
            .cloned()
    }

    fn load_routes(&self) -> Result<Router, Error> {
        if let Some(path) = self.route_cache_path() {
            if path.exists() {
                match Router::load_cache(&path) {
                    Ok(router) => {
                        info!(path = %path.display(), "Routes loaded from cache");
                        return Ok(router);
                    }
                    Err(e) => warn!(
                        path = %path.display(),
                        error = %e,
                        "Ignoring invalid route cache"
                    ),
                }
            }
        }
        self.build_router()
    }

    /// Write the route cache from live registration
    pub fn cache_routes(&self, path: impl AsRef<Path>) -> Result<usize, Error> {
        self.build_router()?.cache(path)
    }

    /// Handle a request. Errors never escape: they are reported and rendered.
    ///
    /// The returned response carries the request scope, so a later
    /// [`terminate`](Self::terminate) sees the same scoped instances and
    /// middleware instances the request did.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let started = Instant::now();
        let lifecycle = Arc::new(RequestLifecycle::new(self.container.scoped()));
        let original = request.clone();

        let mut response = match self.dispatch(&lifecycle, request).await {
            Ok(response) => response,
            Err(err) => {
                self.handler.report(&err, &original);
                self.handler.render(&err, &original, &lifecycle.scope).await
            }
        };

        if original.method.eq_ignore_ascii_case("HEAD") {
            response.body.clear();
        }

        info!(
            method = %original.method,
            uri = %original.path,
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request handled"
        );
        response.lifecycle = Some(lifecycle);
        response
    }

    async fn dispatch(
        &self,
        lifecycle: &RequestLifecycle,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, Error> {
        let scope = &lifecycle.scope;
        let router = self.bootstrap()?;
        let matched = router.match_route(&request.method, &request.path)?;
        Router::bind_request(&mut request, &matched);

        scope.scoped_instance(REQUEST, request.clone());
        scope.scoped_instance(ROUTE, matched.route.clone());
        let middleware = lifecycle.track(self.gather_middleware(&matched.route));
        debug!(
            route = matched.route.uri(),
            middleware_count = middleware.len(),
            "Dispatching to route"
        );

        let pipes = middleware
            .iter()
            .map(|slot| {
                MiddlewareRef::Inline(Arc::new(RequestMiddleware {
                    slot: slot.clone(),
                    scope: scope.clone(),
                }))
            })
            .collect::<Vec<_>>();

        let container = scope.clone();
        let route = matched.route.clone();
        Pipeline::new(scope.clone())
            .send(request)
            .through(pipes)
            .then(move |request| async move {
                Router::dispatch_to_route(&container, &route, request).await
            })
            .await
    }

    fn resolve_alias(&self, middleware: &MiddlewareRef) -> MiddlewareRef {
        match middleware {
            MiddlewareRef::Named {
                identifier,
                parameters,
            } => match self.aliases.get(identifier) {
                Some(id) => MiddlewareRef::Named {
                    identifier: id.clone(),
                    parameters: parameters.clone(),
                },
                None => middleware.clone(),
            },
            MiddlewareRef::Inline(_) => middleware.clone(),
        }
    }

    /// A middleware group named by `middleware`, if it is one
    fn group_of(&self, middleware: &MiddlewareRef) -> Option<&Vec<MiddlewareRef>> {
        match middleware {
            MiddlewareRef::Named {
                identifier,
                parameters,
            } if parameters.is_empty() => self.middleware_groups.get(identifier),
            _ => None,
        }
    }

    /// Global middleware, then the route's groups, then its remaining middleware.
    /// Aliases are resolved, duplicates dropped and exclusions honoured.
    pub fn gather_middleware(&self, route: &Route) -> Vec<MiddlewareRef> {
        let mut excluded: Vec<String> = route.excluded_middleware().to_vec();
        let aliased: Vec<String> = excluded
            .iter()
            .filter_map(|id| self.aliases.get(id).cloned())
            .collect();
        excluded.extend(aliased);

        let route_middleware = route.get_middleware();
        let candidates = self
            .expand_groups(&self.middleware)
            .into_iter()
            .chain(
                route_middleware
                    .iter()
                    .filter_map(|m| self.group_of(m))
                    .flatten()
                    .cloned(),
            )
            .chain(
                route_middleware
                    .iter()
                    .filter(|m| self.group_of(m).is_none())
                    .cloned(),
            );

        let mut ordered: Vec<MiddlewareRef> = Vec::new();
        for middleware in candidates {
            let resolved = self.resolve_alias(&middleware);
            let skip = [middleware.identifier(), resolved.identifier()]
                .into_iter()
                .flatten()
                .any(|id| excluded.iter().any(|e| e == id));
            if !skip && !ordered.contains(&resolved) {
                ordered.push(resolved);
            }
        }
        ordered
    }

    fn expand_groups(&self, list: &[MiddlewareRef]) -> Vec<MiddlewareRef> {
        let mut expanded = Vec::new();
        for middleware in list {
            match self.group_of(middleware) {
                Some(group) => expanded.extend(group.iter().cloned()),
                None => expanded.push(middleware.clone()),
            }
        }
        expanded
    }

    /// Middleware to terminate for a request that never reached its route
    fn fallback_middleware(&self, request: &HttpRequest) -> Vec<MiddlewareRef> {
        match self
            .router
            .get()
            .map(|router| router.match_route(&request.method, &request.path))
        {
            Some(Ok(matched)) => self.gather_middleware(&matched.route),
            _ => self
                .expand_groups(&self.middleware)
                .iter()
                .map(|m| self.resolve_alias(m))
                .collect(),
        }
    }

    /// Post-response work. Failures are logged, never surfaced.
    ///
    /// Runs in the scope `handle` opened for `response`, then forgets that
    /// scope's instances. A response this kernel did not produce gets a fresh
    /// scope.
    pub async fn terminate(&self, request: &HttpRequest, response: &HttpResponse) {
        let lifecycle = match &response.lifecycle {
            Some(lifecycle) => lifecycle.clone(),
            None => Arc::new(RequestLifecycle::new(self.container.scoped())),
        };
        let middleware = match lifecycle.middleware.get() {
            Some(middleware) => middleware.clone(),
            None => lifecycle.track(self.fallback_middleware(request)),
        };

        for slot in &middleware {
            let result = match slot.resolve(&lifecycle.scope) {
                Ok(pipe) => pipe.terminate(request, response).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!(middleware = ?slot.reference, error = %e, "Middleware terminate failed");
            }
        }

        for callback in &self.terminating {
            if let Err(e) = callback(request, response, &lifecycle.scope) {
                error!(error = %e, "Terminating callback failed");
            }
        }

        lifecycle.scope.forget_scoped_instances();
    }
}

/// The scope of one request and the middleware it gathered
pub(crate) struct RequestLifecycle {
    scope: Container,
    middleware: OnceCell<Vec<Arc<ResolvedMiddleware>>>,
}

impl RequestLifecycle {
    fn new(scope: Container) -> Self {
        Self {
            scope,
            middleware: OnceCell::new(),
        }
    }

    /// Record the request's middleware; the first list recorded wins
    fn track(&self, middleware: Vec<MiddlewareRef>) -> Vec<Arc<ResolvedMiddleware>> {
        self.middleware
            .get_or_init(|| {
                middleware
                    .into_iter()
                    .map(|reference| {
                        Arc::new(ResolvedMiddleware {
                            reference,
                            instance: OnceCell::new(),
                        })
                    })
                    .collect()
            })
            .clone()
    }
}

impl std::fmt::Debug for RequestLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLifecycle")
            .field(
                "middleware",
                &self.middleware.get().map(|m| m.iter().map(|s| &s.reference).collect::<Vec<_>>()),
            )
            .finish_non_exhaustive()
    }
}

/// A gathered middleware, built at most once per request
struct ResolvedMiddleware {
    reference: MiddlewareRef,
    instance: OnceCell<DynMiddleware>,
}

impl ResolvedMiddleware {
    fn resolve(&self, scope: &Container) -> Result<DynMiddleware, Error> {
        self.instance
            .get_or_try_init(|| self.reference.resolve(scope))
            .cloned()
    }
}

/// Resolves its middleware when the chain reaches it and keeps the instance
struct RequestMiddleware {
    slot: Arc<ResolvedMiddleware>,
    scope: Container,
}

#[async_trait]
impl Pipe<HttpRequest, HttpResponse> for RequestMiddleware {
    async fn handle(
        &self,
        request: HttpRequest,
        next: Next,
        parameters: &[String],
    ) -> Result<HttpResponse, Error> {
        self.invoke("handle", request, next, parameters).await
    }

    async fn invoke(
        &self,
        method: &str,
        request: HttpRequest,
        next: Next,
        _parameters: &[String],
    ) -> Result<HttpResponse, Error> {
        let pipe = self.slot.resolve(&self.scope)?;
        pipe.invoke(method, request, next, self.slot.reference.parameters())
            .await
    }
}
