// HTTP middleware: pipes over requests and responses

use crate::container::Concrete;
use crate::guard::{AuthGuard, guard_id};
use crate::logging::{debug, trace};
use crate::pipeline::{self, Pipe, PipeRef};
use crate::{Container, Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Continuation handed to HTTP middleware
pub type Next = pipeline::Next<HttpRequest, HttpResponse>;

/// Middleware reference held by routes and the kernel
pub type MiddlewareRef = PipeRef<HttpRequest, HttpResponse>;

/// A resolved middleware instance
pub type DynMiddleware = Arc<dyn Pipe<HttpRequest, HttpResponse>>;

/// Any pipe over requests and responses
pub trait Middleware: Pipe<HttpRequest, HttpResponse> {}

impl<M: Pipe<HttpRequest, HttpResponse> + ?Sized> Middleware for M {}

/// Container ids of the built-in middleware
pub const AUTHENTICATE: &str = "middleware.auth";
pub const REDIRECT_IF_AUTHENTICATED: &str = "middleware.guest";
pub const REQUEST_ID: &str = "middleware.request_id";

/// Inline middleware from an async closure
pub fn middleware_fn<F, Fut>(f: F) -> MiddlewareRef
where
    F: Fn(HttpRequest, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    pipeline::pipe_fn(f)
}

impl Container {
    /// Register middleware under `id`; a fresh instance is built per resolution
    pub fn middleware<M, F>(&self, id: impl Into<String>, factory: F)
    where
        M: Middleware + 'static,
        F: Fn(&Container) -> Result<M, Error> + Send + Sync + 'static,
    {
        self.bind(
            id,
            Concrete::factory(move |container, _| {
                factory(container).map(|middleware| Arc::new(middleware) as DynMiddleware)
            }),
            false,
        );
    }
}

/// Bind the built-in middleware unless the application already did
pub fn register_builtin_middleware(container: &Container) {
    if !container.bound(AUTHENTICATE) {
        container.middleware(AUTHENTICATE, |c| Ok(Authenticate::new(c.clone())));
    }
    if !container.bound(REDIRECT_IF_AUTHENTICATED) {
        container.middleware(REDIRECT_IF_AUTHENTICATED, |c| {
            Ok(RedirectIfAuthenticated::new(c.clone()))
        });
    }
    if !container.bound(REQUEST_ID) {
        container.middleware(REQUEST_ID, |_| Ok(RequestId));
    }
}

fn resolve_guard(container: &Container, parameters: &[String]) -> Result<Arc<dyn AuthGuard>, Error> {
    let id = guard_id(parameters.first().map(String::as_str));
    container
        .make_as::<Arc<dyn AuthGuard>>(&id)
        .map(|guard| (*guard).clone())
}

// ========== Built-in Middleware ==========

/// Only lets authenticated requests through.
///
/// The first static parameter names the guard (`auth:admin` checks the guard
/// bound as `auth.admin`). Guests are redirected to the login URI, or get a
/// 401 JSON body when they asked for JSON.
pub struct Authenticate {
    container: Container,
    login: String,
}

impl Authenticate {
    pub fn new(container: Container) -> Self {
        Self {
            container,
            login: "/login".to_string(),
        }
    }

    pub fn login(mut self, uri: impl Into<String>) -> Self {
        self.login = uri.into();
        self
    }
}

#[async_trait]
impl Pipe<HttpRequest, HttpResponse> for Authenticate {
    async fn handle(
        &self,
        req: HttpRequest,
        next: Next,
        parameters: &[String],
    ) -> Result<HttpResponse, Error> {
        let guard = resolve_guard(&self.container, parameters)?;
        if guard.check(&req).await {
            return next(req).await;
        }

        debug!(path = %req.path, "Unauthenticated request stopped");
        if req.wants_json() {
            HttpResponse::unauthorized().with_json(&serde_json::json!({
                "message": "Unauthenticated."
            }))
        } else {
            Ok(HttpResponse::redirect(self.login.clone()))
        }
    }
}

/// Sends authenticated users away from guest-only pages
pub struct RedirectIfAuthenticated {
    container: Container,
    home: String,
}

impl RedirectIfAuthenticated {
    pub fn new(container: Container) -> Self {
        Self {
            container,
            home: "/".to_string(),
        }
    }

    pub fn home(mut self, uri: impl Into<String>) -> Self {
        self.home = uri.into();
        self
    }
}

#[async_trait]
impl Pipe<HttpRequest, HttpResponse> for RedirectIfAuthenticated {
    async fn handle(
        &self,
        req: HttpRequest,
        next: Next,
        parameters: &[String],
    ) -> Result<HttpResponse, Error> {
        let guard = resolve_guard(&self.container, parameters)?;
        if guard.check(&req).await {
            trace!(path = %req.path, "Authenticated user redirected home");
            return Ok(HttpResponse::redirect(self.home.clone()));
        }
        next(req).await
    }
}

/// Propagates `x-request-id`, generating one when absent
pub struct RequestId;

#[async_trait]
impl Pipe<HttpRequest, HttpResponse> for RequestId {
    async fn handle(
        &self,
        mut req: HttpRequest,
        next: Next,
        _parameters: &[String],
    ) -> Result<HttpResponse, Error> {
        let request_id = req
            .header("x-request-id")
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        req.headers
            .insert("x-request-id".to_string(), request_id.clone());

        let response = next(req).await?;
        Ok(response.with_header("x-request-id".to_string(), request_id))
    }
}
