// Authentication guards consulted by the auth middleware

use crate::HttpRequest;
use async_trait::async_trait;

/// Container id of the default guard
pub const DEFAULT_GUARD: &str = "auth";

/// Decides whether the current request is authenticated
#[async_trait]
pub trait AuthGuard: Send + Sync {
    async fn check(&self, request: &HttpRequest) -> bool;

    async fn guest(&self, request: &HttpRequest) -> bool {
        !self.check(request).await
    }
}

/// Container id for a named guard: `auth` for the default, `auth.<name>` otherwise
pub fn guard_id(name: Option<&str>) -> String {
    match name {
        None | Some("") => DEFAULT_GUARD.to_string(),
        Some(name) => format!("{}.{}", DEFAULT_GUARD, name),
    }
}

/// Treats any request carrying a non-empty bearer token as authenticated
pub struct BearerTokenGuard;

#[async_trait]
impl AuthGuard for BearerTokenGuard {
    async fn check(&self, request: &HttpRequest) -> bool {
        match request.header("authorization") {
            Some(header) => header
                .strip_prefix("Bearer ")
                .map(|token| !token.trim().is_empty())
                .unwrap_or(false),
            None => false,
        }
    }
}
