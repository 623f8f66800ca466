//! Error reporting and rendering at the kernel boundary
//!
//! The kernel hands every error raised while dispatching to exactly one
//! [`ExceptionHandler`]: `report` first, then `render`. Rendering never fails;
//! whatever goes wrong while producing an error page falls back to a bare
//! response with the right status.

use crate::bootstrap::{APP_CONFIG, AppConfig};
use crate::logging::{debug, error, warn};
use crate::view::{VIEW, ViewRenderer};
use crate::{Container, Error, HttpRequest, HttpResponse, HttpStatus};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    /// Record the error (logging, error trackers)
    fn report(&self, error: &Error, request: &HttpRequest);

    /// Turn the error into a response for the client
    async fn render(&self, error: &Error, request: &HttpRequest, container: &Container)
    -> HttpResponse;
}

/// Maps the error taxonomy onto responses.
///
/// - validation errors redirect back with the messages, or 422 for JSON clients
/// - not found and method not allowed get their own pages
/// - abort-style errors keep their status
/// - everything else is a 500 whose details show only in debug mode
#[derive(Debug, Clone, Default)]
pub struct Handler {
    /// Statuses that are never reported
    dont_report: Vec<u16>,
}

impl Handler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dont_report(mut self, status: u16) -> Self {
        self.dont_report.push(status);
        self
    }

    fn debug_mode(container: &Container) -> bool {
        container
            .make_as::<AppConfig>(APP_CONFIG)
            .map(|config| config.debug)
            .unwrap_or(false)
    }

    /// An error page through the bound view renderer, else a plain HTML page
    fn page(
        &self,
        status: u16,
        message: &str,
        request: &HttpRequest,
        container: &Container,
    ) -> HttpResponse {
        if request.wants_json() {
            return HttpResponse::new(status)
                .with_json(&json!({ "message": message }))
                .unwrap_or_else(|_| HttpResponse::new(status));
        }

        let view = format!("errors::{}", status);
        if container.has(VIEW) {
            match container.make_as::<Arc<dyn ViewRenderer>>(VIEW) {
                Ok(renderer) if renderer.exists(&view) => {
                    match renderer.render(&view, &json!({ "status": status, "message": message })) {
                        Ok(html) => return HttpResponse::html(html).with_status(status),
                        Err(e) => warn!(view = %view, error = %e, "Error page failed to render"),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "View renderer could not be resolved"),
            }
        }

        let title = HttpStatus::from_code(status)
            .map(|s| s.to_string())
            .unwrap_or_else(|| status.to_string());
        HttpResponse::html(format!(
            "<!DOCTYPE html><html><head><title>{title}</title></head>\
             <body><h1>{title}</h1><p>{message}</p></body></html>",
            title = title,
            message = escape_html(message)
        ))
        .with_status(status)
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl ExceptionHandler for Handler {
    fn report(&self, err: &Error, request: &HttpRequest) {
        let status = err.status_code();
        if self.dont_report.contains(&status) {
            return;
        }
        if err.is_server_error() {
            error!(
                method = %request.method,
                path = %request.path,
                status,
                error = %err,
                "Unhandled error while dispatching"
            );
        } else {
            debug!(
                method = %request.method,
                path = %request.path,
                status,
                error = %err,
                "Request failed"
            );
        }
    }

    async fn render(&self, err: &Error, request: &HttpRequest, container: &Container) -> HttpResponse {
        match err {
            Error::Validation(errors) => {
                if request.wants_json() {
                    return HttpResponse::new(422)
                        .with_json(&json!({
                            "message": "The given data was invalid.",
                            "errors": errors,
                        }))
                        .unwrap_or_else(|_| HttpResponse::new(422));
                }
                let back = request.header("referer").unwrap_or("/").to_string();
                HttpResponse::redirect(back)
                    .with_json(&json!({ "errors": errors }))
                    .unwrap_or_else(|_| HttpResponse::new(302))
            }
            Error::RouteNotFound(_) => self.page(404, "Not Found", request, container),
            Error::MethodNotAllowed { allowed, .. } => self
                .page(405, "Method Not Allowed", request, container)
                .with_header("Allow".to_string(), allowed.join(", ")),
            Error::Http { status, message } => self.page(*status, message, request, container),
            other => {
                let status = other.status_code();
                let message = if Self::debug_mode(container) {
                    other.to_string()
                } else {
                    HttpStatus::from_code(status)
                        .map(|s| s.reason().to_string())
                        .unwrap_or_else(|| "Server Error".to_string())
                };
                self.page(status, &message, request, container)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationErrors;

    #[tokio::test]
    async fn test_validation_redirects_back_with_errors() {
        let handler = Handler::new();
        let request = HttpRequest::new("POST", "/users").with_header("Referer", "/users/create");
        let err = Error::Validation(ValidationErrors::new().add("email", "required"));

        let response = handler.render(&err, &request, &Container::new()).await;
        assert_eq!(response.status, 302);
        assert_eq!(response.header("location"), Some("/users/create"));
        assert!(response.body_text().contains("email"));
    }

    #[tokio::test]
    async fn test_validation_for_json_clients_is_422() {
        let handler = Handler::new();
        let request = HttpRequest::new("POST", "/api/users").with_header("Accept", "application/json");
        let err = Error::Validation(ValidationErrors::new().add("name", "required"));

        let response = handler.render(&err, &request, &Container::new()).await;
        assert_eq!(response.status, 422);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["errors"]["name"][0], "required");
    }

    #[tokio::test]
    async fn test_server_errors_hide_details_unless_debug() {
        let handler = Handler::new();
        let request = HttpRequest::new("GET", "/");
        let err = Error::Internal("database password is hunter2".into());

        let container = Container::new();
        let response = handler.render(&err, &request, &container).await;
        assert_eq!(response.status, 500);
        assert!(!response.body_text().contains("hunter2"));

        container.instance(
            APP_CONFIG,
            AppConfig {
                debug: true,
                ..AppConfig::default()
            },
        );
        let response = handler.render(&err, &request, &container).await;
        assert!(response.body_text().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_error_pages_use_bound_views() {
        struct Views;
        impl ViewRenderer for Views {
            fn exists(&self, view: &str) -> bool {
                view == "errors::404"
            }
            fn render(&self, view: &str, _data: &serde_json::Value) -> Result<String, Error> {
                Ok(format!("<p>{}</p>", view))
            }
        }

        let container = Container::new();
        container.instance(VIEW, Arc::new(Views) as Arc<dyn ViewRenderer>);
        let handler = Handler::new();
        let request = HttpRequest::new("GET", "/missing");

        let response = handler
            .render(&Error::RouteNotFound("/missing".into()), &request, &container)
            .await;
        assert_eq!(response.status, 404);
        assert_eq!(response.body_text(), "<p>errors::404</p>");

        let response = handler
            .render(&Error::http(403, "Forbidden"), &request, &container)
            .await;
        assert_eq!(response.status, 403);
        assert!(response.body_text().contains("403 Forbidden"));
    }
}
