// Error types for the Trellis dispatch core

use crate::HttpStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Field-keyed validation messages carried by [`Error::Validation`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for a field
    pub fn add(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<&str> = self.fields().collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The abstract is unknown or cannot be instantiated.
    #[error("Binding resolution error: {0}")]
    BindingResolution(String),

    /// A required constructor/action parameter could not be supplied.
    #[error("Unresolvable dependency resolving [${parameter}] in {declaring}")]
    UnresolvableDependency { parameter: String, declaring: String },

    /// Resolution re-entered an abstract that is still being built.
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method {method} not allowed for {uri}; supported: {}", .allowed.join(", "))]
    MethodNotAllowed {
        method: String,
        uri: String,
        allowed: Vec<String>,
    },

    #[error("Route name [{0}] is already in use")]
    DuplicateRouteName(String),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Route cache error: {0}")]
    RouteCache(String),

    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    /// Abort-style error carrying an explicit status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an abort-style error
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Error::Http {
            status,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound(_) => HttpStatus::NotFound.code(),
            Error::MethodNotAllowed { .. } => HttpStatus::MethodNotAllowed.code(),
            Error::Validation(_) => HttpStatus::UnprocessableEntity.code(),
            Error::Deserialization(_) => HttpStatus::BadRequest.code(),
            Error::Http { status, .. } => *status,

            // Container, route table and plumbing failures are server errors
            _ => HttpStatus::InternalServerError.code(),
        }
    }

    /// Get the HttpStatus enum for this error
    pub fn http_status(&self) -> HttpStatus {
        HttpStatus::from_code(self.status_code()).unwrap_or(HttpStatus::InternalServerError)
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.http_status().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.http_status().is_server_error()
    }

    /// Whether this error comes from the container
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Error::BindingResolution(_)
                | Error::UnresolvableDependency { .. }
                | Error::CircularDependency(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::RouteNotFound("/x".into()).status_code(), 404);
        assert_eq!(
            Error::MethodNotAllowed {
                method: "POST".into(),
                uri: "/x".into(),
                allowed: vec!["GET".into()],
            }
            .status_code(),
            405
        );
        assert_eq!(Error::http(403, "nope").status_code(), 403);
        assert_eq!(Error::BindingResolution("X".into()).status_code(), 500);
        assert!(Error::Internal("boom".into()).is_server_error());
    }

    #[test]
    fn test_unresolvable_message_names_parameter_and_type() {
        let err = Error::UnresolvableDependency {
            parameter: "mailer".into(),
            declaring: "app::Notifier".into(),
        };
        let message = err.to_string();
        assert!(message.contains("$mailer"));
        assert!(message.contains("app::Notifier"));
    }

    #[test]
    fn test_circular_message_shows_chain() {
        let err = Error::CircularDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
    }

    #[test]
    fn test_validation_errors() {
        let errors = ValidationErrors::new()
            .add("email", "required")
            .add("email", "must be an email");
        assert_eq!(errors.get("email").map(|m| m.len()), Some(2));
        assert!(errors.get("name").is_none());
        assert!(!errors.is_empty());
    }
}
