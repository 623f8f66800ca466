//! Route parameter constraints
//!
//! A constraint narrows the regex a `{parameter}` segment compiles to, so a
//! route whose constraint rejects a segment simply does not match and the next
//! registered route gets its turn.
//!
//! ```
//! use trellis_core::{HttpMethod, Route, RouteAction};
//!
//! let route = Route::get("/users/{id}", RouteAction::controller("UserController", "show"))
//!     .where_number("id");
//! assert_eq!(route.wheres().get("id").map(String::as_str), Some("[0-9]+"));
//! ```

use crate::Error;
use regex::Regex;

/// Built-in constraint shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Number,
    Alpha,
    AlphaNumeric,
    Uuid,
    /// One of a fixed set of literal values
    In(Vec<String>),
    /// A custom regex fragment
    Pattern(String),
}

impl Constraint {
    /// Regex fragment placed inside the parameter's capture group
    pub fn pattern(&self) -> String {
        match self {
            Constraint::Number => "[0-9]+".to_string(),
            Constraint::Alpha => "[a-zA-Z]+".to_string(),
            Constraint::AlphaNumeric => "[a-zA-Z0-9]+".to_string(),
            Constraint::Uuid => {
                "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}"
                    .to_string()
            }
            Constraint::In(values) => values
                .iter()
                .map(|v| regex::escape(v))
                .collect::<Vec<_>>()
                .join("|"),
            Constraint::Pattern(pattern) => pattern.clone(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Constraint::Number => "number",
            Constraint::Alpha => "alphabetic",
            Constraint::AlphaNumeric => "alphanumeric",
            Constraint::Uuid => "uuid",
            Constraint::In(_) => "one of a fixed set",
            Constraint::Pattern(_) => "pattern",
        }
    }
}

/// Check that a constraint fragment is a usable regex without named groups
pub fn validate_pattern(parameter: &str, pattern: &str) -> Result<(), Error> {
    let regex = Regex::new(pattern).map_err(|e| {
        Error::InvalidRoute(format!(
            "constraint for [{}] is not a valid regex: {}",
            parameter, e
        ))
    })?;

    if regex.capture_names().flatten().next().is_some() {
        return Err(Error::InvalidRoute(format!(
            "constraint for [{}] must not contain named groups",
            parameter
        )));
    }
    Ok(())
}

/// Whether `value` satisfies `pattern` as a whole
pub fn satisfies(pattern: &str, value: &str) -> bool {
    Regex::new(&format!("^(?:{})$", pattern))
        .map(|regex| regex.is_match(value))
        .unwrap_or(false)
}
