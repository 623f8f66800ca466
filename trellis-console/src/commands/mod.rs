//! Console command implementations.

pub mod routes;
