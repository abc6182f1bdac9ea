//! HTTP server for the healthcheck endpoint.

pub mod http;

pub use http::{run, AppState};
