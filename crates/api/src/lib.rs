//! HTTP API: routing, request/response mapping, and process wiring.

pub mod app;
pub mod scheduler;
