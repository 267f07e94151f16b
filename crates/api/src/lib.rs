//! HTTP API: configuration, routing, auth middleware and error mapping.

pub mod app;
pub mod authz;
pub mod config;
pub mod middleware;
