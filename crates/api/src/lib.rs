//! HTTP surface: the auth server endpoints, the gateway edge check and the
//! per-service bearer middleware.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
