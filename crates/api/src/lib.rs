//! HTTP edge of the gateway: configuration, the authentication filter, the
//! route gate, and the identity views built on them.

pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod middleware;
