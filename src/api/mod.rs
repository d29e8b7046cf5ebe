//! API Module
//!
//! HTTP endpoint gated by the elected role.

mod http;

pub use http::HttpServer;
