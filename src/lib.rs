//! jscp application server library.
//!
//! Serves sites whose pages are `.jscp` templates: markup with embedded
//! script regions, compiled once and run per request.

// Core subsystems
pub mod config;
pub mod coordinator;
pub mod http;
pub mod net;
pub mod runtime;
pub mod site;
pub mod template;

// Cross-cutting concerns
pub mod lifecycle;
pub mod logging;
pub mod observability;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use logging::LogSink;
