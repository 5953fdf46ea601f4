//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum router per port, request ID, tracing)
//!     → dispatcher.rs (site, method, timeout race)
//!     → request.rs (path normalisation, extension policy)
//!     → body.rs (limits, multipart staging, JSON/form)
//!     → coordinator (handler execution)
//!     → response.rs (headers, static streaming)
//!     → Send to client
//! ```

pub mod body;
pub mod dispatcher;
pub mod error;
pub mod inflight;
pub mod request;
pub mod response;
pub mod server;

pub use error::RequestLimitError;
pub use inflight::RequestTracker;
pub use request::X_REQUEST_ID;
pub use server::{HttpServer, PortState, ServeError};
