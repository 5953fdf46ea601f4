//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Site TLS config (first site on a port)
//!     → tls.rs (PEM certificate + key → rustls config)
//!     → http::server binds the port with axum-server
//! ```
//!
//! # Design Decisions
//! - TLS is per port, not per site; plain and TLS sites never share a port
//! - Missing certificate files are a startup error for that port

pub mod tls;
