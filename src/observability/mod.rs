//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (diagnostics, console side of the Log Sink)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → subscriber.rs (fmt layer filtered by EnvFilter)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request IDs come from tower-http and appear in the trace span
//! - Metrics are cheap (atomic increments) and optional

pub mod metrics;
pub mod subscriber;
