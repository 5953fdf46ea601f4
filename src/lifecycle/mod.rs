//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Log Sink → Load sites (skip failures) → Metrics → Bind ports
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain requests → Terminate Log Sink → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then sites, then listeners
//! - Shutdown has a deadline: `shutdown_grace_secs`

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::StartupError;
