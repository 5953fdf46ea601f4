//! Handler runtime.
//!
//! # Data Flow
//! ```text
//! http::dispatcher builds RuntimeContext (request, params, uploads)
//!     → coordinator::execute wraps it in a Runtime
//!     → interpreter.rs walks the CompiledHandler statement tree
//!         → builtins.rs (request accessors, response mutators)
//!         → files.rs (async file operations, bridged by the coordinator)
//!     → context.rs holds output, headers, cookies, redirect, status
//! ```
//!
//! # Design Decisions
//! - Script values are `serde_json::Value`; request bodies map onto them directly
//! - Every error is a `RuntimeError` value carrying the failing line
//! - File paths are resolved against the site root and cannot leave it

pub mod builtins;
pub mod context;
pub mod error;
pub mod files;
pub mod interpreter;
pub mod value;

pub use context::{Cookie, Redirect, RequestInfo, RuntimeContext, UploadedFile};
pub use error::RuntimeError;
pub use files::FileScope;
