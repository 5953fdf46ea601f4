//! Async completion coordinator.
//!
//! # Data Flow
//! ```text
//! execution::execute(handler, RuntimeContext, RequestEnv)
//!     → interpreter runs the handler synchronously (Running)
//!         → async builtins: Runtime::bridge spawns a tokio task,
//!           pre-registering default success/error ledger entries
//!         → defer blocks: Runtime::run_after queues a callback
//!     → drive(): wait on the event channel while the ledger is non-empty
//!       (Pending), run deferred callbacks when it empties (DrainingDeferred)
//!     → finalize(): remove unhandled uploads, build a ResponsePlan
//!       (Finalizing → Sent)
//! ```
//!
//! # Design Decisions
//! - One task owns the `Runtime`; spawned work reports back over an
//!   unbounded channel, so completions never run concurrently
//! - A completion runs at most once: settle takes it out of the ledger
//! - The first runtime error wins and turns the request into a 500

pub mod bridge;
pub mod execution;
pub mod finalize;
pub mod ledger;
pub mod runtime;

pub use bridge::BridgeId;
pub use execution::execute;
pub use finalize::{RenderedResponse, ResponsePlan, ServerFailure};
pub use ledger::{Ledger, WaitId};
pub use runtime::{Completion, Deferred, Outcome, Phase, RequestEnv, Runtime};
