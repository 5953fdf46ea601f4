//! Two-sided registration over one spawned operation.
//!
//! A bridge pre-registers a default success entry (does nothing) and a
//! default error entry (warns in the site log), so the request waits for
//! the operation even when the handler attaches no callbacks. Attaching an
//! explicit callback cancels the matching default and registers the new
//! one. When the operation resolves, the losing side is canceled and the
//! winning side is settled.

use std::future::Future;

use serde_json::Value;

use crate::coordinator::ledger::WaitId;
use crate::coordinator::runtime::{Completion, Event, Outcome, Runtime};
use crate::runtime::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeId(u64);

#[derive(Debug, Clone, Copy)]
pub(crate) struct BridgeSlots {
    success: WaitId,
    error: WaitId,
}

fn default_success() -> Completion {
    Box::new(|_, _| Ok(()))
}

fn default_error() -> Completion {
    Box::new(|rt, outcome| {
        if let Err(message) = outcome {
            rt.log_warning(format!(
                "Unhandled asynchronous error in {}: {}",
                rt.env().handler_name,
                message
            ));
        }
        Ok(())
    })
}

impl Runtime {
    /// Spawn `op` and track it with default callbacks.
    pub fn bridge<F>(&mut self, op: F) -> BridgeId
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let success = self.register_wait_for(default_success());
        let error = self.register_wait_for(default_error());

        let bridge = BridgeId(self.next_bridge);
        self.next_bridge += 1;
        self.bridges.insert(bridge, BridgeSlots { success, error });

        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = op.await;
            let _ = events.send(Event::Bridge { bridge, outcome });
        });
        bridge
    }

    /// Replace the success side. Returns `false` once the bridge resolved.
    pub fn on_success<F>(&mut self, bridge: BridgeId, callback: F) -> bool
    where
        F: FnOnce(&mut Runtime, Value) -> Result<(), RuntimeError> + Send + 'static,
    {
        let Some(slots) = self.bridges.get(&bridge).copied() else {
            return false;
        };
        self.cancel(slots.success);
        let success = self.register_wait_for(Box::new(move |rt, outcome| match outcome {
            Ok(value) => callback(rt, value),
            Err(_) => Ok(()),
        }));
        self.bridges.insert(bridge, BridgeSlots { success, ..slots });
        true
    }

    /// Replace the error side. Returns `false` once the bridge resolved.
    pub fn on_error<F>(&mut self, bridge: BridgeId, callback: F) -> bool
    where
        F: FnOnce(&mut Runtime, String) -> Result<(), RuntimeError> + Send + 'static,
    {
        let Some(slots) = self.bridges.get(&bridge).copied() else {
            return false;
        };
        self.cancel(slots.error);
        let error = self.register_wait_for(Box::new(move |rt, outcome| match outcome {
            Err(message) => callback(rt, message),
            Ok(_) => Ok(()),
        }));
        self.bridges.insert(bridge, BridgeSlots { error, ..slots });
        true
    }

    pub(crate) fn resolve_bridge(&mut self, bridge: BridgeId, outcome: Outcome) {
        let Some(slots) = self.bridges.remove(&bridge) else {
            return;
        };
        match outcome {
            Ok(value) => {
                self.cancel(slots.error);
                self.settle(slots.success, Ok(value));
            }
            Err(message) => {
                self.cancel(slots.success);
                self.settle(slots.error, Err(message));
            }
        }
    }
}
