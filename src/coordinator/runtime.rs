//! The runtime adapter handed to handler code.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::coordinator::bridge::{BridgeId, BridgeSlots};
use crate::coordinator::ledger::{Ledger, WaitId};
use crate::logging::Logger;
use crate::runtime::{FileScope, RuntimeContext, RuntimeError};

/// Result delivered to a completion: a value or an error message.
pub type Outcome = Result<Value, String>;

/// A ledger entry's callback.
pub type Completion = Box<dyn FnOnce(&mut Runtime, Outcome) -> Result<(), RuntimeError> + Send>;

/// A run-after callback.
pub type Deferred = Box<dyn FnOnce(&mut Runtime) -> Result<(), RuntimeError> + Send>;

/// Per-request phase of the execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Pending,
    DrainingDeferred,
    Finalizing,
    Sent,
}

/// Messages from spawned async work back to the execution loop.
#[derive(Debug)]
pub(crate) enum Event {
    Settle { id: WaitId, outcome: Outcome },
    Bridge { bridge: BridgeId, outcome: Outcome },
}

/// Site-level collaborators shared by every request of a site.
#[derive(Debug, Clone)]
pub struct RequestEnv {
    pub handler_name: String,
    pub files: FileScope,
    pub logger: Option<Logger>,
}

impl RequestEnv {
    pub fn new(handler_name: impl Into<String>, files: FileScope) -> Self {
        Self {
            handler_name: handler_name.into(),
            files,
            logger: None,
        }
    }

    /// Warn in the site log, or through tracing when the site has none.
    pub fn log_warning(&self, text: String) {
        match &self.logger {
            Some(logger) => logger.warning(text),
            None => tracing::warn!(handler = %self.handler_name, "{}", text),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }
}

/// Owns one request's context and pending work.
///
/// Only the execution loop touches a `Runtime`; spawned tasks talk to it
/// through the event channel, so no locking is needed.
pub struct Runtime {
    ctx: RuntimeContext,
    env: Arc<RequestEnv>,
    ledger: Ledger<Completion>,
    deferred: VecDeque<Deferred>,
    pub(crate) bridges: HashMap<BridgeId, BridgeSlots>,
    pub(crate) next_bridge: u64,
    pub(crate) events: mpsc::UnboundedSender<Event>,
    phase: Phase,
}

impl Runtime {
    pub(crate) fn new(
        ctx: RuntimeContext,
        env: Arc<RequestEnv>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            ctx,
            env,
            ledger: Ledger::new(),
            deferred: VecDeque::new(),
            bridges: HashMap::new(),
            next_bridge: 0,
            events,
            phase: Phase::Running,
        }
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RuntimeContext {
        &mut self.ctx
    }

    pub fn env(&self) -> &RequestEnv {
        &self.env
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::trace!(
                handler = %self.env.handler_name,
                from = ?self.phase,
                to = ?phase,
                pending = self.ledger.len(),
                "Request phase change"
            );
            self.phase = phase;
        }
    }

    /// Append HTML-escaped text.
    pub fn print(&mut self, text: &str) {
        self.ctx.output.push(crate::runtime::value::html_escape(text));
    }

    /// Append text verbatim.
    pub fn print_unsafe(&mut self, text: &str) {
        self.ctx.output.push(text.to_string());
    }

    pub fn pending(&self) -> usize {
        self.ledger.len()
    }

    /// The only way new asynchronous obligations enter a request.
    pub fn register_wait_for(&mut self, completion: Completion) -> WaitId {
        self.ledger.register(completion)
    }

    /// Run and remove the completion for `id`. Errors raised inside it are
    /// captured as the request's runtime error. Returns `false` when the id
    /// was already settled or canceled.
    pub fn settle(&mut self, id: WaitId, outcome: Outcome) -> bool {
        let Some(completion) = self.ledger.take(id) else {
            return false;
        };
        if let Err(err) = completion(self, outcome) {
            self.capture(err);
        }
        true
    }

    pub fn cancel(&mut self, id: WaitId) -> bool {
        self.ledger.cancel(id)
    }

    /// Queue a callback to run once the ledger is empty.
    pub fn run_after(&mut self, callback: Deferred) {
        self.deferred.push_back(callback);
    }

    /// Register `completion` and settle it with the result of `work`.
    pub fn spawn_wait_for<F>(&mut self, work: F, completion: Completion) -> WaitId
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let id = self.register_wait_for(completion);
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = work.await;
            // The loop is gone when the request was abandoned.
            let _ = events.send(Event::Settle { id, outcome });
        });
        id
    }

    pub fn capture(&mut self, err: RuntimeError) {
        let err = err.in_source(&self.env.handler_name);
        self.ctx.capture(err);
    }

    pub fn log_info(&self, text: String) {
        match &self.env.logger {
            Some(logger) => logger.info(text),
            None => tracing::info!(handler = %self.env.handler_name, "{}", text),
        }
    }

    pub fn log_warning(&self, text: String) {
        self.env.log_warning(text);
    }

    pub(crate) fn apply(&mut self, event: Event) {
        match event {
            Event::Settle { id, outcome } => {
                self.settle(id, outcome);
            }
            Event::Bridge { bridge, outcome } => self.resolve_bridge(bridge, outcome),
        }
    }

    /// Run the next deferred callback inside its own register/settle pair,
    /// so work it starts keeps the request open.
    pub(crate) fn run_next_deferred(&mut self) -> bool {
        let Some(callback) = self.deferred.pop_front() else {
            return false;
        };
        let id = self.register_wait_for(Box::new(move |rt, _| callback(rt)));
        self.settle(id, Ok(Value::Null));
        true
    }

    pub(crate) fn into_parts(self) -> (RuntimeContext, Arc<RequestEnv>) {
        (self.ctx, self.env)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_runtime() -> (Runtime, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let env = Arc::new(RequestEnv::new("test.jscp", FileScope::new("/nonexistent")));
        let ctx = RuntimeContext::new(Default::default());
        (Runtime::new(ctx, env, tx), rx)
    }

    #[test]
    fn test_settle_runs_once() {
        let (mut rt, _rx) = test_runtime();
        let id = rt.register_wait_for(Box::new(|rt, outcome| {
            rt.print_unsafe(&outcome.unwrap_or_default().to_string());
            Ok(())
        }));
        assert_eq!(rt.pending(), 1);
        assert!(rt.settle(id, Ok(Value::from(7))));
        assert!(!rt.settle(id, Ok(Value::from(8))));
        assert_eq!(rt.context().output, vec!["7"]);
        assert_eq!(rt.pending(), 0);
    }

    #[test]
    fn test_canceled_entry_never_runs() {
        let (mut rt, _rx) = test_runtime();
        let id = rt.register_wait_for(Box::new(|rt, _| {
            rt.print_unsafe("ran");
            Ok(())
        }));
        assert!(rt.cancel(id));
        assert!(!rt.settle(id, Ok(Value::Null)));
        assert!(rt.context().output.is_empty());
    }

    #[test]
    fn test_completion_error_is_captured() {
        let (mut rt, _rx) = test_runtime();
        let id = rt.register_wait_for(Box::new(|_, _| Err(RuntimeError::new("boom").at_line(3))));
        rt.settle(id, Ok(Value::Null));
        let err = rt.context().exception().unwrap();
        assert_eq!(err.to_string(), "test.jscp:3: boom");
    }
}
