//! The wait-for ledger: pending obligations keyed by a monotonic id.

use std::collections::HashMap;
use std::fmt;

/// Identifies one pending obligation within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitId(u64);

impl fmt::Display for WaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Live set of pending completions.
///
/// An entry exists from registration until it is either taken (to be run
/// exactly once) or canceled (never run). Ids are never reused.
#[derive(Debug)]
pub struct Ledger<C> {
    entries: HashMap<WaitId, C>,
    next_id: u64,
}

impl<C> Ledger<C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn register(&mut self, completion: C) -> WaitId {
        let id = WaitId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, completion);
        id
    }

    /// Remove an entry so it can be run. `None` if already settled or canceled.
    pub fn take(&mut self, id: WaitId) -> Option<C> {
        self.entries.remove(&id)
    }

    /// Remove an entry without running it.
    pub fn cancel(&mut self, id: WaitId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: WaitId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next_id
    }
}

impl<C> Default for Ledger<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_unique() {
        let mut ledger = Ledger::new();
        let a = ledger.register("a");
        let b = ledger.register("b");
        assert!(a < b);

        assert_eq!(ledger.take(a), Some("a"));
        let c = ledger.register("c");
        assert!(b < c);
        assert_eq!(ledger.issued(), 3);
    }

    #[test]
    fn test_take_is_exactly_once() {
        let mut ledger = Ledger::new();
        let id = ledger.register(1);
        assert_eq!(ledger.take(id), Some(1));
        assert_eq!(ledger.take(id), None);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_cancel_prevents_take() {
        let mut ledger = Ledger::new();
        let id = ledger.register(1);
        let other = ledger.register(2);
        assert!(ledger.cancel(id));
        assert!(!ledger.cancel(id));
        assert_eq!(ledger.take(id), None);
        assert!(ledger.contains(other));
        assert_eq!(ledger.len(), 1);
    }
}
