//! Subscription registry
//!
//! Tracks the symbols the caller wants streamed and which of them the remote
//! end has acknowledged on the current connection.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tickwire_types::Symbol;

/// A requested subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Normalized symbol
    pub symbol: Symbol,
    /// When the caller first asked for it
    pub requested_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a subscription requested now
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    subscription: Subscription,
    acked: bool,
}

/// Active subscription set with per-connection acknowledgement state
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<Symbol, Entry>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol. Returns false if it was already present.
    ///
    /// New symbols start unacknowledged.
    pub fn add(&mut self, symbol: Symbol) -> bool {
        if self.entries.contains_key(&symbol) {
            return false;
        }

        self.entries.insert(
            symbol.clone(),
            Entry {
                subscription: Subscription::new(symbol),
                acked: false,
            },
        );
        true
    }

    /// Remove a symbol. Returns false if it was not present.
    pub fn remove(&mut self, symbol: &Symbol) -> bool {
        self.entries.remove(symbol).is_some()
    }

    /// Full active set to send after a (re)connect.
    ///
    /// Clears every acknowledgement: the remote end keeps no subscription
    /// state across connections.
    pub fn reconcile(&mut self) -> Vec<Symbol> {
        self.entries
            .iter_mut()
            .map(|(symbol, entry)| {
                entry.acked = false;
                symbol.clone()
            })
            .collect()
    }

    /// Mark a symbol acknowledged. Returns false for unknown or already
    /// acknowledged symbols.
    pub fn ack(&mut self, symbol: &Symbol) -> bool {
        match self.entries.get_mut(symbol) {
            Some(entry) if !entry.acked => {
                entry.acked = true;
                true
            }
            _ => false,
        }
    }

    /// True when every active symbol is acknowledged (or the set is empty)
    pub fn is_fully_acked(&self) -> bool {
        self.entries.values().all(|entry| entry.acked)
    }

    /// Symbols still waiting for acknowledgement
    pub fn pending(&self) -> Vec<Symbol> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.acked)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Check if a symbol is active
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.entries.contains_key(symbol)
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no symbols are active
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot copy of the active subscriptions
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries
            .values()
            .map(|entry| entry.subscription.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn test_add_is_unique() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.add(sym("AAPL")));
        assert!(!registry.add(sym("aapl")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reconcile_returns_net_set_once() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(sym("AAPL"));
        registry.add(sym("MSFT"));
        registry.add(sym("AAPL"));
        registry.remove(&sym("MSFT"));
        registry.add(sym("TSLA"));
        registry.remove(&sym("NVDA"));
        registry.add(sym("MSFT"));

        assert_eq!(registry.reconcile(), vec![sym("AAPL"), sym("MSFT"), sym("TSLA")]);
    }

    #[test]
    fn test_reconcile_clears_acks() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(sym("AAPL"));
        registry.reconcile();
        assert!(registry.ack(&sym("AAPL")));
        assert!(registry.is_fully_acked());

        // Reconnect: everything goes out again and must be re-acked
        assert_eq!(registry.reconcile(), vec![sym("AAPL")]);
        assert!(!registry.is_fully_acked());
        assert_eq!(registry.pending(), vec![sym("AAPL")]);
    }

    #[test]
    fn test_ack_unknown_symbol_ignored() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.ack(&sym("AAPL")));
        assert!(registry.is_fully_acked());

        registry.add(sym("AAPL"));
        assert!(registry.ack(&sym("AAPL")));
        assert!(!registry.ack(&sym("AAPL")));
    }

    #[test]
    fn test_remove_pending_completes_ack() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(sym("AAPL"));
        registry.add(sym("MSFT"));
        registry.reconcile();
        registry.ack(&sym("AAPL"));
        assert!(!registry.is_fully_acked());

        registry.remove(&sym("MSFT"));
        assert!(registry.is_fully_acked());
    }

    #[test]
    fn test_snapshot_keeps_request_time() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(sym("AAPL"));
        let first = registry.snapshot()[0].requested_at;

        registry.add(sym("AAPL"));
        assert_eq!(registry.snapshot()[0].requested_at, first);
        assert_eq!(registry.snapshot()[0].symbol, sym("AAPL"));
    }
}
