//! Engine Router - symbol to shard registry.
//!
//! Explicitly constructed and shared via `Arc`; no process-wide
//! singleton. The mutex sees writes only at registration time and one
//! short lookup per routed command, never anything inside a matching
//! loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::engine::MatchingEngine;

/// Maps each symbol to the engine shard responsible for it.
#[derive(Default)]
pub struct EngineRouter {
    table: Mutex<HashMap<String, Arc<MatchingEngine>>>,
}

impl EngineRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a symbol to a shard. Idempotent-overwrite: the last
    /// binding wins.
    pub fn bind_symbol(&self, symbol: &str, engine: Arc<MatchingEngine>) {
        self.table
            .lock()
            .expect("route table lock")
            .insert(symbol.to_string(), engine);
    }

    /// Shard for a symbol, or `None` when unbound. A miss is a routing
    /// failure the caller reports, not a crash.
    pub fn route(&self, symbol: &str) -> Option<Arc<MatchingEngine>> {
        let found = self
            .table
            .lock()
            .expect("route table lock")
            .get(symbol)
            .cloned();
        if found.is_none() {
            warn!(symbol, "no engine bound for symbol");
        }
        found
    }

    /// Number of bound symbols.
    pub fn len(&self) -> usize {
        self.table.lock().expect("route table lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
