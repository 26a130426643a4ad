//! Error taxonomy for the venue core.
//!
//! Everything here is command-scoped: a failed command produces a typed
//! response for the client that issued it and never stops the matching
//! loop. `OrderNotFound` is deliberately absent - a late cancel is a
//! normal outcome, reported as a status, not an error.

use thiserror::Error;

/// Failures surfaced by the matching path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VenueError {
    /// The order pool has no free slots left. Fatal to the command,
    /// not to the engine.
    #[error("order pool exhausted")]
    PoolExhausted,

    /// No order book is registered for the symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// A bounded queue rejected a push. Backpressure, not corruption:
    /// the caller decides whether to retry or drop.
    #[error("queue full")]
    QueueFull,
}
