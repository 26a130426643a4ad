//! # venue-core
//!
//! A sharded electronic trading venue core: pooled per-symbol limit
//! order books, price-time-priority matching, lock-free bounded
//! transport, and the engine/dispatch plumbing that ties them to a
//! network layer.
//!
//! ## Design Principles
//!
//! - **Single-writer books**: each order book is owned by exactly one
//!   matching thread; the hot path takes no locks
//! - **Pooled storage**: orders live in a preallocated slab, linked by
//!   32-bit handles; no heap allocation while matching
//! - **Ordered sides**: `BTreeMap` price levels give O(log n)
//!   best-price maintenance instead of per-match scans
//! - **Bounded everything**: lock-free queues reject instead of
//!   growing or blocking; backpressure is a return value
//!
//! ## Architecture
//!
//! ```text
//! [I/O threads] --route--> [inbound queue] --> [matching thread]
//!                                                    |
//! [send capability] <-- [dispatcher] <-- [outbound queue + ready poke]
//! ```

pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod latency;
pub mod order_book;
pub mod pool;
pub mod price_level;
pub mod queue;
pub mod router;

// Re-exports for convenience
pub use command::{
    CancelRequest, CancelStatus, Command, ConnId, NewOrder, OrderId, Price, Qty, Response,
    ResponseKind, Side, TopOfBookQuery, TradeEvent,
};
pub use dispatcher::Dispatcher;
pub use engine::MatchingEngine;
pub use error::VenueError;
pub use latency::{LatencyRecorder, LatencySnapshot};
pub use order_book::{BookSnapshot, MatchResult, OrderBook};
pub use pool::{Handle, OrderNode, OrderPool, NULL_HANDLE};
pub use price_level::PriceLevel;
pub use queue::LockFreeQueue;
pub use router::EngineRouter;
