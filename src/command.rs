//! Command and response types for the venue core.
//!
//! Commands arrive already parsed from the network layer, tagged with
//! the connection that issued them. Responses travel the other way and
//! are encoded by the dispatcher right before the send capability.

use serde::{Deserialize, Serialize};

/// Identifier of the client connection a command came from.
///
/// Opaque to the matching path; it exists only so the response can be
/// routed back without the book knowing anything about transport.
pub type ConnId = u64;

/// Order identifier, assigned by the owning book (monotonic, from 1).
pub type OrderId = u64;

/// Fixed-point price in ticks (two implied decimals: 100.50 -> 10050).
pub type Price = u64;

/// Order quantity.
pub type Qty = u32;

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    /// Returns the opposite side.
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

// ============================================================================
// Inbound commands
// ============================================================================

/// Place a new limit order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewOrder {
    pub symbol: String,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub conn: ConnId,
}

/// Cancel a resting order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelRequest {
    pub symbol: String,
    pub order_id: OrderId,
    pub conn: ConnId,
}

/// Ask for the current top of book.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopOfBookQuery {
    pub symbol: String,
    pub conn: ConnId,
}

/// Inbound commands from the network layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Command {
    New(NewOrder),
    Cancel(CancelRequest),
    Query(TopOfBookQuery),
}

impl Command {
    /// Symbol the command targets, used for shard routing.
    #[inline]
    pub fn symbol(&self) -> &str {
        match self {
            Command::New(c) => &c.symbol,
            Command::Cancel(c) => &c.symbol,
            Command::Query(c) => &c.symbol,
        }
    }

    /// Connection the command came from.
    #[inline]
    pub fn conn(&self) -> ConnId {
        match self {
            Command::New(c) => c.conn,
            Command::Cancel(c) => c.conn,
            Command::Query(c) => c.conn,
        }
    }
}

// ============================================================================
// Trade events
// ============================================================================

/// A fill produced by the matching loop. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub maker_id: OrderId,
    /// `None` only for orders rested directly via `add_order`,
    /// without an aggressing taker.
    pub taker_id: Option<OrderId>,
    /// Always the maker's resting price; price improvement accrues to
    /// the taker.
    pub price: Price,
    pub qty: Qty,
    /// UTC nanoseconds at execution.
    pub timestamp: u64,
}

// ============================================================================
// Outbound responses
// ============================================================================

/// Outcome of a cancel request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelStatus {
    #[serde(rename = "CANCEL_OK")]
    CancelOk,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
}

/// Body of an outbound response, tagged for the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseKind {
    /// The order was received by the engine. Signals receipt, not fill.
    #[serde(rename = "ACK")]
    Ack {
        #[serde(rename = "orderId")]
        order_id: OrderId,
        status: String,
    },
    #[serde(rename = "CANCEL_REPORT")]
    CancelReport {
        #[serde(rename = "orderId")]
        order_id: OrderId,
        status: CancelStatus,
    },
    #[serde(rename = "TRADE")]
    TradeReport {
        price: Price,
        qty: Qty,
        #[serde(rename = "makerId")]
        maker_id: OrderId,
        #[serde(rename = "takerId")]
        taker_id: Option<OrderId>,
    },
    #[serde(rename = "TOP_OF_BOOK")]
    TopOfBook {
        #[serde(rename = "bestBid")]
        best_bid: Option<Price>,
        #[serde(rename = "bestAsk")]
        best_ask: Option<Price>,
    },
    #[serde(rename = "ERROR")]
    Error { reason: String },
}

impl ResponseKind {
    /// Standard receipt acknowledgement.
    pub fn ack(order_id: OrderId) -> Self {
        ResponseKind::Ack {
            order_id,
            status: "RECEIVED".to_string(),
        }
    }
}

/// An outbound response with its routing context. Created by the
/// engine, consumed exactly once by the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Connection to deliver to. Not part of the encoded payload.
    #[serde(skip)]
    pub conn: ConnId,
    pub symbol: String,
    #[serde(flatten)]
    pub kind: ResponseKind,
}

impl Response {
    pub fn new(conn: ConnId, symbol: impl Into<String>, kind: ResponseKind) -> Self {
        Self {
            conn,
            symbol: symbol.into(),
            kind,
        }
    }
}
