//! Order Book - per-symbol book and the matching algorithm.
//!
//! Both sides are price-ordered `BTreeMap`s of [`PriceLevel`]s, so the
//! best opposite price during matching is an O(log n) lookup instead
//! of a scan over every level. An order-id index gives O(1) cancel
//! lookup, and the best bid/ask are cached and refreshed once per
//! mutating call.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::command::{OrderId, Price, Qty, Side, TradeEvent};
use crate::error::VenueError;
use crate::pool::{Handle, OrderPool};
use crate::price_level::PriceLevel;

/// Where a live order sits: pool slot plus the (side, price) needed to
/// find its level without a search.
#[derive(Clone, Copy, Debug)]
pub struct OrderLocation {
    pub handle: Handle,
    pub side: Side,
    pub price: Price,
}

/// Outcome of [`OrderBook::match_order`].
#[derive(Debug)]
pub struct MatchResult {
    /// Id assigned to the incoming order, whether or not any of it
    /// rested.
    pub taker_id: OrderId,
    /// Fills in maker-FIFO order, best price level first.
    pub trades: Vec<TradeEvent>,
    /// Quantity left after crossing. Zero means fully filled.
    pub resting_qty: Qty,
    /// Set when the remainder could not be rested (pool exhausted).
    /// Trades already produced stand.
    pub rest_error: Option<VenueError>,
}

/// Top-of-book depth rows for observability and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookSnapshot {
    /// (price, total qty), best bid first.
    pub bids: Vec<(Price, u64)>,
    /// (price, total qty), best ask first.
    pub asks: Vec<(Price, u64)>,
}

/// A single symbol's limit order book. Owned and mutated by exactly
/// one matching thread; nothing in here synchronizes.
pub struct OrderBook {
    symbol: String,
    pool: OrderPool,
    bids: BTreeMap<Price, PriceLevel>,
    asks: BTreeMap<Price, PriceLevel>,
    order_index: FxHashMap<OrderId, OrderLocation>,
    best_bid: Option<Price>,
    best_ask: Option<Price>,
    next_order_id: OrderId,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>, pool_capacity: u32) -> Self {
        Self {
            symbol: symbol.into(),
            pool: OrderPool::new(pool_capacity),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            order_index: FxHashMap::default(),
            best_bid: None,
            best_ask: None,
            next_order_id: 1,
        }
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Highest bid price, or `None` when the bid side is empty.
    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.best_bid
    }

    /// Lowest ask price, or `None` when the ask side is empty.
    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.best_ask
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.order_index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order_index.is_empty()
    }

    /// Total resting quantity and order count at one price.
    pub fn depth_at(&self, side: Side, price: Price) -> (u64, u32) {
        let map = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        map.get(&price)
            .map(|l| (l.total_qty, l.count))
            .unwrap_or((0, 0))
    }

    /// Pre-fault the pool pages (startup warm-up).
    pub fn warm_up(&mut self) {
        self.pool.warm_up();
    }

    // ========================================================================
    // Book mutation
    // ========================================================================

    /// Rest a new order without crossing. Assigns and returns the next
    /// order id; fails only when the pool is exhausted.
    pub fn add_order(&mut self, side: Side, price: Price, qty: Qty) -> Result<OrderId, VenueError> {
        let order_id = self.next_order_id;
        self.rest_order(order_id, side, price, qty)?;
        self.next_order_id += 1;
        self.refresh_best_prices();
        trace!(symbol = %self.symbol, order_id, ?side, price, qty, "rest");
        Ok(order_id)
    }

    /// Cancel by id. `false` means unknown id - the normal outcome for
    /// a late cancel or an already-filled order, not an error.
    pub fn cancel_order(&mut self, order_id: OrderId) -> bool {
        let Some(loc) = self.order_index.remove(&order_id) else {
            return false;
        };

        let map = match loc.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(level) = map.get_mut(&loc.price) {
            if level.remove(&mut self.pool, loc.handle) {
                map.remove(&loc.price);
            }
        }

        self.pool.release(loc.handle);
        self.refresh_best_prices();
        trace!(symbol = %self.symbol, order_id, "cancel");
        true
    }

    /// The continuous-double-auction matching algorithm.
    ///
    /// Crosses the incoming order against the opposite side, best price
    /// first, maker FIFO within a level; any remainder rests at the
    /// incoming limit price under the id assigned here. Trade price is
    /// always the maker's resting price.
    pub fn match_order(&mut self, side: Side, price: Price, qty: Qty) -> MatchResult {
        let taker_id = self.next_order_id;
        self.next_order_id += 1;

        let mut remaining = qty;
        let mut trades = Vec::new();

        while remaining > 0 {
            let best_opposite = match side {
                Side::Buy => self.asks.first_key_value().map(|(p, _)| *p),
                Side::Sell => self.bids.last_key_value().map(|(p, _)| *p),
            };
            let Some(best_price) = best_opposite else { break };

            let crosses = match side {
                Side::Buy => price >= best_price,
                Side::Sell => price <= best_price,
            };
            if !crosses {
                break;
            }

            remaining = self.match_at_level(side.opposite(), best_price, taker_id, remaining, &mut trades);
        }

        let mut rest_error = None;
        if remaining > 0 {
            if let Err(err) = self.rest_order(taker_id, side, price, remaining) {
                rest_error = Some(err);
            }
        }

        // One O(log n) cache refresh per call, not per trade.
        self.refresh_best_prices();
        debug_assert!(
            match (self.best_bid, self.best_ask) {
                (Some(b), Some(a)) => b < a,
                _ => true,
            },
            "crossed book after match"
        );

        MatchResult {
            taker_id,
            trades,
            resting_qty: remaining,
            rest_error,
        }
    }

    /// Consume makers at one price level, oldest first.
    ///
    /// Returns the taker quantity still unfilled. Removes the level
    /// from its side when it empties.
    fn match_at_level(
        &mut self,
        maker_side: Side,
        price: Price,
        taker_id: OrderId,
        mut remaining: Qty,
        trades: &mut Vec<TradeEvent>,
    ) -> Qty {
        let opposite = match maker_side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let Some(level) = opposite.get_mut(&price) else {
            return remaining;
        };

        while remaining > 0 && !level.is_empty() {
            let maker_handle = level.peek_head();
            let (maker_id, maker_qty, maker_price) = {
                let maker = self.pool.get(maker_handle);
                (maker.order_id, maker.qty, maker.price)
            };

            let traded = remaining.min(maker_qty);
            trades.push(TradeEvent {
                symbol: self.symbol.clone(),
                maker_id,
                taker_id: Some(taker_id),
                price: maker_price,
                qty: traded,
                timestamp: now_nanos(),
            });
            trace!(symbol = %self.symbol, maker_id, taker_id, price = maker_price, qty = traded, "trade");

            remaining -= traded;

            if traded == maker_qty {
                // Full fill: unlink, unindex, release the slot.
                level.pop_front(&mut self.pool);
                self.order_index.remove(&maker_id);
                self.pool.release(maker_handle);
            } else {
                // Partial fill: maker keeps the head for the next match.
                self.pool.get_mut(maker_handle).qty = maker_qty - traded;
                level.subtract_qty(traded);
            }
        }

        if level.is_empty() {
            opposite.remove(&price);
        }

        remaining
    }

    /// Place an order with a pre-assigned id into its level and index.
    fn rest_order(
        &mut self,
        order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) -> Result<(), VenueError> {
        let handle = self.pool.acquire()?;
        {
            let node = self.pool.get_mut(handle);
            node.order_id = order_id;
            node.side = side;
            node.price = price;
            node.qty = qty;
        }

        let map = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        map.entry(price).or_default().push_back(&mut self.pool, handle);

        self.order_index.insert(
            order_id,
            OrderLocation {
                handle,
                side,
                price,
            },
        );
        Ok(())
    }

    /// Re-read both cached best prices off the sorted sides.
    fn refresh_best_prices(&mut self) {
        self.best_bid = self.bids.last_key_value().map(|(p, _)| *p);
        self.best_ask = self.asks.first_key_value().map(|(p, _)| *p);
    }

    /// Top `depth` rows per side, best first.
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            bids: self
                .bids
                .iter()
                .rev()
                .take(depth)
                .map(|(p, l)| (*p, l.total_qty))
                .collect(),
            asks: self
                .asks
                .iter()
                .take(depth)
                .map(|(p, l)| (*p, l.total_qty))
                .collect(),
        }
    }

    /// Sum of all resting quantities (both sides). Used by the
    /// conservation tests.
    pub fn resting_qty(&self) -> u64 {
        self.bids
            .values()
            .chain(self.asks.values())
            .map(|l| l.total_qty)
            .sum()
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("symbol", &self.symbol)
            .field("best_bid", &self.best_bid)
            .field("best_ask", &self.best_ask)
            .field("bid_levels", &self.bids.len())
            .field("ask_levels", &self.asks.len())
            .field("orders", &self.order_index.len())
            .finish()
    }
}

fn now_nanos() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64
}
