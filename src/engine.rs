//! Matching Engine - one shard, one matching thread.
//!
//! A shard owns the order books for its registered symbols. The books
//! are moved into the matching thread on `start` and handed back on
//! `stop`, so the single-writer rule is enforced by ownership rather
//! than by convention. Producers talk to the shard only through the
//! lock-free inbound queue; results come back through the outbound
//! queue, with a ready-notifier poke per successful push.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::command::{Command, Response, ResponseKind};
use crate::error::VenueError;
use crate::latency::{LatencyRecorder, LatencySnapshot};
use crate::order_book::OrderBook;
use crate::queue::LockFreeQueue;

/// Callback fired after every successful outbound push, so the
/// dispatcher is woken instead of polling.
pub type ReadyNotifier = Arc<dyn Fn() + Send + Sync>;

/// Empty polls before the matching loop backs off to a sleep.
const IDLE_SPINS: u32 = 64;
/// Idle sleep once the spin budget is spent. Bounds wake latency
/// without pegging the core.
const IDLE_SLEEP: Duration = Duration::from_micros(50);
/// Commands between latency snapshot exports.
const LATENCY_EXPORT_EVERY: u64 = 1024;

type Books = FxHashMap<String, OrderBook>;

/// State shared between the shard handle and its matching thread.
struct Core {
    inbound: LockFreeQueue<Command>,
    outbound: LockFreeQueue<Response>,
    running: AtomicBool,
    latency: Mutex<LatencySnapshot>,
    pin_to_core: bool,
}

/// A symbol-sharded matching engine.
///
/// Lifecycle: `Stopped -> Running -> Stopped`, with both transitions
/// idempotent. Symbols are registered while stopped; commands flow
/// while running.
pub struct MatchingEngine {
    core: Arc<Core>,
    /// `Some` while stopped; taken by the matching thread on start.
    books: Mutex<Option<Books>>,
    worker: Mutex<Option<JoinHandle<Books>>>,
    ready: Mutex<Option<ReadyNotifier>>,
}

impl MatchingEngine {
    /// Engine with inbound/outbound queues of (at least) the given
    /// capacity each, rounded up to a power of two.
    pub fn new(queue_capacity: usize) -> Self {
        Self::with_core_pinning(queue_capacity, false)
    }

    /// As [`MatchingEngine::new`], optionally pinning the matching
    /// thread to the last available core.
    pub fn with_core_pinning(queue_capacity: usize, pin_to_core: bool) -> Self {
        Self {
            core: Arc::new(Core {
                inbound: LockFreeQueue::with_capacity(queue_capacity),
                outbound: LockFreeQueue::with_capacity(queue_capacity),
                running: AtomicBool::new(false),
                latency: Mutex::new(LatencySnapshot::default()),
                pin_to_core,
            }),
            books: Mutex::new(Some(Books::default())),
            worker: Mutex::new(None),
            ready: Mutex::new(None),
        }
    }

    /// Register a symbol with its own order book and pool capacity.
    /// `false` on duplicate or while running. Administrative: call at
    /// startup, not in steady state.
    pub fn register_symbol(&self, symbol: &str, pool_capacity: u32) -> bool {
        let mut guard = self.books.lock().expect("books lock");
        let Some(books) = guard.as_mut() else {
            warn!(symbol, "register_symbol while running; ignored");
            return false;
        };
        if books.contains_key(symbol) {
            return false;
        }
        books.insert(symbol.to_string(), OrderBook::new(symbol, pool_capacity));
        info!(symbol, pool_capacity, "symbol registered");
        true
    }

    /// Install the outbound ready callback. Attach before `start`.
    pub fn set_ready_notifier(&self, notifier: impl Fn() + Send + Sync + 'static) {
        *self.ready.lock().expect("ready lock") = Some(Arc::new(notifier));
    }

    /// Spawn the matching thread. No-op when already running.
    pub fn start(&self) {
        if self.core.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(books) = self.books.lock().expect("books lock").take() else {
            self.core.running.store(false, Ordering::Release);
            return;
        };
        let notifier = self.ready.lock().expect("ready lock").clone();

        let core = Arc::clone(&self.core);
        let handle = thread::Builder::new()
            .name("matching".to_string())
            .spawn(move || core.matching_loop(books, notifier))
            .expect("spawn matching thread");
        *self.worker.lock().expect("worker lock") = Some(handle);
        info!("engine started");
    }

    /// Flip the running flag and join the matching thread. Commands
    /// still queued are left undrained - fast shutdown over
    /// completeness. No-op when already stopped.
    pub fn stop(&self) {
        if !self.core.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.worker.lock().expect("worker lock").take() {
            match handle.join() {
                Ok(books) => {
                    *self.books.lock().expect("books lock") = Some(books);
                }
                Err(_) => warn!("matching thread panicked"),
            }
        }
        info!("engine stopped");
    }

    /// Offer a command to this shard. `false` is backpressure (queue
    /// full); never blocks.
    pub fn push_inbound(&self, cmd: Command) -> bool {
        self.core.inbound.push(cmd).is_ok()
    }

    /// Drain one response, if any.
    pub fn pop_outbound(&self) -> Option<Response> {
        self.core.outbound.pop()
    }

    /// Latest exported per-command latency quantiles.
    pub fn latency(&self) -> LatencySnapshot {
        *self.core.latency.lock().expect("latency lock")
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        // A forgotten stop() must not leak the matching thread.
        self.core.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().expect("worker lock").take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Matching thread
// ============================================================================

impl Core {
    fn matching_loop(&self, mut books: Books, notifier: Option<ReadyNotifier>) -> Books {
        if self.pin_to_core {
            pin_current_thread();
        }
        for book in books.values_mut() {
            book.warm_up();
        }

        let mut recorder = LatencyRecorder::new();
        let mut idle: u32 = 0;
        let mut since_export: u64 = 0;

        while self.running.load(Ordering::Acquire) {
            match self.inbound.pop() {
                Some(cmd) => {
                    idle = 0;
                    let start = Instant::now();
                    self.handle_command(&mut books, cmd, notifier.as_ref());
                    recorder.record(start.elapsed().as_nanos() as u64);

                    since_export += 1;
                    if since_export >= LATENCY_EXPORT_EVERY {
                        *self.latency.lock().expect("latency lock") = recorder.snapshot();
                        since_export = 0;
                    }
                }
                None => {
                    idle += 1;
                    if idle > IDLE_SPINS {
                        thread::sleep(IDLE_SLEEP);
                        idle = 0;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            }
        }

        *self.latency.lock().expect("latency lock") = recorder.snapshot();
        books
    }

    /// One command, one or more responses. Every failure becomes a
    /// typed response for the issuing connection; nothing unwinds past
    /// this frame.
    fn handle_command(&self, books: &mut Books, cmd: Command, notifier: Option<&ReadyNotifier>) {
        match cmd {
            Command::New(order) => {
                let Some(book) = books.get_mut(&order.symbol) else {
                    self.respond(
                        Response::new(
                            order.conn,
                            order.symbol.clone(),
                            ResponseKind::Error {
                                reason: VenueError::UnknownSymbol(order.symbol.clone()).to_string(),
                            },
                        ),
                        notifier,
                    );
                    return;
                };
                if order.qty == 0 {
                    self.respond(
                        Response::new(
                            order.conn,
                            order.symbol.clone(),
                            ResponseKind::Error {
                                reason: "zero quantity rejected".to_string(),
                            },
                        ),
                        notifier,
                    );
                    return;
                }
                if order.price == 0 {
                    self.respond(
                        Response::new(
                            order.conn,
                            order.symbol.clone(),
                            ResponseKind::Error {
                                reason: "zero price rejected".to_string(),
                            },
                        ),
                        notifier,
                    );
                    return;
                }

                let result = book.match_order(order.side, order.price, order.qty);
                debug!(
                    symbol = %order.symbol,
                    taker_id = result.taker_id,
                    trades = result.trades.len(),
                    resting = result.resting_qty,
                    "new order processed"
                );

                self.respond(
                    Response::new(
                        order.conn,
                        order.symbol.clone(),
                        ResponseKind::ack(result.taker_id),
                    ),
                    notifier,
                );
                for trade in &result.trades {
                    self.respond(
                        Response::new(
                            order.conn,
                            order.symbol.clone(),
                            ResponseKind::TradeReport {
                                price: trade.price,
                                qty: trade.qty,
                                maker_id: trade.maker_id,
                                taker_id: trade.taker_id,
                            },
                        ),
                        notifier,
                    );
                }
                if let Some(err) = result.rest_error {
                    self.respond(
                        Response::new(
                            order.conn,
                            order.symbol,
                            ResponseKind::Error {
                                reason: err.to_string(),
                            },
                        ),
                        notifier,
                    );
                }
            }
            Command::Cancel(cancel) => {
                let Some(book) = books.get_mut(&cancel.symbol) else {
                    self.respond(
                        Response::new(
                            cancel.conn,
                            cancel.symbol.clone(),
                            ResponseKind::Error {
                                reason: VenueError::UnknownSymbol(cancel.symbol.clone()).to_string(),
                            },
                        ),
                        notifier,
                    );
                    return;
                };
                let status = if book.cancel_order(cancel.order_id) {
                    crate::command::CancelStatus::CancelOk
                } else {
                    crate::command::CancelStatus::NotFound
                };
                self.respond(
                    Response::new(
                        cancel.conn,
                        cancel.symbol,
                        ResponseKind::CancelReport {
                            order_id: cancel.order_id,
                            status,
                        },
                    ),
                    notifier,
                );
            }
            Command::Query(query) => {
                let Some(book) = books.get(&query.symbol) else {
                    self.respond(
                        Response::new(
                            query.conn,
                            query.symbol.clone(),
                            ResponseKind::Error {
                                reason: VenueError::UnknownSymbol(query.symbol.clone()).to_string(),
                            },
                        ),
                        notifier,
                    );
                    return;
                };
                self.respond(
                    Response::new(
                        query.conn,
                        query.symbol,
                        ResponseKind::TopOfBook {
                            best_bid: book.best_bid(),
                            best_ask: book.best_ask(),
                        },
                    ),
                    notifier,
                );
            }
        }
    }

    /// Push one response; a full outbound queue drops it with a warn.
    /// The bounded queue is the backpressure valve - blocking here
    /// would stall every symbol on this shard.
    fn respond(&self, response: Response, notifier: Option<&ReadyNotifier>) {
        match self.outbound.push(response) {
            Ok(()) => {
                if let Some(notify) = notifier {
                    notify();
                }
            }
            Err(dropped) => {
                warn!(symbol = %dropped.symbol, conn = dropped.conn, "outbound full, response dropped");
            }
        }
    }
}

fn pin_current_thread() {
    if let Some(cores) = core_affinity::get_core_ids() {
        if let Some(last) = cores.last() {
            core_affinity::set_for_current(*last);
        }
    }
}
