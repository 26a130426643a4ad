//! Dispatcher - bridges the network layer and the engine shards.
//!
//! Inbound: `route_inbound` looks the symbol up in the router and
//! offers the command to that shard's queue. Outbound: engines poke
//! the dispatcher's ready queue after each outbound push; the drain
//! thread pops ready engines, empties their outbound queues, encodes
//! each response and hands it to the send capability. The dispatcher
//! never touches a book.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::command::{Command, ConnId};
use crate::engine::MatchingEngine;
use crate::queue::LockFreeQueue;
use crate::router::EngineRouter;

/// The network layer's send capability: deliver an encoded payload to
/// a connection. `false` means the send failed; the dispatcher logs
/// and keeps draining.
pub type SendFn = dyn Fn(ConnId, &[u8]) -> bool + Send + Sync;

/// Empty polls before the drain loop backs off to a sleep.
const IDLE_SPINS: u32 = 64;
const IDLE_SLEEP: Duration = Duration::from_micros(50);

struct Shared {
    /// Engines with pending outbound work. Weak refs: the notifier
    /// stored inside an engine must not keep that engine alive.
    ready: LockFreeQueue<Weak<MatchingEngine>>,
    running: AtomicBool,
    sender: Box<SendFn>,
}

/// Routes inbound commands and drains engine outbound queues.
pub struct Dispatcher {
    router: Arc<EngineRouter>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        router: Arc<EngineRouter>,
        ready_capacity: usize,
        sender: impl Fn(ConnId, &[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            router,
            shared: Arc::new(Shared {
                ready: LockFreeQueue::with_capacity(ready_capacity),
                running: AtomicBool::new(false),
                sender: Box::new(sender),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Wire an engine's ready notifier to this dispatcher. Call before
    /// the engine starts.
    pub fn attach_engine(&self, engine: &Arc<MatchingEngine>) {
        let shared = Arc::clone(&self.shared);
        let weak = Arc::downgrade(engine);
        engine.set_ready_notifier(move || {
            // A full ready queue only means the engine is already
            // flagged many times over; the drain empties it fully.
            let _ = shared.ready.push(weak.clone());
        });
    }

    /// Route a command to its symbol's shard. `false` on unknown
    /// symbol or a full inbound queue; the caller owns the retry/drop
    /// decision.
    pub fn route_inbound(&self, cmd: Command) -> bool {
        let Some(engine) = self.router.route(cmd.symbol()) else {
            return false;
        };
        engine.push_inbound(cmd)
    }

    /// Spawn the drain thread. No-op when already running.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("dispatch".to_string())
            .spawn(move || drain_loop(&shared))
            .expect("spawn dispatch thread");
        *self.worker.lock().expect("worker lock") = Some(handle);
        info!("dispatcher started");
    }

    /// Stop and join the drain thread. No-op when already stopped.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.worker.lock().expect("worker lock").take() {
            let _ = handle.join();
        }
        info!("dispatcher stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().expect("worker lock").take() {
            let _ = handle.join();
        }
    }
}

fn drain_loop(shared: &Shared) {
    let mut idle: u32 = 0;
    while shared.running.load(Ordering::Acquire) {
        match shared.ready.pop() {
            Some(weak) => {
                idle = 0;
                if let Some(engine) = weak.upgrade() {
                    drain_engine(shared, &engine);
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
}

/// Empty one engine's outbound queue. A failed send never aborts the
/// drain of the remaining responses.
fn drain_engine(shared: &Shared, engine: &MatchingEngine) {
    while let Some(response) = engine.pop_outbound() {
        let conn = response.conn;
        match serde_json::to_vec(&response) {
            Ok(payload) => {
                if !(shared.sender)(conn, &payload) {
                    warn!(conn, "send failed, response discarded");
                }
            }
            Err(err) => warn!(conn, %err, "response encoding failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{NewOrder, Side};

    fn noop_sender() -> impl Fn(ConnId, &[u8]) -> bool + Send + Sync {
        |_, _| true
    }

    #[test]
    fn route_inbound_fails_on_unknown_symbol() {
        let router = Arc::new(EngineRouter::new());
        let dispatcher = Dispatcher::new(router, 64, noop_sender());

        let cmd = Command::New(NewOrder {
            symbol: "NOPE".to_string(),
            side: Side::Buy,
            price: 100,
            qty: 1,
            conn: 1,
        });
        assert!(!dispatcher.route_inbound(cmd));
    }

    #[test]
    fn route_inbound_reports_backpressure() {
        let router = Arc::new(EngineRouter::new());
        // Tiny inbound queue, engine never started: pushes pile up.
        let engine = Arc::new(MatchingEngine::new(2));
        engine.register_symbol("XPEV", 16);
        router.bind_symbol("XPEV", Arc::clone(&engine));
        let dispatcher = Dispatcher::new(router, 64, noop_sender());

        let cmd = |_i: u64| {
            Command::New(NewOrder {
                symbol: "XPEV".to_string(),
                side: Side::Buy,
                price: 100,
                qty: 1,
                conn: 1,
            })
        };
        assert!(dispatcher.route_inbound(cmd(0)));
        assert!(dispatcher.route_inbound(cmd(1)));
        // Queue capacity is 2; the third push is rejected.
        assert!(!dispatcher.route_inbound(cmd(2)));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let router = Arc::new(EngineRouter::new());
        let dispatcher = Dispatcher::new(router, 64, noop_sender());
        dispatcher.start();
        dispatcher.start();
        dispatcher.stop();
        dispatcher.stop();
    }
}
