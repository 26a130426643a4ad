//! Threaded end-to-end tests: queues, engines, router, dispatcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use venue_core::{
    CancelRequest, Command, Dispatcher, EngineRouter, LockFreeQueue, MatchingEngine, NewOrder,
    Response, ResponseKind, Side,
};

/// Route engine/dispatcher logs through the test harness's capture.
/// Idempotent: later calls lose the race and that is fine.
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn new_order(symbol: &str, conn: u64, side: Side, price: u64, qty: u32) -> Command {
    Command::New(NewOrder {
        symbol: symbol.to_string(),
        side,
        price,
        qty,
        conn,
    })
}

/// Poll an engine's outbound queue until `want` responses arrived or
/// the deadline passed.
fn drain_until(engine: &MatchingEngine, want: usize, timeout: Duration) -> Vec<Response> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while out.len() < want && Instant::now() < deadline {
        match engine.pop_outbound() {
            Some(r) => out.push(r),
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
    out
}

// ============================================================================
// Queue backpressure, end to end
// ============================================================================

#[test]
fn queue_full_rejects_then_delivers_original_items_in_order() {
    init_logging();
    let q = LockFreeQueue::with_capacity(8);
    let capacity = q.capacity();

    for i in 0..capacity {
        assert!(q.push(i).is_ok(), "push {i} within capacity");
    }
    // One past capacity: rejected, item handed back, nothing corrupted.
    assert_eq!(q.push(usize::MAX), Err(usize::MAX));

    for i in 0..capacity {
        assert_eq!(q.pop(), Some(i));
    }
    assert_eq!(q.pop(), None);
}

// ============================================================================
// Engine under concurrent producers
// ============================================================================

#[test]
fn concurrent_producers_all_get_responses() {
    init_logging();
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 1000;

    let engine = Arc::new(MatchingEngine::new(1 << 14));
    engine.register_symbol("XPEV", 50_000);
    engine.start();

    let pushed = Arc::new(AtomicUsize::new(0));
    let mut producers = Vec::new();
    for t in 0..PRODUCERS {
        let engine = Arc::clone(&engine);
        let pushed = Arc::clone(&pushed);
        producers.push(thread::spawn(move || {
            for _ in 0..PER_PRODUCER {
                // Non-crossing prices per producer: every order rests.
                let cmd = new_order("XPEV", t as u64, Side::Buy, 9000 + t as u64, 1);
                if engine.push_inbound(cmd) {
                    pushed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for p in producers {
        p.join().unwrap();
    }

    let pushed = pushed.load(Ordering::Relaxed);
    assert_eq!(pushed, PRODUCERS * PER_PRODUCER);

    // Every resting new order yields exactly one ack.
    let responses = drain_until(&engine, pushed, Duration::from_secs(5));
    assert_eq!(responses.len(), pushed);
    assert!(responses
        .iter()
        .all(|r| matches!(r.kind, ResponseKind::Ack { .. })));

    // Per-producer command order is preserved end to end: acks for one
    // connection carry strictly increasing order ids.
    for conn in 0..PRODUCERS as u64 {
        let ids: Vec<u64> = responses
            .iter()
            .filter(|r| r.conn == conn)
            .map(|r| match r.kind {
                ResponseKind::Ack { order_id, .. } => order_id,
                ref other => panic!("expected Ack, got {other:?}"),
            })
            .collect();
        assert_eq!(ids.len(), PER_PRODUCER);
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "conn {conn} reordered");
    }

    engine.stop();

    let stats = engine.latency();
    assert_eq!(stats.count as usize, pushed);
    assert!(stats.p50 > 0);
}

#[test]
fn stop_is_graceful_with_commands_still_queued() {
    init_logging();
    let engine = Arc::new(MatchingEngine::new(1 << 10));
    engine.register_symbol("XPEV", 1000);
    engine.start();

    for i in 0..500u64 {
        engine.push_inbound(new_order("XPEV", 1, Side::Buy, 9000 + i, 1));
    }
    // Stop without draining: queued commands may be dropped, but the
    // shutdown must be clean and idempotent.
    engine.stop();
    engine.stop();
    assert!(!engine.is_running());
}

// ============================================================================
// Router + dispatcher pipeline
// ============================================================================

type SentLog = Arc<Mutex<Vec<(u64, serde_json::Value)>>>;

fn collecting_sender(log: SentLog) -> impl Fn(u64, &[u8]) -> bool + Send + Sync {
    move |conn, payload| {
        let value: serde_json::Value = serde_json::from_slice(payload).expect("valid JSON payload");
        log.lock().unwrap().push((conn, value));
        true
    }
}

fn wait_for_sends(log: &SentLog, want: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while log.lock().unwrap().len() < want && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn commands_flow_through_router_and_dispatcher_to_sender() {
    init_logging();
    let router = Arc::new(EngineRouter::new());

    let shard_a = Arc::new(MatchingEngine::new(1 << 10));
    shard_a.register_symbol("XPEV", 10_000);
    let shard_b = Arc::new(MatchingEngine::new(1 << 10));
    shard_b.register_symbol("BYD", 10_000);

    router.bind_symbol("XPEV", Arc::clone(&shard_a));
    router.bind_symbol("BYD", Arc::clone(&shard_b));

    let log: SentLog = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Dispatcher::new(Arc::clone(&router), 1 << 10, collecting_sender(Arc::clone(&log)));
    dispatcher.attach_engine(&shard_a);
    dispatcher.attach_engine(&shard_b);

    dispatcher.start();
    shard_a.start();
    shard_b.start();

    assert!(dispatcher.route_inbound(new_order("XPEV", 1, Side::Buy, 10000, 10)));
    assert!(dispatcher.route_inbound(new_order("BYD", 2, Side::Sell, 20000, 5)));
    // Unknown symbol is a routing failure, not a crash.
    assert!(!dispatcher.route_inbound(new_order("NOPE", 3, Side::Buy, 100, 1)));

    wait_for_sends(&log, 2, Duration::from_secs(5));

    shard_a.stop();
    shard_b.stop();
    dispatcher.stop();

    let sent = log.lock().unwrap();
    assert_eq!(sent.len(), 2);

    let for_conn = |conn: u64| {
        sent.iter()
            .find(|(c, _)| *c == conn)
            .map(|(_, v)| v.clone())
            .expect("response delivered")
    };
    let xpev = for_conn(1);
    assert_eq!(xpev["symbol"], "XPEV");
    assert_eq!(xpev["type"], "ACK");
    assert_eq!(xpev["status"], "RECEIVED");

    let byd = for_conn(2);
    assert_eq!(byd["symbol"], "BYD");
    assert_eq!(byd["type"], "ACK");
}

#[test]
fn trades_and_cancel_reports_reach_the_right_connection() {
    init_logging();
    let router = Arc::new(EngineRouter::new());
    let shard = Arc::new(MatchingEngine::new(1 << 10));
    shard.register_symbol("XPEV", 10_000);
    router.bind_symbol("XPEV", Arc::clone(&shard));

    let log: SentLog = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Dispatcher::new(Arc::clone(&router), 1 << 10, collecting_sender(Arc::clone(&log)));
    dispatcher.attach_engine(&shard);
    dispatcher.start();
    shard.start();

    // Maker rests, taker crosses: ack + ack + trade = 3 payloads.
    assert!(dispatcher.route_inbound(new_order("XPEV", 1, Side::Sell, 10050, 10)));
    assert!(dispatcher.route_inbound(new_order("XPEV", 2, Side::Buy, 10050, 10)));
    wait_for_sends(&log, 3, Duration::from_secs(5));

    // Cancel of an already-filled maker: NOT_FOUND back to conn 1.
    let maker_id = {
        let sent = log.lock().unwrap();
        let ack = sent
            .iter()
            .find(|(c, v)| *c == 1 && v["type"] == "ACK")
            .expect("maker ack")
            .1
            .clone();
        ack["orderId"].as_u64().unwrap()
    };
    assert!(dispatcher.route_inbound(Command::Cancel(CancelRequest {
        symbol: "XPEV".to_string(),
        order_id: maker_id,
        conn: 1,
    })));
    wait_for_sends(&log, 4, Duration::from_secs(5));

    shard.stop();
    dispatcher.stop();

    let sent = log.lock().unwrap();
    let trade = sent
        .iter()
        .find(|(_, v)| v["type"] == "TRADE")
        .expect("trade delivered");
    // The trade report goes to the taker's connection at maker price.
    assert_eq!(trade.0, 2);
    assert_eq!(trade.1["price"], 10050);
    assert_eq!(trade.1["qty"], 10);
    assert_eq!(trade.1["makerId"].as_u64().unwrap(), maker_id);

    let cancel = sent
        .iter()
        .find(|(_, v)| v["type"] == "CANCEL_REPORT")
        .expect("cancel report delivered");
    assert_eq!(cancel.0, 1);
    assert_eq!(cancel.1["status"], "NOT_FOUND");
}

#[test]
fn send_failure_does_not_abort_the_drain() {
    init_logging();
    let router = Arc::new(EngineRouter::new());
    let shard = Arc::new(MatchingEngine::new(1 << 10));
    shard.register_symbol("XPEV", 1000);
    router.bind_symbol("XPEV", Arc::clone(&shard));

    // Sender fails on the first payload, accepts the rest.
    let delivered = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicUsize::new(0));
    let dispatcher = {
        let delivered = Arc::clone(&delivered);
        let attempts = Arc::clone(&attempts);
        Dispatcher::new(Arc::clone(&router), 1 << 10, move |_conn, _payload| {
            if attempts.fetch_add(1, Ordering::Relaxed) == 0 {
                false
            } else {
                delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
        })
    };
    dispatcher.attach_engine(&shard);
    dispatcher.start();
    shard.start();

    for i in 0..5u64 {
        assert!(dispatcher.route_inbound(new_order("XPEV", 1, Side::Buy, 9000 + i, 1)));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while attempts.load(Ordering::Relaxed) < 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }

    shard.stop();
    dispatcher.stop();

    assert_eq!(attempts.load(Ordering::Relaxed), 5);
    assert_eq!(delivered.load(Ordering::Relaxed), 4);
}
