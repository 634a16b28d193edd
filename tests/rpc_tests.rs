//! narpc integration tests.
//!
//! Every scenario runs over the in-process NA backend, so the full
//! request/response protocol is exercised without hardware.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use narpc::inproc::Fabric;
use narpc::{
    hash_name, BulkClass, Class, Context, Error, NaAddr, NaClass, NaError, ProtocolError,
};

fn setup(fabric: &Fabric, listening: bool) -> (Class, Context, NaAddr) {
    let endpoint = fabric.endpoint(listening);
    let addr = endpoint.addr();
    let na_class: Arc<dyn NaClass> = endpoint.clone();
    let na_context = endpoint.context_create().expect("na context");
    let class = Class::init(na_class, na_context, None).expect("class init");
    let context = class.context_create().expect("context create");
    (class, context, addr)
}

/// Drive one side until `done` flips or the deadline passes.
fn drive_until(class: &Class, context: &Context, done: &AtomicBool, deadline: Instant) {
    while !done.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "timed out waiting for completion");
        let _ = class.progress(context, 1);
        let _ = class.trigger(context, 0, 8);
    }
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn test_register_and_lookup() {
    let fabric = Fabric::new();
    let (class, _context, _addr) = setup(&fabric, false);

    let id = class
        .register_rpc("add", |handle| handle.respond(|_| {}))
        .expect("register");
    assert_ne!(id, 0);

    assert_eq!(class.registered_rpc("add"), (true, id));
    assert_eq!(class.registered_rpc("sub"), (false, 0));
}

#[test]
fn test_handle_reports_identity() {
    let fabric = Fabric::new();
    let (class, context, addr) = setup(&fabric, false);

    let id = class
        .register_rpc("ident", |handle| handle.respond(|_| {}))
        .expect("register");
    let handle = class.create(&context, addr, id).expect("create");

    let info = handle.info();
    assert_eq!(info.id, id);
    assert_eq!(info.addr, Some(addr));
    assert_eq!(handle.addr(), Some(addr));
    assert_eq!(handle.state(), narpc::CallState::Created);
}

#[test]
fn test_registered_data_roundtrip() {
    let fabric = Fabric::new();
    let (class, _context, _addr) = setup(&fabric, false);

    let id = class
        .register_rpc("stateful", |handle| handle.respond(|_| {}))
        .expect("register");
    assert!(class.registered_data(id).is_none());

    class.register_data(id, Arc::new(42u32)).expect("attach");
    let data = class.registered_data(id).expect("data");
    assert_eq!(*data.downcast::<u32>().expect("u32"), 42);
}

// =============================================================================
// Loopback
// =============================================================================

#[test]
fn test_loopback_echo() {
    let fabric = Fabric::new();
    let (class, context, addr) = setup(&fabric, false);

    let id = class
        .register_rpc("echo", |handle| {
            let payload: Vec<u8> = handle.input_buf()[..3].to_vec();
            {
                let mut out = handle.output_buf();
                out[..3].copy_from_slice(&[payload[2], payload[1], payload[0]]);
            }
            handle.respond(|_| {})
        })
        .expect("register");

    let handle = class.create(&context, addr, id).expect("create");
    handle.input_buf()[..3].copy_from_slice(&[1, 2, 3]);

    let got = Arc::new(Mutex::new(Vec::new()));
    let got_cb = got.clone();
    handle
        .forward(None, move |info| {
            assert!(info.ret.is_ok());
            got_cb
                .lock()
                .unwrap()
                .extend_from_slice(&info.handle.output_buf()[..3]);
        })
        .expect("forward");

    // The handler ran synchronously; only the callback dispatch is deferred.
    let dispatched = class.trigger(&context, 1000, 1).expect("trigger");
    assert_eq!(dispatched, 1);
    assert_eq!(got.lock().unwrap().as_slice(), &[3, 2, 1]);
}

#[test]
fn test_loopback_completion_order_is_fifo() {
    let fabric = Fabric::new();
    let (class, context, addr) = setup(&fabric, false);

    let id = class
        .register_rpc("noop", |handle| handle.respond(|_| {}))
        .expect("register");

    let order = Arc::new(Mutex::new(Vec::new()));
    for k in 0..3u32 {
        let handle = class.create(&context, addr, id).expect("create");
        let order_cb = order.clone();
        handle
            .forward(None, move |_info| order_cb.lock().unwrap().push(k))
            .expect("forward");
    }

    let dispatched = class.trigger(&context, 100, 8).expect("trigger");
    assert_eq!(dispatched, 3);
    assert_eq!(order.lock().unwrap().as_slice(), &[0, 1, 2]);
}

// =============================================================================
// Remote forward
// =============================================================================

#[test]
fn test_remote_forward() {
    let fabric = Fabric::new();
    let (server, server_ctx, server_addr) = setup(&fabric, true);
    let (client, client_ctx, _client_addr) = setup(&fabric, false);

    let handled = Arc::new(AtomicBool::new(false));
    let handled_cb = handled.clone();
    server
        .register_rpc("noop", move |handle| {
            handled_cb.store(true, Ordering::SeqCst);
            handle.respond(|_| {})
        })
        .expect("register");

    let handle = client
        .create(&client_ctx, server_addr, hash_name("noop"))
        .expect("create");

    let done = Arc::new(AtomicBool::new(false));
    let done_cb = done.clone();
    handle
        .forward(None, move |info| {
            assert!(info.ret.is_ok());
            assert_eq!(info.handle.response_code(), 0);
            done_cb.store(true, Ordering::SeqCst);
        })
        .expect("forward");

    let deadline = Instant::now() + Duration::from_secs(5);
    while !done.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "round trip timed out");
        let _ = server.progress(&server_ctx, 0);
        let _ = server.trigger(&server_ctx, 0, 8);
        let _ = client.progress(&client_ctx, 0);
        let _ = client.trigger(&client_ctx, 0, 8);
    }
    assert!(handled.load(Ordering::SeqCst));
}

#[test]
fn test_threaded_pingpong() {
    let fabric = Fabric::new();
    let (server, server_ctx, server_addr) = setup(&fabric, true);
    let (client, client_ctx, _client_addr) = setup(&fabric, false);

    let served = Arc::new(AtomicU32::new(0));
    let served_cb = served.clone();
    server
        .register_rpc("bump", move |handle| {
            served_cb.fetch_add(1, Ordering::SeqCst);
            let byte = handle.input_buf()[0];
            handle.output_buf()[0] = byte.wrapping_add(1);
            handle.respond(|_| {})
        })
        .expect("register");

    let stop = Arc::new(AtomicBool::new(false));
    let server_thread = {
        let stop = stop.clone();
        let server = server.clone();
        let server_ctx = server_ctx.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let _ = server.progress(&server_ctx, 10);
                let _ = server.trigger(&server_ctx, 0, 16);
            }
        })
    };

    const ROUNDS: u8 = 50;
    for i in 0..ROUNDS {
        let handle = client
            .create(&client_ctx, server_addr, hash_name("bump"))
            .expect("create");
        handle.input_buf()[0] = i;

        let done = Arc::new(AtomicBool::new(false));
        let done_cb = done.clone();
        handle
            .forward(None, move |info| {
                assert!(info.ret.is_ok());
                assert_eq!(info.handle.output_buf()[0], i.wrapping_add(1));
                done_cb.store(true, Ordering::SeqCst);
            })
            .expect("forward");

        drive_until(&client, &client_ctx, &done, Instant::now() + Duration::from_secs(5));
    }

    stop.store(true, Ordering::SeqCst);
    server_thread.join().expect("server thread");
    assert_eq!(served.load(Ordering::SeqCst), u32::from(ROUNDS));
}

// =============================================================================
// Failure paths
// =============================================================================

#[test]
fn test_unknown_id_leaves_originator_waiting() {
    let fabric = Fabric::new();
    let (server, server_ctx, server_addr) = setup(&fabric, true);
    let (client, client_ctx, _client_addr) = setup(&fabric, false);

    let handle = client
        .create(&client_ctx, server_addr, hash_name("missing"))
        .expect("create");
    let fired = Arc::new(AtomicBool::new(false));
    let fired_cb = fired.clone();
    handle
        .forward(None, move |_info| fired_cb.store(true, Ordering::SeqCst))
        .expect("forward");

    // The server drops the request on lookup failure; no response is sent.
    for _ in 0..10 {
        let _ = server.progress(&server_ctx, 1);
        let _ = client.progress(&client_ctx, 1);
    }
    assert_eq!(client.trigger(&client_ctx, 50, 1), Err(Error::Timeout));
    assert!(!fired.load(Ordering::SeqCst));
}

#[test]
fn test_cancel_completes_with_failure_exactly_once() {
    let fabric = Fabric::new();
    // Server endpoint exists but nobody drives it, so the request parks.
    let (_server, _server_ctx, server_addr) = setup(&fabric, true);
    let (client, client_ctx, _client_addr) = setup(&fabric, false);

    let handle = client
        .create(&client_ctx, server_addr, hash_name("stuck"))
        .expect("create");
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let outcomes_cb = outcomes.clone();
    handle
        .forward(None, move |info| outcomes_cb.lock().unwrap().push(info.ret))
        .expect("forward");

    // Drain the send completion, then cancel the pending response receive.
    let _ = client.progress(&client_ctx, 1);
    handle.cancel().expect("cancel");
    handle.cancel().expect("second cancel is a no-op");

    let _ = client.progress(&client_ctx, 10);
    assert_eq!(client.trigger(&client_ctx, 100, 4).expect("trigger"), 1);

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0], Err(Error::Na(NaError::Canceled)));
    drop(outcomes);

    assert_eq!(client.trigger(&client_ctx, 10, 1), Err(Error::Timeout));
}

#[test]
fn test_garbage_response_is_a_protocol_error() {
    let fabric = Fabric::new();
    let rogue = fabric.endpoint(true);
    let rogue_ctx = rogue.context_create().expect("rogue context");
    let (client, client_ctx, client_addr) = setup(&fabric, false);

    let handle = client
        .create(&client_ctx, rogue.addr(), hash_name("victim"))
        .expect("create");
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let outcomes_cb = outcomes.clone();
    handle
        .forward(None, move |info| outcomes_cb.lock().unwrap().push(info.ret))
        .expect("forward");

    // Answer on the first allocated tag with bytes that are not a response
    // frame; the originator must fail header verification.
    let junk = narpc::MsgBuffer::new(64);
    rogue_ctx
        .msg_send_expected(Box::new(|_| {}), junk, 64, client_addr, 1)
        .expect("rogue send");

    let _ = client.progress(&client_ctx, 10);
    assert_eq!(client.trigger(&client_ctx, 100, 1).expect("trigger"), 1);

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        Err(Error::Protocol(ProtocolError::BadMagic { .. }))
    ));
}

// =============================================================================
// Trigger and context lifecycle
// =============================================================================

#[test]
fn test_trigger_timeout_when_idle() {
    let fabric = Fabric::new();
    let (class, context, _addr) = setup(&fabric, false);

    let start = Instant::now();
    assert_eq!(class.trigger(&context, 50, 4), Err(Error::Timeout));
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn test_context_destroy_requires_drained_queue() {
    let fabric = Fabric::new();
    let (class, context, addr) = setup(&fabric, false);

    let id = class
        .register_rpc("noop", |handle| handle.respond(|_| {}))
        .expect("register");
    let handle = class.create(&context, addr, id).expect("create");
    handle.forward(None, |_info| {}).expect("forward");

    // One loopback completion is queued but not yet dispatched.
    assert_eq!(
        context.clone().destroy(),
        Err(Error::Protocol(ProtocolError::ContextBusy))
    );

    assert_eq!(class.trigger(&context, 100, 1).expect("trigger"), 1);
    context.destroy().expect("destroy after drain");
}

#[test]
fn test_external_bulk_stays_external() {
    let fabric = Fabric::new();
    let endpoint = fabric.endpoint(false);
    let na_class: Arc<dyn NaClass> = endpoint.clone();
    let na_context = endpoint.context_create().expect("na context");

    let bulk = BulkClass::init(na_class.clone(), na_context.clone()).expect("bulk");
    let class = Class::init(na_class, na_context, Some(bulk)).expect("class");
    assert!(class.bulk_is_external());

    let fabric2 = Fabric::new();
    let (owned, _context, _addr) = setup(&fabric2, false);
    assert!(!owned.bulk_is_external());
}
