//! Two-endpoint ping-pong over the in-process NA.
//!
//! A server thread runs the progress/trigger loop and echoes requests; the
//! main thread issues sequential calls and reports the mean round-trip time.
//!
//! Run with:
//! ```bash
//! cargo run --example pingpong -- --iters 10000 --payload 32
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use narpc::inproc::Fabric;
use narpc::{hash_name, Class, NaClass, REQUEST_HEADER_SIZE};

#[derive(Parser)]
#[command(about = "narpc in-process ping-pong")]
struct Args {
    /// Number of round trips.
    #[arg(long, default_value_t = 10_000)]
    iters: u32,
    /// Payload size in bytes.
    #[arg(long, default_value_t = 32)]
    payload: usize,
}

fn main() {
    let args = Args::parse();

    let fabric = Fabric::new();
    let server_ep = fabric.endpoint(true);
    let server_addr = server_ep.addr();
    let server_na: Arc<dyn NaClass> = server_ep.clone();
    let server = Class::init(server_na, server_ep.context_create().unwrap(), None).unwrap();
    let server_ctx = server.context_create().unwrap();

    let payload = args
        .payload
        .min(server_ep.max_expected_size() - REQUEST_HEADER_SIZE);
    server
        .register_rpc("pingpong", move |handle| {
            let request: Vec<u8> = handle.input_buf()[..payload].to_vec();
            handle.output_buf()[..payload].copy_from_slice(&request);
            handle.respond(|_| {})
        })
        .unwrap();

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

    let client_ep = fabric.endpoint(false);
    let client_na: Arc<dyn NaClass> = client_ep.clone();
    let client = Class::init(client_na, client_ep.context_create().unwrap(), None).unwrap();
    let client_ctx = client.context_create().unwrap();

    let id = hash_name("pingpong");
    let start = Instant::now();
    for _ in 0..args.iters {
        let handle = client.create(&client_ctx, server_addr, id).unwrap();
        handle.input_buf()[..payload].fill(0xA5);

        let done = Arc::new(AtomicBool::new(false));
        let done_cb = done.clone();
        handle
            .forward(None, move |info| {
                assert!(info.ret.is_ok());
                done_cb.store(true, Ordering::SeqCst);
            })
            .unwrap();

        while !done.load(Ordering::SeqCst) {
            let _ = client.progress(&client_ctx, 1);
            let _ = client.trigger(&client_ctx, 0, 4);
        }
    }
    let elapsed = start.elapsed();

    stop.store(true, Ordering::SeqCst);
    server_thread.join().unwrap();

    let per_call = elapsed / args.iters.max(1);
    println!(
        "{} round trips of {} bytes in {:?} ({:?}/call)",
        args.iters, payload, elapsed, per_call
    );
    assert!(per_call < Duration::from_secs(1));
}
