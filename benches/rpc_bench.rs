//! narpc micro-benchmarks.
//!
//! Measures the header codec, tag allocation, and a full loopback round
//! trip over the in-process NA.
//!
//! Run with:
//! ```bash
//! cargo bench --bench rpc_bench
//! ```

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use narpc::inproc::Fabric;
use narpc::tag::TagAllocator;
use narpc::{
    Class, NaClass, RequestHeader, ResponseHeader, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};

fn bench_header_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_codec");
    group.throughput(Throughput::Bytes(REQUEST_HEADER_SIZE as u64));
    group.bench_function("request_roundtrip", |b| {
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        b.iter(|| {
            let hdr = RequestHeader::new(black_box(0xABCD_EF01), black_box(7), 0);
            hdr.encode(&mut buf).unwrap();
            black_box(RequestHeader::decode(&buf).unwrap())
        })
    });
    group.throughput(Throughput::Bytes(RESPONSE_HEADER_SIZE as u64));
    group.bench_function("response_roundtrip", |b| {
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        b.iter(|| {
            let hdr = ResponseHeader::new(black_box(9));
            hdr.encode(&mut buf).unwrap();
            black_box(ResponseHeader::decode(&buf).unwrap())
        })
    });
    group.finish();
}

fn bench_tag_allocator(c: &mut Criterion) {
    let tags = TagAllocator::new(u32::MAX);
    c.bench_function("tag_next", |b| b.iter(|| black_box(tags.next())));
}

fn bench_loopback_roundtrip(c: &mut Criterion) {
    let fabric = Fabric::new();
    let endpoint = fabric.endpoint(false);
    let addr = endpoint.addr();
    let na_class: Arc<dyn NaClass> = endpoint.clone();
    let na_context = endpoint.context_create().unwrap();
    let class = Class::init(na_class, na_context, None).unwrap();
    let context = class.context_create().unwrap();

    let id = class
        .register_rpc("echo", |handle| {
            let byte = handle.input_buf()[0];
            handle.output_buf()[0] = byte;
            handle.respond(|_| {})
        })
        .unwrap();

    c.bench_function("loopback_roundtrip", |b| {
        b.iter(|| {
            let handle = class.create(&context, addr, id).unwrap();
            handle.input_buf()[0] = 0x5A;
            handle.forward(None, |info| {
                black_box(info.handle.output_buf()[0]);
            })
            .unwrap();
            class.trigger(&context, 1000, 1).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_header_codec,
    bench_tag_allocator,
    bench_loopback_roundtrip
);
criterion_main!(benches);
