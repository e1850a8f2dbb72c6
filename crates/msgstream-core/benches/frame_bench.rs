//! Criterion benchmarks for the msgstream frame path.
//!
//! Measures header encoding, registry (bincode) serialization, and the
//! two-phase frame reader over an in-memory stream.
//!
//! Run with:
//! ```bash
//! cargo bench --package msgstream-core --bench frame_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use msgstream_core::protocol::codec::{MessageCodec, RawCodec};
use msgstream_core::protocol::frame::{decode_header, encode_header, FrameHeader};
use msgstream_core::protocol::registry::{AnyMessage, MessageRegistry};
use msgstream_core::transport::FrameReader;
use serde::{Deserialize, Serialize};

// ── Message fixtures ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RobotPose {
    robot: u32,
    x: f64,
    y: f64,
    ori: f64,
    covariance: Vec<f64>,
}

fn make_pose() -> RobotPose {
    RobotPose {
        robot: 3,
        x: 1.25,
        y: -4.5,
        ori: 0.785,
        covariance: vec![0.01; 36],
    }
}

fn make_registry() -> MessageRegistry {
    let mut registry = MessageRegistry::new();
    registry
        .register::<RobotPose>(1000, 1)
        .expect("registration must succeed");
    registry
}

/// Builds a wire buffer holding `count` raw frames of `payload_len` bytes.
fn make_stream(count: usize, payload_len: usize) -> Vec<u8> {
    let payload = vec![0x5A; payload_len];
    let mut wire = Vec::with_capacity(count * (payload_len + 8));
    for i in 0..count {
        let (header, bytes) = RawCodec
            .serialize(1, i as u16, &payload)
            .expect("serialize must succeed");
        wire.extend_from_slice(&header.to_bytes());
        wire.extend_from_slice(&bytes);
    }
    wire
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_header");
    group.bench_function("encode", |b| {
        b.iter(|| encode_header(black_box(5), black_box(10), black_box(4096)))
    });
    let bytes = FrameHeader::new(5, 10, 4096).to_bytes();
    group.bench_function("decode", |b| b.iter(|| decode_header(black_box(&bytes))));
    group.finish();
}

fn bench_registry(c: &mut Criterion) {
    let registry = make_registry();
    let message: AnyMessage = Box::new(make_pose());
    let (header, payload) = registry
        .serialize(1000, 1, &message)
        .expect("serialize must succeed");

    let mut group = c.benchmark_group("registry");
    group.bench_function("serialize", |b| {
        b.iter(|| registry.serialize(black_box(1000), black_box(1), black_box(&message)))
    });
    group.bench_function("deserialize", |b| {
        b.iter(|| registry.deserialize(black_box(&header), black_box(&payload)))
    });
    group.finish();
}

fn bench_reader(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime must build");
    let frames = 64;

    let mut group = c.benchmark_group("frame_reader");
    for payload_len in [16usize, 1024, 64 * 1024] {
        let wire = make_stream(frames, payload_len);
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::new("read", payload_len), &wire, |b, wire| {
            b.iter(|| {
                runtime.block_on(async {
                    let mut reader = FrameReader::new(wire.as_slice(), 1024, usize::MAX);
                    for _ in 0..frames {
                        let (header, payload) =
                            reader.read_frame().await.expect("read must succeed");
                        black_box((header, payload.len()));
                    }
                })
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_header, bench_registry, bench_reader);
criterion_main!(benches);
