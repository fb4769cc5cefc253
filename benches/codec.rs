//! Frame codec benchmarks.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use wsline::codec::{Decoded, FrameCodec};
use wsline::protocol::{Frame, MessageAssembler, MessageFragmenter, apply_mask, validate_utf8};
use wsline::{Config, Limits, Role};

const SIZES: [usize; 4] = [10, 1024, 64 * 1024, 1024 * 1024];

fn masked_frame(payload_size: usize) -> Vec<u8> {
    let frame = Frame::binary(vec![0xAB; payload_size]);
    let mut buf = Vec::with_capacity(frame.wire_size(true));
    frame.write_to(&mut buf, Some([0x37, 0xfa, 0x21, 0x3d]));
    buf
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let config = Config::server();
    for size in SIZES {
        let wire = masked_frame(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            let mut codec = FrameCodec::new(Role::Server, &config);
            b.iter(|| match codec.decode(black_box(wire)) {
                Ok(Decoded::Frame { consumed, .. }) => consumed,
                _ => 0,
            })
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (role, config) in [(Role::Client, Config::client()), (Role::Server, Config::server())] {
        for size in SIZES {
            let frame = Frame::binary(vec![0xCD; size]);
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(role.to_string(), size), &frame, |b, frame| {
                let mut codec = FrameCodec::new(role, &config);
                let mut out = Vec::with_capacity(size + 14);
                b.iter(|| {
                    out.clear();
                    codec.encode(black_box(frame), &mut out)
                })
            });
        }
    }
    group.finish();
}

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_mask");
    let mask = [0x12, 0x34, 0x56, 0x78];
    for size in SIZES {
        let mut data = vec![0xEFu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| apply_mask(black_box(&mut data), mask))
        });
    }
    group.finish();
}

fn bench_utf8(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_utf8");
    let ascii = "a".repeat(64 * 1024);
    let mixed = "héllo wörld ✓ ".repeat(4 * 1024);
    for (name, text) in [("ascii", &ascii), ("mixed", &mixed)] {
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_function(name, |b| b.iter(|| validate_utf8(black_box(text.as_bytes()))));
    }
    group.finish();
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    let payload = vec![0x5Au8; 256 * 1024];
    for fragment_size in [4096usize, 16 * 1024] {
        let frames: Vec<Frame> =
            MessageFragmenter::new(Frame::binary(payload.clone()), fragment_size).collect();
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(fragment_size),
            &frames,
            |b, frames| {
                b.iter(|| {
                    let mut assembler = MessageAssembler::new(Limits::default());
                    for frame in frames.iter().cloned() {
                        let _ = assembler.push(frame);
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_encode,
    bench_masking,
    bench_utf8,
    bench_reassembly
);
criterion_main!(benches);
