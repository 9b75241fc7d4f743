//! Buffer Operations Performance Benchmark
//!
//! Measures ring-buffer write/drain throughput and pull-adapter reads to
//! keep the per-sample cost of the streaming path honest.
//!
//! **Goal:** buffer operations should be nearly instant
//! **Target:** >1000x realtime at 8 kHz mono

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wavepipe_core::stream::{AudioSink, NullSink, SampleBuffer, StreamReader};

fn bench_buffer_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_operations");

    group.bench_function("write_passthrough_2048", |b| {
        // Empty buffer over an accepting sink: the zero-copy fast path.
        let mut buffer = SampleBuffer::new(2048, NullSink::new());
        let data = vec![0.5f32; 2048];

        b.iter(|| {
            let written = buffer.write(black_box(&data));
            black_box(written);
        });
    });

    group.bench_function("write_then_pull_2048", |b| {
        let (mut reader, tap) = StreamReader::new();
        let mut buffer = SampleBuffer::new(4096, tap);
        let data = vec![0.5f32; 2048];
        let mut dst = vec![0.0f32; 2048];

        b.iter(|| {
            buffer.write(black_box(&data));
            let (filled, _) = reader.read_into(&mut buffer, black_box(&mut dst));
            black_box(filled);
        });
    });

    group.bench_function("overwrite_full_ring_256", |b| {
        let (_reader, tap) = StreamReader::new();
        let mut buffer = SampleBuffer::new(256, tap);
        buffer.set_overwrite_on_full(true);
        let data = vec![0.5f32; 256];
        buffer.write(&data);

        b.iter(|| {
            // Every write evicts the oldest 256 samples.
            let written = buffer.write(black_box(&data));
            black_box(written);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_buffer_operations);
criterion_main!(benches);
