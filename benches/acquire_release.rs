//! Acquire/release hot path benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use portpool::format::{PixelFormat, PoolCaps, VideoInfo};
use portpool::pool::{PoolConfig, PortBufferPool};
use portpool::port::{PortDefinition, PortDirection, PortRole};
use portpool::testing::MockPort;
use std::sync::Arc;

fn caps() -> PoolCaps {
    PoolCaps::RawVideo(VideoInfo::new(PixelFormat::Nv12, 640, 480))
}

fn bench_encoder_input(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoder_input_acquire_release");

    for slots in [2, 8, 32] {
        let port = Arc::new(MockPort::new(PortDefinition::raw_video(
            PortDirection::Input,
            slots,
            640,
            480,
        )));
        let pool = PortBufferPool::new("bench", PortRole::Encoder { no_copy: true }, port);
        pool.configure(PoolConfig::new(caps())).unwrap();
        pool.start().unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(slots), &pool, |b, pool| {
            b.iter(|| {
                let buffer = pool.acquire().expect("pool not exhausted");
                std::hint::black_box(buffer.index());
            });
        });
    }

    group.finish();
}

fn bench_encoder_search_with_busy_slots(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoder_search_busy");

    let slots = 16;
    let port = Arc::new(MockPort::new(PortDefinition::raw_video(
        PortDirection::Input,
        slots,
        640,
        480,
    )));
    // Only the last slot is free; every search walks the whole array.
    for i in 0..slots - 1 {
        port.slot_at(i).set_in_flight(true);
    }
    let pool = PortBufferPool::new("bench", PortRole::Encoder { no_copy: true }, port);
    pool.configure(PoolConfig::new(caps())).unwrap();
    pool.start().unwrap();

    group.bench_function("16_slots_one_free", |b| {
        b.iter(|| {
            let buffer = pool.acquire().expect("one slot free");
            std::hint::black_box(buffer.index());
        });
    });

    group.finish();
}

fn bench_decoder_output_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoder_output_cycle");

    let port = Arc::new(MockPort::new(PortDefinition::raw_video(
        PortDirection::Output,
        4,
        640,
        480,
    )));
    let pool = PortBufferPool::new("bench", PortRole::Decoder { use_dmabuf: false }, port.clone());
    pool.configure(PoolConfig::new(caps())).unwrap();
    pool.start().unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("fill_acquire_release", |b| {
        let mut i = 0;
        b.iter(|| {
            port.complete(i, 0, 4096);
            pool.on_fill_done(i).unwrap();
            let buffer = pool.acquire().unwrap();
            std::hint::black_box(buffer.size());
            drop(buffer);
            i = (i + 1) % 4;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encoder_input,
    bench_encoder_search_with_busy_slots,
    bench_decoder_output_cycle
);
criterion_main!(benches);
