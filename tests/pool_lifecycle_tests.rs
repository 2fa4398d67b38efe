//! Integration tests for the pool lifecycle and buffer ownership.
//!
//! These drive a pool through configure / start / acquire / release / stop
//! against an in-process port and check the slot mapping and ownership
//! guarantees hold across runs.

use portpool::buffer::ExternalPool;
use portpool::error::{ConfigError, PoolError};
use portpool::format::{PixelFormat, PoolCaps, VideoInfo};
use portpool::memory::{MemoryKind, MemorySegment};
use portpool::pool::{BufferState, PoolConfig, PoolOption, PoolPhase, PortBufferPool};
use portpool::port::{PortDefinition, PortDirection, PortRole};
use portpool::testing::{MockPort, RecordingPool};
use std::sync::Arc;
use std::thread;

const SLOTS: usize = 4;

fn nv12_caps() -> PoolCaps {
    PoolCaps::RawVideo(VideoInfo::new(PixelFormat::Nv12, 320, 240))
}

fn output_port() -> Arc<MockPort> {
    Arc::new(MockPort::new(PortDefinition::raw_video(
        PortDirection::Output,
        SLOTS,
        320,
        240,
    )))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn started_decoder(port: &Arc<MockPort>) -> PortBufferPool {
    init_tracing();
    let pool = PortBufferPool::new("dec-out", PortRole::Decoder { use_dmabuf: false }, port.clone());
    pool.configure(PoolConfig::new(nv12_caps())).unwrap();
    pool.start().unwrap();
    pool
}

/// Map every slot to the address its buffer exposes.
fn output_mapping(pool: &PortBufferPool, port: &MockPort) -> Vec<(usize, usize)> {
    (0..SLOTS)
        .map(|i| {
            port.complete(i, 0, 128);
            pool.on_fill_done(i).unwrap();
            let buffer = pool.acquire().unwrap();
            let addr = buffer.memory(0).unwrap().map() as usize;
            (buffer.index(), addr)
        })
        .collect()
}

// ============================================================================
// Slot mapping
// ============================================================================

#[test]
fn test_one_buffer_per_slot() {
    let port = output_port();
    let pool = started_decoder(&port);

    assert_eq!(pool.capacity(), SLOTS);
    assert_eq!(pool.stats().idle, SLOTS);
    for i in 0..SLOTS {
        assert_eq!(pool.state_of(i), Some(BufferState::Idle));
    }
    assert_eq!(pool.state_of(SLOTS), None);
}

#[test]
fn test_mapping_is_stable_within_a_run() {
    let port = output_port();
    let pool = started_decoder(&port);

    let first = output_mapping(&pool, &port);
    let second = output_mapping(&pool, &port);

    assert_eq!(first, second);
    for (i, (index, addr)) in first.iter().enumerate() {
        assert_eq!(*index, i);
        assert_eq!(*addr, port.slot_at(i).memory().as_ptr() as usize);
    }
}

#[test]
fn test_restart_reproduces_mapping() {
    let port = output_port();
    let pool = started_decoder(&port);
    let before = output_mapping(&pool, &port);

    pool.stop();
    assert_eq!(pool.phase(), PoolPhase::Stopped);
    assert_eq!(pool.capacity(), 0);

    // Configuration is dropped at stop.
    assert!(pool.start().is_err());
    pool.configure(PoolConfig::new(nv12_caps())).unwrap();
    pool.start().unwrap();

    assert_eq!(output_mapping(&pool, &port), before);
}

#[test]
fn test_buffer_held_across_restart_keeps_its_slot() {
    let port = Arc::new(MockPort::new(PortDefinition::raw_video(
        PortDirection::Input,
        1,
        320,
        240,
    )));
    let pool = PortBufferPool::new("enc-in", PortRole::Encoder { no_copy: true }, port.clone());
    pool.configure(PoolConfig::new(nv12_caps())).unwrap();
    pool.start().unwrap();
    let mut old = pool.acquire().unwrap();

    pool.stop();
    pool.configure(PoolConfig::new(nv12_caps())).unwrap();
    pool.start().unwrap();

    // The slot stays with the old owner until it is returned.
    assert_eq!(pool.state_of(0), Some(BufferState::InFlight));
    assert!(matches!(pool.acquire(), Err(PoolError::Exhausted { .. })));
    old.memory_mut(0).unwrap().as_mut_slice().unwrap()[0] = 0x55;
    drop(old);

    let mut new = pool.acquire().unwrap();
    assert_eq!(new.index(), 0);
    new.memory_mut(0).unwrap().as_mut_slice().unwrap()[0] = 0xaa;
    assert_eq!(new.memory(0).unwrap().as_slice()[0], 0xaa);
}

// ============================================================================
// Output refresh
// ============================================================================

#[test]
fn test_acquire_reflects_latest_fill() {
    let port = output_port();
    let pool = started_decoder(&port);

    port.complete(0, 0, 4096);
    pool.on_fill_done(0).unwrap();
    let buffer = pool.acquire().unwrap();
    let memory = buffer.memory(0).unwrap();
    assert_eq!(memory.kind(), MemoryKind::Hardware);
    assert_eq!(memory.size(), 4096);
    assert_eq!(memory.offset(), 0);
    drop(buffer);

    // Refilled with a different range.
    port.complete(0, 512, 2048);
    pool.on_fill_done(0).unwrap();
    let buffer = pool.acquire().unwrap();
    assert_eq!(buffer.memory(0).unwrap().offset(), 512);
    assert_eq!(buffer.memory(0).unwrap().size(), 2048);
    assert_eq!(buffer.memory(0).unwrap().as_slice().len(), 2048);
}

#[test]
fn test_released_output_goes_back_to_port() {
    let port = output_port();
    let pool = started_decoder(&port);

    port.complete(2, 0, 64);
    pool.on_fill_done(2).unwrap();
    let buffer = pool.acquire().unwrap();
    pool.release(buffer);

    assert_eq!(port.releases(), 1);
    assert!(port.slot_at(2).is_in_flight());
    assert_eq!(pool.state_of(2), Some(BufferState::InFlight));
    assert_eq!(pool.stats().releases_to_port, 1);
}

#[test]
fn test_hardware_memory_is_read_only() {
    let port = output_port();
    let pool = started_decoder(&port);

    port.complete(0, 0, 64);
    pool.on_fill_done(0).unwrap();
    let mut buffer = pool.acquire().unwrap();
    let memory = buffer.memory_mut(0).unwrap();
    assert!(memory.is_read_only());
    assert!(!memory.is_shareable());
    assert!(memory.as_mut_slice().is_none());
}

// ============================================================================
// Borrowed buffers
// ============================================================================

#[test]
fn test_borrowed_buffers_restored_exactly_once() {
    let lender = Arc::new(RecordingPool::with_buffers("upstream", SLOTS, 64 * 1024));
    let port = output_port();
    let pool = PortBufferPool::new("dec-out", PortRole::Decoder { use_dmabuf: false }, port.clone());
    pool.configure(
        PoolConfig::new(nv12_caps())
            .with_option(PoolOption::VideoMeta)
            .with_borrowed_pool(lender.clone()),
    )
    .unwrap();
    pool.start().unwrap();

    assert_eq!(lender.lent(), SLOTS);
    assert_eq!(lender.available(), 0);
    assert!(!pool.need_copy());

    port.complete(1, 0, 64);
    pool.on_fill_done(1).unwrap();
    let held = pool.acquire().unwrap();
    assert!(held.is_borrowed());
    assert_eq!(held.memory(0).unwrap().kind(), MemoryKind::Borrowed);
    // Borrowed memory keeps its own window.
    assert_eq!(held.memory(0).unwrap().size(), 64 * 1024);
    // Metadata is added when requested and missing.
    assert_eq!(held.video_meta().unwrap().n_planes, 2);

    pool.stop();
    assert_eq!(lender.restored(), SLOTS - 1);

    drop(held);
    assert_eq!(lender.restored(), SLOTS);
    assert_eq!(lender.outstanding(), 0);

    drop(pool);
    assert_eq!(lender.restored(), SLOTS);
}

#[test]
fn test_borrowed_pool_too_small() {
    let lender = Arc::new(RecordingPool::with_buffers("upstream", SLOTS - 1, 1024));
    let pool = PortBufferPool::new("dec-out", PortRole::Generic, output_port());

    assert_eq!(
        pool.configure(PoolConfig::new(nv12_caps()).with_borrowed_pool(lender)),
        Err(ConfigError::BorrowedCountMismatch {
            slots: SLOTS,
            provided: SLOTS - 1
        })
    );
}

// ============================================================================
// Encoder input
// ============================================================================

#[test]
fn test_encoder_input_is_writable_in_place() {
    let port = Arc::new(MockPort::new(PortDefinition::raw_video(
        PortDirection::Input,
        SLOTS,
        320,
        240,
    )));
    let pool = PortBufferPool::new("enc-in", PortRole::Encoder { no_copy: true }, port.clone());
    pool.configure(PoolConfig::new(nv12_caps())).unwrap();
    pool.start().unwrap();

    let mut buffer = pool.acquire().unwrap();
    let index = buffer.index();
    buffer.memory_mut(0).unwrap().as_mut_slice().unwrap()[..3].copy_from_slice(&[1, 2, 3]);

    let raw = unsafe { std::slice::from_raw_parts(port.slot_at(index).memory().as_ptr(), 3) };
    assert_eq!(raw, &[1, 2, 3]);
}

#[test]
fn test_encoder_exhaustion_after_bounded_probes() {
    let port = Arc::new(MockPort::new(PortDefinition::raw_video(
        PortDirection::Input,
        SLOTS,
        320,
        240,
    )));
    let pool = PortBufferPool::new("enc-in", PortRole::Encoder { no_copy: false }, port.clone());
    pool.configure(PoolConfig::new(nv12_caps())).unwrap();
    pool.start().unwrap();

    for i in 0..SLOTS {
        port.slot_at(i).set_in_flight(true);
    }
    match pool.acquire() {
        Err(PoolError::Exhausted { probes }) => assert_eq!(probes, 3 * SLOTS),
        other => panic!("expected exhaustion, got {other:?}"),
    }

    // Emptied by the component.
    port.slot_at(2).set_in_flight(false);
    pool.on_empty_done(2).unwrap();
    assert_eq!(pool.acquire().unwrap().index(), 2);
}

#[test]
fn test_custom_search_rounds() {
    let port = Arc::new(MockPort::new(PortDefinition::raw_video(
        PortDirection::Input,
        SLOTS,
        320,
        240,
    )));
    let pool = PortBufferPool::new("enc-in", PortRole::Encoder { no_copy: true }, port.clone());
    pool.configure(PoolConfig::new(nv12_caps()).with_search_rounds(1))
        .unwrap();
    pool.start().unwrap();
    let _held: Vec<_> = (0..SLOTS).map(|_| pool.acquire().unwrap()).collect();

    assert!(matches!(
        pool.acquire(),
        Err(PoolError::Exhausted { probes: SLOTS })
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_streaming_and_completion_threads() {
    let port = output_port();
    let pool = Arc::new(started_decoder(&port));
    let rounds = 200;

    let completer = {
        let port = port.clone();
        let pool = pool.clone();
        thread::spawn(move || {
            let mut completed = 0;
            let mut i = 0;
            while completed < rounds {
                let slot = port.slot_at(i % SLOTS);
                if pool.state_of(i % SLOTS) != Some(BufferState::Acquired)
                    && (slot.is_in_flight() || completed < SLOTS)
                {
                    port.complete(i % SLOTS, 0, 256);
                    pool.on_fill_done(i % SLOTS).unwrap();
                    completed += 1;
                }
                i += 1;
                thread::yield_now();
            }
        })
    };

    let mut acquired = 0;
    while !completer.is_finished() || acquired == 0 {
        if let Ok(buffer) = pool.acquire() {
            assert_eq!(buffer.size(), 256);
            acquired += 1;
        }
        thread::yield_now();
    }
    completer.join().unwrap();

    let stats = pool.stats();
    assert_eq!(stats.capacity, SLOTS);
    assert_eq!(stats.acquired, 0);
    assert_eq!(stats.idle + stats.in_flight, SLOTS);
    assert!(stats.acquisitions >= 1);
}
