//! Buffer pool over the fixed buffer array of a codec port.
//!
//! A [`PortBufferPool`] builds exactly one [`PortBuffer`] per hardware slot
//! when it starts and keeps that mapping until it stops. Every buffer is at
//! any instant in one of three [`BufferState`]s:
//!
//! ```text
//!            acquire()                release() / drop
//!   Idle ---------------> Acquired -------------------> Idle (input)
//!    ^                                    |
//!    |   on_fill_done / on_empty_done     | release_to_port (output)
//!    +------------- InFlight <------------+
//! ```
//!
//! # Allocation strategies
//!
//! During [`start`](PortBufferPool::start) each slot gets its buffer from the
//! first strategy that applies:
//!
//! 1. Borrowed: adopt a buffer lent by the configured
//!    [`ExternalPool`](crate::buffer::ExternalPool).
//! 2. DMA-BUF: for decoder output with a physical address, export every
//!    plane through the pool's [`ExportRegistry`].
//! 3. Wrapped: for encoder input, expose the slot as writable memory so
//!    upstream writes frames in place.
//! 4. Hardware: a read-only view over the slot honouring the port alignment.
//!
//! # Example
//!
//! ```rust
//! use portpool::format::{PixelFormat, PoolCaps, VideoInfo};
//! use portpool::pool::{PoolConfig, PortBufferPool};
//! use portpool::port::{PortDefinition, PortDirection, PortRole};
//! use portpool::testing::MockPort;
//! use std::sync::Arc;
//!
//! let port = Arc::new(MockPort::new(PortDefinition::raw_video(PortDirection::Output, 4, 320, 240)));
//! let pool = PortBufferPool::new("dec-out", PortRole::Decoder { use_dmabuf: false }, port.clone());
//!
//! pool.configure(PoolConfig::new(PoolCaps::RawVideo(VideoInfo::new(PixelFormat::Nv12, 320, 240))))?;
//! pool.start()?;
//!
//! port.complete(2, 0, 4096);
//! pool.on_fill_done(2)?;
//! let buffer = pool.acquire()?;
//! assert_eq!(buffer.index(), 2);
//! assert_eq!(buffer.size(), 4096);
//! drop(buffer); // back to the component
//! # Ok::<(), portpool::Error>(())
//! ```

mod config;
mod state;

pub use config::{DEFAULT_SEARCH_ROUNDS, PoolConfig, PoolOption};
pub use state::{BufferState, PoolPhase, PoolStats};

use crate::buffer::{BufferInner, BufferOrigin, PortBuffer};
use crate::error::{ConfigError, PoolError, Result};
use crate::format::{MAX_PLANES, PlaneLayouts, PoolCaps, VideoInfo};
use crate::memory::{DmaExporter, ExportRegistry, PortMemory};
use crate::metadata::VideoMeta;
use crate::observability::{self, PoolMetrics};
use crate::port::{CodecPort, HardwareBufferSlot, PortDefinition, PortDirection, PortDomain, PortRole};
use smallvec::{SmallVec, smallvec};
use state::Counters;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// One hardware slot and the buffer built for it.
struct Entry {
    slot: Arc<HardwareBufferSlot>,
    /// `None` while a consumer holds the buffer.
    buffer: Option<BufferInner>,
    /// Set when the port rejected a release.
    quarantined: bool,
    /// Set while the buffer is being handed to the port outside the lock.
    releasing: bool,
    /// A buffer from before the last stop still holds this slot.
    stale_held: bool,
}

impl Entry {
    fn state(&self) -> BufferState {
        if self.buffer.is_none() {
            BufferState::Acquired
        } else if self.quarantined
            || self.releasing
            || self.stale_held
            || self.slot.is_in_flight()
        {
            BufferState::InFlight
        } else {
            BufferState::Idle
        }
    }

    fn take_if_idle(&mut self) -> Option<BufferInner> {
        match self.state() {
            BufferState::Idle => self.buffer.take(),
            _ => None,
        }
    }
}

struct PoolInner {
    port: Option<Arc<dyn CodecPort>>,
    phase: PoolPhase,
    config: Option<PoolConfig>,
    /// Port definition captured at start.
    definition: Option<PortDefinition>,
    video_info: Option<VideoInfo>,
    /// Port plane layout, for raw video ports.
    layout: Option<PlaneLayouts>,
    attach_meta: bool,
    need_copy: bool,
    allocating: bool,
    deactivated: bool,
    entries: Vec<Entry>,
    /// Output buffer most recently completed by the component.
    current_index: Option<usize>,
    /// Next slot the encoder input search looks at.
    search_cursor: usize,
    /// Incremented at every stop; buffers from older runs are freed on return.
    epoch: u64,
    /// Slots whose buffer from an older run is still out.
    stale_slots: BTreeSet<usize>,
    counters: Counters,
}

impl PoolInner {
    fn idle_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state() == BufferState::Idle)
            .count()
    }

    /// Clear everything built by `start`, returning the buffers still held.
    fn reset_buffers(&mut self) -> Vec<BufferInner> {
        self.allocating = false;
        self.current_index = None;
        self.search_cursor = 0;
        self.need_copy = false;
        self.layout = None;
        self.definition = None;
        self.entries.drain(..).filter_map(|e| e.buffer).collect()
    }
}

/// State shared between a pool and the buffers it handed out.
pub(crate) struct PoolShared {
    name: String,
    role: PortRole,
    exports: Option<ExportRegistry>,
    metrics: PoolMetrics,
    inner: Mutex<PoolInner>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Build the buffer for the next slot.
    fn allocate_locked(&self, inner: &mut PoolInner) -> std::result::Result<usize, PoolError> {
        if inner.phase != PoolPhase::Started {
            tracing::error!(pool = %self.name, "buffer allocation while the pool is not started");
            debug_assert!(false, "allocate_next called on a pool that is not started");
            return Err(PoolError::NotStarted);
        }
        if !inner.allocating {
            tracing::error!(pool = %self.name, "buffer allocation outside of start");
            return Err(PoolError::NotAllocating);
        }
        let (Some(port), Some(definition)) = (inner.port.clone(), inner.definition.clone()) else {
            return Err(PoolError::NotStarted);
        };

        let index = inner.entries.len();
        if index >= definition.buffer_count {
            return Err(PoolError::FullyAllocated(index));
        }
        let slot = port.slot(index).ok_or(PoolError::MissingSlot(index))?;
        debug_assert_eq!(slot.index(), index, "port returned a slot with the wrong index");

        let borrowed = inner
            .config
            .as_ref()
            .and_then(|c| c.borrowed_pool().cloned());

        let (memories, video_meta, origin) = if let Some(lender) = borrowed {
            let external = lender.lend().ok_or(PoolError::MissingBorrowed(index))?;
            tracing::debug!(index, pool = lender.name(), "adopting borrowed buffer");

            let memories: SmallVec<[PortMemory; MAX_PLANES]> =
                external.segments.into_iter().map(PortMemory::borrowed).collect();
            let mut video_meta = external.video_meta;
            if inner.attach_meta && video_meta.is_none() {
                video_meta = inner.video_info.as_ref().map(VideoMeta::new);
            }
            inner.need_copy = false;

            (memories, video_meta, BufferOrigin::Borrowed(lender))
        } else if matches!(self.role, PortRole::Decoder { use_dmabuf: true })
            && definition.direction == PortDirection::Output
        {
            let (Some(exports), Some(phys), Some(layout), Some(info)) = (
                self.exports.as_ref(),
                slot.physical_address(),
                inner.layout.as_ref(),
                inner.video_info.as_ref(),
            ) else {
                tracing::error!(index, "dmabuf mode without exporter, physical address or layout");
                return Err(PoolError::DmaUnavailable);
            };
            tracing::debug!(index, "creating dmabuf memory");

            let memories = exports
                .export_planes(phys, layout)
                .map_err(|source| PoolError::Export { slot: index, source })?;
            let video_meta = Some(VideoMeta::with_layout(info, layout));

            (memories, video_meta, BufferOrigin::Owned)
        } else {
            let memory = if matches!(self.role, PortRole::Encoder { .. })
                && definition.direction == PortDirection::Input
            {
                tracing::debug!(index, "wrapping encoder input slot");
                PortMemory::wrapped(slot.clone())
            } else {
                tracing::debug!(index, alignment = definition.alignment, "mapping hardware slot");
                PortMemory::hardware(slot.clone(), definition.alignment)
            };

            let video_meta = match (inner.layout.as_ref(), inner.video_info.as_ref()) {
                (Some(layout), Some(info)) => {
                    inner.need_copy = !inner.attach_meta && info.needs_copy(layout);
                    // The metadata is always attached when a copy is needed;
                    // copying correctly is up to the user.
                    (inner.need_copy || inner.attach_meta)
                        .then(|| VideoMeta::with_layout(info, layout))
                }
                _ => None,
            };

            (smallvec![memory], video_meta, BufferOrigin::Owned)
        };

        inner.entries.push(Entry {
            slot: slot.clone(),
            buffer: Some(BufferInner {
                slot,
                memories,
                video_meta,
                origin,
                epoch: inner.epoch,
            }),
            quarantined: false,
            releasing: false,
            stale_held: inner.stale_slots.contains(&index),
        });

        Ok(index)
    }

    /// Return a buffer to the pool. This is the release path.
    pub(crate) fn give_back(&self, buffer: BufferInner) {
        let mut inner = self.lock();

        if buffer.epoch != inner.epoch || inner.phase != PoolPhase::Started {
            let index = buffer.index();
            if buffer.epoch != inner.epoch && inner.stale_slots.remove(&index) {
                if let Some(entry) = inner.entries.get_mut(index) {
                    entry.stale_held = false;
                }
                self.metrics.record_idle(inner.idle_count());
            }
            drop(inner);
            tracing::trace!(index, "buffer returned after stop");
            buffer.free();
            return;
        }

        let index = buffer.index();
        let consistent = inner
            .entries
            .get(index)
            .is_some_and(|e| e.buffer.is_none() && Arc::ptr_eq(&e.slot, &buffer.slot));
        if !consistent {
            drop(inner);
            tracing::error!(pool = %self.name, index, "release with inconsistent slot mapping");
            debug_assert!(false, "released buffer does not match its slot");
            buffer.free();
            return;
        }

        let slot = buffer.slot.clone();
        inner.entries[index].buffer = Some(buffer);

        if inner.allocating || inner.deactivated {
            return;
        }
        let Some(direction) = inner.definition.as_ref().map(|d| d.direction) else {
            return;
        };

        match direction {
            PortDirection::Output => {
                if inner.entries[index].quarantined || slot.is_in_flight() {
                    return;
                }
                if let Some(port) = inner.port.clone() {
                    self.release_to_port(inner, port, index, slot);
                }
            }
            PortDirection::Input => {
                if slot.is_in_flight() {
                    tracing::trace!(index, "input buffer returned while in flight");
                } else if matches!(self.role, PortRole::Encoder { no_copy: true }) {
                    tracing::trace!(index, "unused input buffer treated as emptied");
                } else {
                    tracing::trace!(index, "input buffer back in pool");
                }
                self.metrics.record_idle(inner.idle_count());
            }
        }
    }

    /// Hand output slot `index` back to the component.
    ///
    /// The port is called without the pool lock, so a component completing
    /// the slot synchronously may call back into the pool. The entry reads
    /// as in flight meanwhile.
    fn release_to_port(
        &self,
        mut inner: MutexGuard<'_, PoolInner>,
        port: Arc<dyn CodecPort>,
        index: usize,
        slot: Arc<HardwareBufferSlot>,
    ) {
        let epoch = inner.epoch;
        inner.entries[index].releasing = true;
        drop(inner);

        let result = port.release_to_port(&slot);

        let mut inner = self.lock();
        let current = inner.epoch == epoch
            && inner
                .entries
                .get(index)
                .is_some_and(|e| Arc::ptr_eq(&e.slot, &slot));
        if current {
            inner.entries[index].releasing = false;
        }
        match result {
            Ok(()) => {
                tracing::trace!(index, "released buffer to port");
                inner.counters.releases_to_port += 1;
                self.metrics.record_released_to_port();
            }
            Err(e) => {
                tracing::error!(
                    pool = %self.name,
                    index,
                    code = format_args!("{:#010x}", e.code()),
                    "failed to release output buffer to component: {e}"
                );
                if current {
                    inner.entries[index].quarantined = true;
                }
                inner.counters.release_failures += 1;
                observability::record_release_failure(&self.name);
            }
        }
        self.metrics.record_idle(inner.idle_count());
    }
}

/// Buffer pool bound to one codec port.
///
/// All methods take `&self`; state lives behind a single mutex shared with
/// the buffers handed out, so completions may arrive from the component's
/// callback thread while a streaming thread acquires and releases.
pub struct PortBufferPool {
    shared: Arc<PoolShared>,
    span: tracing::Span,
}

impl PortBufferPool {
    /// Pool for `port`, used by an element of the given role.
    pub fn new(name: impl Into<String>, role: PortRole, port: Arc<dyn CodecPort>) -> Self {
        Self::build(name.into(), role, port, None)
    }

    /// Pool that exports decoded frames through `exporter`, using the host
    /// page size.
    pub fn with_exporter(
        name: impl Into<String>,
        role: PortRole,
        port: Arc<dyn CodecPort>,
        exporter: Arc<dyn DmaExporter>,
    ) -> Self {
        Self::build(name.into(), role, port, Some(ExportRegistry::new(exporter)))
    }

    /// Pool that exports decoded frames through an existing registry.
    pub fn with_export_registry(
        name: impl Into<String>,
        role: PortRole,
        port: Arc<dyn CodecPort>,
        exports: ExportRegistry,
    ) -> Self {
        Self::build(name.into(), role, port, Some(exports))
    }

    fn build(
        name: String,
        role: PortRole,
        port: Arc<dyn CodecPort>,
        exports: Option<ExportRegistry>,
    ) -> Self {
        let span = observability::span_pool(&name, port.definition().direction);
        let metrics = PoolMetrics::new(&name);

        Self {
            shared: Arc::new(PoolShared {
                name,
                role,
                exports,
                metrics,
                inner: Mutex::new(PoolInner {
                    port: Some(port),
                    phase: PoolPhase::Stopped,
                    config: None,
                    definition: None,
                    video_info: None,
                    layout: None,
                    attach_meta: false,
                    need_copy: false,
                    allocating: false,
                    deactivated: false,
                    entries: Vec::new(),
                    current_index: None,
                    search_cursor: 0,
                    epoch: 0,
                    stale_slots: BTreeSet::new(),
                    counters: Counters::default(),
                }),
            }),
            span,
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Role of the element owning the port.
    pub fn role(&self) -> PortRole {
        self.shared.role
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> PoolPhase {
        self.shared.lock().phase
    }

    /// Options this pool can honour.
    ///
    /// Only uncompressed video ports support [`PoolOption::VideoMeta`].
    pub fn supported_options(&self) -> &'static [PoolOption] {
        let inner = self.shared.lock();
        match &inner.port {
            Some(port) if port.definition().domain.is_raw_video() => &[PoolOption::VideoMeta],
            _ => &[],
        }
    }

    /// Accept a configuration.
    ///
    /// Fails while the pool is started. Configuring again with an identical
    /// configuration is a no-op.
    pub fn configure(&self, config: PoolConfig) -> std::result::Result<(), ConfigError> {
        let _guard = self.span.enter();
        let mut inner = self.shared.lock();

        match inner.phase {
            PoolPhase::Started => {
                tracing::warn!("configure while started");
                return Err(ConfigError::Locked);
            }
            PoolPhase::Configured if inner.config.as_ref() == Some(&config) => {
                tracing::debug!("configuration unchanged");
                return Ok(());
            }
            _ => {}
        }

        let port = inner.port.clone().ok_or(ConfigError::Unbound)?;
        let definition = port.definition();
        let slots = definition.buffer_count;

        let Some(caps) = config.caps() else {
            tracing::warn!("no caps in config");
            return Err(ConfigError::MissingCaps);
        };
        if let Some(requested) = config.buffer_count().filter(|&n| n != slots) {
            return Err(ConfigError::BufferCountMismatch { slots, requested });
        }
        if let Some(lender) = config.borrowed_pool() {
            let provided = lender.available();
            if provided < slots {
                return Err(ConfigError::BorrowedCountMismatch { slots, provided });
            }
        }

        let incompatible = || {
            tracing::warn!(caps = %caps, domain = %definition.domain, "caps incompatible with port");
            ConfigError::IncompatibleCaps {
                caps: caps.to_string(),
                domain: definition.domain.to_string(),
            }
        };

        let (video_info, attach_meta) = match (definition.domain, caps) {
            (PortDomain::Video { compressed: false }, PoolCaps::RawVideo(info)) => {
                info.port_layout(definition.stride, definition.slice_height)?;
                (Some(*info), config.has_option(PoolOption::VideoMeta))
            }
            (PortDomain::Video { compressed: false }, _) => return Err(incompatible()),
            (_, PoolCaps::RawVideo(_)) => return Err(incompatible()),
            (PortDomain::Video { compressed: true }, PoolCaps::EncodedVideo(_)) => (None, false),
            (_, PoolCaps::EncodedVideo(_)) => return Err(incompatible()),
            (_, PoolCaps::Other(_)) => (None, false),
        };

        tracing::debug!(caps = %caps, attach_meta, "configured");
        inner.video_info = video_info;
        inner.attach_meta = attach_meta;
        inner.config = Some(config);
        inner.phase = PoolPhase::Configured;
        Ok(())
    }

    /// Start the pool and build one buffer per hardware slot.
    ///
    /// Fails if the pool is not configured or its port is gone. If building
    /// any buffer fails, the buffers built so far are freed and the pool
    /// stays configured. Starting a started pool does nothing.
    pub fn start(&self) -> Result<()> {
        let _guard = self.span.enter();
        let slots = {
            let mut inner = self.shared.lock();
            if inner.phase == PoolPhase::Started {
                return Ok(());
            }
            Self::begin_locked(&mut inner)?
        };

        for _ in 0..slots {
            self.allocate_next()?;
        }
        self.finish_allocation()?;
        Ok(())
    }

    /// Move to [`PoolPhase::Started`] with allocation enabled, without
    /// building any buffer.
    ///
    /// Returns the number of slots to build with
    /// [`allocate_next`](Self::allocate_next) before
    /// [`finish_allocation`](Self::finish_allocation). Nothing can be
    /// acquired until allocation is finished.
    pub fn begin_allocation(&self) -> Result<usize> {
        let _guard = self.span.enter();
        let mut inner = self.shared.lock();
        if inner.phase == PoolPhase::Started {
            return Err(PoolError::AlreadyStarted.into());
        }
        Self::begin_locked(&mut inner)
    }

    fn begin_locked(inner: &mut PoolInner) -> Result<usize> {
        if inner.phase == PoolPhase::Stopped {
            return Err(ConfigError::NotConfigured.into());
        }
        let port = match &inner.port {
            Some(port) if port.is_live() => port.clone(),
            _ => return Err(ConfigError::Unbound.into()),
        };

        let definition = port.definition();
        let layout = match (&inner.video_info, definition.domain.is_raw_video()) {
            (Some(info), true) => Some(info.port_layout(definition.stride, definition.slice_height)?),
            _ => None,
        };
        let slots = definition.buffer_count;

        inner.definition = Some(definition);
        inner.layout = layout;
        inner.phase = PoolPhase::Started;
        inner.allocating = true;
        Ok(slots)
    }

    /// Build the buffer for the next hardware slot and return its index.
    ///
    /// Only valid between [`begin_allocation`](Self::begin_allocation) and
    /// [`finish_allocation`](Self::finish_allocation). If the buffer cannot
    /// be built, every buffer built so far is freed and the pool returns to
    /// [`PoolPhase::Configured`].
    pub fn allocate_next(&self) -> std::result::Result<usize, PoolError> {
        let mut inner = self.shared.lock();
        match self.shared.allocate_locked(&mut inner) {
            Ok(index) => Ok(index),
            Err(
                e @ (PoolError::NotStarted
                | PoolError::NotAllocating
                | PoolError::FullyAllocated(_)),
            ) => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "failed to allocate buffers");
                let built = inner.reset_buffers();
                inner.phase = PoolPhase::Configured;
                drop(inner);
                for buffer in built {
                    buffer.free();
                }
                Err(e)
            }
        }
    }

    /// End the allocation phase. Fails unless every slot has its buffer.
    pub fn finish_allocation(&self) -> std::result::Result<(), PoolError> {
        let mut inner = self.shared.lock();
        if inner.phase != PoolPhase::Started {
            return Err(PoolError::NotStarted);
        }
        if !inner.allocating {
            return Err(PoolError::NotAllocating);
        }
        let built = inner.entries.len();
        let slots = inner.definition.as_ref().map_or(0, |d| d.buffer_count);
        if built != slots {
            return Err(PoolError::IncompleteAllocation { built, slots });
        }

        inner.allocating = false;
        self.shared.metrics.record_idle(inner.idle_count());
        tracing::debug!(buffers = slots, need_copy = inner.need_copy, "pool started");
        Ok(())
    }

    /// Hand out a buffer.
    ///
    /// - Output ports return the buffer the component completed last,
    ///   with its visible window set to the slot's filled range.
    /// - Encoder input ports search the slots cyclically from where the
    ///   previous search stopped, giving up after `rounds * slots` probes.
    /// - Other input ports return the first idle buffer.
    ///
    /// Never blocks.
    pub fn acquire(&self) -> std::result::Result<PortBuffer, PoolError> {
        let mut inner = self.shared.lock();
        if inner.phase != PoolPhase::Started || inner.allocating {
            return Err(PoolError::NotStarted);
        }
        let direction = inner
            .definition
            .as_ref()
            .map(|d| d.direction)
            .ok_or(PoolError::NotStarted)?;

        let result = match (direction, self.shared.role) {
            (PortDirection::Output, _) => Self::acquire_current(&mut inner),
            (PortDirection::Input, PortRole::Encoder { .. }) => self.search_input(&mut inner),
            (PortDirection::Input, _) => Self::first_idle(&mut inner),
        };

        match result {
            Ok(buffer) => {
                inner.counters.acquisitions += 1;
                self.shared.metrics.record_acquired();
                self.shared.metrics.record_idle(inner.idle_count());
                drop(inner);
                Ok(PortBuffer::new(buffer, self.shared.clone()))
            }
            Err(e) => {
                if matches!(e, PoolError::Exhausted { .. }) {
                    inner.counters.exhausted_searches += 1;
                    observability::record_exhausted_search(&self.shared.name);
                }
                Err(e)
            }
        }
    }

    fn acquire_current(inner: &mut PoolInner) -> std::result::Result<BufferInner, PoolError> {
        let index = inner.current_index.ok_or(PoolError::NoCurrentBuffer)?;
        let entry = inner
            .entries
            .get_mut(index)
            .ok_or(PoolError::MissingSlot(index))?;

        match entry.state() {
            BufferState::InFlight => Err(PoolError::InFlight(index)),
            BufferState::Acquired => Err(PoolError::AlreadyAcquired(index)),
            BufferState::Idle => {
                let Some(mut buffer) = entry.buffer.take() else {
                    return Err(PoolError::AlreadyAcquired(index));
                };
                if buffer.owns_hardware_memory() {
                    let offset = entry.slot.start_offset();
                    let filled = entry.slot.filled_len();
                    buffer.memories[0].set_visible(offset, filled);
                }
                Ok(buffer)
            }
        }
    }

    fn search_input(&self, inner: &mut PoolInner) -> std::result::Result<BufferInner, PoolError> {
        let slots = inner.entries.len();
        let rounds = inner
            .config
            .as_ref()
            .map_or(DEFAULT_SEARCH_ROUNDS, PoolConfig::search_rounds);
        let max = rounds.saturating_mul(slots);

        for _ in 0..max {
            let index = inner.search_cursor;
            inner.search_cursor = (index + 1) % slots;
            if let Some(buffer) = inner.entries[index].take_if_idle() {
                return Ok(buffer);
            }
        }

        tracing::error!(probes = max, "cannot acquire buffer after {rounds} rounds of searching");
        Err(PoolError::Exhausted { probes: max })
    }

    fn first_idle(inner: &mut PoolInner) -> std::result::Result<BufferInner, PoolError> {
        let probes = inner.entries.len();
        inner
            .entries
            .iter_mut()
            .find_map(Entry::take_if_idle)
            .ok_or(PoolError::Exhausted { probes })
    }

    /// Return a buffer to the pool. Same as dropping it.
    pub fn release(&self, buffer: PortBuffer) {
        drop(buffer);
    }

    /// The component finished filling output slot `index`.
    ///
    /// The slot becomes the current output buffer. Clears a quarantine left
    /// by a failed release.
    pub fn on_fill_done(&self, index: usize) -> std::result::Result<(), PoolError> {
        let mut inner = self.shared.lock();
        if inner.phase != PoolPhase::Started {
            return Err(PoolError::NotStarted);
        }
        let entry = inner
            .entries
            .get_mut(index)
            .ok_or(PoolError::MissingSlot(index))?;
        entry.quarantined = false;
        let filled = entry.slot.filled_len();

        let is_output = inner
            .definition
            .as_ref()
            .is_some_and(|d| d.direction == PortDirection::Output);
        if is_output {
            inner.current_index = Some(index);
        }
        tracing::trace!(index, filled, "fill done");
        Ok(())
    }

    /// The component finished consuming input slot `index`.
    pub fn on_empty_done(&self, index: usize) -> std::result::Result<(), PoolError> {
        let mut inner = self.shared.lock();
        if inner.phase != PoolPhase::Started {
            return Err(PoolError::NotStarted);
        }
        let entry = inner
            .entries
            .get_mut(index)
            .ok_or(PoolError::MissingSlot(index))?;
        entry.quarantined = false;
        tracing::trace!(index, "empty done");
        Ok(())
    }

    /// Mark the port as disabled. While deactivated, returned buffers stay
    /// in the pool without being handed to the component.
    pub fn set_deactivated(&self, deactivated: bool) {
        let mut inner = self.shared.lock();
        inner.deactivated = deactivated;
        tracing::debug!(pool = %self.shared.name, deactivated, "deactivation changed");
    }

    /// Detach the port. A later [`start`](Self::start) fails.
    pub fn unbind(&self) {
        let mut inner = self.shared.lock();
        inner.port = None;
        tracing::debug!(pool = %self.shared.name, "port unbound");
    }

    /// Stop the pool.
    ///
    /// Frees every buffer in the pool (restoring borrowed memory) and drops
    /// the configuration. Buffers still held by consumers are freed when
    /// they come back; until then a later run keeps their slots in flight.
    /// Exported descriptors stay exported until the pool is dropped.
    pub fn stop(&self) {
        let _guard = self.span.enter();
        let mut inner = self.shared.lock();
        if inner.phase == PoolPhase::Stopped {
            return;
        }

        let held: Vec<usize> = inner
            .entries
            .iter()
            .filter(|e| e.buffer.is_none())
            .map(|e| e.slot.index())
            .collect();
        let outstanding = held.len();
        inner.stale_slots.extend(held);
        let buffers = inner.reset_buffers();
        inner.epoch += 1;
        inner.config = None;
        inner.video_info = None;
        inner.attach_meta = false;
        inner.phase = PoolPhase::Stopped;
        drop(inner);

        let freed = buffers.len();
        for buffer in buffers {
            buffer.free();
        }
        self.shared.metrics.record_idle(0);
        tracing::debug!(freed, outstanding, "pool stopped");
    }

    /// Ownership state of the buffer for slot `index`.
    pub fn state_of(&self, index: usize) -> Option<BufferState> {
        self.shared.lock().entries.get(index).map(Entry::state)
    }

    /// Number of buffers built.
    pub fn capacity(&self) -> usize {
        self.shared.lock().entries.len()
    }

    /// Whether users must copy frames out because the port layout differs
    /// from the default one and metadata was not requested.
    pub fn need_copy(&self) -> bool {
        self.shared.lock().need_copy
    }

    /// Whether buffers carry [`VideoMeta`] on request.
    pub fn attaches_video_meta(&self) -> bool {
        self.shared.lock().attach_meta
    }

    /// Occupancy and counters.
    pub fn stats(&self) -> PoolStats {
        let inner = self.shared.lock();
        let mut stats = PoolStats {
            capacity: inner.entries.len(),
            acquisitions: inner.counters.acquisitions,
            releases_to_port: inner.counters.releases_to_port,
            release_failures: inner.counters.release_failures,
            exhausted_searches: inner.counters.exhausted_searches,
            ..PoolStats::default()
        };
        for entry in &inner.entries {
            match entry.state() {
                BufferState::Idle => stats.idle += 1,
                BufferState::Acquired => stats.acquired += 1,
                BufferState::InFlight => stats.in_flight += 1,
            }
        }
        stats
    }

    /// The export registry, for decoders exporting DMA-BUF.
    pub fn exports(&self) -> Option<&ExportRegistry> {
        self.shared.exports.as_ref()
    }
}

impl Drop for PortBufferPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PortBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("PortBufferPool")
            .field("name", &self.shared.name)
            .field("role", &self.shared.role)
            .field("phase", &inner.phase)
            .field("buffers", &inner.entries.len())
            .field("exports", &self.shared.exports)
            .finish()
    }
}
