//! In-process doubles for the collaborators of a port pool.
//!
//! - [`MockPort`]: a codec port whose slots live in heap memory
//! - [`MemfdExporter`]: a DMA exporter handing out real descriptors from
//!   `memfd_create`
//! - [`RecordingPool`]: an external pool that counts lends and restores
//!
//! These are meant for tests and benchmarks; they panic where a real
//! collaborator would report an error.

use crate::buffer::{ExternalBuffer, ExternalPool};
use crate::error::{CodecError, ExportError};
use crate::memory::{DmaExporter, ExportId, ExportedDmaBuf, HeapSegment, MemorySegment};
use crate::port::{CodecPort, HardwareBufferSlot, PortDefinition};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const MIN_SLOT_SIZE: usize = 4096;

type ReleaseHook = Arc<dyn Fn(&HardwareBufferSlot) + Send + Sync>;

/// Codec port backed by heap memory.
///
/// Releasing a slot to the port marks it in flight; [`complete`] plays the
/// component finishing it.
///
/// [`complete`]: MockPort::complete
pub struct MockPort {
    definition: PortDefinition,
    slots: Vec<Arc<HardwareBufferSlot>>,
    live: AtomicBool,
    releases: AtomicUsize,
    fail_with: Mutex<Option<CodecError>>,
    on_release: Mutex<Option<ReleaseHook>>,
}

impl MockPort {
    /// Port with one heap slot per buffer, large enough for a 4:2:2 frame of
    /// the port geometry.
    ///
    /// # Panics
    ///
    /// Panics if slot memory cannot be allocated.
    pub fn new(definition: PortDefinition) -> Self {
        let size = (definition.stride as usize * definition.slice_height as usize * 2)
            .max(MIN_SLOT_SIZE);
        Self::with_slot_size(definition, size)
    }

    /// Port with slots of an explicit size.
    ///
    /// # Panics
    ///
    /// Panics if slot memory cannot be allocated.
    pub fn with_slot_size(definition: PortDefinition, size: usize) -> Self {
        let slots = (0..definition.buffer_count)
            .map(|i| Arc::new(HardwareBufferSlot::new(i, heap(size))))
            .collect();
        Self::from_slots(definition, slots)
    }

    /// Port whose slots report the given physical addresses, one per slot.
    ///
    /// # Panics
    ///
    /// Panics if `addresses` does not hold one address per buffer.
    pub fn with_physical_addresses(definition: PortDefinition, addresses: &[u64]) -> Self {
        assert_eq!(addresses.len(), definition.buffer_count, "one address per slot");
        let size = (definition.stride as usize * definition.slice_height as usize * 2)
            .max(MIN_SLOT_SIZE);
        let slots = addresses
            .iter()
            .enumerate()
            .map(|(i, &phys)| Arc::new(HardwareBufferSlot::new(i, heap(size)).with_physical_address(phys)))
            .collect();
        Self::from_slots(definition, slots)
    }

    fn from_slots(definition: PortDefinition, slots: Vec<Arc<HardwareBufferSlot>>) -> Self {
        Self {
            definition,
            slots,
            live: AtomicBool::new(true),
            releases: AtomicUsize::new(0),
            fail_with: Mutex::new(None),
            on_release: Mutex::new(None),
        }
    }

    /// Slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if there is no such slot.
    pub fn slot_at(&self, index: usize) -> Arc<HardwareBufferSlot> {
        self.slots[index].clone()
    }

    /// Complete slot `index`: record the filled range and take it off the
    /// hardware.
    pub fn complete(&self, index: usize, offset: usize, len: usize) {
        let slot = &self.slots[index];
        slot.set_filled(offset, len);
        slot.set_in_flight(false);
    }

    /// Make the component appear alive or gone.
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    /// Make every following release fail with `error`, or succeed again
    /// with `None`.
    pub fn fail_releases(&self, error: Option<CodecError>) {
        *self.fail_with.lock().unwrap_or_else(|p| p.into_inner()) = error;
    }

    /// Run `hook` inside every successful release, after the slot is marked
    /// in flight. Plays a component that completes slots synchronously.
    pub fn on_release(&self, hook: impl Fn(&HardwareBufferSlot) + Send + Sync + 'static) {
        *self.on_release.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(hook));
    }

    /// Number of successful releases to the port.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Acquire)
    }
}

impl CodecPort for MockPort {
    fn definition(&self) -> PortDefinition {
        self.definition.clone()
    }

    fn slot(&self, index: usize) -> Option<Arc<HardwareBufferSlot>> {
        self.slots.get(index).cloned()
    }

    fn release_to_port(&self, slot: &HardwareBufferSlot) -> Result<(), CodecError> {
        if let Some(error) = *self.fail_with.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(error);
        }
        slot.set_in_flight(true);
        self.releases.fetch_add(1, Ordering::AcqRel);
        let hook = self.on_release.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(hook) = hook {
            hook(slot);
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MockPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPort")
            .field("definition", &self.definition)
            .field("releases", &self.releases())
            .finish()
    }
}

fn heap(size: usize) -> Arc<dyn MemorySegment> {
    Arc::new(HeapSegment::new(size).expect("failed to allocate slot memory"))
}

/// DMA exporter producing `memfd` descriptors.
///
/// Ids are assigned from 0 in export order. The physical address is only
/// recorded; the descriptor is fresh zeroed memory of the requested length.
#[derive(Debug, Default)]
pub struct MemfdExporter {
    next_id: AtomicI32,
    attempts: AtomicUsize,
    fail_after: Option<usize>,
    requests: Mutex<Vec<(u64, usize)>>,
    unexported: Mutex<Vec<ExportId>>,
}

impl MemfdExporter {
    /// Exporter that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` exports succeed, then refuse every following one.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Successful requests as `(page-aligned address, length)`, in order.
    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Ids ended so far, in order.
    pub fn unexported(&self) -> Vec<ExportId> {
        self.unexported.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl DmaExporter for MemfdExporter {
    fn export(&self, phys_addr: u64, len: usize) -> Result<ExportedDmaBuf, ExportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel);
        if self.fail_after.is_some_and(|n| attempt >= n) {
            return Err(ExportError::Refused { phys_addr, len });
        }

        let fd = rustix::fs::memfd_create("portpool-export", rustix::fs::MemfdFlags::CLOEXEC)?;
        rustix::fs::ftruncate(&fd, len as u64)?;

        let id = ExportId(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((phys_addr, len));
        Ok(ExportedDmaBuf { id, fd })
    }

    fn unexport(&self, id: ExportId) {
        self.unexported
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(id);
    }
}

/// External pool that lends heap buffers and counts restores.
pub struct RecordingPool {
    name: String,
    free: Mutex<VecDeque<ExternalBuffer>>,
    lent: AtomicUsize,
    restored: AtomicUsize,
}

impl RecordingPool {
    /// Pool with nothing to lend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            free: Mutex::new(VecDeque::new()),
            lent: AtomicUsize::new(0),
            restored: AtomicUsize::new(0),
        }
    }

    /// Pool with `count` single-memory buffers of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if the memory cannot be allocated.
    pub fn with_buffers(name: impl Into<String>, count: usize, size: usize) -> Self {
        let pool = Self::new(name);
        pool.free
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend((0..count).map(|_| ExternalBuffer::new(heap(size))));
        pool
    }

    /// Add a buffer to lend.
    pub fn push(&self, buffer: ExternalBuffer) {
        self.free
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(buffer);
    }

    /// Buffers lent so far.
    pub fn lent(&self) -> usize {
        self.lent.load(Ordering::Acquire)
    }

    /// Buffers restored so far.
    pub fn restored(&self) -> usize {
        self.restored.load(Ordering::Acquire)
    }

    /// Buffers lent and not yet restored.
    pub fn outstanding(&self) -> usize {
        self.lent() - self.restored()
    }
}

impl ExternalPool for RecordingPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn lend(&self) -> Option<ExternalBuffer> {
        let buffer = self
            .free
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()?;
        self.lent.fetch_add(1, Ordering::AcqRel);
        Some(buffer)
    }

    fn restore(&self, buffer: ExternalBuffer) {
        self.restored.fetch_add(1, Ordering::AcqRel);
        self.push(buffer);
    }
}

impl std::fmt::Debug for RecordingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingPool")
            .field("name", &self.name)
            .field("available", &self.available())
            .field("lent", &self.lent())
            .field("restored", &self.restored())
            .finish()
    }
}
