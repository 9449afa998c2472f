//! Per frame transient memory.
//!
//! Every [`TransientKind`] owns one persistently mapped buffer split into one slot per buffered
//! frame. Allocations bump a cursor inside the slot of the current frame and are never freed
//! individually; the slot is reset when the frame slot comes around again.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;

use crate::backend::{Backend, MappedBuffer};
use crate::device::config::GraphicsDeviceCreateInfo;
use crate::util::alloc::{next_aligned, SlotRing};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum TransientKind {
    GraphicsConstants,
    ComputeConstants,
    Vertex,
    Index,
}

impl TransientKind {
    pub const COUNT: usize = 4;

    pub const ALL: [TransientKind; Self::COUNT] = [
        TransientKind::GraphicsConstants,
        TransientKind::ComputeConstants,
        TransientKind::Vertex,
        TransientKind::Index,
    ];

    pub const fn index(&self) -> usize {
        match self {
            TransientKind::GraphicsConstants => 0,
            TransientKind::ComputeConstants => 1,
            TransientKind::Vertex => 2,
            TransientKind::Index => 3,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, TransientKind::GraphicsConstants | TransientKind::ComputeConstants)
    }

    fn usage(&self) -> vk::BufferUsageFlags {
        match self {
            TransientKind::GraphicsConstants | TransientKind::ComputeConstants => vk::BufferUsageFlags::UNIFORM_BUFFER,
            TransientKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            TransientKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RingOverflowPolicy {
    /// Overflowing a slot is a fatal error.
    Fail,

    /// Overflowing a slot logs an error and restarts at the slot base, overwriting memory the
    /// device may still read.
    Wrap,
}

const VERTEX_ALIGNMENT: vk::DeviceSize = 4;

// Slots start at a multiple of this so that every slot base satisfies any uniform alignment.
const SLOT_ALIGNMENT: vk::DeviceSize = 256;

/// A transient allocation. The memory stays valid until the frame slot is reused.
#[derive(Copy, Clone, Debug)]
pub struct TransientAllocation {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    ptr: NonNull<u8>,
}

impl TransientAllocation {
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Copies `data` to the start of the allocation.
    pub fn write(&self, data: &[u8]) {
        if data.len() as vk::DeviceSize > self.size {
            log::error!("Wrote {} bytes into transient allocation of {} bytes", data.len(), self.size);
            panic!()
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr(), data.len());
        }
    }
}

struct TransientRing {
    buffer: MappedBuffer,
    ring: SlotRing,
    alignment: vk::DeviceSize,
    overflows: u64,
}

pub struct TransientMemory {
    backend: Arc<dyn Backend>,
    rings: Vec<TransientRing>,
    policy: RingOverflowPolicy,
}

impl TransientMemory {
    pub fn new(backend: Arc<dyn Backend>, info: &GraphicsDeviceCreateInfo) -> Self {
        let limits = backend.limits();
        let slot_count = info.buffered_frames();

        let rings = TransientKind::ALL.iter().map(|kind| {
            let slot_size = next_aligned(info.transient_size(*kind), SLOT_ALIGNMENT);
            let ring = SlotRing::new(slot_size, slot_count);
            let buffer = backend.create_mapped_buffer(ring.total_size(), kind.usage());

            let alignment = if kind.is_constant() {
                limits.min_uniform_buffer_offset_alignment.max(1)
            } else {
                VERTEX_ALIGNMENT
            };

            TransientRing {
                buffer,
                ring,
                alignment,
                overflows: 0,
            }
        }).collect();

        Self {
            backend,
            rings,
            policy: info.ring_overflow_policy(),
        }
    }

    pub fn policy(&self) -> RingOverflowPolicy {
        self.policy
    }

    pub fn buffer(&self, kind: TransientKind) -> vk::Buffer {
        self.rings[kind.index()].buffer.buffer
    }

    /// Resets the cursors of every kind to the base of `slot`.
    pub fn reset_slot(&mut self, slot: u32) {
        for ring in &mut self.rings {
            ring.ring.reset_slot(slot);
        }
    }

    pub fn unflushed(&self, kind: TransientKind) -> (vk::DeviceSize, vk::DeviceSize) {
        self.rings[kind.index()].ring.unflushed()
    }

    /// Makes everything written to `kind` in the current slot that was not flushed yet visible
    /// to the device.
    pub fn flush(&mut self, kind: TransientKind) {
        let ring = &mut self.rings[kind.index()];
        let (start, end) = ring.ring.unflushed();
        if end > start {
            self.backend.flush_mapped_range(ring.buffer.buffer, start, end - start);
        }
        ring.ring.mark_flushed();
    }

    pub fn flush_all(&mut self) {
        for kind in TransientKind::ALL {
            self.flush(kind);
        }
    }

    pub fn used(&self, kind: TransientKind) -> vk::DeviceSize {
        self.rings[kind.index()].ring.used()
    }

    pub fn overflow_count(&self, kind: TransientKind) -> u64 {
        self.rings[kind.index()].overflows
    }

    pub fn allocate(&mut self, kind: TransientKind, size: vk::DeviceSize) -> TransientAllocation {
        let policy = self.policy;
        let ring = &mut self.rings[kind.index()];

        let offset = match ring.ring.allocate(size, ring.alignment) {
            Ok(offset) => offset,
            Err(overflow) => {
                if policy == RingOverflowPolicy::Fail || size > ring.ring.slot_size() {
                    log::error!("Transient {:?} memory exhausted: {:?} in slot {} with budget {}", kind, overflow, ring.ring.current_slot(), ring.ring.slot_size());
                    panic!()
                }

                log::error!("Transient {:?} memory exhausted: {:?}, wrapping to slot base and overwriting in flight data", kind, overflow);
                ring.overflows += 1;
                ring.ring.wrap();
                match ring.ring.allocate(size, ring.alignment) {
                    Ok(offset) => offset,
                    Err(overflow) => {
                        log::error!("Transient {:?} allocation does not fit an empty slot: {:?}", kind, overflow);
                        panic!()
                    }
                }
            }
        };

        let ptr = unsafe { NonNull::new_unchecked(ring.buffer.as_ptr().as_ptr().add(offset as usize)) };

        TransientAllocation {
            buffer: ring.buffer.buffer,
            offset,
            size,
            ptr,
        }
    }

    /// Allocates constant memory and returns its offset into [`TransientMemory::buffer`].
    pub fn allocate_constant_memory(&mut self, kind: TransientKind, size: vk::DeviceSize) -> vk::DeviceSize {
        if !kind.is_constant() {
            log::error!("Constant memory requested from {:?}", kind);
            panic!()
        }
        self.allocate(kind, size).offset
    }

    pub fn allocate_vertex_memory(&mut self, size: vk::DeviceSize) -> TransientAllocation {
        self.allocate(TransientKind::Vertex, size)
    }

    pub fn allocate_index_memory(&mut self, size: vk::DeviceSize) -> TransientAllocation {
        self.allocate(TransientKind::Index, size)
    }

    pub fn destroy(&mut self) {
        for ring in self.rings.drain(..) {
            self.backend.destroy_mapped_buffer(ring.buffer);
        }
    }
}

impl Drop for TransientMemory {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::capture::CaptureBackend;

    use super::*;

    fn make_memory(constant_budget: vk::DeviceSize, wrap: bool) -> (Arc<CaptureBackend>, TransientMemory) {
        let backend = Arc::new(CaptureBackend::new());
        let mut info = GraphicsDeviceCreateInfo::new();
        info.set_buffered_frames(2);
        info.set_transient_size(TransientKind::ComputeConstants, 4096);
        info.set_transient_size(TransientKind::Vertex, 4096);
        info.set_transient_size(TransientKind::Index, 4096);
        info.set_transient_size(TransientKind::GraphicsConstants, constant_budget);
        if wrap {
            info.allow_ring_wrap();
        }

        let memory = TransientMemory::new(backend.clone(), &info);
        (backend, memory)
    }

    #[test]
    fn test_constant_alignment() {
        let (_, mut memory) = make_memory(4096, false);
        memory.reset_slot(1);

        assert_eq!(memory.allocate_constant_memory(TransientKind::GraphicsConstants, 10), 4096);
        assert_eq!(memory.allocate_constant_memory(TransientKind::GraphicsConstants, 10), 4096 + 256);

        let vertices = memory.allocate_vertex_memory(6);
        let indices = memory.allocate_vertex_memory(6);
        assert_eq!(indices.offset - vertices.offset, 8);
    }

    #[test]
    fn test_write_and_flush() {
        let (backend, mut memory) = make_memory(4096, false);
        memory.reset_slot(0);

        let alloc = memory.allocate_vertex_memory(4);
        alloc.write(&[1, 2, 3, 4]);
        memory.flush(TransientKind::Vertex);

        let buffer = memory.buffer(TransientKind::Vertex);
        assert_eq!(backend.mapped_bytes(buffer, alloc.offset as usize, 4), vec![1, 2, 3, 4]);
        assert_eq!(backend.flushes(), vec![(buffer, 0, 4)]);

        // Nothing new was written
        memory.flush(TransientKind::Vertex);
        assert_eq!(backend.flushes().len(), 1);
    }

    #[test]
    fn test_flush_continues_after_last_flush() {
        let (backend, mut memory) = make_memory(4096, false);
        memory.reset_slot(1);

        memory.allocate_vertex_memory(16);
        memory.flush(TransientKind::Vertex);
        memory.allocate_vertex_memory(8);
        memory.allocate_constant_memory(TransientKind::ComputeConstants, 4);
        memory.flush_all();

        let vertex = memory.buffer(TransientKind::Vertex);
        let compute = memory.buffer(TransientKind::ComputeConstants);
        assert_eq!(backend.flushes(), vec![(vertex, 4096, 16), (compute, 4096, 4), (vertex, 4112, 8)]);
    }

    #[test]
    fn test_wrap_policy_resets_to_slot_base() {
        let (_, mut memory) = make_memory(1024, true);
        memory.reset_slot(1);

        let offsets: Vec<_> = (0..5).map(|_| memory.allocate_constant_memory(TransientKind::GraphicsConstants, 256)).collect();
        assert_eq!(offsets, vec![1024, 1280, 1536, 1792, 1024]);
        assert_eq!(memory.overflow_count(TransientKind::GraphicsConstants), 1);
    }

    #[test]
    #[should_panic]
    fn test_fail_policy_panics() {
        let (_, mut memory) = make_memory(1024, false);
        memory.reset_slot(0);
        for _ in 0..5 {
            memory.allocate_constant_memory(TransientKind::GraphicsConstants, 256);
        }
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let (backend, memory) = make_memory(1024, false);
        assert_eq!(backend.live_objects(), TransientKind::COUNT);
        drop(memory);
        assert_eq!(backend.live_objects(), 0);
    }
}
