//! Utilities to support creating transient memory allocators

use std::fmt::{Debug, Formatter};

use ash::vk;

/// Rounds `base` up to the next multiple of `alignment`. An alignment of 0 is treated as 1.
pub const fn next_aligned(base: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        return base;
    }
    let rem = base % alignment;
    if rem == 0 {
        base
    } else {
        base + (alignment - rem)
    }
}

/// Rounds `base` down to the previous multiple of `alignment`.
pub const fn prev_aligned(base: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        return base;
    }
    base - (base % alignment)
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct RingOverflow {
    pub requested: vk::DeviceSize,
    pub available: vk::DeviceSize,
}

impl Debug for RingOverflow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("RingOverflow{{ requested: {}, available: {} }}", self.requested, self.available))
    }
}

/// A bump allocator over a buffer split into `slot_count` equally sized slots.
///
/// Only one slot is active at a time. Allocations bump the end cursor of the active slot and never
/// cross into the next slot. The allocator additionally tracks how far the slot has been flushed
/// so that everything written since the last [`SlotRing::mark_flushed`] forms one range.
pub struct SlotRing {
    slot_size: vk::DeviceSize,
    slot_count: u32,
    slot: u32,
    flushed: vk::DeviceSize,
    end: vk::DeviceSize,
    wrapped: bool,
}

impl SlotRing {
    pub fn new(slot_size: vk::DeviceSize, slot_count: u32) -> Self {
        if slot_count == 0 {
            log::error!("Slot ring needs at least one slot");
            panic!()
        }

        Self {
            slot_size,
            slot_count,
            slot: 0,
            flushed: 0,
            end: 0,
            wrapped: false,
        }
    }

    pub fn slot_size(&self) -> vk::DeviceSize {
        self.slot_size
    }

    pub fn total_size(&self) -> vk::DeviceSize {
        self.slot_size * (self.slot_count as vk::DeviceSize)
    }

    pub fn current_slot(&self) -> u32 {
        self.slot
    }

    pub fn slot_base(&self) -> vk::DeviceSize {
        self.slot_size * (self.slot as vk::DeviceSize)
    }

    pub fn slot_limit(&self) -> vk::DeviceSize {
        self.slot_size * ((self.slot + 1) as vk::DeviceSize)
    }

    /// Activates `slot` and resets its cursors to the slot base.
    pub fn reset_slot(&mut self, slot: u32) {
        if slot >= self.slot_count {
            log::error!("Slot {} out of range for ring with {} slots", slot, self.slot_count);
            panic!()
        }

        self.slot = slot;
        self.flushed = self.slot_base();
        self.end = self.flushed;
        self.wrapped = false;
    }

    /// Returns the `(start, end)` range written since the slot was reset or last marked flushed.
    ///
    /// If the ring wrapped since then the whole slot is returned.
    pub fn unflushed(&self) -> (vk::DeviceSize, vk::DeviceSize) {
        if self.wrapped {
            (self.slot_base(), self.slot_limit())
        } else {
            (self.flushed, self.end)
        }
    }

    pub fn mark_flushed(&mut self) {
        self.flushed = self.end;
        self.wrapped = false;
    }

    pub fn used(&self) -> vk::DeviceSize {
        self.end - self.slot_base()
    }

    pub fn allocate(&mut self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Result<vk::DeviceSize, RingOverflow> {
        let offset = next_aligned(self.end, alignment);
        let limit = self.slot_limit();

        if offset + size > limit {
            return Err(RingOverflow {
                requested: size,
                available: limit.saturating_sub(offset),
            });
        }

        self.end = offset + size;
        Ok(offset)
    }

    /// Resets the cursor of the active slot back to the slot base. Anything allocated before will
    /// be overwritten by following allocations.
    pub fn wrap(&mut self) {
        self.end = self.slot_base();
        self.wrapped = true;
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn test_next_aligned() {
        assert_eq!(next_aligned(0, 256), 0);
        assert_eq!(next_aligned(1, 256), 256);
        assert_eq!(next_aligned(256, 256), 256);
        assert_eq!(next_aligned(257, 4), 260);
        assert_eq!(next_aligned(13, 0), 13);
        assert_eq!(prev_aligned(257, 256), 256);
        assert_eq!(prev_aligned(255, 1), 255);
    }

    #[test]
    fn test_slot_bounds() {
        let mut ring = SlotRing::new(1024, 3);
        ring.reset_slot(2);

        assert_eq!(ring.slot_base(), 2048);
        assert_eq!(ring.slot_limit(), 3072);
        assert_eq!(ring.allocate(1000, 16), Ok(2048));
        assert_eq!(ring.allocate(24, 1), Ok(3048));
        assert_eq!(ring.allocate(1, 1), Err(RingOverflow { requested: 1, available: 0 }));
    }

    #[test]
    fn test_unflushed_tracking() {
        let mut ring = SlotRing::new(4096, 2);
        ring.reset_slot(1);

        ring.allocate(100, 1).unwrap();
        assert_eq!(ring.unflushed(), (4096, 4196));
        ring.mark_flushed();
        assert_eq!(ring.unflushed(), (4196, 4196));

        ring.allocate(64, 64).unwrap();
        assert_eq!(ring.unflushed(), (4196, 4288));

        ring.wrap();
        assert_eq!(ring.unflushed(), (4096, 8192));
        assert_eq!(ring.allocate(8, 8), Ok(4096));
        ring.mark_flushed();
        assert_eq!(ring.unflushed(), (4104, 4104));

        ring.reset_slot(0);
        assert_eq!(ring.unflushed(), (0, 0));
    }

    #[test]
    fn test_random_allocations_monotonic() {
        let mut rng = rand::thread_rng();
        let mut ring = SlotRing::new(1 << 16, 4);

        for slot in 0..4 {
            ring.reset_slot(slot);
            let mut last = ring.slot_base();
            loop {
                let size = rng.gen_range(1..512u64);
                let alignment = 1u64 << rng.gen_range(0..9u32);
                match ring.allocate(size, alignment) {
                    Ok(offset) => {
                        assert!(offset >= last);
                        assert_eq!(offset % alignment, 0);
                        assert!(offset + size <= ring.slot_limit());
                        last = offset + size;
                    }
                    Err(_) => break,
                }
            }
        }
    }
}
