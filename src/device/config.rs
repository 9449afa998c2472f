use ash::vk;

use crate::device::transient::{RingOverflowPolicy, TransientKind};
use crate::device::worker::MAX_DRAW_THREADS;

pub const MAX_BUFFERED_FRAMES: u32 = 8;

/// Construction time options of a [`crate::GraphicsDevice`].
#[derive(Clone, Debug)]
pub struct GraphicsDeviceCreateInfo {
    buffered_frames: u32,
    draw_threads: usize,
    transient_sizes: [vk::DeviceSize; TransientKind::COUNT],
    ring_overflow_policy: RingOverflowPolicy,
    enable_validation: bool,
}

impl GraphicsDeviceCreateInfo {
    pub fn new() -> Self {
        let mut transient_sizes = [0; TransientKind::COUNT];
        transient_sizes[TransientKind::GraphicsConstants.index()] = 8 * 1024 * 1024;
        transient_sizes[TransientKind::ComputeConstants.index()] = 8 * 1024 * 1024;
        transient_sizes[TransientKind::Vertex.index()] = 16 * 1024 * 1024;
        transient_sizes[TransientKind::Index.index()] = 4 * 1024 * 1024;

        Self {
            buffered_frames: 3,
            draw_threads: MAX_DRAW_THREADS,
            transient_sizes,
            ring_overflow_policy: RingOverflowPolicy::Fail,
            enable_validation: false,
        }
    }

    pub fn set_buffered_frames(&mut self, count: u32) {
        self.buffered_frames = count;
    }

    pub fn set_draw_threads(&mut self, count: usize) {
        self.draw_threads = count;
    }

    /// Sets the per frame budget in bytes of one transient memory kind.
    pub fn set_transient_size(&mut self, kind: TransientKind, size: vk::DeviceSize) {
        self.transient_sizes[kind.index()] = size;
    }

    /// Overwrites in flight transient memory on overflow instead of failing.
    pub fn allow_ring_wrap(&mut self) {
        self.ring_overflow_policy = RingOverflowPolicy::Wrap;
    }

    /// Enables debug labels and additional checks.
    pub fn enable_validation(&mut self) {
        self.enable_validation = true;
    }

    pub fn buffered_frames(&self) -> u32 {
        self.buffered_frames
    }

    pub fn draw_threads(&self) -> usize {
        self.draw_threads
    }

    pub fn transient_size(&self, kind: TransientKind) -> vk::DeviceSize {
        self.transient_sizes[kind.index()]
    }

    pub fn ring_overflow_policy(&self) -> RingOverflowPolicy {
        self.ring_overflow_policy
    }

    pub fn validation_enabled(&self) -> bool {
        self.enable_validation
    }

    pub(crate) fn validate(&self) {
        if self.buffered_frames == 0 || self.buffered_frames > MAX_BUFFERED_FRAMES {
            log::error!("Buffered frame count {} must be in 1..={}", self.buffered_frames, MAX_BUFFERED_FRAMES);
            panic!()
        }
        if self.draw_threads == 0 || self.draw_threads > MAX_DRAW_THREADS {
            log::error!("Draw thread count {} must be in 1..={}", self.draw_threads, MAX_DRAW_THREADS);
            panic!()
        }
        for kind in TransientKind::ALL {
            if self.transient_size(kind) == 0 {
                log::error!("Transient memory budget for {:?} must not be 0", kind);
                panic!()
            }
        }
    }
}

impl Default for GraphicsDeviceCreateInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let info = GraphicsDeviceCreateInfo::new();
        info.validate();
        assert_eq!(info.buffered_frames(), 3);
        assert_eq!(info.ring_overflow_policy(), RingOverflowPolicy::Fail);
    }

    #[test]
    #[should_panic]
    fn test_too_many_draw_threads() {
        let mut info = GraphicsDeviceCreateInfo::new();
        info.set_draw_threads(MAX_DRAW_THREADS + 1);
        info.validate();
    }
}
