use ash::vk;

use crate::backend::{Backend, QueueType};

const FENCE_TIMEOUT_NS: u64 = 1_000_000_000;

/// Command buffers allocated from one pool. Buffers are reused in allocation order after the pool
/// is reset.
struct PooledBuffers {
    pool: vk::CommandPool,
    level: vk::CommandBufferLevel,
    buffers: Vec<vk::CommandBuffer>,
    next: usize,
}

impl PooledBuffers {
    fn new(backend: &dyn Backend, queue: QueueType, level: vk::CommandBufferLevel) -> Self {
        Self {
            pool: backend.create_command_pool(queue),
            level,
            buffers: Vec::new(),
            next: 0,
        }
    }

    fn get(&mut self, backend: &dyn Backend) -> vk::CommandBuffer {
        if self.next == self.buffers.len() {
            self.buffers.push(backend.allocate_command_buffer(self.pool, self.level));
        }
        let buffer = self.buffers[self.next];
        self.next += 1;
        buffer
    }

    fn reset(&mut self, backend: &dyn Backend) {
        if self.next != 0 {
            backend.reset_command_pool(self.pool);
            self.next = 0;
        }
    }
}

/// The objects used by one buffered frame.
pub struct FrameSlot {
    main: Vec<PooledBuffers>,
    secondary: Vec<PooledBuffers>,
    fences: [vk::Fence; QueueType::COUNT],
    fence_pending: [bool; QueueType::COUNT],
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
}

impl FrameSlot {
    pub fn new(backend: &dyn Backend, draw_threads: usize) -> Self {
        let main = QueueType::ALL.iter().map(|queue| PooledBuffers::new(backend, *queue, vk::CommandBufferLevel::PRIMARY)).collect();
        let secondary = (0..draw_threads).map(|_| PooledBuffers::new(backend, QueueType::Graphics, vk::CommandBufferLevel::SECONDARY)).collect();
        let fences = [
            backend.create_fence(false),
            backend.create_fence(false),
            backend.create_fence(false),
            backend.create_fence(false),
        ];

        Self {
            main,
            secondary,
            fences,
            fence_pending: [false; QueueType::COUNT],
            image_available: backend.create_semaphore(None),
            render_finished: backend.create_semaphore(None),
        }
    }

    /// Waits for all work submitted with this slot's fences and resets the slot's command pools.
    pub fn recycle(&mut self, backend: &dyn Backend) {
        for queue in QueueType::ALL {
            let index = queue.index();
            if self.fence_pending[index] {
                while !backend.wait_fence(self.fences[index], FENCE_TIMEOUT_NS) {
                    log::warn!("Timeout while waiting for {} frame fence", queue.name());
                }
                backend.reset_fence(self.fences[index]);
                self.fence_pending[index] = false;
            }
        }

        for pool in self.main.iter_mut().chain(self.secondary.iter_mut()) {
            pool.reset(backend);
        }
    }

    pub fn next_main_buffer(&mut self, backend: &dyn Backend, queue: QueueType) -> vk::CommandBuffer {
        self.main[queue.index()].get(backend)
    }

    pub fn next_secondary_buffer(&mut self, backend: &dyn Backend, thread: usize) -> vk::CommandBuffer {
        self.secondary[thread].get(backend)
    }

    /// Returns the fence to submit with and marks it pending.
    pub fn take_fence(&mut self, queue: QueueType) -> vk::Fence {
        let index = queue.index();
        if self.fence_pending[index] {
            log::error!("{} frame fence submitted twice", queue.name());
            panic!()
        }
        self.fence_pending[index] = true;
        self.fences[index]
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }

    pub fn destroy(&mut self, backend: &dyn Backend) {
        for pool in self.main.drain(..).chain(self.secondary.drain(..)) {
            backend.destroy_command_pool(pool.pool);
        }
        for fence in self.fences {
            backend.destroy_fence(fence);
        }
        backend.destroy_semaphore(self.image_available);
        backend.destroy_semaphore(self.render_finished);
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::capture::CaptureBackend;

    use super::*;

    #[test]
    fn test_buffers_reused_after_recycle() {
        let backend = CaptureBackend::new();
        let mut slot = FrameSlot::new(&backend, 2);

        let first = slot.next_main_buffer(&backend, QueueType::Graphics);
        let second = slot.next_main_buffer(&backend, QueueType::Graphics);
        assert_ne!(first, second);

        slot.recycle(&backend);
        assert_eq!(slot.next_main_buffer(&backend, QueueType::Graphics), first);
        assert_ne!(slot.next_secondary_buffer(&backend, 0), slot.next_secondary_buffer(&backend, 1));
    }

    #[test]
    fn test_recycle_resets_pending_fences() {
        let backend = CaptureBackend::new();
        let mut slot = FrameSlot::new(&backend, 1);

        let fence = slot.take_fence(QueueType::Compute);
        backend.queue_submit(QueueType::Compute, &crate::backend::QueueSubmit { command_buffers: &[], waits: &[], signals: &[] }, fence);
        assert!(backend.get_fence_status(fence));

        slot.recycle(&backend);
        assert!(!backend.get_fence_status(fence));
        assert_eq!(slot.take_fence(QueueType::Compute), fence);
    }

    #[test]
    fn test_destroy_releases_objects() {
        let backend = CaptureBackend::new();
        let mut slot = FrameSlot::new(&backend, 3);
        slot.destroy(&backend);
        assert_eq!(backend.live_objects(), 0);
    }
}
