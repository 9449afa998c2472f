//! Per queue submission timelines.
//!
//! Every queue owns one timeline semaphore. Each flush submits everything appended since the last
//! flush as one native submission which signals the semaphore with the next timeline index. Work
//! on other queues depends on a flush by waiting for that index.

use std::sync::Arc;

use ash::vk;

use crate::backend::{Backend, QueueSubmit, QueueType};
use crate::objects::{SemaphoreOp, SemaphoreWait};

const WAIT_TIMEOUT_NS: u64 = 1_000_000_000;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TimelineWait {
    /// Wait for the latest work of a queue. Resolves to the index the next flush of that queue
    /// signals if it has pending work, otherwise to its last flushed index.
    Queue(QueueType),
    Semaphore(SemaphoreOp),
}

struct QueueTimeline {
    semaphore: vk::Semaphore,
    index: u64,
    command_buffers: Vec<vk::CommandBuffer>,
    waits: Vec<SemaphoreWait>,
    signals: Vec<SemaphoreOp>,
}

impl QueueTimeline {
    fn new(backend: &dyn Backend) -> Self {
        Self {
            semaphore: backend.create_semaphore(Some(0)),
            index: 0,
            command_buffers: Vec::new(),
            waits: Vec::new(),
            signals: Vec::new(),
        }
    }

    fn has_pending(&self) -> bool {
        !self.command_buffers.is_empty()
    }

    fn add_wait(&mut self, wait: SemaphoreWait) {
        let existing = self.waits.iter_mut().find(|other| other.op.semaphore == wait.op.semaphore);
        match existing {
            Some(existing) => {
                existing.stage |= wait.stage;
                existing.op.value = match (existing.op.value, wait.op.value) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            }
            None => self.waits.push(wait),
        }
    }
}

pub struct SubmissionTimeline {
    backend: Arc<dyn Backend>,
    queues: [QueueTimeline; QueueType::COUNT],
}

impl SubmissionTimeline {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let queues = [
            QueueTimeline::new(backend.as_ref()),
            QueueTimeline::new(backend.as_ref()),
            QueueTimeline::new(backend.as_ref()),
            QueueTimeline::new(backend.as_ref()),
        ];

        Self {
            backend,
            queues,
        }
    }

    fn queue(&self, queue: QueueType) -> &QueueTimeline {
        &self.queues[queue.index()]
    }

    fn queue_mut(&mut self, queue: QueueType) -> &mut QueueTimeline {
        &mut self.queues[queue.index()]
    }

    pub fn semaphore(&self, queue: QueueType) -> vk::Semaphore {
        self.queue(queue).semaphore
    }

    pub fn current_index(&self, queue: QueueType) -> u64 {
        self.queue(queue).index
    }

    pub fn has_pending(&self, queue: QueueType) -> bool {
        self.queue(queue).has_pending()
    }

    pub fn append_submission(&mut self, queue: QueueType, command_buffer: vk::CommandBuffer) {
        log::trace!("Appending {:?} to {} timeline", command_buffer, queue.name());
        self.queue_mut(queue).command_buffers.push(command_buffer);
    }

    /// Returns false if the wait was skipped.
    pub fn append_wait(&mut self, queue: QueueType, stage: vk::PipelineStageFlags, wait: TimelineWait) -> bool {
        let op = match wait {
            TimelineWait::Queue(other) => {
                if other == queue {
                    return false;
                }
                let timeline = self.queue(other);
                let index = timeline.index + if timeline.has_pending() { 1 } else { 0 };
                if index == 0 {
                    return false;
                }
                SemaphoreOp::new_timeline(timeline.semaphore, index)
            }
            TimelineWait::Semaphore(op) => op,
        };

        self.queue_mut(queue).add_wait(SemaphoreWait::new(op, stage));
        true
    }

    pub fn append_signal(&mut self, queue: QueueType, op: SemaphoreOp) {
        self.queue_mut(queue).signals.push(op);
    }

    pub fn pending_waits(&self, queue: QueueType) -> &[SemaphoreWait] {
        &self.queue(queue).waits
    }

    /// Submits everything appended to `queue` and returns the timeline index the submission signals.
    pub fn flush(&mut self, queue: QueueType, fence: Option<vk::Fence>) -> u64 {
        let backend = self.backend.clone();
        let timeline = self.queue_mut(queue);

        timeline.index += 1;
        let index = timeline.index;
        let semaphore = timeline.semaphore;

        let command_buffers = std::mem::take(&mut timeline.command_buffers);
        let waits = std::mem::take(&mut timeline.waits);
        let mut signals = std::mem::take(&mut timeline.signals);
        signals.push(SemaphoreOp::new_timeline(semaphore, index));

        log::trace!("Flushing {} timeline to index {} with {} command buffers", queue.name(), index, command_buffers.len());

        backend.queue_submit(queue, &QueueSubmit {
            command_buffers: &command_buffers,
            waits: &waits,
            signals: &signals,
        }, fence.unwrap_or_else(vk::Fence::null));

        index
    }

    /// Blocks until `queue` has completed the submission with timeline `index`.
    pub fn wait_for_index(&self, queue: QueueType, index: u64) {
        let semaphore = self.semaphore(queue);
        while !self.backend.wait_semaphore(semaphore, index, WAIT_TIMEOUT_NS) {
            log::warn!("Timeout while waiting for {} timeline index {}", queue.name(), index);
        }
    }

    /// Waits for the latest flushed submission of `queue`.
    pub fn wait_idle(&self, queue: QueueType) {
        let index = self.current_index(queue);
        if index > 0 {
            self.wait_for_index(queue, index);
        }
    }

    pub fn destroy(&mut self) {
        for timeline in &mut self.queues {
            if timeline.semaphore != vk::Semaphore::null() {
                self.backend.destroy_semaphore(timeline.semaphore);
                timeline.semaphore = vk::Semaphore::null();
            }
        }
    }
}

impl Drop for SubmissionTimeline {
    fn drop(&mut self) {
        self.destroy();
    }
}
