use std::fmt::{Debug, Formatter};

use ash::vk;
use ash::vk::Handle;

/// A semaphore wait or signal operation. Binary semaphores carry no value.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SemaphoreOp {
    pub semaphore: vk::Semaphore,
    pub value: Option<u64>,
}

impl SemaphoreOp {
    pub fn new_binary(semaphore: vk::Semaphore) -> Self {
        Self {
            semaphore,
            value: None,
        }
    }

    pub fn new_timeline(semaphore: vk::Semaphore, value: u64) -> Self {
        Self {
            semaphore,
            value: Some(value),
        }
    }

    pub fn is_timeline(&self) -> bool {
        self.value.is_some()
    }
}

impl Debug for SemaphoreOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.value {
            Some(value) => f.write_fmt(format_args!("SemaphoreOp(Timeline: {:#016X}, Value: {})", self.semaphore.as_raw(), value)),
            None => f.write_fmt(format_args!("SemaphoreOp(Binary: {:#016X})", self.semaphore.as_raw())),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SemaphoreWait {
    pub op: SemaphoreOp,
    pub stage: vk::PipelineStageFlags,
}

impl SemaphoreWait {
    pub fn new(op: SemaphoreOp, stage: vk::PipelineStageFlags) -> Self {
        Self {
            op,
            stage,
        }
    }
}

/// A fence owned by the caller. Tracks whether a signal operation has been submitted so that
/// a fence can not be submitted twice without being reset.
pub struct Fence {
    handle: vk::Fence,
    pending: bool,
}

impl Fence {
    pub(crate) fn new(handle: vk::Fence, signaled: bool) -> Self {
        Self {
            handle,
            pending: signaled,
        }
    }

    pub fn get_handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub(crate) fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }
}

impl Debug for Fence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("vkFence(Handle: {:#016X}, Pending: {})", self.handle.as_raw(), self.pending))
    }
}
