//! Owned barrier and event descriptions.
//!
//! The native barrier structs carry `p_next` pointers and can not be moved between threads. These
//! types hold the same information as plain data and are converted when the barrier is recorded.

use ash::vk;

#[derive(Copy, Clone, Debug)]
pub struct MemoryBarrier {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl MemoryBarrier {
    pub fn to_vk(&self) -> vk::MemoryBarrier {
        vk::MemoryBarrier::builder()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .build()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

impl BufferBarrier {
    pub fn new(buffer: vk::Buffer, src_access: vk::AccessFlags, dst_access: vk::AccessFlags) -> Self {
        Self {
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE,
            src_access,
            dst_access,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }

    pub fn to_vk(&self) -> vk::BufferMemoryBarrier {
        vk::BufferMemoryBarrier::builder()
            .buffer(self.buffer)
            .offset(self.offset)
            .size(self.size)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(self.src_queue_family)
            .dst_queue_family_index(self.dst_queue_family)
            .build()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub range: vk::ImageSubresourceRange,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

impl ImageBarrier {
    pub fn new(image: vk::Image, range: vk::ImageSubresourceRange, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        Self {
            image,
            range,
            old_layout,
            new_layout,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::empty(),
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }

    pub fn access(mut self, src: vk::AccessFlags, dst: vk::AccessFlags) -> Self {
        self.src_access = src;
        self.dst_access = dst;
        self
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .image(self.image)
            .subresource_range(self.range)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(self.src_queue_family)
            .dst_queue_family_index(self.dst_queue_family)
            .build()
    }
}

/// A pipeline barrier with any number of memory, buffer and image barriers.
#[derive(Clone, Debug)]
pub struct Barrier {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dependency: vk::DependencyFlags,
    pub memory: Vec<MemoryBarrier>,
    pub buffers: Vec<BufferBarrier>,
    pub images: Vec<ImageBarrier>,
}

impl Barrier {
    pub fn new(src_stage: vk::PipelineStageFlags, dst_stage: vk::PipelineStageFlags) -> Self {
        Self {
            src_stage,
            dst_stage,
            dependency: vk::DependencyFlags::empty(),
            memory: Vec::new(),
            buffers: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn by_region(mut self) -> Self {
        self.dependency |= vk::DependencyFlags::BY_REGION;
        self
    }

    pub fn memory(mut self, barrier: MemoryBarrier) -> Self {
        self.memory.push(barrier);
        self
    }

    pub fn buffer(mut self, barrier: BufferBarrier) -> Self {
        self.buffers.push(barrier);
        self
    }

    pub fn image(mut self, barrier: ImageBarrier) -> Self {
        self.images.push(barrier);
        self
    }

    pub fn vk_memory_barriers(&self) -> Vec<vk::MemoryBarrier> {
        self.memory.iter().map(MemoryBarrier::to_vk).collect()
    }

    pub fn vk_buffer_barriers(&self) -> Vec<vk::BufferMemoryBarrier> {
        self.buffers.iter().map(BufferBarrier::to_vk).collect()
    }

    pub fn vk_image_barriers(&self) -> Vec<vk::ImageMemoryBarrier> {
        self.images.iter().map(ImageBarrier::to_vk).collect()
    }
}

/// A native event together with the stage it is signaled at and the dependency waited on.
#[derive(Clone, Debug)]
pub struct Event {
    pub handle: vk::Event,
    pub signal_stage: vk::PipelineStageFlags,
    pub wait: Barrier,
}

impl Event {
    pub fn new(handle: vk::Event, signal_stage: vk::PipelineStageFlags, wait: Barrier) -> Self {
        Self {
            handle,
            signal_stage,
            wait,
        }
    }
}
