//! The native device seam.
//!
//! [`Backend`] mirrors the subset of the Vulkan device api used by the graphics device. All
//! functions are expected to succeed. Native errors are device errors and implementations log them
//! and panic.

pub mod allocator;
pub mod vulkan;
pub mod capture;

use std::ptr::NonNull;

use ash::vk;

use crate::objects::{Barrier, FramebufferLayout, ImageBlit, ImageCopy, InheritanceInfo, InputLayout, Pass, SemaphoreOp, SemaphoreWait, ShaderProgram, VertexLayout};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
    Sparse,
}

impl QueueType {
    pub const COUNT: usize = 4;

    pub const ALL: [QueueType; Self::COUNT] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer, QueueType::Sparse];

    pub const fn index(&self) -> usize {
        match self {
            QueueType::Graphics => 0,
            QueueType::Compute => 1,
            QueueType::Transfer => 2,
            QueueType::Sparse => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueType::Graphics => "Graphics",
            QueueType::Compute => "Compute",
            QueueType::Transfer => "Transfer",
            QueueType::Sparse => "Sparse",
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DeviceLimits {
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    pub non_coherent_atom_size: vk::DeviceSize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            non_coherent_atom_size: 64,
        }
    }
}

/// The fragments a graphics pipeline is built from.
#[derive(Copy, Clone)]
pub struct GraphicsPipelineDesc<'a> {
    pub program: &'a ShaderProgram,
    pub vertex_layout: &'a VertexLayout,
    pub framebuffer: &'a FramebufferLayout,
    pub input: &'a InputLayout,
    /// Overrides the program's polygon mode with [`vk::PolygonMode::LINE`].
    pub wireframe: bool,
}

/// One native queue submission.
#[derive(Copy, Clone)]
pub struct QueueSubmit<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub waits: &'a [SemaphoreWait],
    pub signals: &'a [SemaphoreOp],
}

/// A persistently mapped host visible buffer.
pub struct MappedBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    ptr: NonNull<u8>,
}

// The mapping is valid for the lifetime of the buffer and only written through exclusive ranges.
unsafe impl Send for MappedBuffer {
}

impl MappedBuffer {
    /// # Safety
    /// `ptr` must point to a host mapping of at least `size` bytes that stays valid until the
    /// buffer is destroyed.
    pub unsafe fn new(buffer: vk::Buffer, size: vk::DeviceSize, ptr: NonNull<u8>) -> Self {
        Self {
            buffer,
            size,
            ptr,
        }
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

pub trait Backend: Send + Sync {
    fn limits(&self) -> DeviceLimits;

    fn create_command_pool(&self, queue: QueueType) -> vk::CommandPool;

    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn reset_command_pool(&self, pool: vk::CommandPool);

    fn allocate_command_buffer(&self, pool: vk::CommandPool, level: vk::CommandBufferLevel) -> vk::CommandBuffer;

    /// Begins recording. Secondary command buffers must pass the render pass they continue.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, inheritance: Option<&InheritanceInfo>);

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer);

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, pass: &Pass, contents: vk::SubpassContents);

    fn cmd_next_subpass(&self, command_buffer: vk::CommandBuffer, contents: vk::SubpassContents);

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);

    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]);

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);

    fn cmd_bind_descriptor_sets(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet], offsets: &[u32]);

    fn cmd_set_viewports(&self, command_buffer: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]);

    fn cmd_set_scissors(&self, command_buffer: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]);

    fn cmd_push_constants(&self, command_buffer: vk::CommandBuffer, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]);

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize);

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType);

    fn cmd_pipeline_barrier(&self, command_buffer: vk::CommandBuffer, barrier: &Barrier);

    fn cmd_set_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags);

    fn cmd_reset_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags);

    fn cmd_wait_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, barrier: &Barrier);

    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32);

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32);

    fn cmd_copy_image(&self, command_buffer: vk::CommandBuffer, copy: &ImageCopy);

    fn cmd_blit_image(&self, command_buffer: vk::CommandBuffer, blit: &ImageBlit);

    fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, name: &str, color: [f32; 4]);

    fn cmd_insert_label(&self, command_buffer: vk::CommandBuffer, name: &str, color: [f32; 4]);

    fn cmd_end_label(&self, command_buffer: vk::CommandBuffer);

    /// Attaches a debug name to a native object. Does nothing without debug utils.
    fn set_object_name(&self, object_type: vk::ObjectType, handle: u64, name: &str);

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> vk::Pipeline;

    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    /// Creates a binary semaphore or, if `initial_value` is set, a timeline semaphore.
    fn create_semaphore(&self, initial_value: Option<u64>) -> vk::Semaphore;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Waits until the timeline semaphore reaches `value`. Returns false on timeout.
    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> bool;

    fn create_fence(&self, signaled: bool) -> vk::Fence;

    fn destroy_fence(&self, fence: vk::Fence);

    fn get_fence_status(&self, fence: vk::Fence) -> bool;

    /// Returns false on timeout.
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> bool;

    fn reset_fence(&self, fence: vk::Fence);

    fn queue_submit(&self, queue: QueueType, submit: &QueueSubmit, fence: vk::Fence);

    fn queue_wait_idle(&self, queue: QueueType);

    fn queue_begin_label(&self, queue: QueueType, name: &str, color: [f32; 4]);

    fn queue_insert_label(&self, queue: QueueType, name: &str, color: [f32; 4]);

    fn queue_end_label(&self, queue: QueueType);

    fn create_mapped_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> MappedBuffer;

    fn destroy_mapped_buffer(&self, buffer: MappedBuffer);

    /// Makes host writes to `[offset, offset + size)` visible to the device.
    fn flush_mapped_range(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize);
}
