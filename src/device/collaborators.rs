//! Interfaces of the systems the graphics device drives but does not own.

use ash::vk;

use crate::objects::BufferId;

/// Resolves buffer ids to native handles.
pub trait BufferPool: Send + Sync {
    fn get_native(&self, id: BufferId) -> vk::Buffer;

    /// The index type of a buffer used as index buffer.
    fn get_index_type(&self, id: BufferId) -> vk::IndexType;

    fn is_valid(&self, id: BufferId) -> bool;
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SwapchainStatus<T> {
    Ok(T),
    Suboptimal(T),
    OutOfDate,
}

impl<T> SwapchainStatus<T> {
    pub fn value(self) -> Option<T> {
        match self {
            SwapchainStatus::Ok(value) | SwapchainStatus::Suboptimal(value) => Some(value),
            SwapchainStatus::OutOfDate => None,
        }
    }
}

/// The presentation surface. Everything behind it is opaque to the device.
pub trait Display: Send {
    /// Acquires the next presentable image. `signal` is signaled once the image may be rendered to.
    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> SwapchainStatus<u32>;

    /// Presents an image after `wait` has been signaled.
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> SwapchainStatus<()>;

    /// Rebuilds the swapchain after it went out of date and returns the new extent.
    fn recreate(&mut self) -> vk::Extent2D;
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DescriptorSetBinding {
    pub layout: vk::PipelineLayout,
    pub first_set: u32,
    pub sets: Vec<vk::DescriptorSet>,
    pub offsets: Vec<u32>,
}

pub trait ShaderServer: Send {
    /// Called once at the beginning of every frame to commit pending descriptor writes.
    fn submit_descriptor_changes(&mut self);

    /// Descriptor sets bound after every pipeline bind, for example textures and camera data.
    fn shared_descriptor_sets(&self, bind_point: vk::PipelineBindPoint) -> Vec<DescriptorSetBinding>;
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RenderEvent {
    DisplayResized {
        width: u32,
        height: u32,
    },
    DisplayMinimized,
    DisplayRestored,
}

pub trait RenderEventHandler: Send + Sync {
    /// Returns true if the event was handled.
    fn handle_event(&self, event: &RenderEvent) -> bool;
}

pub struct DeviceCollaborators {
    pub shader_server: Box<dyn ShaderServer>,
    pub buffers: Box<dyn BufferPool>,
    pub display: Option<Box<dyn Display>>,
}

impl DeviceCollaborators {
    pub fn new(shader_server: Box<dyn ShaderServer>, buffers: Box<dyn BufferPool>) -> Self {
        Self {
            shader_server,
            buffers,
            display: None,
        }
    }

    pub fn with_display(mut self, display: Box<dyn Display>) -> Self {
        self.display = Some(display);
        self
    }
}
