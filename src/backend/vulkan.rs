use std::collections::HashMap;
use std::ffi::CString;
use std::fmt::Debug;
use std::sync::Mutex;

use ash::prelude::VkResult;
use ash::vk;

use crate::backend::allocator::{AllocationError, Allocation, Allocator};
use crate::backend::{Backend, DeviceLimits, GraphicsPipelineDesc, MappedBuffer, QueueSubmit, QueueType};
use crate::objects::{Barrier, ImageBlit, ImageCopy, InheritanceInfo, Pass};
use crate::util::alloc::{next_aligned, prev_aligned};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct QueueLocation {
    pub family: u32,
    pub index: u32,
}

pub struct VulkanBackendCreateInfo {
    pub instance: ash::Instance,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    /// Queue used for each [`QueueType`], indexed by [`QueueType::index`]. Multiple queue types may
    /// share the same queue.
    pub queues: [QueueLocation; QueueType::COUNT],

    /// Enables command buffer and queue labels.
    pub debug_utils: Option<ash::extensions::ext::DebugUtils>,
}

#[derive(Debug)]
pub enum BackendCreateError {
    Vulkan(vk::Result),
    Allocation(AllocationError),
    InvalidQueue(QueueType),
}

impl From<vk::Result> for BackendCreateError {
    fn from(err: vk::Result) -> Self {
        Self::Vulkan(err)
    }
}

impl From<AllocationError> for BackendCreateError {
    fn from(err: AllocationError) -> Self {
        Self::Allocation(err)
    }
}

struct NativeQueue {
    location: QueueLocation,
    queue: Mutex<vk::Queue>,
}

/// [`Backend`] implementation on top of an already created ash device.
///
/// The device must support vulkan 1.2 timeline semaphores.
pub struct VulkanBackend {
    device: ash::Device,
    limits: DeviceLimits,
    queues: Vec<NativeQueue>,
    queue_map: [usize; QueueType::COUNT],
    debug_utils: Option<ash::extensions::ext::DebugUtils>,
    allocator: Allocator,
    mapped: Mutex<HashMap<vk::Buffer, Allocation>>,
}

fn check<T, E: Debug>(result: Result<T, E>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            log::error!("{} failed with {:?}", what, err);
            panic!()
        }
    }
}

fn label(name: &str, color: [f32; 4]) -> (CString, [f32; 4]) {
    let name = CString::new(name.replace('\0', "")).unwrap_or_default();
    (name, color)
}

impl VulkanBackend {
    pub fn new(info: VulkanBackendCreateInfo) -> Result<Self, BackendCreateError> {
        let properties = unsafe {
            info.instance.get_physical_device_properties(info.physical_device)
        };
        let families = unsafe {
            info.instance.get_physical_device_queue_family_properties(info.physical_device)
        };

        let mut queues: Vec<NativeQueue> = Vec::with_capacity(QueueType::COUNT);
        let mut queue_map = [0usize; QueueType::COUNT];
        for queue_type in QueueType::ALL {
            let location = info.queues[queue_type.index()];
            match families.get(location.family as usize) {
                Some(family) if location.index < family.queue_count => {},
                _ => return Err(BackendCreateError::InvalidQueue(queue_type)),
            }

            let index = match queues.iter().position(|queue| queue.location == location) {
                Some(index) => index,
                None => {
                    let queue = unsafe {
                        info.device.get_device_queue(location.family, location.index)
                    };
                    queues.push(NativeQueue { location, queue: Mutex::new(queue) });
                    queues.len() - 1
                }
            };
            queue_map[queue_type.index()] = index;
        }

        let allocator = Allocator::new(info.instance.clone(), info.device.clone(), info.physical_device)?;

        log::info!("Created vulkan backend for {:?} with {} distinct queues",
            unsafe { std::ffi::CStr::from_ptr(properties.device_name.as_ptr()) }, queues.len());

        Ok(Self {
            device: info.device,
            limits: DeviceLimits {
                min_uniform_buffer_offset_alignment: properties.limits.min_uniform_buffer_offset_alignment,
                non_coherent_atom_size: properties.limits.non_coherent_atom_size,
            },
            queues,
            queue_map,
            debug_utils: info.debug_utils,
            allocator,
            mapped: Mutex::new(HashMap::new()),
        })
    }

    pub fn get_device(&self) -> &ash::Device {
        &self.device
    }

    fn queue(&self, queue: QueueType) -> &NativeQueue {
        &self.queues[self.queue_map[queue.index()]]
    }

    fn wait_result(result: VkResult<()>, what: &str) -> bool {
        match result {
            Ok(()) => true,
            Err(vk::Result::TIMEOUT) => false,
            Err(err) => {
                log::error!("{} failed with {:?}", what, err);
                panic!()
            }
        }
    }
}

impl Backend for VulkanBackend {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_command_pool(&self, queue: QueueType) -> vk::CommandPool {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(self.queue(queue).location.family);

        check(unsafe { self.device.create_command_pool(&info, None) }, "vkCreateCommandPool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) {
        check(unsafe { self.device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty()) }, "vkResetCommandPool")
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool, level: vk::CommandBufferLevel) -> vk::CommandBuffer {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(1);

        let buffers = check(unsafe { self.device.allocate_command_buffers(&info) }, "vkAllocateCommandBuffers");
        buffers[0]
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, inheritance: Option<&InheritanceInfo>) {
        match inheritance {
            Some(inheritance) => {
                let inheritance_info = vk::CommandBufferInheritanceInfo::builder()
                    .render_pass(inheritance.render_pass)
                    .subpass(inheritance.subpass)
                    .framebuffer(inheritance.framebuffer);

                let info = vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
                    .inheritance_info(&inheritance_info);

                check(unsafe { self.device.begin_command_buffer(command_buffer, &info) }, "vkBeginCommandBuffer")
            }
            None => {
                let info = vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

                check(unsafe { self.device.begin_command_buffer(command_buffer, &info) }, "vkBeginCommandBuffer")
            }
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        check(unsafe { self.device.end_command_buffer(command_buffer) }, "vkEndCommandBuffer")
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, pass: &Pass, contents: vk::SubpassContents) {
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass.render_pass())
            .framebuffer(pass.framebuffer())
            .render_area(pass.render_area())
            .clear_values(pass.clear_values());

        unsafe { self.device.cmd_begin_render_pass(command_buffer, &info, contents) }
    }

    fn cmd_next_subpass(&self, command_buffer: vk::CommandBuffer, contents: vk::SubpassContents) {
        unsafe { self.device.cmd_next_subpass(command_buffer, contents) }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) }
    }

    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]) {
        unsafe { self.device.cmd_execute_commands(command_buffer, secondaries) }
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(command_buffer, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_sets(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet], offsets: &[u32]) {
        unsafe { self.device.cmd_bind_descriptor_sets(command_buffer, bind_point, layout, first_set, sets, offsets) }
    }

    fn cmd_set_viewports(&self, command_buffer: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]) {
        unsafe { self.device.cmd_set_viewport(command_buffer, first, viewports) }
    }

    fn cmd_set_scissors(&self, command_buffer: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]) {
        unsafe { self.device.cmd_set_scissor(command_buffer, first, scissors) }
    }

    fn cmd_push_constants(&self, command_buffer: vk::CommandBuffer, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe { self.device.cmd_push_constants(command_buffer, layout, stages, offset, data) }
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe { self.device.cmd_bind_vertex_buffers(command_buffer, binding, std::slice::from_ref(&buffer), std::slice::from_ref(&offset)) }
    }

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(command_buffer, buffer, offset, index_type) }
    }

    fn cmd_pipeline_barrier(&self, command_buffer: vk::CommandBuffer, barrier: &Barrier) {
        let memory = barrier.vk_memory_barriers();
        let buffers = barrier.vk_buffer_barriers();
        let images = barrier.vk_image_barriers();

        unsafe {
            self.device.cmd_pipeline_barrier(command_buffer, barrier.src_stage, barrier.dst_stage, barrier.dependency, &memory, &buffers, &images)
        }
    }

    fn cmd_set_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
        unsafe { self.device.cmd_set_event(command_buffer, event, stage) }
    }

    fn cmd_reset_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
        unsafe { self.device.cmd_reset_event(command_buffer, event, stage) }
    }

    fn cmd_wait_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, barrier: &Barrier) {
        let memory = barrier.vk_memory_barriers();
        let buffers = barrier.vk_buffer_barriers();
        let images = barrier.vk_image_barriers();

        unsafe {
            self.device.cmd_wait_events(command_buffer, std::slice::from_ref(&event), barrier.src_stage, barrier.dst_stage, &memory, &buffers, &images)
        }
    }

    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.device.cmd_draw(command_buffer, vertex_count, instance_count, first_vertex, first_instance) }
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        unsafe { self.device.cmd_draw_indexed(command_buffer, index_count, instance_count, first_index, vertex_offset, first_instance) }
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(command_buffer, x, y, z) }
    }

    fn cmd_copy_image(&self, command_buffer: vk::CommandBuffer, copy: &ImageCopy) {
        unsafe { self.device.cmd_copy_image(command_buffer, copy.src, copy.src_layout, copy.dst, copy.dst_layout, &copy.regions) }
    }

    fn cmd_blit_image(&self, command_buffer: vk::CommandBuffer, blit: &ImageBlit) {
        unsafe { self.device.cmd_blit_image(command_buffer, blit.src, blit.src_layout, blit.dst, blit.dst_layout, &blit.regions, blit.filter) }
    }

    fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, name: &str, color: [f32; 4]) {
        if let Some(debug_utils) = &self.debug_utils {
            let (name, color) = label(name, color);
            let info = vk::DebugUtilsLabelEXT::builder().label_name(&name).color(color);
            unsafe { debug_utils.cmd_begin_debug_utils_label(command_buffer, &info) }
        }
    }

    fn cmd_insert_label(&self, command_buffer: vk::CommandBuffer, name: &str, color: [f32; 4]) {
        if let Some(debug_utils) = &self.debug_utils {
            let (name, color) = label(name, color);
            let info = vk::DebugUtilsLabelEXT::builder().label_name(&name).color(color);
            unsafe { debug_utils.cmd_insert_debug_utils_label(command_buffer, &info) }
        }
    }

    fn cmd_end_label(&self, command_buffer: vk::CommandBuffer) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(command_buffer) }
        }
    }

    fn set_object_name(&self, object_type: vk::ObjectType, handle: u64, name: &str) {
        if let Some(debug_utils) = &self.debug_utils {
            let (name, _) = label(name, [0.0; 4]);
            let info = vk::DebugUtilsObjectNameInfoEXT::builder()
                .object_type(object_type)
                .object_handle(handle)
                .object_name(&name);
            check(unsafe { debug_utils.debug_utils_set_object_name(self.device.handle(), &info) }, "vkSetDebugUtilsObjectNameEXT");
        }
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> vk::Pipeline {
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = desc.program.stages().iter().map(|stage| {
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(stage.stage)
                .module(stage.module)
                .name(&stage.entry_point)
                .build()
        }).collect();

        let bindings: Vec<vk::VertexInputBindingDescription> = desc.vertex_layout.bindings().iter().map(|binding| {
            vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: binding.input_rate,
            }
        }).collect();

        let attributes: Vec<vk::VertexInputAttributeDescription> = desc.vertex_layout.attributes().iter().map(|attribute| {
            vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: attribute.format,
                offset: attribute.offset,
            }
        }).collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.input.topology)
            .primitive_restart_enable(desc.input.primitive_restart);

        let viewport = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let raster = desc.program.raster();
        let polygon_mode = if desc.wireframe { vk::PolygonMode::LINE } else { raster.polygon_mode };
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(polygon_mode)
            .cull_mode(raster.cull_mode)
            .front_face(raster.front_face)
            .depth_bias_enable(raster.depth_bias)
            .line_width(raster.line_width);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth = desc.program.depth_stencil();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(depth.depth_test)
            .depth_write_enable(depth.depth_write)
            .depth_compare_op(depth.compare_op);

        let attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc.program.blend().iter().map(|blend| blend.to_vk()).collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(desc.program.layout())
            .render_pass(desc.framebuffer.render_pass)
            .subpass(desc.framebuffer.subpass)
            .build();

        let pipelines = unsafe {
            self.device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
        }.map_err(|(_, err)| err);

        let pipelines = check(pipelines, "vkCreateGraphicsPipelines");
        log::debug!("Built graphics pipeline for program {:?}", desc.program.get_id());
        pipelines[0]
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_semaphore(&self, initial_value: Option<u64>) -> vk::Semaphore {
        match initial_value {
            Some(value) => {
                let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
                    .semaphore_type(vk::SemaphoreType::TIMELINE)
                    .initial_value(value);

                let info = vk::SemaphoreCreateInfo::builder()
                    .push_next(&mut type_info);

                check(unsafe { self.device.create_semaphore(&info, None) }, "vkCreateSemaphore")
            }
            None => {
                let info = vk::SemaphoreCreateInfo::builder();
                check(unsafe { self.device.create_semaphore(&info, None) }, "vkCreateSemaphore")
            }
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> bool {
        let info = vk::SemaphoreWaitInfo::builder()
            .semaphores(std::slice::from_ref(&semaphore))
            .values(std::slice::from_ref(&value));

        Self::wait_result(unsafe { self.device.wait_semaphores(&info, timeout_ns) }, "vkWaitSemaphores")
    }

    fn create_fence(&self, signaled: bool) -> vk::Fence {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let info = vk::FenceCreateInfo::builder().flags(flags);

        check(unsafe { self.device.create_fence(&info, None) }, "vkCreateFence")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn get_fence_status(&self, fence: vk::Fence) -> bool {
        check(unsafe { self.device.get_fence_status(fence) }, "vkGetFenceStatus")
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> bool {
        Self::wait_result(unsafe { self.device.wait_for_fences(std::slice::from_ref(&fence), true, timeout_ns) }, "vkWaitForFences")
    }

    fn reset_fence(&self, fence: vk::Fence) {
        check(unsafe { self.device.reset_fences(std::slice::from_ref(&fence)) }, "vkResetFences")
    }

    fn queue_submit(&self, queue: QueueType, submit: &QueueSubmit, fence: vk::Fence) {
        let wait_semaphores: Vec<vk::Semaphore> = submit.waits.iter().map(|wait| wait.op.semaphore).collect();
        let wait_values: Vec<u64> = submit.waits.iter().map(|wait| wait.op.value.unwrap_or(0)).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = submit.waits.iter().map(|wait| wait.stage).collect();
        let signal_semaphores: Vec<vk::Semaphore> = submit.signals.iter().map(|op| op.semaphore).collect();
        let signal_values: Vec<u64> = submit.signals.iter().map(|op| op.value.unwrap_or(0)).collect();

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(submit.command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info)
            .build();

        let guard = self.queue(queue).queue.lock().unwrap();
        check(unsafe { self.device.queue_submit(*guard, std::slice::from_ref(&info), fence) }, "vkQueueSubmit")
    }

    fn queue_wait_idle(&self, queue: QueueType) {
        let guard = self.queue(queue).queue.lock().unwrap();
        check(unsafe { self.device.queue_wait_idle(*guard) }, "vkQueueWaitIdle")
    }

    fn queue_begin_label(&self, queue: QueueType, name: &str, color: [f32; 4]) {
        if let Some(debug_utils) = &self.debug_utils {
            let (name, color) = label(name, color);
            let info = vk::DebugUtilsLabelEXT::builder().label_name(&name).color(color);
            let guard = self.queue(queue).queue.lock().unwrap();
            unsafe { debug_utils.queue_begin_debug_utils_label(*guard, &info) }
        }
    }

    fn queue_insert_label(&self, queue: QueueType, name: &str, color: [f32; 4]) {
        if let Some(debug_utils) = &self.debug_utils {
            let (name, color) = label(name, color);
            let info = vk::DebugUtilsLabelEXT::builder().label_name(&name).color(color);
            let guard = self.queue(queue).queue.lock().unwrap();
            unsafe { debug_utils.queue_insert_debug_utils_label(*guard, &info) }
        }
    }

    fn queue_end_label(&self, queue: QueueType) {
        if let Some(debug_utils) = &self.debug_utils {
            let guard = self.queue(queue).queue.lock().unwrap();
            unsafe { debug_utils.queue_end_debug_utils_label(*guard) }
        }
    }

    fn create_mapped_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> MappedBuffer {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = check(unsafe { self.device.create_buffer(&info, None) }, "vkCreateBuffer");
        let allocation = check(self.allocator.allocate_mapped_buffer_memory(buffer, "transient"), "Transient buffer allocation");
        check(unsafe { self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }, "vkBindBufferMemory");

        let ptr = match allocation.mapped_ptr() {
            Some(ptr) => ptr,
            None => {
                log::error!("Transient buffer allocation is not host mapped");
                panic!()
            }
        };

        self.mapped.lock().unwrap().insert(buffer, allocation);
        unsafe { MappedBuffer::new(buffer, size, ptr) }
    }

    fn destroy_mapped_buffer(&self, buffer: MappedBuffer) {
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
        match self.mapped.lock().unwrap().remove(&buffer.buffer) {
            Some(allocation) => self.allocator.free(allocation),
            None => log::warn!("Destroyed unknown mapped buffer {:?}", buffer.buffer),
        }
    }

    fn flush_mapped_range(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) {
        if size == 0 {
            return;
        }

        let guard = self.mapped.lock().unwrap();
        let allocation = match guard.get(&buffer) {
            Some(allocation) => allocation,
            None => {
                log::error!("Flushed unknown mapped buffer {:?}", buffer);
                panic!()
            }
        };

        let atom = self.limits.non_coherent_atom_size;
        let begin = prev_aligned(allocation.offset() + offset, atom);
        let end = next_aligned(allocation.offset() + offset + size, atom).min(allocation.offset() + allocation.size());

        let range = vk::MappedMemoryRange::builder()
            .memory(allocation.memory())
            .offset(begin)
            .size(end - begin)
            .build();

        check(unsafe { self.device.flush_mapped_memory_ranges(std::slice::from_ref(&range)) }, "vkFlushMappedMemoryRanges")
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let mapped: Vec<(vk::Buffer, Allocation)> = match self.mapped.get_mut() {
            Ok(mapped) => mapped.drain().collect(),
            Err(_) => return,
        };
        if !mapped.is_empty() {
            log::warn!("Vulkan backend dropped with {} live mapped buffers", mapped.len());
        }
        for (buffer, allocation) in mapped {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.allocator.free(allocation);
        }
    }
}
