//! A headless [`Backend`] that records every call instead of talking to a device.
//!
//! Work completes the moment it is submitted: timeline semaphores advance and fences signal
//! immediately. Command buffers are validated for the usage rules the graphics device relies on
//! (begin before record, no inline commands inside secondary subpass contents, no draws outside a
//! render pass) and any violation panics.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use ash::vk::Handle;

use crate::backend::{Backend, DeviceLimits, GraphicsPipelineDesc, MappedBuffer, QueueSubmit, QueueType};
use crate::objects::{Barrier, FramebufferLayout, ImageBlit, ImageCopy, InheritanceInfo, InputLayout, Pass, SemaphoreOp, SemaphoreWait, VertexLayoutId};
use crate::util::id::UUID;

#[derive(Clone, Debug)]
pub enum RecordedCall {
    BeginRenderPass { render_pass: vk::RenderPass, framebuffer: vk::Framebuffer, contents: vk::SubpassContents },
    NextSubpass { contents: vk::SubpassContents },
    EndRenderPass,
    ExecuteCommands(Vec<vk::CommandBuffer>),
    BindPipeline { bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline },
    BindDescriptorSets { bind_point: vk::PipelineBindPoint, layout: vk::PipelineLayout, first_set: u32, sets: Vec<vk::DescriptorSet>, offsets: Vec<u32> },
    SetViewports { first: u32, viewports: Vec<vk::Viewport> },
    SetScissors { first: u32, scissors: Vec<vk::Rect2D> },
    PushConstants { layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: Vec<u8> },
    BindVertexBuffer { binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize },
    BindIndexBuffer { buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType },
    PipelineBarrier { src_stage: vk::PipelineStageFlags, dst_stage: vk::PipelineStageFlags, memory: usize, buffers: usize, images: usize },
    SetEvent { event: vk::Event, stage: vk::PipelineStageFlags },
    ResetEvent { event: vk::Event, stage: vk::PipelineStageFlags },
    WaitEvent { event: vk::Event, src_stage: vk::PipelineStageFlags, dst_stage: vk::PipelineStageFlags },
    Draw { vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32 },
    DrawIndexed { index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
    CopyImage { src: vk::Image, dst: vk::Image, regions: usize },
    BlitImage { src: vk::Image, dst: vk::Image, regions: usize, filter: vk::Filter },
    BeginLabel(String),
    InsertLabel(String),
    EndLabel,
}

impl RecordedCall {
    pub fn is_draw(&self) -> bool {
        matches!(self, RecordedCall::Draw { .. } | RecordedCall::DrawIndexed { .. })
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RecordingState {
    Initial,
    Recording,
    Executable,
}

#[derive(Clone, Debug)]
pub struct CommandBufferRecord {
    pub pool: vk::CommandPool,
    pub level: vk::CommandBufferLevel,
    pub state: RecordingState,
    pub inheritance: Option<InheritanceInfo>,
    /// Name of the thread that began recording.
    pub thread: Option<String>,
    pub calls: Vec<RecordedCall>,
    render_pass: Option<vk::SubpassContents>,
}

impl CommandBufferRecord {
    fn new(pool: vk::CommandPool, level: vk::CommandBufferLevel) -> Self {
        Self {
            pool,
            level,
            state: RecordingState::Initial,
            inheritance: None,
            thread: None,
            calls: Vec::new(),
            render_pass: None,
        }
    }

    fn reset(&mut self) {
        self.state = RecordingState::Initial;
        self.inheritance = None;
        self.thread = None;
        self.calls.clear();
        self.render_pass = None;
    }
}

#[derive(Clone, Debug)]
pub struct CapturedSubmission {
    pub queue: QueueType,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<SemaphoreOp>,
    pub fence: vk::Fence,
    records: HashMap<vk::CommandBuffer, CommandBufferRecord>,
}

impl CapturedSubmission {
    /// The record of a command buffer as it was at submission time, including executed secondaries.
    pub fn record(&self, command_buffer: vk::CommandBuffer) -> Option<&CommandBufferRecord> {
        self.records.get(&command_buffer)
    }

    /// All calls of the submission in execution order with executed secondary command buffers
    /// expanded in place.
    pub fn flattened(&self) -> Vec<RecordedCall> {
        let mut result = Vec::new();
        for command_buffer in &self.command_buffers {
            self.flatten_into(*command_buffer, &mut result);
        }
        result
    }

    fn flatten_into(&self, command_buffer: vk::CommandBuffer, result: &mut Vec<RecordedCall>) {
        if let Some(record) = self.records.get(&command_buffer) {
            for call in &record.calls {
                match call {
                    RecordedCall::ExecuteCommands(secondaries) => {
                        for secondary in secondaries {
                            self.flatten_into(*secondary, result);
                        }
                    }
                    other => result.push(other.clone()),
                }
            }
        }
    }

    pub fn waits_on(&self, semaphore: vk::Semaphore) -> Option<&SemaphoreWait> {
        self.waits.iter().find(|wait| wait.op.semaphore == semaphore)
    }

    pub fn signals(&self, semaphore: vk::Semaphore) -> Option<&SemaphoreOp> {
        self.signals.iter().find(|op| op.semaphore == semaphore)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct CapturedPipeline {
    pub pipeline: vk::Pipeline,
    pub program: UUID,
    pub program_instance: UUID,
    pub vertex_layout: VertexLayoutId,
    pub framebuffer: FramebufferLayout,
    pub input: InputLayout,
    pub wireframe: bool,
}

#[derive(Default)]
struct CaptureState {
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferRecord>,
    pools: HashMap<vk::CommandPool, Vec<vk::CommandBuffer>>,
    pipelines: Vec<CapturedPipeline>,
    live_pipelines: usize,
    semaphores: HashMap<vk::Semaphore, Option<u64>>,
    fences: HashMap<vk::Fence, bool>,
    submissions: Vec<CapturedSubmission>,
    mapped: HashMap<vk::Buffer, Box<[u8]>>,
    flushes: Vec<(vk::Buffer, vk::DeviceSize, vk::DeviceSize)>,
    queue_labels: Vec<(QueueType, Option<String>)>,
    idle_waits: Vec<QueueType>,
    object_names: HashMap<(vk::ObjectType, u64), String>,
}

fn fail(message: String) -> ! {
    log::error!("{}", message);
    panic!("{}", message)
}

impl CaptureState {
    fn push_call(&mut self, command_buffer: vk::CommandBuffer, call: RecordedCall) {
        let record = match self.command_buffers.get_mut(&command_buffer) {
            Some(record) => record,
            None => fail(format!("Recorded {:?} into unknown command buffer {:?}", call, command_buffer)),
        };
        if record.state != RecordingState::Recording {
            let state = record.state;
            fail(format!("Recorded {:?} into command buffer {:?} in state {:?}", call, command_buffer, state));
        }

        let primary = record.level == vk::CommandBufferLevel::PRIMARY;
        let in_pass = record.render_pass.is_some() || record.inheritance.is_some();
        let secondary_contents = primary && record.render_pass == Some(vk::SubpassContents::SECONDARY_COMMAND_BUFFERS);

        let error = match &call {
            RecordedCall::BeginRenderPass { contents, .. } => {
                if !primary || record.render_pass.is_some() {
                    Some("Begin render pass inside a render pass or secondary command buffer")
                } else {
                    record.render_pass = Some(*contents);
                    None
                }
            }
            RecordedCall::NextSubpass { contents } => {
                if record.render_pass.is_none() {
                    Some("Next subpass outside of a render pass")
                } else {
                    record.render_pass = Some(*contents);
                    None
                }
            }
            RecordedCall::EndRenderPass => {
                if record.render_pass.take().is_none() {
                    Some("End render pass outside of a render pass")
                } else {
                    None
                }
            }
            RecordedCall::ExecuteCommands(_) => {
                if !secondary_contents {
                    Some("Execute commands outside of secondary subpass contents")
                } else {
                    None
                }
            }
            _ if secondary_contents => Some("Inline command inside secondary subpass contents"),
            RecordedCall::Draw { .. } | RecordedCall::DrawIndexed { .. } if !in_pass => Some("Draw outside of a render pass"),
            RecordedCall::Dispatch { .. } if in_pass => Some("Dispatch inside of a render pass"),
            RecordedCall::CopyImage { .. } | RecordedCall::BlitImage { .. } if in_pass => Some("Image copy inside of a render pass"),
            _ => None,
        };

        if let Some(error) = error {
            fail(format!("{}: {:?} into {:?}", error, call, command_buffer));
        }

        record.calls.push(call);
    }
}

pub struct CaptureBackend {
    limits: DeviceLimits,
    next_handle: AtomicU64,
    state: Mutex<CaptureState>,
}

impl CaptureBackend {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            next_handle: AtomicU64::new(0x1000),
            state: Mutex::new(CaptureState::default()),
        }
    }

    fn state(&self) -> MutexGuard<CaptureState> {
        // A panic while holding the lock only happens on validation failures
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a handle that is unique for this backend. Used to fabricate collaborator objects.
    pub fn fabricate<H: Handle>(&self) -> H {
        self.make_handle()
    }

    pub fn record(&self, command_buffer: vk::CommandBuffer) -> Option<CommandBufferRecord> {
        self.state().command_buffers.get(&command_buffer).cloned()
    }

    pub fn calls(&self, command_buffer: vk::CommandBuffer) -> Vec<RecordedCall> {
        self.record(command_buffer).map(|record| record.calls).unwrap_or_default()
    }

    pub fn submissions(&self) -> Vec<CapturedSubmission> {
        self.state().submissions.clone()
    }

    pub fn submissions_for(&self, queue: QueueType) -> Vec<CapturedSubmission> {
        self.state().submissions.iter().filter(|submission| submission.queue == queue).cloned().collect()
    }

    pub fn pipelines(&self) -> Vec<CapturedPipeline> {
        self.state().pipelines.clone()
    }

    pub fn semaphore_value(&self, semaphore: vk::Semaphore) -> Option<u64> {
        self.state().semaphores.get(&semaphore).copied().flatten()
    }

    pub fn flushes(&self) -> Vec<(vk::Buffer, vk::DeviceSize, vk::DeviceSize)> {
        self.state().flushes.clone()
    }

    pub fn mapped_bytes(&self, buffer: vk::Buffer, offset: usize, len: usize) -> Vec<u8> {
        match self.state().mapped.get(&buffer) {
            Some(memory) => memory[offset..(offset + len)].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn queue_labels(&self) -> Vec<(QueueType, Option<String>)> {
        self.state().queue_labels.clone()
    }

    pub fn idle_waits(&self) -> Vec<QueueType> {
        self.state().idle_waits.clone()
    }

    pub fn object_name<H: Handle>(&self, object: H) -> Option<String> {
        self.state().object_names.get(&(H::TYPE, object.as_raw())).cloned()
    }

    /// Number of native objects that have been created and not destroyed yet.
    pub fn live_objects(&self) -> usize {
        let state = self.state();
        state.pools.len() + state.live_pipelines + state.semaphores.len() + state.fences.len() + state.mapped.len()
    }
}

impl Default for CaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CaptureBackend {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_command_pool(&self, _: QueueType) -> vk::CommandPool {
        let pool = self.make_handle();
        self.state().pools.insert(pool, Vec::new());
        pool
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        if let Some(buffers) = state.pools.remove(&pool) {
            for buffer in buffers {
                state.command_buffers.remove(&buffer);
            }
        }
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        let buffers = match state.pools.get(&pool) {
            Some(buffers) => buffers.clone(),
            None => fail(format!("Reset unknown command pool {:?}", pool)),
        };
        for buffer in buffers {
            if let Some(record) = state.command_buffers.get_mut(&buffer) {
                record.reset();
            }
        }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool, level: vk::CommandBufferLevel) -> vk::CommandBuffer {
        let buffer = self.make_handle();
        let mut state = self.state();
        match state.pools.get_mut(&pool) {
            Some(buffers) => buffers.push(buffer),
            None => fail(format!("Allocated from unknown command pool {:?}", pool)),
        }
        state.command_buffers.insert(buffer, CommandBufferRecord::new(pool, level));
        buffer
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, inheritance: Option<&InheritanceInfo>) {
        let mut state = self.state();
        let record = match state.command_buffers.get_mut(&command_buffer) {
            Some(record) => record,
            None => fail(format!("Began unknown command buffer {:?}", command_buffer)),
        };
        if record.state == RecordingState::Recording {
            fail(format!("Began command buffer {:?} that is already recording", command_buffer));
        }
        if (record.level == vk::CommandBufferLevel::SECONDARY) != inheritance.is_some() {
            fail(format!("Inheritance info mismatch for command buffer {:?}", command_buffer));
        }

        record.reset();
        record.state = RecordingState::Recording;
        record.inheritance = inheritance.copied();
        record.thread = std::thread::current().name().map(String::from);
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let mut state = self.state();
        let record = match state.command_buffers.get_mut(&command_buffer) {
            Some(record) => record,
            None => fail(format!("Ended unknown command buffer {:?}", command_buffer)),
        };
        if record.state != RecordingState::Recording || record.render_pass.is_some() {
            fail(format!("Ended command buffer {:?} that is not recording or inside a render pass", command_buffer));
        }
        record.state = RecordingState::Executable;
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, pass: &Pass, contents: vk::SubpassContents) {
        self.state().push_call(command_buffer, RecordedCall::BeginRenderPass { render_pass: pass.render_pass(), framebuffer: pass.framebuffer(), contents });
    }

    fn cmd_next_subpass(&self, command_buffer: vk::CommandBuffer, contents: vk::SubpassContents) {
        self.state().push_call(command_buffer, RecordedCall::NextSubpass { contents });
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.state().push_call(command_buffer, RecordedCall::EndRenderPass);
    }

    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for secondary in secondaries {
            match state.command_buffers.get(secondary) {
                Some(record) if record.level == vk::CommandBufferLevel::SECONDARY && record.state == RecordingState::Executable => {},
                _ => fail(format!("Executed secondary command buffer {:?} that is not executable", secondary)),
            }
        }
        state.push_call(command_buffer, RecordedCall::ExecuteCommands(secondaries.to_vec()));
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.state().push_call(command_buffer, RecordedCall::BindPipeline { bind_point, pipeline });
    }

    fn cmd_bind_descriptor_sets(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet], offsets: &[u32]) {
        self.state().push_call(command_buffer, RecordedCall::BindDescriptorSets { bind_point, layout, first_set, sets: sets.to_vec(), offsets: offsets.to_vec() });
    }

    fn cmd_set_viewports(&self, command_buffer: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]) {
        self.state().push_call(command_buffer, RecordedCall::SetViewports { first, viewports: viewports.to_vec() });
    }

    fn cmd_set_scissors(&self, command_buffer: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]) {
        self.state().push_call(command_buffer, RecordedCall::SetScissors { first, scissors: scissors.to_vec() });
    }

    fn cmd_push_constants(&self, command_buffer: vk::CommandBuffer, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        self.state().push_call(command_buffer, RecordedCall::PushConstants { layout, stages, offset, data: data.to_vec() });
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize) {
        self.state().push_call(command_buffer, RecordedCall::BindVertexBuffer { binding, buffer, offset });
    }

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.state().push_call(command_buffer, RecordedCall::BindIndexBuffer { buffer, offset, index_type });
    }

    fn cmd_pipeline_barrier(&self, command_buffer: vk::CommandBuffer, barrier: &Barrier) {
        self.state().push_call(command_buffer, RecordedCall::PipelineBarrier {
            src_stage: barrier.src_stage,
            dst_stage: barrier.dst_stage,
            memory: barrier.memory.len(),
            buffers: barrier.buffers.len(),
            images: barrier.images.len(),
        });
    }

    fn cmd_set_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
        self.state().push_call(command_buffer, RecordedCall::SetEvent { event, stage });
    }

    fn cmd_reset_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
        self.state().push_call(command_buffer, RecordedCall::ResetEvent { event, stage });
    }

    fn cmd_wait_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, barrier: &Barrier) {
        self.state().push_call(command_buffer, RecordedCall::WaitEvent { event, src_stage: barrier.src_stage, dst_stage: barrier.dst_stage });
    }

    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.state().push_call(command_buffer, RecordedCall::Draw { vertex_count, instance_count, first_vertex, first_instance });
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        self.state().push_call(command_buffer, RecordedCall::DrawIndexed { index_count, instance_count, first_index, vertex_offset, first_instance });
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.state().push_call(command_buffer, RecordedCall::Dispatch { x, y, z });
    }

    fn cmd_copy_image(&self, command_buffer: vk::CommandBuffer, copy: &ImageCopy) {
        self.state().push_call(command_buffer, RecordedCall::CopyImage { src: copy.src, dst: copy.dst, regions: copy.regions.len() });
    }

    fn cmd_blit_image(&self, command_buffer: vk::CommandBuffer, blit: &ImageBlit) {
        self.state().push_call(command_buffer, RecordedCall::BlitImage { src: blit.src, dst: blit.dst, regions: blit.regions.len(), filter: blit.filter });
    }

    fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, name: &str, _: [f32; 4]) {
        self.state().push_call(command_buffer, RecordedCall::BeginLabel(String::from(name)));
    }

    fn cmd_insert_label(&self, command_buffer: vk::CommandBuffer, name: &str, _: [f32; 4]) {
        self.state().push_call(command_buffer, RecordedCall::InsertLabel(String::from(name)));
    }

    fn cmd_end_label(&self, command_buffer: vk::CommandBuffer) {
        self.state().push_call(command_buffer, RecordedCall::EndLabel);
    }

    fn set_object_name(&self, object_type: vk::ObjectType, handle: u64, name: &str) {
        self.state().object_names.insert((object_type, handle), String::from(name));
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> vk::Pipeline {
        let pipeline = self.make_handle();
        let mut state = self.state();
        state.pipelines.push(CapturedPipeline {
            pipeline,
            program: desc.program.get_id().get_uuid(),
            program_instance: desc.program.get_instance_id(),
            vertex_layout: desc.vertex_layout.get_id(),
            framebuffer: *desc.framebuffer,
            input: *desc.input,
            wireframe: desc.wireframe,
        });
        state.live_pipelines += 1;
        pipeline
    }

    fn destroy_pipeline(&self, _: vk::Pipeline) {
        let mut state = self.state();
        state.live_pipelines = state.live_pipelines.saturating_sub(1);
    }

    fn create_semaphore(&self, initial_value: Option<u64>) -> vk::Semaphore {
        let semaphore = self.make_handle();
        self.state().semaphores.insert(semaphore, initial_value);
        semaphore
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().semaphores.remove(&semaphore);
    }

    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, _: u64) -> bool {
        let state = self.state();
        match state.semaphores.get(&semaphore) {
            Some(Some(current)) => *current >= value,
            _ => fail(format!("Waited on unknown or binary semaphore {:?}", semaphore)),
        }
    }

    fn create_fence(&self, signaled: bool) -> vk::Fence {
        let fence = self.make_handle();
        self.state().fences.insert(fence, signaled);
        fence
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state().fences.remove(&fence);
    }

    fn get_fence_status(&self, fence: vk::Fence) -> bool {
        let state = self.state();
        match state.fences.get(&fence) {
            Some(signaled) => *signaled,
            None => fail(format!("Queried unknown fence {:?}", fence)),
        }
    }

    fn wait_fence(&self, fence: vk::Fence, _: u64) -> bool {
        self.get_fence_status(fence)
    }

    fn reset_fence(&self, fence: vk::Fence) {
        if let Some(signaled) = self.state().fences.get_mut(&fence) {
            *signaled = false;
        }
    }

    fn queue_submit(&self, queue: QueueType, submit: &QueueSubmit, fence: vk::Fence) {
        let mut state = self.state();

        let mut records = HashMap::new();
        let mut pending: Vec<vk::CommandBuffer> = submit.command_buffers.to_vec();
        while let Some(buffer) = pending.pop() {
            let record = match state.command_buffers.get(&buffer) {
                Some(record) if record.state == RecordingState::Executable => record.clone(),
                _ => fail(format!("Submitted command buffer {:?} that is not executable", buffer)),
            };
            for call in &record.calls {
                if let RecordedCall::ExecuteCommands(secondaries) = call {
                    pending.extend(secondaries.iter().copied());
                }
            }
            records.insert(buffer, record);
        }

        for signal in submit.signals {
            if let Some(value) = signal.value {
                match state.semaphores.get_mut(&signal.semaphore) {
                    Some(Some(current)) => {
                        if value <= *current {
                            let current = *current;
                            fail(format!("Timeline semaphore {:?} signaled with {} but is already at {}", signal.semaphore, value, current));
                        }
                        *current = value;
                    }
                    _ => fail(format!("Signaled unknown timeline semaphore {:?}", signal.semaphore)),
                }
            }
        }

        if fence != vk::Fence::null() {
            match state.fences.get_mut(&fence) {
                Some(signaled) if !*signaled => *signaled = true,
                _ => fail(format!("Submitted with unknown or signaled fence {:?}", fence)),
            }
        }

        state.submissions.push(CapturedSubmission {
            queue,
            command_buffers: submit.command_buffers.to_vec(),
            waits: submit.waits.to_vec(),
            signals: submit.signals.to_vec(),
            fence,
            records,
        });
    }

    fn queue_wait_idle(&self, queue: QueueType) {
        self.state().idle_waits.push(queue);
    }

    fn queue_begin_label(&self, queue: QueueType, name: &str, _: [f32; 4]) {
        self.state().queue_labels.push((queue, Some(String::from(name))));
    }

    fn queue_insert_label(&self, queue: QueueType, name: &str, _: [f32; 4]) {
        self.state().queue_labels.push((queue, Some(String::from(name))));
    }

    fn queue_end_label(&self, queue: QueueType) {
        self.state().queue_labels.push((queue, None));
    }

    fn create_mapped_buffer(&self, size: vk::DeviceSize, _: vk::BufferUsageFlags) -> MappedBuffer {
        let buffer = self.make_handle();
        let mut memory = vec![0u8; size as usize].into_boxed_slice();
        let ptr = NonNull::new(memory.as_mut_ptr()).unwrap_or(NonNull::dangling());
        self.state().mapped.insert(buffer, memory);

        // The boxed slice is owned by the state map and does not move until the buffer is destroyed
        unsafe { MappedBuffer::new(buffer, size, ptr) }
    }

    fn destroy_mapped_buffer(&self, buffer: MappedBuffer) {
        self.state().mapped.remove(&buffer.buffer);
    }

    fn flush_mapped_range(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let mut state = self.state();
        let len = match state.mapped.get(&buffer) {
            Some(memory) => memory.len() as vk::DeviceSize,
            None => fail(format!("Flushed unknown mapped buffer {:?}", buffer)),
        };
        if offset + size > len {
            fail(format!("Flushed range {}..{} out of bounds for buffer of size {}", offset, offset + size, len));
        }
        state.flushes.push((buffer, offset, size));
    }
}
