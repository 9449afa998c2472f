//! The graphics device.
//!
//! [`GraphicsDevice`] enforces the frame protocol
//!
//! ```text
//! begin_frame
//!     begin_submission
//!         begin_pass
//!             begin_batch / set_to_next_sub_batch / end_batch
//!         end_pass
//!     end_submission
//! end_frame
//! ```
//!
//! and routes every state setting call either into the main command buffer of a queue or to the
//! draw thread of the active batch. Calls made out of order are contract violations and panic.

pub mod config;
pub mod transient;
pub mod command;
pub mod pipeline;
pub mod worker;
pub mod timeline;
pub mod frame;
pub mod sink;
pub mod collaborators;
pub mod stats;

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use crate::backend::{Backend, QueueSubmit, QueueType};
use crate::device::collaborators::{DeviceCollaborators, RenderEvent, RenderEventHandler, SwapchainStatus};
use crate::device::command::{Command, record_command};
use crate::device::config::GraphicsDeviceCreateInfo;
use crate::device::frame::FrameSlot;
use crate::device::pipeline::PipelineTracker;
use crate::device::sink::CommandSink;
use crate::device::stats::FrameStatistics;
use crate::device::timeline::{SubmissionTimeline, TimelineWait};
use crate::device::transient::{TransientAllocation, TransientKind, TransientMemory};
use crate::device::worker::CommandThreadPool;
use crate::objects::{Barrier, BatchType, BufferId, Event, Fence, FramebufferLayout, ImageBlit, ImageCopy, InheritanceInfo, InputLayout, Pass, PrimitiveGroup, ProgramKind, SemaphoreOp, ShaderProgram, VertexLayout};
use crate::prelude::Vec4f32;
use crate::util::fixed::FixedVec;
use crate::util::id::UUID;

pub const MAX_CLIP_SETTINGS: usize = 8;

const FRAME_MARKER_COLOR: [f32; 4] = [0.0, 0.4, 1.0, 1.0];

struct ActivePass {
    pass: Pass,
    subpass: u32,
    inheritance: InheritanceInfo,
}

struct ActiveBatch {
    batch_type: BatchType,
    /// Secondary command buffer per draw thread that started recording in this batch.
    started: Vec<Option<vk::CommandBuffer>>,
    /// Threads in the order they started.
    order: Vec<usize>,
}

#[derive(Clone)]
struct PropagatedSet {
    bind_point: vk::PipelineBindPoint,
    set_index: u32,
    set: vk::DescriptorSet,
    offsets: Vec<u32>,
}

fn contract(condition: bool, message: &str) {
    if !condition {
        log::error!("Graphics device contract violation: {}", message);
        panic!()
    }
}

fn queue_transient_kinds(queue: QueueType) -> &'static [TransientKind] {
    match queue {
        QueueType::Graphics => &[TransientKind::GraphicsConstants, TransientKind::Vertex, TransientKind::Index],
        QueueType::Compute => &[TransientKind::ComputeConstants],
        QueueType::Transfer | QueueType::Sparse => &[],
    }
}

fn to_color(color: Vec4f32) -> [f32; 4] {
    [color.x, color.y, color.z, color.w]
}

pub struct GraphicsDevice {
    backend: Arc<dyn Backend>,
    info: GraphicsDeviceCreateInfo,
    collaborators: DeviceCollaborators,
    event_handlers: Vec<Arc<dyn RenderEventHandler>>,

    frames: Vec<FrameSlot>,
    slot: usize,
    frame_index: Option<u64>,
    in_frame: bool,
    image_index: Option<u32>,
    image_wait_pending: bool,
    present_signaled: bool,

    main_buffers: [Option<vk::CommandBuffer>; QueueType::COUNT],
    queue_work: [bool; QueueType::COUNT],
    /// Set if compute work of this frame waits for graphics work. Graphics then must not wait for
    /// compute.
    compute_waits_graphics: bool,
    pass: Option<ActivePass>,
    batch: Option<ActiveBatch>,
    draw_thread: usize,
    sink: Option<CommandSink>,

    pipeline: PipelineTracker,
    current_layout: Option<vk::PipelineLayout>,
    compute_program: Option<Arc<ShaderProgram>>,
    compute_bound_in: Option<vk::CommandBuffer>,
    propagated_sets: Vec<PropagatedSet>,
    viewports: FixedVec<vk::Viewport, MAX_CLIP_SETTINGS>,
    scissors: FixedVec<vk::Rect2D, MAX_CLIP_SETTINGS>,
    topology: vk::PrimitiveTopology,
    wireframe: bool,
    primitive_group: PrimitiveGroup,

    stats: FrameStatistics,
    last_stats: FrameStatistics,
    stats_base: (u64, u64),

    threads: CommandThreadPool,
    timeline: SubmissionTimeline,
    transient: TransientMemory,
}

impl GraphicsDevice {
    pub fn new(backend: Arc<dyn Backend>, info: GraphicsDeviceCreateInfo, collaborators: DeviceCollaborators) -> Self {
        info.validate();

        let frames = (0..info.buffered_frames()).map(|_| FrameSlot::new(backend.as_ref(), info.draw_threads())).collect();
        let threads = CommandThreadPool::new(backend.clone(), info.draw_threads());
        let timeline = SubmissionTimeline::new(backend.clone());
        let transient = TransientMemory::new(backend.clone(), &info);
        let pipeline = PipelineTracker::new(backend.clone());

        log::info!("Created graphics device with {} buffered frames and {} draw threads", info.buffered_frames(), info.draw_threads());

        let device = Self {
            backend,
            slot: info.buffered_frames() as usize - 1,
            draw_thread: info.draw_threads() - 1,
            info,
            collaborators,
            event_handlers: Vec::new(),

            frames,
            frame_index: None,
            in_frame: false,
            image_index: None,
            image_wait_pending: false,
            present_signaled: false,

            main_buffers: [None; QueueType::COUNT],
            queue_work: [false; QueueType::COUNT],
            compute_waits_graphics: false,
            pass: None,
            batch: None,
            sink: None,

            pipeline,
            current_layout: None,
            compute_program: None,
            compute_bound_in: None,
            propagated_sets: Vec::new(),
            viewports: FixedVec::new(),
            scissors: FixedVec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            wireframe: false,
            primitive_group: PrimitiveGroup::default(),

            stats: FrameStatistics::default(),
            last_stats: FrameStatistics::default(),
            stats_base: (0, 0),

            threads,
            timeline,
            transient,
        };

        for (slot, frame) in device.frames.iter().enumerate() {
            device.set_object_name(frame.image_available(), &format!("ImageAvailable{}", slot));
            device.set_object_name(frame.render_finished(), &format!("RenderFinished{}", slot));
        }

        device
    }

    pub fn get_backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn create_info(&self) -> &GraphicsDeviceCreateInfo {
        &self.info
    }

    pub fn is_in_begin_frame(&self) -> bool {
        self.in_frame
    }

    pub fn is_in_pass(&self) -> bool {
        self.pass.is_some()
    }

    pub fn is_in_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// The buffered frame slot of the current or last frame.
    pub fn current_slot(&self) -> usize {
        self.slot
    }

    pub fn current_draw_thread(&self) -> usize {
        self.draw_thread
    }

    /// The statistics of the frame in progress.
    pub fn frame_statistics(&self) -> FrameStatistics {
        self.stats
    }

    /// The statistics of the last ended frame.
    pub fn last_frame_statistics(&self) -> FrameStatistics {
        self.last_stats
    }

    pub fn timeline(&self) -> &SubmissionTimeline {
        &self.timeline
    }

    pub fn pipeline_tracker(&self) -> &PipelineTracker {
        &self.pipeline
    }

    pub fn transient_memory(&self) -> &TransientMemory {
        &self.transient
    }

    /// Starts a new frame. Returns false if the display could not provide an image in which case
    /// the frame is recorded and submitted but not presented.
    pub fn begin_frame(&mut self, frame_index: u64) -> bool {
        contract(!self.in_frame, "begin_frame inside a frame");
        contract(self.pass.is_none(), "begin_frame inside a pass");
        contract(self.batch.is_none(), "begin_frame inside a batch");

        if self.frame_index != Some(frame_index) {
            self.stats = FrameStatistics::default();
            self.stats_base = (self.pipeline.pipelines_built(), self.pipeline.pipeline_binds());
        }
        self.in_frame = true;

        self.slot = (self.slot + 1) % self.frames.len();
        self.frames[self.slot].recycle(self.backend.as_ref());
        self.transient.reset_slot(self.slot as u32);

        self.pipeline.reset();
        self.pipeline.set_input_layout_info(InputLayout::new(self.topology));
        self.pipeline.set_rasterization_info(self.wireframe);
        self.current_layout = None;
        self.compute_program = None;
        self.compute_bound_in = None;
        self.propagated_sets.clear();
        self.draw_thread = self.threads.thread_count() - 1;
        self.queue_work = [false; QueueType::COUNT];
        self.compute_waits_graphics = false;
        self.present_signaled = false;

        self.collaborators.shader_server.submit_descriptor_changes();

        let mut acquired = true;
        self.image_index = None;
        let image_available = self.frames[self.slot].image_available();
        if let Some(display) = self.collaborators.display.as_mut() {
            match display.acquire_next_image(image_available) {
                SwapchainStatus::Ok(index) | SwapchainStatus::Suboptimal(index) => {
                    self.image_index = Some(index);
                }
                SwapchainStatus::OutOfDate => {
                    log::debug!("Display out of date during acquire");
                    let extent = display.recreate();
                    self.notify_event_handlers(&RenderEvent::DisplayResized { width: extent.width, height: extent.height });
                    acquired = false;
                }
            }
        }
        self.image_wait_pending = self.image_index.is_some();

        for queue in [QueueType::Transfer, QueueType::Sparse] {
            let command_buffer = self.frames[self.slot].next_main_buffer(self.backend.as_ref(), queue);
            self.backend.begin_command_buffer(command_buffer, None);
            self.main_buffers[queue.index()] = Some(command_buffer);
        }

        acquired
    }

    /// Opens a submission on the graphics or compute queue. If `wait_queue` is set the submission
    /// waits for the latest work of that queue.
    pub fn begin_submission(&mut self, queue: QueueType, wait_queue: Option<QueueType>) {
        contract(self.in_frame, "begin_submission outside of a frame");
        contract(matches!(queue, QueueType::Graphics | QueueType::Compute), "only graphics and compute submissions can be opened");
        contract(self.main_buffers[queue.index()].is_none(), "begin_submission on a queue with an open submission");

        if let Some(wait_queue) = wait_queue {
            if self.timeline.append_wait(queue, vk::PipelineStageFlags::ALL_COMMANDS, TimelineWait::Queue(wait_queue)) {
                self.compute_waits_graphics |= queue == QueueType::Compute && wait_queue == QueueType::Graphics;
            }
        }

        if queue == QueueType::Graphics && self.image_wait_pending {
            let image_available = self.frames[self.slot].image_available();
            self.timeline.append_wait(queue, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, TimelineWait::Semaphore(SemaphoreOp::new_binary(image_available)));
            self.image_wait_pending = false;
        }

        let command_buffer = self.frames[self.slot].next_main_buffer(self.backend.as_ref(), queue);
        self.backend.begin_command_buffer(command_buffer, None);
        self.main_buffers[queue.index()] = Some(command_buffer);

        if queue == QueueType::Graphics {
            self.sink = Some(CommandSink::Main(command_buffer));
            self.pipeline.invalidate_binding();
        }
    }

    pub fn begin_pass(&mut self, pass: &Pass) {
        contract(self.in_frame, "begin_pass outside of a frame");
        contract(self.pass.is_none(), "begin_pass inside a pass");
        contract(self.batch.is_none(), "begin_pass inside a batch");
        let command_buffer = self.graphics_buffer("begin_pass");

        self.pipeline.set_framebuffer_layout_info(FramebufferLayout { render_pass: pass.render_pass(), subpass: 0 });
        self.backend.cmd_begin_render_pass(command_buffer, pass, pass.contents());

        self.sink = Some(if pass.contents() == vk::SubpassContents::INLINE {
            CommandSink::Main(command_buffer)
        } else {
            CommandSink::Blocked
        });

        self.pass = Some(ActivePass {
            pass: pass.clone(),
            subpass: 0,
            inheritance: pass.inheritance(0),
        });

        self.reset_clip_settings();
    }

    pub fn set_to_next_subpass(&mut self) {
        contract(self.batch.is_none(), "set_to_next_subpass inside a batch");
        let active = match self.pass.as_mut() {
            Some(active) => active,
            None => {
                log::error!("Graphics device contract violation: set_to_next_subpass outside of a pass");
                panic!()
            }
        };

        active.subpass += 1;
        if active.subpass >= active.pass.subpass_count() {
            log::error!("Graphics device contract violation: subpass {} exceeds subpass count {}", active.subpass, active.pass.subpass_count());
            panic!()
        }
        active.inheritance = active.pass.inheritance(active.subpass);
        let layout = FramebufferLayout { render_pass: active.pass.render_pass(), subpass: active.subpass };
        let contents = active.pass.contents();

        self.pipeline.set_framebuffer_layout_info(layout);
        let command_buffer = self.graphics_buffer("set_to_next_subpass");
        self.backend.cmd_next_subpass(command_buffer, contents);
    }

    pub fn begin_batch(&mut self, batch_type: BatchType) {
        contract(self.batch.is_none(), "begin_batch inside a batch");
        match &self.pass {
            Some(active) => contract(active.pass.contents() == vk::SubpassContents::SECONDARY_COMMAND_BUFFERS, "begin_batch in a pass with inline contents"),
            None => contract(false, "begin_batch outside of a pass"),
        }

        log::trace!("Beginning {} batch", batch_type.name());
        self.batch = Some(ActiveBatch {
            batch_type,
            started: vec![None; self.threads.thread_count()],
            order: Vec::new(),
        });

        self.set_to_next_sub_batch();
    }

    /// Moves recording to the next draw thread.
    pub fn set_to_next_sub_batch(&mut self) {
        let thread = (self.draw_thread + 1) % self.threads.thread_count();
        let inheritance = match &self.pass {
            Some(active) => active.inheritance,
            None => {
                log::error!("Graphics device contract violation: set_to_next_sub_batch outside of a pass");
                panic!()
            }
        };
        let batch = match self.batch.as_mut() {
            Some(batch) => batch,
            None => {
                log::error!("Graphics device contract violation: set_to_next_sub_batch outside of a batch");
                panic!()
            }
        };

        self.draw_thread = thread;
        if batch.started[thread].is_none() {
            let command_buffer = self.frames[self.slot].next_secondary_buffer(self.backend.as_ref(), thread);
            self.threads.begin(thread, command_buffer, inheritance);
            batch.started[thread] = Some(command_buffer);
            batch.order.push(thread);

            if self.info.validation_enabled() {
                self.threads.record(thread, Command::BeginLabel { name: String::from(batch.batch_type.name()), color: FRAME_MARKER_COLOR });
            }
        }

        self.sink = Some(CommandSink::Thread(thread));
        self.pipeline.invalidate_binding();
    }

    pub fn end_batch(&mut self) {
        let batch = match self.batch.take() {
            Some(batch) => batch,
            None => {
                log::error!("Graphics device contract violation: end_batch outside of a batch");
                panic!()
            }
        };

        for thread in &batch.order {
            if self.info.validation_enabled() {
                self.threads.record(*thread, Command::EndLabel);
            }
            self.threads.end(*thread);
        }

        let secondaries: Vec<vk::CommandBuffer> = batch.order.iter().map(|thread| self.threads.wait(*thread)).collect();

        let command_buffer = self.graphics_buffer("end_batch");
        if !secondaries.is_empty() {
            self.backend.cmd_execute_commands(command_buffer, &secondaries);
        }

        log::trace!("Ended {} batch with {} secondary command buffers", batch.batch_type.name(), secondaries.len());

        self.draw_thread = self.threads.thread_count() - 1;
        self.pipeline.unbind();
        self.sink = Some(CommandSink::Blocked);
        self.stats.batches += 1;
    }

    pub fn end_pass(&mut self) {
        contract(self.batch.is_none(), "end_pass inside a batch");
        contract(self.pass.is_some(), "end_pass outside of a pass");

        self.pass = None;
        self.propagated_sets.retain(|set| set.bind_point != vk::PipelineBindPoint::GRAPHICS);
        self.pipeline.unbind();

        let command_buffer = self.graphics_buffer("end_pass");
        self.backend.cmd_end_render_pass(command_buffer);
        self.sink = Some(CommandSink::Main(command_buffer));
    }

    /// Closes the submission on `queue`. If `wait_queue` is set the next flush of that queue waits
    /// for this submission. `end_of_frame` on the graphics queue signals presentation.
    pub fn end_submission(&mut self, queue: QueueType, wait_queue: Option<QueueType>, end_of_frame: bool) {
        contract(self.pass.is_none(), "end_submission inside a pass");
        let command_buffer = match self.main_buffers[queue.index()].take() {
            Some(command_buffer) if matches!(queue, QueueType::Graphics | QueueType::Compute) => command_buffer,
            _ => {
                log::error!("Graphics device contract violation: end_submission on {} without open submission", queue.name());
                panic!()
            }
        };

        self.backend.end_command_buffer(command_buffer);
        for kind in queue_transient_kinds(queue) {
            self.transient.flush(*kind);
        }
        self.timeline.append_submission(queue, command_buffer);

        if let Some(wait_queue) = wait_queue {
            if self.timeline.append_wait(wait_queue, vk::PipelineStageFlags::ALL_COMMANDS, TimelineWait::Queue(queue)) {
                self.compute_waits_graphics |= queue == QueueType::Graphics && wait_queue == QueueType::Compute;
            }
        }

        if queue == QueueType::Graphics {
            self.sink = None;
            if end_of_frame && self.image_index.is_some() && !self.present_signaled {
                let render_finished = self.frames[self.slot].render_finished();
                self.timeline.append_signal(queue, SemaphoreOp::new_binary(render_finished));
                self.present_signaled = true;
            }
        }
    }

    pub fn end_frame(&mut self, frame_index: u64) {
        contract(self.in_frame, "end_frame outside of a frame");
        contract(self.pass.is_none(), "end_frame inside a pass");
        contract(self.main_buffers[QueueType::Graphics.index()].is_none(), "end_frame with an open graphics submission");
        contract(self.main_buffers[QueueType::Compute.index()].is_none(), "end_frame with an open compute submission");

        // Memory written outside of a submission is only made visible here
        self.transient.flush_all();

        for queue in [QueueType::Transfer, QueueType::Sparse] {
            if let Some(command_buffer) = self.main_buffers[queue.index()].take() {
                self.backend.end_command_buffer(command_buffer);
                if self.queue_work[queue.index()] {
                    self.timeline.append_submission(queue, command_buffer);
                }
            }
        }

        // An acquired image must be consumed and presented even if nothing rendered to it
        if self.image_index.is_some() && !self.present_signaled {
            if self.image_wait_pending {
                let image_available = self.frames[self.slot].image_available();
                self.timeline.append_wait(QueueType::Graphics, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, TimelineWait::Semaphore(SemaphoreOp::new_binary(image_available)));
                self.image_wait_pending = false;
            }
            let render_finished = self.frames[self.slot].render_finished();
            self.timeline.append_signal(QueueType::Graphics, SemaphoreOp::new_binary(render_finished));
            self.present_signaled = true;
        }

        let transfer = self.flush_queue(QueueType::Transfer, &[]);
        let sparse = self.flush_queue(QueueType::Sparse, &[]);

        let mut producers = Vec::new();
        if transfer {
            producers.push(QueueType::Transfer);
        }
        if sparse {
            producers.push(QueueType::Sparse);
        }
        let compute = self.flush_queue(QueueType::Compute, &producers);
        if compute && !self.compute_waits_graphics {
            producers.push(QueueType::Compute);
        }
        self.flush_queue(QueueType::Graphics, &producers);

        if let Some(image_index) = self.image_index.take() {
            self.present(image_index);
        }

        self.stats.pipelines_built = self.pipeline.pipelines_built() - self.stats_base.0;
        self.stats.pipeline_binds = self.pipeline.pipeline_binds() - self.stats_base.1;
        self.last_stats = self.stats;
        if self.frame_index != Some(frame_index) {
            log::debug!("Frame {} statistics: {:?}", frame_index, self.stats);
            self.frame_index = Some(frame_index);
        }

        self.in_frame = false;
    }

    /// Flushes a queue's timeline with the slot fence if it has pending work or pending semaphore
    /// operations. `producers` are queues whose work of this frame is waited for.
    fn flush_queue(&mut self, queue: QueueType, producers: &[QueueType]) -> bool {
        let has_signals = queue == QueueType::Graphics && self.present_signaled;
        if !self.timeline.has_pending(queue) && !has_signals {
            return false;
        }

        for producer in producers {
            self.timeline.append_wait(queue, vk::PipelineStageFlags::ALL_COMMANDS, TimelineWait::Queue(*producer));
        }

        let validation = self.info.validation_enabled();
        if validation {
            self.backend.queue_begin_label(queue, &format!("End of frame {} submission", queue.name()), FRAME_MARKER_COLOR);
        }

        let fence = self.frames[self.slot].take_fence(queue);
        self.timeline.flush(queue, Some(fence));

        if validation {
            self.backend.queue_end_label(queue);
        }
        true
    }

    fn present(&mut self, image_index: u32) {
        let render_finished = self.frames[self.slot].render_finished();
        let display = match self.collaborators.display.as_mut() {
            Some(display) => display,
            None => return,
        };

        match display.present(image_index, render_finished) {
            SwapchainStatus::Ok(()) => {}
            SwapchainStatus::Suboptimal(()) | SwapchainStatus::OutOfDate => {
                log::debug!("Display out of date or suboptimal after present");
                let extent = display.recreate();
                self.notify_event_handlers(&RenderEvent::DisplayResized { width: extent.width, height: extent.height });
            }
        }
    }

    pub fn set_vertex_buffer(&mut self, stream: u32, buffer: BufferId, offset: vk::DeviceSize) {
        let native = self.native_buffer(buffer);
        self.record(Command::BindVertexBuffer { binding: stream, buffer: native, offset });
    }

    pub fn set_index_buffer(&mut self, buffer: BufferId, offset: vk::DeviceSize) {
        let native = self.native_buffer(buffer);
        let index_type = self.collaborators.buffers.get_index_type(buffer);
        self.record(Command::BindIndexBuffer { buffer: native, offset, index_type });
    }

    /// Binds transient vertex memory allocated in this frame.
    pub fn set_transient_vertex_buffer(&mut self, stream: u32, allocation: &TransientAllocation) {
        self.record(Command::BindVertexBuffer { binding: stream, buffer: allocation.buffer, offset: allocation.offset });
    }

    pub fn set_transient_index_buffer(&mut self, allocation: &TransientAllocation, index_type: vk::IndexType) {
        self.record(Command::BindIndexBuffer { buffer: allocation.buffer, offset: allocation.offset, index_type });
    }

    pub fn set_viewports(&mut self, viewports: &[vk::Viewport]) {
        self.viewports.assign(viewports);
        if self.can_apply_clip_settings() {
            self.record(Command::SetViewports { first: 0, viewports: viewports.to_vec() });
        }
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport, index: usize) {
        self.viewports.set(index, viewport);
        if self.can_apply_clip_settings() {
            self.record(Command::SetViewports { first: index as u32, viewports: vec![viewport] });
        }
    }

    pub fn set_scissor_rects(&mut self, scissors: &[vk::Rect2D]) {
        self.scissors.assign(scissors);
        if self.can_apply_clip_settings() {
            self.record(Command::SetScissors { first: 0, scissors: scissors.to_vec() });
        }
    }

    pub fn set_scissor_rect(&mut self, scissor: vk::Rect2D, index: usize) {
        self.scissors.set(index, scissor);
        if self.can_apply_clip_settings() {
            self.record(Command::SetScissors { first: index as u32, scissors: vec![scissor] });
        }
    }

    /// Restores the viewports and scissors of the active pass.
    pub fn reset_clip_settings(&mut self) {
        match &self.pass {
            Some(active) => {
                self.viewports.assign(active.pass.viewports());
                self.scissors.assign(active.pass.scissors());
            }
            None => {
                self.viewports.clear();
                self.scissors.clear();
            }
        }
        // Inline passes have no pipeline bind to replay them
        let inline = matches!(self.sink, Some(CommandSink::Main(_))) && self.pass.is_some();
        if inline || self.can_apply_clip_settings() {
            self.apply_clip_settings();
        }
    }

    fn can_apply_clip_settings(&self) -> bool {
        self.pipeline.current_pipeline().is_some() && self.sink.map_or(false, |sink| sink.accepts_commands())
    }

    fn apply_clip_settings(&mut self) {
        if !self.viewports.is_empty() {
            self.record(Command::SetViewports { first: 0, viewports: self.viewports.to_vec() });
        }
        if !self.scissors.is_empty() {
            self.record(Command::SetScissors { first: 0, scissors: self.scissors.to_vec() });
        }
    }

    /// Binds a descriptor set at `set_index`. Sets bound before a pipeline are kept and bound after
    /// every following pipeline bind.
    pub fn set_resource_table(&mut self, set: vk::DescriptorSet, set_index: u32, bind_point: vk::PipelineBindPoint, offsets: &[u32]) {
        let bound = match bind_point {
            vk::PipelineBindPoint::GRAPHICS => self.pipeline.current_pipeline().is_some(),
            vk::PipelineBindPoint::COMPUTE => self.compute_bound_in.is_some() && self.compute_bound_in == self.try_compute_target(),
            _ => {
                log::error!("Unsupported bind point {:?}", bind_point);
                panic!()
            }
        };

        if !bound {
            self.propagated_sets.retain(|other| other.bind_point != bind_point || other.set_index != set_index);
            self.propagated_sets.push(PropagatedSet { bind_point, set_index, set, offsets: offsets.to_vec() });
            return;
        }

        let command = Command::BindDescriptorSets {
            bind_point,
            layout: self.layout("set_resource_table"),
            first_set: set_index,
            sets: vec![set],
            offsets: offsets.to_vec(),
        };
        if bind_point == vk::PipelineBindPoint::GRAPHICS {
            self.record(command);
        } else {
            let command_buffer = self.compute_target();
            record_command(self.backend.as_ref(), command_buffer, &command);
        }
    }

    /// Overrides the pipeline layout used for resource tables and push constants until the next
    /// program is set.
    pub fn set_resource_table_pipeline(&mut self, layout: vk::PipelineLayout) {
        contract(layout != vk::PipelineLayout::null(), "set_resource_table_pipeline with a null layout");
        self.current_layout = Some(layout);
    }

    pub fn push_constants(&mut self, bind_point: vk::PipelineBindPoint, offset: u32, data: &[u8]) {
        let layout = self.layout("push_constants");
        match bind_point {
            vk::PipelineBindPoint::GRAPHICS => {
                self.record(Command::PushConstants { layout, stages: vk::ShaderStageFlags::ALL_GRAPHICS, offset, data: data.to_vec() });
            }
            vk::PipelineBindPoint::COMPUTE => {
                contract(self.pass.is_none(), "compute push constants inside a pass");
                let command_buffer = self.compute_target();
                record_command(self.backend.as_ref(), command_buffer, &Command::PushConstants { layout, stages: vk::ShaderStageFlags::COMPUTE, offset, data: data.to_vec() });
            }
            _ => {
                log::error!("Unsupported bind point {:?}", bind_point);
                panic!()
            }
        }
    }

    pub fn push_constants_pod<T: Pod>(&mut self, bind_point: vk::PipelineBindPoint, offset: u32, data: &T) {
        self.push_constants(bind_point, offset, bytemuck::bytes_of(data));
    }

    pub fn insert_barrier(&mut self, barrier: &Barrier, queue: QueueType) {
        self.record_for_queue(queue, Command::Barrier(Box::new(barrier.clone())));
    }

    /// Copies image regions into the main command buffer of `queue`.
    pub fn copy_image(&mut self, copy: &ImageCopy, queue: QueueType) {
        contract(self.pass.is_none(), "copy_image inside a pass");
        self.record_for_queue(queue, Command::CopyImage(Box::new(copy.clone())));
    }

    pub fn blit_image(&mut self, blit: &ImageBlit) {
        contract(self.pass.is_none(), "blit_image inside a pass");
        self.record_for_queue(QueueType::Graphics, Command::BlitImage(Box::new(blit.clone())));
    }

    pub fn signal_event(&mut self, event: &Event, queue: QueueType) {
        self.record_for_queue(queue, Command::SetEvent { event: event.handle, stage: event.signal_stage });
    }

    pub fn wait_event(&mut self, event: &Event, queue: QueueType) {
        self.record_for_queue(queue, Command::WaitEvent { event: event.handle, barrier: Box::new(event.wait.clone()) });
    }

    pub fn reset_event(&mut self, event: &Event, queue: QueueType) {
        self.record_for_queue(queue, Command::ResetEvent { event: event.handle, stage: event.signal_stage });
    }

    pub fn begin_marker(&mut self, queue: QueueType, name: &str, color: Vec4f32) {
        if self.info.validation_enabled() {
            self.record_for_queue(queue, Command::BeginLabel { name: String::from(name), color: to_color(color) });
        }
    }

    pub fn insert_marker(&mut self, queue: QueueType, name: &str, color: Vec4f32) {
        if self.info.validation_enabled() {
            self.record_for_queue(queue, Command::InsertLabel { name: String::from(name), color: to_color(color) });
        }
    }

    pub fn end_marker(&mut self, queue: QueueType) {
        if self.info.validation_enabled() {
            self.record_for_queue(queue, Command::EndLabel);
        }
    }

    pub fn begin_queue_marker(&mut self, queue: QueueType, name: &str, color: Vec4f32) {
        if self.info.validation_enabled() {
            self.backend.queue_begin_label(queue, name, to_color(color));
        }
    }

    pub fn insert_queue_marker(&mut self, queue: QueueType, name: &str, color: Vec4f32) {
        if self.info.validation_enabled() {
            self.backend.queue_insert_label(queue, name, to_color(color));
        }
    }

    pub fn end_queue_marker(&mut self, queue: QueueType) {
        if self.info.validation_enabled() {
            self.backend.queue_end_label(queue);
        }
    }

    /// Sets the current program. Graphics programs become a pipeline fragment, compute programs are
    /// bound immediately if a submission is open outside of a pass.
    pub fn set_shader_program(&mut self, program: &Arc<ShaderProgram>) {
        self.current_layout = Some(program.layout());

        match program.kind() {
            ProgramKind::Graphics => {
                self.pipeline.set_shader_program_info(program);
            }
            ProgramKind::Compute(_) => {
                self.pipeline.unbind();
                self.compute_program = Some(program.clone());
                self.compute_bound_in = None;
                if self.pass.is_none() && self.try_compute_target().is_some() {
                    self.bind_compute_pipeline();
                }
            }
        }
    }

    pub fn set_vertex_layout(&mut self, layout: &Arc<VertexLayout>) {
        self.pipeline.set_vertex_layout_info(layout);
    }

    pub fn set_primitive_topology(&mut self, topology: vk::PrimitiveTopology) {
        self.topology = topology;
        self.pipeline.set_input_layout_info(InputLayout::new(topology));
    }

    pub fn get_primitive_topology(&self) -> vk::PrimitiveTopology {
        self.topology
    }

    /// Rasterizes polygons as lines in all pipelines bound from now on.
    pub fn set_render_wireframe(&mut self, wireframe: bool) {
        self.wireframe = wireframe;
        self.pipeline.set_rasterization_info(wireframe);
    }

    pub fn get_render_wireframe(&self) -> bool {
        self.wireframe
    }

    pub fn set_primitive_group(&mut self, group: PrimitiveGroup) {
        self.primitive_group = group;
    }

    pub fn get_primitive_group(&self) -> PrimitiveGroup {
        self.primitive_group
    }

    /// Builds and binds the graphics pipeline if any fragment changed since the last bind on the
    /// current command buffer.
    pub fn bind_graphics_pipeline(&mut self) {
        contract(self.pass.is_some(), "bind_graphics_pipeline outside of a pass");

        let pipeline = match self.pipeline.build_if_dirty() {
            Some(pipeline) => pipeline,
            None => return,
        };

        self.record(Command::BindPipeline { bind_point: vk::PipelineBindPoint::GRAPHICS, pipeline });

        for binding in self.collaborators.shader_server.shared_descriptor_sets(vk::PipelineBindPoint::GRAPHICS) {
            self.record(Command::BindDescriptorSets {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                layout: binding.layout,
                first_set: binding.first_set,
                sets: binding.sets,
                offsets: binding.offsets,
            });
        }

        self.replay_propagated_sets(vk::PipelineBindPoint::GRAPHICS, None);
        self.apply_clip_settings();
    }

    fn bind_compute_pipeline(&mut self) {
        let (pipeline, layout) = match &self.compute_program {
            Some(program) => match program.kind() {
                ProgramKind::Compute(pipeline) => (pipeline, program.layout()),
                ProgramKind::Graphics => {
                    log::error!("Graphics program {:?} bound as compute program", program.get_id());
                    panic!()
                }
            },
            None => {
                log::error!("Graphics device contract violation: compute without a compute program");
                panic!()
            }
        };

        let command_buffer = self.compute_target();
        let backend = self.backend.clone();
        backend.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);

        for binding in self.collaborators.shader_server.shared_descriptor_sets(vk::PipelineBindPoint::COMPUTE) {
            backend.cmd_bind_descriptor_sets(command_buffer, vk::PipelineBindPoint::COMPUTE, binding.layout, binding.first_set, &binding.sets, &binding.offsets);
        }

        self.current_layout = Some(layout);
        self.replay_propagated_sets(vk::PipelineBindPoint::COMPUTE, Some(command_buffer));
        self.compute_bound_in = Some(command_buffer);
    }

    fn replay_propagated_sets(&mut self, bind_point: vk::PipelineBindPoint, command_buffer: Option<vk::CommandBuffer>) {
        let sets: Vec<PropagatedSet> = self.propagated_sets.iter().filter(|set| set.bind_point == bind_point).cloned().collect();
        if sets.is_empty() {
            return;
        }

        let layout = self.layout("propagated resource tables");
        for set in sets {
            let command = Command::BindDescriptorSets { bind_point, layout, first_set: set.set_index, sets: vec![set.set], offsets: set.offsets };
            match command_buffer {
                Some(command_buffer) => record_command(self.backend.as_ref(), command_buffer, &command),
                None => self.record(command),
            }
        }
    }

    pub fn draw(&mut self) {
        self.draw_instanced(1, 0);
    }

    pub fn draw_indexed_instanced(&mut self, instances: u32, base_instance: u32) {
        self.draw_instanced(instances, base_instance);
    }

    fn draw_instanced(&mut self, instances: u32, base_instance: u32) {
        contract(self.pass.is_some(), "draw outside of a pass");
        self.bind_graphics_pipeline();

        let group = self.primitive_group;
        let command = if group.is_indexed() {
            Command::DrawIndexed {
                index_count: group.index_count,
                instance_count: instances,
                first_index: group.base_index,
                vertex_offset: group.base_vertex,
                first_instance: base_instance,
            }
        } else {
            Command::Draw {
                vertex_count: group.vertex_count,
                instance_count: instances,
                first_vertex: group.base_vertex.max(0) as u32,
                first_instance: base_instance,
            }
        };
        self.record(command);

        self.stats.draw_calls += 1;
        self.stats.primitives += group.primitive_count(self.topology) as u64 * instances as u64;
    }

    /// Dispatches the current compute program into the graphics submission if one is open, the
    /// compute submission otherwise.
    pub fn compute(&mut self, x: u32, y: u32, z: u32) {
        contract(self.pass.is_none(), "compute inside a pass");
        let command_buffer = self.compute_target();
        if self.compute_bound_in != Some(command_buffer) {
            self.bind_compute_pipeline();
        }

        self.backend.cmd_dispatch(command_buffer, x, y, z);
        self.stats.computes += 1;
    }

    pub fn allocate_constant_memory(&mut self, kind: TransientKind, size: vk::DeviceSize) -> vk::DeviceSize {
        contract(self.in_frame, "transient allocation outside of a frame");
        self.transient.allocate_constant_memory(kind, size)
    }

    pub fn allocate_vertex_memory(&mut self, size: vk::DeviceSize) -> TransientAllocation {
        contract(self.in_frame, "transient allocation outside of a frame");
        self.transient.allocate_vertex_memory(size)
    }

    pub fn allocate_index_memory(&mut self, size: vk::DeviceSize) -> TransientAllocation {
        contract(self.in_frame, "transient allocation outside of a frame");
        self.transient.allocate_index_memory(size)
    }

    /// Allocates constant memory for `data`, copies it and returns the offset into the constant
    /// buffer of `kind`.
    pub fn upload_constants<T: Pod>(&mut self, kind: TransientKind, data: &T) -> vk::DeviceSize {
        contract(self.in_frame, "transient allocation outside of a frame");
        if !kind.is_constant() {
            log::error!("Constant upload into {:?} memory", kind);
            panic!()
        }
        let bytes = bytemuck::bytes_of(data);
        let allocation = self.transient.allocate(kind, bytes.len() as vk::DeviceSize);
        allocation.write(bytes);
        allocation.offset
    }

    pub fn transient_buffer(&self, kind: TransientKind) -> vk::Buffer {
        self.transient.buffer(kind)
    }

    /// Names a native object for debugging tools. Names are only forwarded with validation.
    pub fn set_object_name<H: vk::Handle>(&self, object: H, name: &str) {
        if self.info.validation_enabled() {
            self.backend.set_object_name(H::TYPE, object.as_raw(), name);
        }
    }

    pub fn create_fence(&self, signaled: bool) -> Fence {
        Fence::new(self.backend.create_fence(signaled), signaled)
    }

    /// Submits an empty batch to `queue` that signals `fence`.
    pub fn signal_fence(&mut self, fence: &mut Fence, queue: QueueType) {
        if fence.is_pending() {
            log::error!("Signaled {:?} that is already pending", fence);
            panic!()
        }
        self.backend.queue_submit(queue, &QueueSubmit { command_buffers: &[], waits: &[], signals: &[] }, fence.get_handle());
        fence.set_pending(true);
    }

    /// Returns true if the fence is signaled.
    pub fn peek_fence(&self, fence: &Fence) -> bool {
        self.backend.get_fence_status(fence.get_handle())
    }

    pub fn reset_fence(&self, fence: &mut Fence) {
        self.backend.reset_fence(fence.get_handle());
        fence.set_pending(false);
    }

    /// Waits up to `timeout_ns` for the fence. Returns false on timeout or if nothing will signal
    /// the fence.
    pub fn wait_fence(&self, fence: &Fence, timeout_ns: u64) -> bool {
        if !fence.is_pending() {
            log::warn!("Waited on {:?} that has no pending signal", fence);
            return false;
        }
        self.backend.wait_fence(fence.get_handle(), timeout_ns)
    }

    pub fn destroy_fence(&self, fence: Fence) {
        self.backend.destroy_fence(fence.get_handle());
    }

    pub fn attach_event_handler(&mut self, handler: Arc<dyn RenderEventHandler>) {
        self.event_handlers.push(handler);
    }

    pub fn remove_event_handler(&mut self, handler: &Arc<dyn RenderEventHandler>) {
        self.event_handlers.retain(|other| !Arc::ptr_eq(other, handler));
    }

    /// Returns true if any handler handled the event.
    pub fn notify_event_handlers(&self, event: &RenderEvent) -> bool {
        let mut handled = false;
        for handler in &self.event_handlers {
            handled |= handler.handle_event(event);
        }
        handled
    }

    pub fn wait_idle(&self, queue: QueueType) {
        self.timeline.wait_idle(queue);
        self.backend.queue_wait_idle(queue);
    }

    pub fn wait_for_all_queues(&self) {
        for queue in QueueType::ALL {
            self.wait_idle(queue);
        }
    }

    /// Evicts every pipeline built from `program`. The next draw with the program rebuilds it.
    pub fn reload_shader_program(&mut self, program: UUID) {
        let evicted = self.pipeline.reload_program(program);
        log::debug!("Reloaded program {:?}, evicted {} pipelines", program, evicted);
    }

    /// The primary command buffer recording for `queue`. Marks the queue as having work this frame.
    pub fn main_command_buffer(&mut self, queue: QueueType) -> vk::CommandBuffer {
        self.queue_buffer(queue)
    }

    fn queue_buffer(&mut self, queue: QueueType) -> vk::CommandBuffer {
        match self.main_buffers[queue.index()] {
            Some(command_buffer) => {
                self.queue_work[queue.index()] = true;
                command_buffer
            }
            None => {
                log::error!("Graphics device contract violation: no {} command buffer is recording", queue.name());
                panic!()
            }
        }
    }

    fn graphics_buffer(&mut self, operation: &str) -> vk::CommandBuffer {
        match self.main_buffers[QueueType::Graphics.index()] {
            Some(command_buffer) => command_buffer,
            None => {
                log::error!("Graphics device contract violation: {} without open graphics submission", operation);
                panic!()
            }
        }
    }

    fn try_compute_target(&self) -> Option<vk::CommandBuffer> {
        self.main_buffers[QueueType::Graphics.index()].or(self.main_buffers[QueueType::Compute.index()])
    }

    fn compute_target(&self) -> vk::CommandBuffer {
        match self.try_compute_target() {
            Some(command_buffer) => command_buffer,
            None => {
                log::error!("Graphics device contract violation: compute work without open graphics or compute submission");
                panic!()
            }
        }
    }

    fn layout(&self, operation: &str) -> vk::PipelineLayout {
        match self.current_layout {
            Some(layout) => layout,
            None => {
                log::error!("Graphics device contract violation: {} without a program or resource table layout", operation);
                panic!()
            }
        }
    }

    fn native_buffer(&self, buffer: BufferId) -> vk::Buffer {
        if !self.collaborators.buffers.is_valid(buffer) {
            log::error!("Used invalid buffer {:?}", buffer);
            panic!()
        }
        self.collaborators.buffers.get_native(buffer)
    }

    fn record(&mut self, command: Command) {
        match self.sink {
            Some(sink) => sink.record(command, self.backend.as_ref(), &mut self.threads),
            None => {
                log::error!("Graphics device contract violation: recorded {} without open graphics submission", command.name());
                panic!()
            }
        }
    }

    /// Commands for the graphics queue inside a pass follow the sink, everything else goes to the
    /// main command buffer of the queue.
    fn record_for_queue(&mut self, queue: QueueType, command: Command) {
        if queue == QueueType::Graphics && self.pass.is_some() {
            self.record(command);
        } else {
            let command_buffer = self.queue_buffer(queue);
            record_command(self.backend.as_ref(), command_buffer, &command);
        }
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        self.threads.shutdown();
        if !std::thread::panicking() {
            self.wait_for_all_queues();
        }

        for frame in &mut self.frames {
            frame.destroy(self.backend.as_ref());
        }
        self.frames.clear();
        self.transient.destroy();
        self.timeline.destroy();
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::capture::RecordedCall;
    use crate::device::collaborators::SwapchainStatus;
    use crate::util::test::*;

    use super::*;

    fn single_thread_info() -> GraphicsDeviceCreateInfo {
        let mut info = GraphicsDeviceCreateInfo::new();
        info.set_draw_threads(1);
        info
    }

    fn prepare_triangle(device: &mut GraphicsDevice, program: &Arc<ShaderProgram>, layout: &Arc<VertexLayout>) {
        device.set_shader_program(program);
        device.set_vertex_layout(layout);
        device.set_primitive_group(PrimitiveGroup::vertices(0, 3));
    }

    #[test]
    fn test_inline_pass_single_draw() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let program = make_graphics_program(&backend, "triangle");
        let layout = make_vertex_layout();
        let pass = make_pass(&backend, 64, 64).inline();

        assert!(device.begin_frame(0));
        device.begin_submission(QueueType::Graphics, None);
        device.begin_pass(&pass);
        prepare_triangle(&mut device, &program, &layout);
        device.draw();
        device.draw();
        device.end_pass();
        device.end_submission(QueueType::Graphics, None, true);
        device.end_frame(0);

        assert_eq!(backend.pipelines().len(), 1);

        let submissions = backend.submissions_for(QueueType::Graphics);
        assert_eq!(submissions.len(), 1);
        let calls = submissions[0].flattened();
        assert_eq!(calls.iter().filter(|call| matches!(call, RecordedCall::BindPipeline { .. })).count(), 1);
        assert_eq!(calls.iter().filter(|call| call.is_draw()).count(), 2);

        let stats = device.last_frame_statistics();
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.primitives, 2);
        assert_eq!(stats.pipelines_built, 1);
        assert_eq!(stats.pipeline_binds, 1);
    }

    #[test]
    #[should_panic]
    fn test_nested_begin_frame() {
        let (_backend, mut device) = make_capture_device(single_thread_info());
        device.begin_frame(0);
        device.begin_frame(1);
    }

    #[test]
    #[should_panic]
    fn test_batch_in_inline_pass() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let pass = make_pass(&backend, 16, 16).inline();

        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.begin_pass(&pass);
        device.begin_batch(BatchType::Geometry);
    }

    #[test]
    #[should_panic]
    fn test_draw_outside_batch_in_secondary_pass() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let program = make_graphics_program(&backend, "blocked");
        let layout = make_vertex_layout();
        let pass = make_pass(&backend, 16, 16);

        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.begin_pass(&pass);
        prepare_triangle(&mut device, &program, &layout);
        device.draw();
    }

    #[test]
    #[should_panic]
    fn test_end_submission_without_begin() {
        let (_backend, mut device) = make_capture_device(single_thread_info());
        device.begin_frame(0);
        device.end_submission(QueueType::Compute, None, false);
    }

    #[test]
    #[should_panic]
    fn test_end_batch_without_begin() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let pass = make_pass(&backend, 16, 16);

        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.begin_pass(&pass);
        device.end_batch();
    }

    #[test]
    #[should_panic]
    fn test_end_pass_without_begin() {
        let (_backend, mut device) = make_capture_device(single_thread_info());
        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.end_pass();
    }

    #[test]
    #[should_panic]
    fn test_begin_pass_outside_frame() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let pass = make_pass(&backend, 16, 16);
        device.begin_pass(&pass);
    }

    #[test]
    #[should_panic]
    fn test_begin_pass_without_submission() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let pass = make_pass(&backend, 16, 16);
        device.begin_frame(0);
        device.begin_pass(&pass);
    }

    #[test]
    #[should_panic]
    fn test_begin_pass_inside_pass() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let pass = make_pass(&backend, 16, 16).inline();

        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.begin_pass(&pass);
        device.begin_pass(&pass);
    }

    #[test]
    #[should_panic]
    fn test_begin_batch_outside_pass() {
        let (_backend, mut device) = make_capture_device(single_thread_info());
        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.begin_batch(BatchType::Geometry);
    }

    #[test]
    #[should_panic]
    fn test_end_frame_without_begin() {
        let (_backend, mut device) = make_capture_device(single_thread_info());
        device.end_frame(0);
    }

    #[test]
    #[should_panic]
    fn test_end_frame_with_open_submission() {
        let (_backend, mut device) = make_capture_device(single_thread_info());
        device.begin_frame(0);
        device.begin_submission(QueueType::Compute, None);
        device.end_frame(0);
    }

    #[test]
    fn test_sub_batches_execute_in_start_order() {
        let mut info = GraphicsDeviceCreateInfo::new();
        info.set_draw_threads(3);
        let (backend, mut device) = make_capture_device(info);
        let program = make_graphics_program(&backend, "batched");
        let layout = make_vertex_layout();
        let pass = make_pass(&backend, 32, 32);

        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.begin_pass(&pass);
        device.begin_batch(BatchType::Shapes);
        prepare_triangle(&mut device, &program, &layout);
        for vertex_count in [3, 6, 9] {
            device.set_primitive_group(PrimitiveGroup::vertices(0, vertex_count));
            device.draw();
            device.set_to_next_sub_batch();
        }
        device.end_batch();
        device.end_pass();
        device.end_submission(QueueType::Graphics, None, true);
        device.end_frame(0);

        let submission = &backend.submissions_for(QueueType::Graphics)[0];
        let main = submission.record(submission.command_buffers[0]).unwrap();
        let executes: Vec<&Vec<vk::CommandBuffer>> = main.calls.iter().filter_map(|call| match call {
            RecordedCall::ExecuteCommands(secondaries) => Some(secondaries),
            _ => None,
        }).collect();
        assert_eq!(executes.len(), 1);
        assert_eq!(executes[0].len(), 3);

        for (thread, secondary) in executes[0].iter().enumerate() {
            let record = submission.record(*secondary).unwrap();
            assert_eq!(record.thread.as_deref(), Some(format!("DrawCmdBufferThread{}", thread).as_str()));
            assert!(record.inheritance.is_some());
        }

        let draws: Vec<u32> = submission.flattened().iter().filter_map(|call| match call {
            RecordedCall::Draw { vertex_count, .. } => Some(*vertex_count),
            _ => None,
        }).collect();
        assert_eq!(draws, vec![3, 6, 9]);

        let stats = device.last_frame_statistics();
        assert_eq!(stats.pipelines_built, 1);
        assert_eq!(stats.pipeline_binds, 3);
        assert_eq!(stats.batches, 1);
        assert_eq!(device.current_draw_thread(), 2);
    }

    #[test]
    fn test_resource_table_before_pipeline_is_propagated() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let program = make_graphics_program(&backend, "textured");
        let layout = make_vertex_layout();
        let pass = make_pass(&backend, 8, 8).inline();
        let set = backend.fabricate();

        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.begin_pass(&pass);
        prepare_triangle(&mut device, &program, &layout);
        device.set_resource_table(set, 2, vk::PipelineBindPoint::GRAPHICS, &[64]);
        device.draw();
        device.end_pass();
        device.end_submission(QueueType::Graphics, None, true);
        device.end_frame(0);

        let calls = backend.submissions_for(QueueType::Graphics)[0].flattened();
        let bind = calls.iter().position(|call| matches!(call, RecordedCall::BindPipeline { .. })).unwrap();
        let sets = calls.iter().position(|call| matches!(call, RecordedCall::BindDescriptorSets { first_set: 2, offsets, .. } if offsets == &vec![64])).unwrap();
        assert!(bind < sets);
    }

    #[test]
    fn test_out_of_date_acquire_skips_present() {
        let (display, log) = ScriptedDisplay::new(vk::Extent2D { width: 800, height: 600 });
        let display = display.script(&[SwapchainStatus::OutOfDate]);
        let (backend, mut device) = make_capture_device_with(single_thread_info(), make_collaborators().with_display(Box::new(display)));
        let handler = Arc::new(RecordingEventHandler::new(true));
        device.attach_event_handler(handler.clone());

        assert!(!device.begin_frame(0));
        device.end_frame(0);

        assert!(log.lock().unwrap().presented.is_empty());
        assert_eq!(log.lock().unwrap().recreated, 1);
        assert_eq!(*handler.events.lock().unwrap(), vec![RenderEvent::DisplayResized { width: 800, height: 600 }]);
        assert!(backend.submissions_for(QueueType::Graphics).is_empty());

        assert!(device.begin_frame(1));
        device.end_frame(1);
        assert_eq!(log.lock().unwrap().presented.len(), 1);
    }

    #[test]
    fn test_present_waits_for_render_finished() {
        let (display, log) = ScriptedDisplay::new(vk::Extent2D { width: 4, height: 4 });
        let (backend, mut device) = make_capture_device_with(single_thread_info(), make_collaborators().with_display(Box::new(display.script(&[SwapchainStatus::Ok(2)]))));

        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.end_submission(QueueType::Graphics, None, true);
        device.end_frame(0);

        let log = log.lock().unwrap();
        let (acquired, image_available) = log.acquired[0];
        let (presented, render_finished) = log.presented[0];
        assert_eq!(acquired, 2);
        assert_eq!(presented, 2);

        let submission = &backend.submissions_for(QueueType::Graphics)[0];
        let wait = submission.waits_on(image_available).unwrap();
        assert_eq!(wait.stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(submission.signals(render_finished).is_some());
        assert!(submission.signals(device.timeline().semaphore(QueueType::Graphics)).is_some());
    }

    #[test]
    fn test_compute_waits_for_graphics() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let program = make_compute_program(&backend, "cull");

        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.end_submission(QueueType::Graphics, Some(QueueType::Compute), false);
        device.begin_submission(QueueType::Compute, None);
        device.set_shader_program(&program);
        device.compute(4, 1, 1);
        device.end_submission(QueueType::Compute, None, false);
        device.end_frame(0);

        let graphics_timeline = device.timeline().semaphore(QueueType::Graphics);
        let compute_timeline = device.timeline().semaphore(QueueType::Compute);

        let compute = &backend.submissions_for(QueueType::Compute)[0];
        assert_eq!(compute.waits_on(graphics_timeline).unwrap().op.value, Some(1));
        assert!(compute.flattened().iter().any(|call| matches!(call, RecordedCall::Dispatch { x: 4, .. })));

        let graphics = &backend.submissions_for(QueueType::Graphics)[0];
        assert!(graphics.waits_on(compute_timeline).is_none());
        assert_eq!(device.frame_statistics().computes, 1);
    }

    #[test]
    fn test_barrier_outside_pass_goes_to_queue() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let barrier = Barrier::new(vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::VERTEX_INPUT);

        device.begin_frame(0);
        device.insert_barrier(&barrier, QueueType::Transfer);
        device.end_frame(0);

        let transfer = backend.submissions_for(QueueType::Transfer);
        assert_eq!(transfer.len(), 1);
        assert!(matches!(&transfer[0].flattened()[0], RecordedCall::PipelineBarrier { src_stage, .. } if *src_stage == vk::PipelineStageFlags::TRANSFER));
        assert!(backend.submissions_for(QueueType::Sparse).is_empty());
    }

    #[test]
    fn test_image_copies_feed_graphics() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let (staging, texture, target) = (backend.fabricate(), backend.fabricate(), backend.fabricate());
        let extent = vk::Extent3D { width: 64, height: 64, depth: 1 };
        let rect = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: vk::Extent2D { width: 64, height: 64 } };

        device.begin_frame(0);
        device.copy_image(&ImageCopy::new(staging, texture).color_level(0, extent), QueueType::Transfer);
        device.begin_submission(QueueType::Graphics, None);
        device.blit_image(&ImageBlit::new(texture, target, vk::Filter::LINEAR).color_rect(0, rect, 0, rect));
        device.end_submission(QueueType::Graphics, None, true);
        device.end_frame(0);

        let transfer = &backend.submissions_for(QueueType::Transfer)[0];
        assert!(matches!(transfer.flattened().as_slice(), [RecordedCall::CopyImage { regions: 1, .. }]));

        let graphics = &backend.submissions_for(QueueType::Graphics)[0];
        assert_eq!(graphics.waits_on(device.timeline().semaphore(QueueType::Transfer)).unwrap().op.value, Some(1));
        assert!(graphics.flattened().iter().any(|call| matches!(call, RecordedCall::BlitImage { src, dst, filter, .. } if *src == texture && *dst == target && *filter == vk::Filter::LINEAR)));
    }

    #[test]
    #[should_panic]
    fn test_copy_inside_pass() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let pass = make_pass(&backend, 16, 16).inline();

        device.begin_frame(0);
        device.begin_submission(QueueType::Graphics, None);
        device.begin_pass(&pass);
        device.copy_image(&ImageCopy::new(backend.fabricate(), backend.fabricate()), QueueType::Graphics);
    }

    #[test]
    fn test_wireframe_selects_pipeline() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let program = make_graphics_program(&backend, "wireframe");
        let layout = make_vertex_layout();
        let pass = make_pass(&backend, 32, 32).inline();

        for frame in 0..2 {
            device.begin_frame(frame);
            device.begin_submission(QueueType::Graphics, None);
            device.begin_pass(&pass);
            prepare_triangle(&mut device, &program, &layout);
            device.draw();
            device.set_render_wireframe(!device.get_render_wireframe());
            device.draw();
            device.end_pass();
            device.end_submission(QueueType::Graphics, None, true);
            device.end_frame(frame);
        }

        let pipelines = backend.pipelines();
        assert_eq!(pipelines.len(), 2);
        assert!(!pipelines[0].wireframe);
        assert!(pipelines[1].wireframe);

        // The second frame starts in wireframe and switches back
        assert!(!device.get_render_wireframe());
        let calls = backend.submissions_for(QueueType::Graphics)[1].flattened();
        let bound: Vec<vk::Pipeline> = calls.iter().filter_map(|call| match call {
            RecordedCall::BindPipeline { pipeline, .. } => Some(*pipeline),
            _ => None,
        }).collect();
        assert_eq!(bound, vec![pipelines[1].pipeline, pipelines[0].pipeline]);
    }

    #[test]
    fn test_object_names_only_with_validation() {
        let image: vk::Image = vk::Handle::from_raw(0x77);

        let (backend, device) = make_capture_device(single_thread_info());
        device.set_object_name(image, "Albedo");
        assert_eq!(backend.object_name(image), None);
        assert_eq!(backend.object_name(device.frames[0].image_available()), None);

        let mut info = single_thread_info();
        info.enable_validation();
        let (backend, device) = make_capture_device(info);
        device.set_object_name(image, "Albedo");
        assert_eq!(backend.object_name(image).as_deref(), Some("Albedo"));
        assert_eq!(backend.object_name(device.frames[1].render_finished()).as_deref(), Some("RenderFinished1"));
    }

    #[test]
    fn test_markers_only_with_validation() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        device.begin_frame(0);
        device.insert_marker(QueueType::Transfer, "upload", Vec4f32::new(1.0, 0.0, 0.0, 1.0));
        device.begin_queue_marker(QueueType::Transfer, "queue", Vec4f32::zeros());
        device.end_frame(0);
        assert!(backend.submissions().is_empty());
        assert!(backend.queue_labels().is_empty());

        let mut info = single_thread_info();
        info.enable_validation();
        let (backend, mut device) = make_capture_device(info);
        device.begin_frame(0);
        device.insert_marker(QueueType::Transfer, "upload", Vec4f32::new(1.0, 0.0, 0.0, 1.0));
        device.end_frame(0);

        let calls = backend.submissions_for(QueueType::Transfer)[0].flattened();
        assert!(matches!(&calls[0], RecordedCall::InsertLabel(name) if name == "upload"));
        assert_eq!(backend.queue_labels().last(), Some(&(QueueType::Transfer, None)));
    }

    #[test]
    fn test_statistics_reset_on_new_frame_index() {
        let (backend, mut device) = make_capture_device(single_thread_info());
        let program = make_compute_program(&backend, "stats");

        for frame in [0, 0, 1] {
            device.begin_frame(frame);
            device.begin_submission(QueueType::Compute, None);
            device.set_shader_program(&program);
            device.compute(1, 1, 1);
            device.end_submission(QueueType::Compute, None, false);
            device.end_frame(frame);
        }

        assert_eq!(device.last_frame_statistics().computes, 1);
        assert_eq!(backend.submissions_for(QueueType::Compute).len(), 3);
    }

    #[test]
    fn test_fence_signal_and_wait() {
        let (_backend, mut device) = make_capture_device(single_thread_info());
        let mut fence = device.create_fence(false);

        assert!(!device.wait_fence(&fence, 0));
        device.signal_fence(&mut fence, QueueType::Transfer);
        assert!(device.peek_fence(&fence));
        assert!(device.wait_fence(&fence, 0));

        device.reset_fence(&mut fence);
        assert!(!device.peek_fence(&fence));
        device.destroy_fence(fence);
    }

    #[test]
    fn test_event_handlers() {
        let (_backend, mut device) = make_capture_device(single_thread_info());
        let ignoring: Arc<dyn RenderEventHandler> = Arc::new(RecordingEventHandler::new(false));
        let handling: Arc<dyn RenderEventHandler> = Arc::new(RecordingEventHandler::new(true));

        device.attach_event_handler(ignoring.clone());
        assert!(!device.notify_event_handlers(&RenderEvent::DisplayMinimized));

        device.attach_event_handler(handling.clone());
        assert!(device.notify_event_handlers(&RenderEvent::DisplayRestored));

        device.remove_event_handler(&handling);
        assert!(!device.notify_event_handlers(&RenderEvent::DisplayRestored));
    }

    #[test]
    fn test_descriptor_changes_submitted_every_frame() {
        let (server, submits) = RecordingShaderServer::new();
        let collaborators = DeviceCollaborators::new(Box::new(server), Box::new(StaticBufferPool::new()));
        let (_backend, mut device) = make_capture_device_with(single_thread_info(), collaborators);

        for frame in 0..4 {
            device.begin_frame(frame);
            device.end_frame(frame);
        }
        assert_eq!(submits.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[test]
    fn test_drop_releases_objects() {
        let (backend, device) = make_capture_device(GraphicsDeviceCreateInfo::new());
        drop(device);
        assert_eq!(backend.live_objects(), 0);
    }
}
