use ash::vk;
use static_assertions::assert_impl_all;

use crate::backend::Backend;
use crate::objects::{Barrier, ImageBlit, ImageCopy};

/// A deferred command. Commands own all their data so they can be recorded on any thread after
/// the producer has released its own copies.
#[derive(Clone, Debug)]
pub enum Command {
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
        offsets: Vec<u32>,
    },
    SetViewports {
        first: u32,
        viewports: Vec<vk::Viewport>,
    },
    SetScissors {
        first: u32,
        scissors: Vec<vk::Rect2D>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    Barrier(Box<Barrier>),
    SetEvent {
        event: vk::Event,
        stage: vk::PipelineStageFlags,
    },
    ResetEvent {
        event: vk::Event,
        stage: vk::PipelineStageFlags,
    },
    WaitEvent {
        event: vk::Event,
        barrier: Box<Barrier>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyImage(Box<ImageCopy>),
    BlitImage(Box<ImageBlit>),
    BeginLabel {
        name: String,
        color: [f32; 4],
    },
    InsertLabel {
        name: String,
        color: [f32; 4],
    },
    EndLabel,
}

assert_impl_all!(Command: Send);

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::BindPipeline { .. } => "BindPipeline",
            Command::BindDescriptorSets { .. } => "BindDescriptorSets",
            Command::SetViewports { .. } => "SetViewports",
            Command::SetScissors { .. } => "SetScissors",
            Command::PushConstants { .. } => "PushConstants",
            Command::BindVertexBuffer { .. } => "BindVertexBuffer",
            Command::BindIndexBuffer { .. } => "BindIndexBuffer",
            Command::Barrier(_) => "Barrier",
            Command::SetEvent { .. } => "SetEvent",
            Command::ResetEvent { .. } => "ResetEvent",
            Command::WaitEvent { .. } => "WaitEvent",
            Command::Draw { .. } => "Draw",
            Command::DrawIndexed { .. } => "DrawIndexed",
            Command::Dispatch { .. } => "Dispatch",
            Command::CopyImage(_) => "CopyImage",
            Command::BlitImage(_) => "BlitImage",
            Command::BeginLabel { .. } => "BeginLabel",
            Command::InsertLabel { .. } => "InsertLabel",
            Command::EndLabel => "EndLabel",
        }
    }
}

/// Translates a command into the matching native call.
pub fn record_command(backend: &dyn Backend, command_buffer: vk::CommandBuffer, command: &Command) {
    match command {
        Command::BindPipeline { bind_point, pipeline } => {
            backend.cmd_bind_pipeline(command_buffer, *bind_point, *pipeline)
        }
        Command::BindDescriptorSets { bind_point, layout, first_set, sets, offsets } => {
            backend.cmd_bind_descriptor_sets(command_buffer, *bind_point, *layout, *first_set, sets, offsets)
        }
        Command::SetViewports { first, viewports } => {
            backend.cmd_set_viewports(command_buffer, *first, viewports)
        }
        Command::SetScissors { first, scissors } => {
            backend.cmd_set_scissors(command_buffer, *first, scissors)
        }
        Command::PushConstants { layout, stages, offset, data } => {
            backend.cmd_push_constants(command_buffer, *layout, *stages, *offset, data)
        }
        Command::BindVertexBuffer { binding, buffer, offset } => {
            backend.cmd_bind_vertex_buffer(command_buffer, *binding, *buffer, *offset)
        }
        Command::BindIndexBuffer { buffer, offset, index_type } => {
            backend.cmd_bind_index_buffer(command_buffer, *buffer, *offset, *index_type)
        }
        Command::Barrier(barrier) => {
            backend.cmd_pipeline_barrier(command_buffer, barrier)
        }
        Command::SetEvent { event, stage } => {
            backend.cmd_set_event(command_buffer, *event, *stage)
        }
        Command::ResetEvent { event, stage } => {
            backend.cmd_reset_event(command_buffer, *event, *stage)
        }
        Command::WaitEvent { event, barrier } => {
            backend.cmd_wait_event(command_buffer, *event, barrier)
        }
        Command::Draw { vertex_count, instance_count, first_vertex, first_instance } => {
            backend.cmd_draw(command_buffer, *vertex_count, *instance_count, *first_vertex, *first_instance)
        }
        Command::DrawIndexed { index_count, instance_count, first_index, vertex_offset, first_instance } => {
            backend.cmd_draw_indexed(command_buffer, *index_count, *instance_count, *first_index, *vertex_offset, *first_instance)
        }
        Command::Dispatch { x, y, z } => {
            backend.cmd_dispatch(command_buffer, *x, *y, *z)
        }
        Command::CopyImage(copy) => {
            backend.cmd_copy_image(command_buffer, copy)
        }
        Command::BlitImage(blit) => {
            backend.cmd_blit_image(command_buffer, blit)
        }
        Command::BeginLabel { name, color } => {
            backend.cmd_begin_label(command_buffer, name, *color)
        }
        Command::InsertLabel { name, color } => {
            backend.cmd_insert_label(command_buffer, name, *color)
        }
        Command::EndLabel => {
            backend.cmd_end_label(command_buffer)
        }
    }
}
