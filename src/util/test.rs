//! Collaborator doubles used by the unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;

use crate::backend::capture::CaptureBackend;
use crate::device::GraphicsDevice;
use crate::device::collaborators::{BufferPool, DescriptorSetBinding, DeviceCollaborators, Display, RenderEvent, RenderEventHandler, ShaderServer, SwapchainStatus};
use crate::device::config::GraphicsDeviceCreateInfo;
use crate::objects::{BufferId, Pass, ShaderProgram, VertexLayout};
use crate::objects::pipeline::{VertexAttribute, VertexBinding};
use crate::util::id::NamedUUID;

/// Counts descriptor submissions and hands out a fixed list of shared sets.
pub struct RecordingShaderServer {
    submits: Arc<AtomicU32>,
    shared: Vec<DescriptorSetBinding>,
}

impl RecordingShaderServer {
    pub fn new() -> (Self, Arc<AtomicU32>) {
        let submits = Arc::new(AtomicU32::new(0));
        (Self { submits: submits.clone(), shared: Vec::new() }, submits)
    }

    pub fn with_shared_sets(mut self, shared: Vec<DescriptorSetBinding>) -> Self {
        self.shared = shared;
        self
    }
}

impl ShaderServer for RecordingShaderServer {
    fn submit_descriptor_changes(&mut self) {
        self.submits.fetch_add(1, Ordering::SeqCst);
    }

    fn shared_descriptor_sets(&self, bind_point: vk::PipelineBindPoint) -> Vec<DescriptorSetBinding> {
        if bind_point == vk::PipelineBindPoint::GRAPHICS {
            self.shared.clone()
        } else {
            Vec::new()
        }
    }
}

#[derive(Default)]
pub struct StaticBufferPool {
    buffers: HashMap<BufferId, (vk::Buffer, vk::IndexType)>,
}

impl StaticBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, buffer: vk::Buffer, index_type: vk::IndexType) -> BufferId {
        let id = BufferId::new();
        self.buffers.insert(id, (buffer, index_type));
        id
    }
}

impl BufferPool for StaticBufferPool {
    fn get_native(&self, id: BufferId) -> vk::Buffer {
        self.buffers.get(&id).map(|(buffer, _)| *buffer).unwrap_or_else(vk::Buffer::null)
    }

    fn get_index_type(&self, id: BufferId) -> vk::IndexType {
        self.buffers.get(&id).map(|(_, index_type)| *index_type).unwrap_or(vk::IndexType::UINT16)
    }

    fn is_valid(&self, id: BufferId) -> bool {
        self.buffers.contains_key(&id)
    }
}

/// A display that replays scripted acquire results. Once the script runs out every acquire
/// succeeds with image 0.
pub struct ScriptedDisplay {
    acquires: VecDeque<SwapchainStatus<u32>>,
    extent: vk::Extent2D,
    pub log: Arc<Mutex<DisplayLog>>,
}

#[derive(Default, Debug)]
pub struct DisplayLog {
    pub acquired: Vec<(u32, vk::Semaphore)>,
    pub presented: Vec<(u32, vk::Semaphore)>,
    pub recreated: u32,
}

impl ScriptedDisplay {
    pub fn new(extent: vk::Extent2D) -> (Self, Arc<Mutex<DisplayLog>>) {
        let log = Arc::new(Mutex::new(DisplayLog::default()));
        (Self { acquires: VecDeque::new(), extent, log: log.clone() }, log)
    }

    pub fn script(mut self, acquires: &[SwapchainStatus<u32>]) -> Self {
        self.acquires.extend(acquires.iter().copied());
        self
    }
}

impl Display for ScriptedDisplay {
    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> SwapchainStatus<u32> {
        let status = self.acquires.pop_front().unwrap_or(SwapchainStatus::Ok(0));
        if let Some(index) = status.value() {
            self.log.lock().unwrap().acquired.push((index, signal));
        }
        status
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> SwapchainStatus<()> {
        self.log.lock().unwrap().presented.push((image_index, wait));
        SwapchainStatus::Ok(())
    }

    fn recreate(&mut self) -> vk::Extent2D {
        self.log.lock().unwrap().recreated += 1;
        self.extent
    }
}

#[derive(Default)]
pub struct RecordingEventHandler {
    pub events: Mutex<Vec<RenderEvent>>,
    handles: bool,
}

impl RecordingEventHandler {
    pub fn new(handles: bool) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            handles,
        }
    }
}

impl RenderEventHandler for RecordingEventHandler {
    fn handle_event(&self, event: &RenderEvent) -> bool {
        self.events.lock().unwrap().push(*event);
        self.handles
    }
}

pub fn make_collaborators() -> DeviceCollaborators {
    let (server, _) = RecordingShaderServer::new();
    DeviceCollaborators::new(Box::new(server), Box::new(StaticBufferPool::new()))
}

pub fn make_capture_device(info: GraphicsDeviceCreateInfo) -> (Arc<CaptureBackend>, GraphicsDevice) {
    make_capture_device_with(info, make_collaborators())
}

pub fn make_capture_device_with(info: GraphicsDeviceCreateInfo, collaborators: DeviceCollaborators) -> (Arc<CaptureBackend>, GraphicsDevice) {
    let backend = Arc::new(CaptureBackend::new());
    let device = GraphicsDevice::new(backend.clone(), info, collaborators);
    (backend, device)
}

pub fn make_graphics_program(backend: &CaptureBackend, name: &str) -> Arc<ShaderProgram> {
    Arc::new(ShaderProgram::new_graphics(NamedUUID::from_string(String::from(name)), backend.fabricate(), Vec::new()))
}

pub fn make_compute_program(backend: &CaptureBackend, name: &str) -> Arc<ShaderProgram> {
    Arc::new(ShaderProgram::new_compute(NamedUUID::from_string(String::from(name)), backend.fabricate(), backend.fabricate()))
}

/// A layout with a single interleaved position binding.
pub fn make_vertex_layout() -> Arc<VertexLayout> {
    Arc::new(VertexLayout::new(
        vec![VertexBinding { binding: 0, stride: 12, input_rate: vk::VertexInputRate::VERTEX }],
        vec![VertexAttribute { location: 0, binding: 0, format: vk::Format::R32G32B32_SFLOAT, offset: 0 }],
    ))
}

pub fn make_pass(backend: &CaptureBackend, width: u32, height: u32) -> Pass {
    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D { width, height },
    };
    Pass::new(backend.fabricate(), backend.fabricate(), area)
}
