//! Pipeline state delta tracking.
//!
//! A graphics pipeline is assembled from four fragments: the shader program, the vertex layout, the
//! framebuffer layout and the input layout. The wireframe flag modifies the rasterization of the
//! program and always has a value. The tracker remembers which fragments are set and whether the
//! pipeline for the current combination has been bound. Pipelines are memoized per program
//! instance and fragment combination and only built by the backend on a cache miss.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use ash::vk;
use xxhash_rust::xxh3::Xxh3;

use crate::backend::{Backend, GraphicsPipelineDesc};
use crate::objects::{FramebufferLayout, InputLayout, ProgramKind, ShaderProgram, VertexLayout, VertexLayoutId};
use crate::util::id::UUID;

type FastHashMap<K, V> = HashMap<K, V, BuildHasherDefault<Xxh3>>;

#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub struct PipelineState {
    pub shader_info_set: bool,
    pub vertex_layout_info_set: bool,
    pub framebuffer_layout_info_set: bool,
    pub input_layout_info_set: bool,
    pub pipeline_built: bool,
}

impl PipelineState {
    /// All fragments required to build a graphics pipeline are set.
    pub fn is_complete(&self) -> bool {
        self.shader_info_set && self.vertex_layout_info_set && self.framebuffer_layout_info_set && self.input_layout_info_set
    }

    pub fn needs_rebuild(&self) -> bool {
        !self.pipeline_built
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Everything besides the program name that selects a pipeline.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
struct PipelineConfig {
    program_instance: UUID,
    vertex_layout: VertexLayoutId,
    framebuffer: FramebufferLayout,
    input: InputLayout,
    wireframe: bool,
}

struct ProgramPipelines {
    pipelines: FastHashMap<PipelineConfig, vk::Pipeline>,
}

impl ProgramPipelines {
    fn new() -> Self {
        Self {
            pipelines: FastHashMap::default(),
        }
    }

    fn get_or_create_pipeline<T: FnOnce() -> vk::Pipeline>(&mut self, config: &PipelineConfig, create_fn: T) -> (vk::Pipeline, bool) {
        if let Some(pipeline) = self.pipelines.get(config) {
            (*pipeline, false)
        } else {
            let pipeline = create_fn();
            self.pipelines.insert(*config, pipeline);
            (pipeline, true)
        }
    }
}

pub struct PipelineCache {
    backend: Arc<dyn Backend>,
    programs: FastHashMap<UUID, ProgramPipelines>,
    built: u64,
}

impl PipelineCache {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            programs: FastHashMap::default(),
            built: 0,
        }
    }

    fn get_or_build(&mut self, desc: &GraphicsPipelineDesc) -> vk::Pipeline {
        let config = PipelineConfig {
            program_instance: desc.program.get_instance_id(),
            vertex_layout: desc.vertex_layout.get_id(),
            framebuffer: *desc.framebuffer,
            input: *desc.input,
            wireframe: desc.wireframe,
        };

        let backend = &self.backend;
        let (pipeline, created) = self.programs
            .entry(desc.program.get_id().get_uuid())
            .or_insert_with(ProgramPipelines::new)
            .get_or_create_pipeline(&config, || backend.create_graphics_pipeline(desc));

        if created {
            log::trace!("Built pipeline {:?} for program {:?} with {:?}", pipeline, desc.program.get_id(), config);
            self.built += 1;
        }
        pipeline
    }

    /// Destroys every pipeline built from a program named `program`. Returns the number of
    /// destroyed pipelines.
    pub fn evict_program(&mut self, program: UUID) -> usize {
        match self.programs.remove(&program) {
            Some(pipelines) => {
                for pipeline in pipelines.pipelines.values() {
                    self.backend.destroy_pipeline(*pipeline);
                }
                pipelines.pipelines.len()
            }
            None => 0,
        }
    }

    pub fn built_count(&self) -> u64 {
        self.built
    }

    pub fn cached_count(&self) -> usize {
        self.programs.values().map(|program| program.pipelines.len()).sum()
    }

    pub fn destroy(&mut self) {
        for (_, pipelines) in self.programs.drain() {
            for pipeline in pipelines.pipelines.values() {
                self.backend.destroy_pipeline(*pipeline);
            }
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        self.destroy();
    }
}

pub struct PipelineTracker {
    state: PipelineState,
    program: Option<Arc<ShaderProgram>>,
    vertex_layout: Option<Arc<VertexLayout>>,
    framebuffer: Option<FramebufferLayout>,
    input: Option<InputLayout>,
    wireframe: bool,
    current: Option<vk::Pipeline>,
    cache: PipelineCache,
    binds: u64,
}

impl PipelineTracker {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            state: PipelineState::default(),
            program: None,
            vertex_layout: None,
            framebuffer: None,
            input: None,
            wireframe: false,
            current: None,
            cache: PipelineCache::new(backend),
            binds: 0,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn program(&self) -> Option<&Arc<ShaderProgram>> {
        self.program.as_ref()
    }

    pub fn input_layout(&self) -> Option<InputLayout> {
        self.input
    }

    pub fn current_pipeline(&self) -> Option<vk::Pipeline> {
        self.current
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    /// Clears all fragments and turns wireframe off. Cached pipelines are kept.
    pub fn reset(&mut self) {
        self.state.reset();
        self.program = None;
        self.vertex_layout = None;
        self.framebuffer = None;
        self.input = None;
        self.wireframe = false;
        self.current = None;
    }

    /// Returns true if the program differs from the current one.
    pub fn set_shader_program_info(&mut self, program: &Arc<ShaderProgram>) -> bool {
        if program.kind() != ProgramKind::Graphics {
            log::error!("Compute program {:?} used as graphics pipeline fragment", program.get_id());
            panic!()
        }

        let same = self.state.shader_info_set && self.program.as_ref().map_or(false, |current| current.get_instance_id() == program.get_instance_id());
        if same {
            return false;
        }

        self.program = Some(program.clone());
        self.state.shader_info_set = true;
        self.state.pipeline_built = false;
        true
    }

    pub fn set_vertex_layout_info(&mut self, layout: &Arc<VertexLayout>) -> bool {
        let same = self.state.vertex_layout_info_set && self.vertex_layout.as_ref().map_or(false, |current| current.get_id() == layout.get_id());
        if same {
            return false;
        }

        self.vertex_layout = Some(layout.clone());
        self.state.vertex_layout_info_set = true;
        self.state.pipeline_built = false;
        true
    }

    pub fn set_framebuffer_layout_info(&mut self, layout: FramebufferLayout) -> bool {
        if self.state.framebuffer_layout_info_set && self.framebuffer == Some(layout) {
            return false;
        }

        self.framebuffer = Some(layout);
        self.state.framebuffer_layout_info_set = true;
        self.state.pipeline_built = false;
        true
    }

    pub fn set_input_layout_info(&mut self, layout: InputLayout) -> bool {
        if self.state.input_layout_info_set && self.input == Some(layout) {
            return false;
        }

        self.input = Some(layout);
        self.state.input_layout_info_set = true;
        self.state.pipeline_built = false;
        true
    }

    pub fn set_rasterization_info(&mut self, wireframe: bool) -> bool {
        if self.wireframe == wireframe {
            return false;
        }

        self.wireframe = wireframe;
        self.state.pipeline_built = false;
        true
    }

    /// Clears the program fragment. Used when a compute program replaces the graphics program or a
    /// pass or batch ends.
    pub fn unbind(&mut self) {
        self.program = None;
        self.state.shader_info_set = false;
        self.state.pipeline_built = false;
        self.current = None;
    }

    /// Forces the next [`PipelineTracker::build_if_dirty`] to return a pipeline. Used when the
    /// recording target changes and the new command buffer has nothing bound.
    pub fn invalidate_binding(&mut self) {
        self.state.pipeline_built = false;
    }

    /// Returns the pipeline to bind if the current combination has not been bound yet.
    pub fn build_if_dirty(&mut self) -> Option<vk::Pipeline> {
        if !self.state.is_complete() {
            log::error!("Tried to bind an incomplete graphics pipeline {:?}", self.state);
            panic!()
        }
        if self.state.pipeline_built {
            return None;
        }

        let (program, vertex_layout, framebuffer, input) = match (&self.program, &self.vertex_layout, &self.framebuffer, &self.input) {
            (Some(program), Some(vertex_layout), Some(framebuffer), Some(input)) => (program, vertex_layout, framebuffer, input),
            _ => {
                log::error!("Pipeline state {:?} is set but fragments are missing", self.state);
                panic!()
            }
        };

        let pipeline = self.cache.get_or_build(&GraphicsPipelineDesc {
            program,
            vertex_layout,
            framebuffer,
            input,
            wireframe: self.wireframe,
        });

        self.state.pipeline_built = true;
        self.current = Some(pipeline);
        self.binds += 1;
        Some(pipeline)
    }

    /// Evicts every cached pipeline of a program.
    pub fn reload_program(&mut self, program: UUID) -> usize {
        if self.program.as_ref().map_or(false, |current| current.get_id().get_uuid() == program) {
            self.state.pipeline_built = false;
            self.current = None;
        }
        self.cache.evict_program(program)
    }

    pub fn pipelines_built(&self) -> u64 {
        self.cache.built_count()
    }

    pub fn pipeline_binds(&self) -> u64 {
        self.binds
    }

    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::capture::CaptureBackend;
    use crate::objects::pipeline::ShaderStage;
    use crate::util::id::NamedUUID;

    use super::*;

    fn make_program(backend: &CaptureBackend, name: &'static str) -> Arc<ShaderProgram> {
        let stages = vec![
            ShaderStage::new(vk::ShaderStageFlags::VERTEX, backend.fabricate()),
            ShaderStage::new(vk::ShaderStageFlags::FRAGMENT, backend.fabricate()),
        ];
        Arc::new(ShaderProgram::new_graphics(NamedUUID::from_str(name), backend.fabricate(), stages))
    }

    fn make_tracker() -> (Arc<CaptureBackend>, PipelineTracker) {
        let backend = Arc::new(CaptureBackend::new());
        let tracker = PipelineTracker::new(backend.clone());

        (backend, tracker)
    }

    fn fill(backend: &CaptureBackend, tracker: &mut PipelineTracker) -> (Arc<ShaderProgram>, Arc<VertexLayout>, FramebufferLayout) {
        let program = make_program(backend, "test_program");
        let layout = Arc::new(VertexLayout::new(Vec::new(), Vec::new()));
        let framebuffer = FramebufferLayout { render_pass: backend.fabricate(), subpass: 0 };

        tracker.set_shader_program_info(&program);
        tracker.set_vertex_layout_info(&layout);
        tracker.set_framebuffer_layout_info(framebuffer);
        tracker.set_input_layout_info(InputLayout::new(vk::PrimitiveTopology::TRIANGLE_LIST));

        (program, layout, framebuffer)
    }

    #[test]
    fn test_build_twice_creates_one_pipeline() {
        let (backend, mut tracker) = make_tracker();
        fill(&backend, &mut tracker);

        assert!(tracker.state().is_complete());
        assert!(tracker.build_if_dirty().is_some());
        assert!(tracker.build_if_dirty().is_none());
        assert_eq!(tracker.pipelines_built(), 1);
        assert_eq!(backend.pipelines().len(), 1);
    }

    #[test]
    fn test_identical_fragments_keep_pipeline_built() {
        let (backend, mut tracker) = make_tracker();
        let (program, layout, framebuffer) = fill(&backend, &mut tracker);
        tracker.build_if_dirty();

        assert!(!tracker.set_shader_program_info(&program));
        assert!(!tracker.set_vertex_layout_info(&layout));
        assert!(!tracker.set_framebuffer_layout_info(framebuffer));
        assert!(!tracker.set_input_layout_info(InputLayout::new(vk::PrimitiveTopology::TRIANGLE_LIST)));
        assert!(tracker.state().pipeline_built);

        let cloned = Arc::new(program.as_ref().clone());
        assert!(!tracker.set_shader_program_info(&cloned));
        assert!(tracker.state().pipeline_built);
    }

    #[test]
    fn test_programs_sharing_a_name_get_own_pipelines() {
        let (backend, mut tracker) = make_tracker();
        let (program, _, _) = fill(&backend, &mut tracker);
        let first = tracker.build_if_dirty().unwrap();

        let other = make_program(&backend, "test_program");
        assert_eq!(other.get_id(), program.get_id());
        assert!(tracker.set_shader_program_info(&other));
        let second = tracker.build_if_dirty().unwrap();
        assert_ne!(first, second);
        assert_eq!(backend.pipelines()[1].program_instance, other.get_instance_id());

        // Reloading by name drops the pipelines of both
        assert_eq!(tracker.reload_program(program.get_id().get_uuid()), 2);
    }

    #[test]
    fn test_wireframe_selects_pipeline() {
        let (backend, mut tracker) = make_tracker();
        fill(&backend, &mut tracker);
        let filled = tracker.build_if_dirty().unwrap();

        assert!(!tracker.set_rasterization_info(false));
        assert!(tracker.set_rasterization_info(true));
        assert!(tracker.state().needs_rebuild());
        let wireframe = tracker.build_if_dirty().unwrap();
        assert_ne!(filled, wireframe);
        assert!(backend.pipelines()[1].wireframe);

        tracker.set_rasterization_info(false);
        assert_eq!(tracker.build_if_dirty(), Some(filled));

        tracker.reset();
        assert!(!tracker.wireframe());
    }

    #[test]
    fn test_changed_fragment_clears_pipeline_built() {
        let (backend, mut tracker) = make_tracker();
        let (_, _, framebuffer) = fill(&backend, &mut tracker);
        tracker.build_if_dirty();

        assert!(tracker.set_input_layout_info(InputLayout::new(vk::PrimitiveTopology::LINE_LIST)));
        assert!(tracker.state().needs_rebuild());
        tracker.build_if_dirty();

        assert!(tracker.set_framebuffer_layout_info(FramebufferLayout { subpass: 1, ..framebuffer }));
        assert!(tracker.state().needs_rebuild());
        tracker.build_if_dirty();

        assert!(tracker.set_vertex_layout_info(&Arc::new(VertexLayout::new(Vec::new(), Vec::new()))));
        assert!(tracker.state().needs_rebuild());
        tracker.build_if_dirty();

        assert_eq!(tracker.pipelines_built(), 4);
    }

    #[test]
    fn test_cache_reuses_pipelines() {
        let (backend, mut tracker) = make_tracker();
        fill(&backend, &mut tracker);
        let first = tracker.build_if_dirty().unwrap();

        tracker.set_input_layout_info(InputLayout::new(vk::PrimitiveTopology::POINT_LIST));
        let second = tracker.build_if_dirty().unwrap();
        assert_ne!(first, second);

        tracker.set_input_layout_info(InputLayout::new(vk::PrimitiveTopology::TRIANGLE_LIST));
        assert_eq!(tracker.build_if_dirty(), Some(first));
        assert_eq!(tracker.pipelines_built(), 2);
        assert_eq!(tracker.pipeline_binds(), 3);
    }

    #[test]
    #[should_panic]
    fn test_incomplete_state_panics() {
        let (backend, mut tracker) = make_tracker();
        tracker.set_shader_program_info(&make_program(&backend, "incomplete"));
        tracker.build_if_dirty();
    }

    #[test]
    fn test_reload_program_evicts() {
        let (backend, mut tracker) = make_tracker();
        let (program, _, _) = fill(&backend, &mut tracker);
        tracker.build_if_dirty();

        assert_eq!(tracker.reload_program(program.get_id().get_uuid()), 1);
        assert!(tracker.state().needs_rebuild());
        assert_eq!(tracker.cache().cached_count(), 0);
        assert!(tracker.build_if_dirty().is_some());
        assert_eq!(tracker.pipelines_built(), 2);
    }

    #[test]
    fn test_unbind_requires_program() {
        let (backend, mut tracker) = make_tracker();
        fill(&backend, &mut tracker);
        tracker.build_if_dirty();

        tracker.unbind();
        assert!(!tracker.state().is_complete());
        assert!(tracker.state().vertex_layout_info_set);
    }

    #[test]
    fn test_cache_destroyed_on_drop() {
        let (backend, mut tracker) = make_tracker();
        fill(&backend, &mut tracker);
        tracker.build_if_dirty();

        drop(tracker);
        assert_eq!(backend.live_objects(), 0);
    }
}
