use std::ffi::CString;

use ash::vk;

use crate::objects::id::VertexLayoutId;
use crate::util::id::{NamedUUID, UUID};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProgramKind {
    Graphics,
    /// A compute program carries its own prebuilt pipeline.
    Compute(vk::Pipeline),
}

#[derive(Clone, Debug)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: CString,
}

impl ShaderStage {
    pub fn new(stage: vk::ShaderStageFlags, module: vk::ShaderModule) -> Self {
        Self::with_entry_point(stage, module, "main")
    }

    pub fn with_entry_point(stage: vk::ShaderStageFlags, module: vk::ShaderModule, entry_point: &str) -> Self {
        let name = CString::new(entry_point).unwrap_or_else(|_| {
            log::error!("Shader entry point {:?} contains a nul byte", entry_point);
            panic!()
        });

        Self {
            stage,
            module,
            entry_point: name,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct RasterState {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias: bool,
    pub line_width: f32,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: false,
            line_width: 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare_op: vk::CompareOp,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            compare_op: vk::CompareOp::LESS_OR_EQUAL,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BlendAttachment {
    pub enable: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub write_mask: vk::ColorComponentFlags,
}

impl Default for BlendAttachment {
    fn default() -> Self {
        Self {
            enable: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl BlendAttachment {
    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.enable as vk::Bool32,
            src_color_blend_factor: self.src_color,
            dst_color_blend_factor: self.dst_color,
            color_blend_op: self.color_op,
            src_alpha_blend_factor: self.src_alpha,
            dst_alpha_blend_factor: self.dst_alpha,
            alpha_blend_op: self.alpha_op,
            color_write_mask: self.write_mask,
        }
    }
}

/// A linked shader program.
///
/// The name id groups all pipelines built from programs of that name so they can be reloaded
/// together. Every constructed program additionally gets its own instance id which selects the
/// pipeline. Clones share the instance id.
#[derive(Clone, Debug)]
pub struct ShaderProgram {
    id: NamedUUID,
    instance: UUID,
    kind: ProgramKind,
    layout: vk::PipelineLayout,
    stages: Vec<ShaderStage>,
    raster: RasterState,
    depth_stencil: DepthStencilState,
    blend: Vec<BlendAttachment>,
}

impl ShaderProgram {
    pub fn new_graphics(id: NamedUUID, layout: vk::PipelineLayout, stages: Vec<ShaderStage>) -> Self {
        Self {
            id,
            instance: UUID::new(),
            kind: ProgramKind::Graphics,
            layout,
            stages,
            raster: RasterState::default(),
            depth_stencil: DepthStencilState::default(),
            blend: vec![BlendAttachment::default()],
        }
    }

    pub fn new_compute(id: NamedUUID, layout: vk::PipelineLayout, pipeline: vk::Pipeline) -> Self {
        Self {
            id,
            instance: UUID::new(),
            kind: ProgramKind::Compute(pipeline),
            layout,
            stages: Vec::new(),
            raster: RasterState::default(),
            depth_stencil: DepthStencilState::default(),
            blend: Vec::new(),
        }
    }

    pub fn with_raster(mut self, raster: RasterState) -> Self {
        self.raster = raster;
        self
    }

    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    pub fn with_blend(mut self, blend: Vec<BlendAttachment>) -> Self {
        self.blend = blend;
        self
    }

    pub fn get_id(&self) -> &NamedUUID {
        &self.id
    }

    pub fn get_instance_id(&self) -> UUID {
        self.instance
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn stages(&self) -> &[ShaderStage] {
        &self.stages
    }

    pub fn raster(&self) -> &RasterState {
        &self.raster
    }

    pub fn depth_stencil(&self) -> &DepthStencilState {
        &self.depth_stencil
    }

    pub fn blend(&self) -> &[BlendAttachment] {
        &self.blend
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// A vertex input layout. Layouts compare by identity; rebuilding an equal layout under a new id
/// is treated as a different pipeline fragment.
#[derive(Clone, Debug)]
pub struct VertexLayout {
    id: VertexLayoutId,
    bindings: Vec<VertexBinding>,
    attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn new(bindings: Vec<VertexBinding>, attributes: Vec<VertexAttribute>) -> Self {
        Self {
            id: VertexLayoutId::new(),
            bindings,
            attributes,
        }
    }

    pub fn get_id(&self) -> VertexLayoutId {
        self.id
    }

    pub fn bindings(&self) -> &[VertexBinding] {
        &self.bindings
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FramebufferLayout {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct InputLayout {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
}

impl InputLayout {
    pub fn new(topology: vk::PrimitiveTopology) -> Self {
        Self {
            topology,
            primitive_restart: false,
        }
    }
}

/// The vertex and index range used by the next draw.
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub struct PrimitiveGroup {
    pub base_vertex: i32,
    pub vertex_count: u32,
    pub base_index: u32,
    pub index_count: u32,
}

impl PrimitiveGroup {
    pub fn vertices(base_vertex: i32, vertex_count: u32) -> Self {
        Self {
            base_vertex,
            vertex_count,
            base_index: 0,
            index_count: 0,
        }
    }

    pub fn indexed(base_vertex: i32, base_index: u32, index_count: u32) -> Self {
        Self {
            base_vertex,
            vertex_count: 0,
            base_index,
            index_count,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.index_count > 0
    }

    /// Number of primitives this group produces for `topology`.
    pub fn primitive_count(&self, topology: vk::PrimitiveTopology) -> u32 {
        let count = if self.is_indexed() { self.index_count } else { self.vertex_count };
        match topology {
            vk::PrimitiveTopology::POINT_LIST => count,
            vk::PrimitiveTopology::LINE_LIST => count / 2,
            vk::PrimitiveTopology::LINE_STRIP => count.saturating_sub(1),
            vk::PrimitiveTopology::TRIANGLE_LIST => count / 3,
            vk::PrimitiveTopology::TRIANGLE_STRIP | vk::PrimitiveTopology::TRIANGLE_FAN => count.saturating_sub(2),
            vk::PrimitiveTopology::PATCH_LIST => count,
            _ => count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_count() {
        let group = PrimitiveGroup::indexed(0, 0, 36);
        assert_eq!(group.primitive_count(vk::PrimitiveTopology::TRIANGLE_LIST), 12);
        assert_eq!(group.primitive_count(vk::PrimitiveTopology::TRIANGLE_STRIP), 34);

        let group = PrimitiveGroup::vertices(0, 1);
        assert_eq!(group.primitive_count(vk::PrimitiveTopology::LINE_STRIP), 0);
        assert_eq!(group.primitive_count(vk::PrimitiveTopology::POINT_LIST), 1);
    }
}
