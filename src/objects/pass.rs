use ash::vk;

use crate::objects::id::PassId;

/// A render pass instance with its framebuffer and the state applied when it begins.
#[derive(Clone)]
pub struct Pass {
    id: PassId,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    render_area: vk::Rect2D,
    clear_values: Vec<vk::ClearValue>,
    subpass_count: u32,
    contents: vk::SubpassContents,
    viewports: Vec<vk::Viewport>,
    scissors: Vec<vk::Rect2D>,
}

impl Pass {
    /// Creates a pass with a single subpass recorded from secondary command buffers. The render
    /// area is used as the default viewport and scissor.
    pub fn new(render_pass: vk::RenderPass, framebuffer: vk::Framebuffer, render_area: vk::Rect2D) -> Self {
        let viewport = vk::Viewport {
            x: render_area.offset.x as f32,
            y: render_area.offset.y as f32,
            width: render_area.extent.width as f32,
            height: render_area.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        Self {
            id: PassId::new(),
            render_pass,
            framebuffer,
            render_area,
            clear_values: Vec::new(),
            subpass_count: 1,
            contents: vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            viewports: vec![viewport],
            scissors: vec![render_area],
        }
    }

    pub fn with_clear_values(mut self, clear_values: &[vk::ClearValue]) -> Self {
        self.clear_values = clear_values.to_vec();
        self
    }

    pub fn with_subpass_count(mut self, count: u32) -> Self {
        if count == 0 {
            log::error!("Pass must have at least one subpass");
            panic!()
        }
        self.subpass_count = count;
        self
    }

    /// Records all subpasses inline into the main command buffer. Batches are not available in
    /// inline passes.
    pub fn inline(mut self) -> Self {
        self.contents = vk::SubpassContents::INLINE;
        self
    }

    pub fn with_viewports(mut self, viewports: &[vk::Viewport]) -> Self {
        self.viewports = viewports.to_vec();
        self
    }

    pub fn with_scissors(mut self, scissors: &[vk::Rect2D]) -> Self {
        self.scissors = scissors.to_vec();
        self
    }

    pub fn get_id(&self) -> PassId {
        self.id
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }

    pub fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpass_count
    }

    pub fn contents(&self) -> vk::SubpassContents {
        self.contents
    }

    pub fn viewports(&self) -> &[vk::Viewport] {
        &self.viewports
    }

    pub fn scissors(&self) -> &[vk::Rect2D] {
        &self.scissors
    }

    pub fn inheritance(&self, subpass: u32) -> InheritanceInfo {
        InheritanceInfo {
            render_pass: self.render_pass,
            subpass,
            framebuffer: self.framebuffer,
        }
    }
}

/// The render pass state a secondary command buffer inherits.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct InheritanceInfo {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub framebuffer: vk::Framebuffer,
}

/// What a batch draws. Only used for diagnostics.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BatchType {
    Geometry,
    Lights,
    Shapes,
    Text,
    UI,
    Direct,
}

impl BatchType {
    pub fn name(&self) -> &'static str {
        match self {
            BatchType::Geometry => "Geometry",
            BatchType::Lights => "Lights",
            BatchType::Shapes => "Shapes",
            BatchType::Text => "Text",
            BatchType::UI => "UI",
            BatchType::Direct => "Direct",
        }
    }
}
