//! Graphics pipeline creation.
//!
//! [`GraphicsPipelineBuilder`] collects the fixed-function state of a forward
//! pass pipeline and creates it against a render pass. The defaults match
//! what the frame core draws with:
//!
//! - triangle list, fill mode, single sample
//! - depth test and write enabled, `LESS_OR_EQUAL`
//! - one color attachment, blending disabled
//! - viewport and scissor as dynamic state, so a resize only needs new
//!   values recorded each frame
//!
//! The builder returns a raw handle. Whoever builds the pipeline decides when
//! it is destroyed, and must destroy it before its render pass and layout.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use vkframe_rhi::context::DeviceContext;
//! use vkframe_rhi::pipeline::{CullMode, GraphicsPipelineBuilder};
//! use vkframe_rhi::shader::Shader;
//! use vkframe_rhi::vertex::Vertex;
//!
//! # fn example(device: Arc<dyn DeviceContext>, vs: &Shader, fs: &Shader,
//! #            render_pass: vk::RenderPass, layout: vk::PipelineLayout) -> vkframe_rhi::RhiResult<()> {
//! let pipeline = GraphicsPipelineBuilder::new()
//!     .vertex_shader(vs)
//!     .fragment_shader(fs)
//!     .vertex_binding(Vertex::binding_description())
//!     .vertex_attributes(&Vertex::attribute_descriptions())
//!     .cull_mode(CullMode::None)
//!     .render_pass(render_pass, 0)
//!     .build(device.as_ref(), layout)?;
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::context::DeviceContext;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    /// Do not cull any faces.
    None,
    /// Cull back-facing triangles.
    #[default]
    Back,
}

impl CullMode {
    /// Converts to Vulkan cull mode flags.
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Front face winding order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    /// Counter-clockwise winding is front-facing.
    #[default]
    CounterClockwise,
    /// Clockwise winding is front-facing.
    Clockwise,
}

impl FrontFace {
    /// Converts to Vulkan front face.
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Depth comparison operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    /// Passes if less than.
    Less,
    /// Passes if less than or equal.
    #[default]
    LessOrEqual,
    /// Always passes.
    Always,
}

impl CompareOp {
    /// Converts to Vulkan compare op.
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Builder for graphics pipelines bound to a render pass subpass.
#[derive(Clone)]
pub struct GraphicsPipelineBuilder<'a> {
    // Shader stages
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,

    // Vertex input state
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,

    // Rasterization state
    cull_mode: CullMode,
    front_face: FrontFace,

    // Depth state
    depth_test_enable: bool,
    depth_write_enable: bool,
    depth_compare_op: CompareOp,

    // Target
    render_pass: vk::RenderPass,
    subpass: u32,

    dynamic_states: Vec<vk::DynamicState>,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    /// Creates a builder with the forward pass defaults.
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: CompareOp::LessOrEqual,
            render_pass: vk::RenderPass::null(),
            subpass: 0,
            // Viewport and scissor follow the render target extent per frame
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }

    /// Sets the vertex shader. Required.
    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    /// Sets the fragment shader. Required.
    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    /// Adds a vertex input binding description.
    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    /// Sets the vertex attribute descriptions.
    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    /// Enables or disables depth testing.
    pub fn depth_test_enable(mut self, enable: bool) -> Self {
        self.depth_test_enable = enable;
        self
    }

    /// Enables or disables depth writing.
    pub fn depth_write_enable(mut self, enable: bool) -> Self {
        self.depth_write_enable = enable;
        self
    }

    pub fn depth_compare_op(mut self, op: CompareOp) -> Self {
        self.depth_compare_op = op;
        self
    }

    /// The render pass and subpass the pipeline will be used in. Required.
    pub fn render_pass(mut self, render_pass: vk::RenderPass, subpass: u32) -> Self {
        self.render_pass = render_pass;
        self.subpass = subpass;
        self
    }

    /// Builds the graphics pipeline.
    ///
    /// The shaders only need to live until this call returns.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if a shader or the render pass is
    /// missing, or if pipeline creation fails.
    pub fn build(
        self,
        device: &dyn DeviceContext,
        layout: vk::PipelineLayout,
    ) -> RhiResult<vk::Pipeline> {
        let vertex_shader = self
            .vertex_shader
            .ok_or_else(|| RhiError::PipelineError("Vertex shader is required".to_string()))?;

        let fragment_shader = self
            .fragment_shader
            .ok_or_else(|| RhiError::PipelineError("Fragment shader is required".to_string()))?;

        if self.render_pass == vk::RenderPass::null() {
            return Err(RhiError::PipelineError(
                "A render pass is required".to_string(),
            ));
        }

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the values are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face.to_vk())
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test_enable)
            .depth_write_enable(self.depth_write_enable)
            .depth_compare_op(self.depth_compare_op.to_vk())
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&self.dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(self.render_pass)
            .subpass(self.subpass);

        let pipeline = device.create_graphics_pipeline(&pipeline_info).map_err(|e| {
            RhiError::PipelineError(format!("Failed to create graphics pipeline: {}", e))
        })?;

        debug!(
            "Graphics pipeline created (cull {:?}, depth {:?})",
            self.cull_mode, self.depth_compare_op
        );

        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ash::vk::Handle;

    use crate::shader::{SPIRV_MAGIC, ShaderStage};
    use crate::testing::{MockDevice, MockEvent, ResourceKind};

    fn spirv() -> Vec<u8> {
        SPIRV_MAGIC.to_le_bytes().to_vec()
    }

    fn make_render_pass(mock: &MockDevice) -> vk::RenderPass {
        let info = vk::RenderPassCreateInfo::default();
        mock.create_render_pass(&info).unwrap()
    }

    #[test]
    fn test_cull_mode_to_vk() {
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
    }

    #[test]
    fn test_front_face_to_vk() {
        assert_eq!(
            FrontFace::CounterClockwise.to_vk(),
            vk::FrontFace::COUNTER_CLOCKWISE
        );
        assert_eq!(FrontFace::Clockwise.to_vk(), vk::FrontFace::CLOCKWISE);
    }

    #[test]
    fn test_compare_op_to_vk() {
        assert_eq!(CompareOp::Less.to_vk(), vk::CompareOp::LESS);
        assert_eq!(CompareOp::LessOrEqual.to_vk(), vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(CompareOp::Always.to_vk(), vk::CompareOp::ALWAYS);
    }

    #[test]
    fn test_graphics_pipeline_builder_default() {
        let builder = GraphicsPipelineBuilder::new();
        assert!(builder.vertex_shader.is_none());
        assert!(builder.fragment_shader.is_none());
        assert_eq!(builder.cull_mode, CullMode::Back);
        assert_eq!(builder.depth_compare_op, CompareOp::LessOrEqual);
        assert!(builder.depth_test_enable);
        assert!(builder.depth_write_enable);
        assert_eq!(
            builder.dynamic_states,
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
    }

    #[test]
    fn test_build_requires_shaders_and_render_pass() {
        let mock = Arc::new(MockDevice::new());
        let vs = Shader::from_spirv_bytes(mock.clone(), &spirv(), ShaderStage::Vertex, "main")
            .unwrap();

        let missing_fragment = GraphicsPipelineBuilder::new()
            .vertex_shader(&vs)
            .render_pass(vk::RenderPass::from_raw(1), 0)
            .build(mock.as_ref(), vk::PipelineLayout::null());
        assert!(matches!(missing_fragment, Err(RhiError::PipelineError(_))));

        let missing_pass = GraphicsPipelineBuilder::new()
            .vertex_shader(&vs)
            .fragment_shader(&vs)
            .build(mock.as_ref(), vk::PipelineLayout::null());
        assert!(matches!(missing_pass, Err(RhiError::PipelineError(_))));
        assert_eq!(mock.created(ResourceKind::Pipeline), 0);
    }

    #[test]
    fn test_build_declares_dynamic_viewport_and_scissor() {
        let mock = Arc::new(MockDevice::new());
        let vs = Shader::from_spirv_bytes(mock.clone(), &spirv(), ShaderStage::Vertex, "main")
            .unwrap();
        let fs = Shader::from_spirv_bytes(mock.clone(), &spirv(), ShaderStage::Fragment, "main")
            .unwrap();
        let pass = make_render_pass(&mock);
        let layout = mock.create_pipeline_layout(&[]).unwrap();

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vs)
            .fragment_shader(&fs)
            .render_pass(pass, 0)
            .build(mock.as_ref(), layout)
            .unwrap();

        let created = mock.events().into_iter().find_map(|e| match e {
            MockEvent::CreatePipeline {
                pipeline: p,
                render_pass,
                stage_count,
                dynamic_states,
                ..
            } if p == pipeline => Some((render_pass, stage_count, dynamic_states)),
            _ => None,
        });
        let (render_pass_used, stage_count, dynamic_states) = created.unwrap();
        assert_eq!(render_pass_used, pass);
        assert_eq!(stage_count, 2);
        assert!(dynamic_states.contains(&vk::DynamicState::VIEWPORT));
        assert!(dynamic_states.contains(&vk::DynamicState::SCISSOR));

        mock.destroy_pipeline(pipeline);
        mock.destroy_pipeline_layout(layout);
        mock.destroy_render_pass(pass);
        drop(vs);
        drop(fs);
        mock.assert_no_leaks();
        mock.assert_no_violations();
    }
}
