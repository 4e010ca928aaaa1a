//! The graphics pipelines bound to one render pass.
//!
//! A [`PipelineSet`] builds one pipeline per [`PipelineDesc`], all for the
//! same render pass, in description order. A pipeline is only valid while
//! its render pass exists, so the set is rebuilt whenever the render targets
//! are.
//!
//! Shader modules live only for the duration of the pipeline creation that
//! uses them. Pipeline layouts are shared between pipelines with the same
//! push constant layout; every distinct pipeline and layout handle is
//! registered for destruction exactly once, pipelines before layouts.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use vkframe_core::{CullFace, DeletionQueue, PipelineConfig};
use vkframe_rhi::context::DeviceContext;
use vkframe_rhi::pipeline::{CompareOp, CullMode, GraphicsPipelineBuilder};
use vkframe_rhi::shader::{Shader, ShaderStage};
use vkframe_rhi::vertex::Vertex;
use vkframe_rhi::RhiError;

use crate::error::RenderResult;
use crate::push_constants::PushConstantLayout;
use crate::shaders::ShaderSource;

/// Shader entry point used by every stage.
const ENTRY_POINT: &str = "main";

/// How to build one pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDesc {
    pub name: String,
    /// Logical names handed to the [`ShaderSource`].
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub cull: CullMode,
    /// `None` builds a layout without push constants.
    pub push_constants: Option<PushConstantLayout>,
}

impl PipelineDesc {
    /// The stock mesh pipeline: back-face culling and per-object push constants.
    pub fn mesh() -> Self {
        Self::from(&PipelineConfig::mesh())
    }
}

impl From<&PipelineConfig> for PipelineDesc {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            name: config.name.clone(),
            vertex_shader: config.vertex_shader.clone(),
            fragment_shader: config.fragment_shader.clone(),
            cull: match config.cull {
                CullFace::Back => CullMode::Back,
                CullFace::None => CullMode::None,
            },
            push_constants: config.push_constants.then(PushConstantLayout::mesh),
        }
    }
}

/// Index of a pipeline in its [`PipelineSet`]. Stable across rebuilds from
/// the same descriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub(crate) usize);

impl MaterialHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A built pipeline with its layout.
#[derive(Clone, Debug)]
pub struct MaterialPipeline {
    name: String,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    push_constants: Option<PushConstantLayout>,
}

impl MaterialPipeline {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn push_constants(&self) -> Option<PushConstantLayout> {
        self.push_constants
    }
}

/// Pipelines and layouts for one render pass.
pub struct PipelineSet {
    render_pass: vk::RenderPass,
    entries: Vec<MaterialPipeline>,
    /// Destroys pipelines, then layouts.
    teardown: DeletionQueue,
}

impl PipelineSet {
    /// Builds every pipeline in `descs` against `render_pass`.
    ///
    /// Fixed-function state: triangle lists, fill mode, the culling of each
    /// description, counter-clockwise front faces, depth test and write with
    /// less-or-equal, one sample, blending off. Viewport and scissor are
    /// dynamic.
    ///
    /// # Errors
    ///
    /// - [`RenderError::ShaderSource`](crate::RenderError::ShaderSource) if bytecode cannot be loaded
    /// - [`RhiError::ShaderError`] if bytecode is not SPIR-V or a module cannot be created
    /// - [`RhiError::PipelineError`] for an empty or duplicate description
    ///   list, or a failed layout or pipeline creation
    ///
    /// Every object created before a failure is destroyed again.
    pub fn build(
        device: &Arc<dyn DeviceContext>,
        render_pass: vk::RenderPass,
        shaders: &dyn ShaderSource,
        descs: &[PipelineDesc],
    ) -> RenderResult<Self> {
        if descs.is_empty() {
            return Err(RhiError::PipelineError("No pipelines to build".to_string()).into());
        }
        for (i, desc) in descs.iter().enumerate() {
            if descs[..i].iter().any(|d| d.name == desc.name) {
                return Err(RhiError::PipelineError(format!(
                    "Duplicate pipeline name '{}'",
                    desc.name
                ))
                .into());
            }
        }

        let mut teardown = DeletionQueue::new("pipeline set");
        let mut layouts: HashMap<Option<PushConstantLayout>, vk::PipelineLayout> = HashMap::new();
        let mut entries = Vec::with_capacity(descs.len());

        // Layouts first, so the queue destroys every pipeline before any layout
        for desc in descs {
            if layouts.contains_key(&desc.push_constants) {
                continue;
            }
            let ranges: Vec<vk::PushConstantRange> =
                desc.push_constants.iter().map(|p| p.range()).collect();
            let layout = device.create_pipeline_layout(&ranges).map_err(|e| {
                RhiError::PipelineError(format!(
                    "Failed to create layout for '{}': {}",
                    desc.name, e
                ))
            })?;
            let d = Arc::clone(device);
            teardown.push_action(move || d.destroy_pipeline_layout(layout));
            layouts.insert(desc.push_constants, layout);
        }

        for desc in descs {
            let layout = layouts.get(&desc.push_constants).copied().ok_or_else(|| {
                RhiError::PipelineError(format!("No layout for '{}'", desc.name))
            })?;

            let pipeline = build_pipeline(device, render_pass, shaders, desc, layout)?;
            let d = Arc::clone(device);
            teardown.push_action(move || d.destroy_pipeline(pipeline));

            debug!(
                "Built pipeline '{}' (cull {:?}, push constants {})",
                desc.name,
                desc.cull,
                desc.push_constants.is_some()
            );

            entries.push(MaterialPipeline {
                name: desc.name.clone(),
                pipeline,
                layout,
                push_constants: desc.push_constants,
            });
        }

        info!(
            "Pipeline set built: {} pipelines, {} layouts",
            entries.len(),
            layouts.len()
        );

        Ok(Self {
            render_pass,
            entries,
            teardown,
        })
    }

    /// Handle of the pipeline called `name`.
    pub fn find(&self, name: &str) -> Option<MaterialHandle> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(MaterialHandle)
    }

    pub fn get(&self, handle: MaterialHandle) -> Option<&MaterialPipeline> {
        self.entries.get(handle.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterialPipeline> {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` once the set has been destroyed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The render pass every pipeline was built for.
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Destroys all pipelines, then all layouts. Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.teardown.flush();
        let count = self.entries.len();
        self.entries.clear();
        self.render_pass = vk::RenderPass::null();
        debug!("Pipeline set destroyed ({} pipelines)", count);
    }
}

impl Drop for PipelineSet {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for PipelineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSet")
            .field("render_pass", &self.render_pass)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

/// Creates one pipeline. Both shader modules are dropped on return.
fn build_pipeline(
    device: &Arc<dyn DeviceContext>,
    render_pass: vk::RenderPass,
    shaders: &dyn ShaderSource,
    desc: &PipelineDesc,
    layout: vk::PipelineLayout,
) -> RenderResult<vk::Pipeline> {
    let vertex_code = shaders.load(&desc.vertex_shader)?;
    let fragment_code = shaders.load(&desc.fragment_shader)?;

    let vertex_shader = Shader::from_spirv_bytes(
        Arc::clone(device),
        &vertex_code,
        ShaderStage::Vertex,
        ENTRY_POINT,
    )?;
    let fragment_shader = Shader::from_spirv_bytes(
        Arc::clone(device),
        &fragment_code,
        ShaderStage::Fragment,
        ENTRY_POINT,
    )?;

    let pipeline = GraphicsPipelineBuilder::new()
        .vertex_shader(&vertex_shader)
        .fragment_shader(&fragment_shader)
        .vertex_binding(Vertex::binding_description())
        .vertex_attributes(&Vertex::attribute_descriptions())
        .cull_mode(desc.cull)
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(CompareOp::LessOrEqual)
        .render_pass(render_pass, 0)
        .build(device.as_ref(), layout)
        .map_err(|e| match e {
            RhiError::PipelineError(msg) => {
                RhiError::PipelineError(format!("'{}': {}", desc.name, msg))
            }
            other => other,
        })?;

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::shaders::InMemoryShaders;
    use vkframe_rhi::shader::SPIRV_MAGIC;
    use vkframe_rhi::testing::{MockDevice, MockEvent, ResourceKind};

    fn spirv() -> Vec<u8> {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 12]);
        bytes
    }

    fn shaders() -> InMemoryShaders {
        InMemoryShaders::new()
            .with("mesh.vert.spv", spirv())
            .with("mesh.frag.spv", spirv())
            .with("flat.frag.spv", spirv())
    }

    fn desc(name: &str, fragment: &str, push_constants: bool) -> PipelineDesc {
        PipelineDesc {
            name: name.to_string(),
            vertex_shader: "mesh.vert.spv".to_string(),
            fragment_shader: fragment.to_string(),
            cull: CullMode::None,
            push_constants: push_constants.then(PushConstantLayout::mesh),
        }
    }

    fn setup() -> (Arc<MockDevice>, Arc<dyn DeviceContext>, vk::RenderPass) {
        let mock = Arc::new(MockDevice::new());
        let device: Arc<dyn DeviceContext> = mock.clone();
        let render_pass = device
            .create_render_pass(&vk::RenderPassCreateInfo::default())
            .unwrap();
        (mock, device, render_pass)
    }

    #[test]
    fn test_desc_from_config() {
        let desc = PipelineDesc::mesh();
        assert_eq!(desc.name, "mesh");
        assert_eq!(desc.cull, CullMode::Back);
        assert_eq!(desc.push_constants, Some(PushConstantLayout::mesh()));

        let config = PipelineConfig {
            cull: CullFace::None,
            push_constants: false,
            ..PipelineConfig::mesh()
        };
        let desc = PipelineDesc::from(&config);
        assert_eq!(desc.cull, CullMode::None);
        assert_eq!(desc.push_constants, None);
    }

    #[test]
    fn test_builds_in_order_and_finds_by_name() {
        let (mock, device, render_pass) = setup();
        let descs = [
            desc("mesh", "mesh.frag.spv", true),
            desc("flat", "flat.frag.spv", false),
        ];

        let set = PipelineSet::build(&device, render_pass, &shaders(), &descs).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.find("flat"), Some(MaterialHandle(1)));
        assert_eq!(set.find("missing"), None);
        let mesh = set.get(MaterialHandle(0)).unwrap();
        assert_eq!(mesh.name(), "mesh");
        assert!(mesh.push_constants().is_some());
        assert_eq!(mock.live(ResourceKind::Pipeline), 2);
        assert_eq!(mock.live(ResourceKind::PipelineLayout), 2);
        mock.assert_no_violations();
    }

    #[test]
    fn test_shader_modules_are_transient() {
        let (mock, device, render_pass) = setup();
        let descs = [desc("mesh", "mesh.frag.spv", true)];

        let _set = PipelineSet::build(&device, render_pass, &shaders(), &descs).unwrap();

        assert_eq!(mock.created(ResourceKind::ShaderModule), 2);
        assert_eq!(mock.live(ResourceKind::ShaderModule), 0);
    }

    #[test]
    fn test_pipelines_use_dynamic_viewport_and_scissor() {
        let (mock, device, render_pass) = setup();
        let _set = PipelineSet::build(
            &device,
            render_pass,
            &shaders(),
            &[desc("mesh", "mesh.frag.spv", true)],
        )
        .unwrap();

        let dynamic: Vec<Vec<vk::DynamicState>> = mock
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::CreatePipeline {
                    dynamic_states,
                    stage_count,
                    ..
                } => {
                    assert_eq!(stage_count, 2);
                    Some(dynamic_states)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            dynamic,
            vec![vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]]
        );
    }

    #[test]
    fn test_layouts_are_shared_and_destroyed_once() {
        let (mock, device, render_pass) = setup();
        let descs = [
            desc("a", "mesh.frag.spv", true),
            desc("b", "flat.frag.spv", true),
            desc("c", "mesh.frag.spv", false),
        ];

        let mut set = PipelineSet::build(&device, render_pass, &shaders(), &descs).unwrap();
        assert_eq!(mock.created(ResourceKind::PipelineLayout), 2);
        assert_eq!(
            set.get(MaterialHandle(0)).unwrap().layout(),
            set.get(MaterialHandle(1)).unwrap().layout()
        );
        mock.clear_events();

        set.destroy();
        set.destroy();

        let kinds: Vec<ResourceKind> = mock
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Destroy(kind, _) => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Pipeline,
                ResourceKind::Pipeline,
                ResourceKind::Pipeline,
                ResourceKind::PipelineLayout,
                ResourceKind::PipelineLayout,
            ]
        );
        assert_eq!(mock.destroyed(ResourceKind::Pipeline), 3);
        mock.assert_no_violations();
    }

    #[test]
    fn test_bad_bytecode_rolls_back() {
        let (mock, device, render_pass) = setup();
        let shaders = shaders().with("broken.frag.spv", vec![0u8; 16]);
        let descs = [
            desc("mesh", "mesh.frag.spv", true),
            desc("broken", "broken.frag.spv", true),
        ];

        let result = PipelineSet::build(&device, render_pass, &shaders, &descs);

        assert!(matches!(
            result,
            Err(RenderError::Rhi(RhiError::ShaderError(_)))
        ));
        assert_eq!(mock.live(ResourceKind::Pipeline), 0);
        assert_eq!(mock.live(ResourceKind::PipelineLayout), 0);
        assert_eq!(mock.live(ResourceKind::ShaderModule), 0);
        mock.assert_no_violations();
    }

    #[test]
    fn test_pipeline_creation_failure_releases_modules() {
        let (mock, device, render_pass) = setup();
        mock.fail_create(ResourceKind::Pipeline, 0, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        let result = PipelineSet::build(
            &device,
            render_pass,
            &shaders(),
            &[desc("mesh", "mesh.frag.spv", true)],
        );

        assert!(matches!(
            result,
            Err(RenderError::Rhi(RhiError::PipelineError(msg))) if msg.contains("'mesh'")
        ));
        assert_eq!(mock.created(ResourceKind::ShaderModule), 2);
        assert_eq!(mock.live(ResourceKind::ShaderModule), 0);
        assert_eq!(mock.live(ResourceKind::PipelineLayout), 0);
    }

    #[test]
    fn test_missing_shader_and_bad_descriptions() {
        let (mock, device, render_pass) = setup();

        let result = PipelineSet::build(
            &device,
            render_pass,
            &InMemoryShaders::new(),
            &[desc("mesh", "mesh.frag.spv", true)],
        );
        assert!(matches!(result, Err(RenderError::ShaderSource(_))));

        let result = PipelineSet::build(&device, render_pass, &shaders(), &[]);
        assert!(matches!(result, Err(RenderError::Rhi(RhiError::PipelineError(_)))));

        let twice = [
            desc("mesh", "mesh.frag.spv", true),
            desc("mesh", "flat.frag.spv", true),
        ];
        let result = PipelineSet::build(&device, render_pass, &shaders(), &twice);
        assert!(matches!(
            result,
            Err(RenderError::Rhi(RhiError::PipelineError(msg))) if msg.contains("Duplicate")
        ));

        assert_eq!(mock.created(ResourceKind::Pipeline), 0);
    }

    #[test]
    fn test_failed_build_destroys_pipelines_before_layouts() {
        let (mock, device, render_pass) = setup();
        mock.fail_create(ResourceKind::Pipeline, 1, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let descs = [
            desc("a", "mesh.frag.spv", true),
            desc("b", "flat.frag.spv", false),
            desc("c", "mesh.frag.spv", true),
        ];
        mock.clear_events();

        let result = PipelineSet::build(&device, render_pass, &shaders(), &descs);

        assert!(result.is_err());
        let kinds: Vec<ResourceKind> = mock
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Destroy(kind, _) if kind != ResourceKind::ShaderModule => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Pipeline,
                ResourceKind::PipelineLayout,
                ResourceKind::PipelineLayout,
            ]
        );
        assert_eq!(mock.live_total(), 1);
        mock.assert_no_violations();
    }
}
