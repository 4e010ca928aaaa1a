//! Test doubles for the device and windowing seams.
//!
//! [`MockDevice`] implements [`DeviceContext`] without a GPU. It hands out
//! unique fake handles, tracks which are alive, counts creations and
//! destructions per [`ResourceKind`], records every command and queue
//! operation as a [`MockEvent`], and collects misuse (double destroy, use of a
//! destroyed handle, zero-sized swapchains, submitting with a signaled fence)
//! as violation strings instead of crashing.
//!
//! Fences follow a small model of real behaviour: a submit makes its fence
//! pending, waiting on a pending fence completes it, and waiting on a fence
//! that is neither signaled nor pending reports [`RhiError::Timeout`], as a real
//! driver would after its deadline. [`MockDevice::set_gpu_hung`] makes pending
//! fences time out too.
//!
//! [`ScriptedExtent`] is the windowing double: it replays a queue of
//! framebuffer extents and then repeats a fallback.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk::{self, Handle};

use crate::buffer::BufferUsage;
use crate::context::{DeviceContext, ImageDesc, RenderPassBegin, SubmitDesc, SwapchainDesc};
use crate::error::{RhiError, RhiResult};
use crate::swapchain::{ExtentSource, SwapchainSupportDetails};

/// Shorthand for building an extent in tests.
pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

/// Kinds of objects the mock device tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Swapchain,
    Image,
    ImageView,
    Buffer,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    Semaphore,
    Fence,
    CommandPool,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 12] = [
        ResourceKind::Swapchain,
        ResourceKind::Image,
        ResourceKind::ImageView,
        ResourceKind::Buffer,
        ResourceKind::RenderPass,
        ResourceKind::Framebuffer,
        ResourceKind::ShaderModule,
        ResourceKind::PipelineLayout,
        ResourceKind::Pipeline,
        ResourceKind::Semaphore,
        ResourceKind::Fence,
        ResourceKind::CommandPool,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One recorded device call.
#[derive(Clone, Debug)]
pub enum MockEvent {
    Create(ResourceKind, u64),
    Destroy(ResourceKind, u64),
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        extent: vk::Extent2D,
        image_count: u32,
        format: vk::Format,
        present_mode: vk::PresentModeKHR,
    },
    CreatePipeline {
        pipeline: vk::Pipeline,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        stage_count: u32,
        dynamic_states: Vec<vk::DynamicState>,
    },
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    WaitIdle,
    Acquire {
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        result: Result<u32, vk::Result>,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    },
    Submit {
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    },
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass {
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    },
    EndRenderPass(vk::CommandBuffer),
    BindPipeline(vk::Pipeline),
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    PushConstants {
        layout: vk::PipelineLayout,
        size: usize,
    },
    BindVertexBuffer(vk::Buffer),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
}

#[derive(Clone, Copy, Debug, Default)]
struct FenceState {
    signaled: bool,
    pending: bool,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<vk::Image>,
    next_image: u32,
}

#[derive(Debug)]
struct ScriptedFailure {
    kind: ResourceKind,
    skip: usize,
    result: vk::Result,
}

#[derive(Debug)]
struct MockState {
    next_handle: u64,
    live: HashMap<u64, ResourceKind>,
    created: HashMap<ResourceKind, usize>,
    destroyed: HashMap<ResourceKind, usize>,
    fences: HashMap<vk::Fence, FenceState>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainState>,
    command_buffers: HashMap<vk::CommandBuffer, vk::CommandPool>,
    events: Vec<MockEvent>,
    violations: Vec<String>,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,
    current_extent_script: VecDeque<vk::Extent2D>,
    failures: Vec<ScriptedFailure>,
    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    gpu_hung: bool,
}

impl MockState {
    fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 2,
            // u32::MAX means the swapchain extent is picked by the caller
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            max_image_array_layers: 1,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        };

        Self {
            next_handle: 0x1000,
            live: HashMap::new(),
            created: HashMap::new(),
            destroyed: HashMap::new(),
            fences: HashMap::new(),
            swapchains: HashMap::new(),
            command_buffers: HashMap::new(),
            events: Vec::new(),
            violations: Vec::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            current_extent_script: VecDeque::new(),
            failures: Vec::new(),
            capabilities,
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            gpu_hung: false,
        }
    }

    fn fresh_handle(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    /// Allocates and registers a live handle unless a scripted failure fires.
    fn create(&mut self, kind: ResourceKind) -> Result<u64, vk::Result> {
        if let Some(position) = self.failures.iter().position(|f| f.kind == kind) {
            let failure = &mut self.failures[position];
            if failure.skip == 0 {
                let result = failure.result;
                self.failures.remove(position);
                return Err(result);
            }
            failure.skip -= 1;
        }

        let raw = self.fresh_handle();
        self.live.insert(raw, kind);
        *self.created.entry(kind).or_default() += 1;
        self.events.push(MockEvent::Create(kind, raw));
        Ok(raw)
    }

    fn destroy(&mut self, kind: ResourceKind, raw: u64) {
        match self.live.get(&raw) {
            Some(live_kind) if *live_kind == kind => {
                self.live.remove(&raw);
                *self.destroyed.entry(kind).or_default() += 1;
                self.events.push(MockEvent::Destroy(kind, raw));
            }
            Some(live_kind) => self.violations.push(format!(
                "destroy of {:#x} as {} but it is a {}",
                raw, kind, live_kind
            )),
            None => self.violations.push(format!(
                "destroy of unknown or already destroyed {} {:#x}",
                kind, raw
            )),
        }
    }

    fn check_live(&mut self, kind: ResourceKind, raw: u64, what: &str) {
        if self.live.get(&raw) != Some(&kind) {
            self.violations
                .push(format!("{} uses dead {} {:#x}", what, kind, raw));
        }
    }
}

/// A recording [`DeviceContext`] for tests. See the module docs.
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MockDevice")
            .field("live", &state.live.len())
            .field("events", &state.events.len())
            .field("violations", &state.violations)
            .finish()
    }
}

impl MockDevice {
    /// A device whose surface allows 1 to 2 images, offers sRGB and both
    /// FIFO and MAILBOX, and lets the caller choose the extent.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // Scripting
    // ---------------------------------------------------------------------

    /// Sets the image count range reported by the surface (`max == 0` means unlimited).
    pub fn set_image_count_range(&self, min: u32, max: u32) {
        let mut state = self.lock();
        state.capabilities.min_image_count = min;
        state.capabilities.max_image_count = max;
    }

    /// Makes the surface dictate its extent, like most desktop platforms do.
    pub fn set_current_extent(&self, current: vk::Extent2D) {
        self.lock().capabilities.current_extent = current;
    }

    /// Queues the current extent reported by one future surface query,
    /// before falling back to the one set with [`set_current_extent`](Self::set_current_extent).
    pub fn push_current_extent(&self, current: vk::Extent2D) {
        self.lock().current_extent_script.push_back(current);
    }

    pub fn set_surface_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.lock().formats = formats;
    }

    pub fn set_present_modes(&self, modes: Vec<vk::PresentModeKHR>) {
        self.lock().present_modes = modes;
    }

    /// Queues the result of a future acquire. `SUCCESS` and `SUBOPTIMAL_KHR`
    /// hand out an image; anything else is returned as the error.
    pub fn push_acquire_result(&self, result: vk::Result) {
        self.lock().acquire_script.push_back(result);
    }

    /// Queues the result of a future present, with the same convention.
    pub fn push_present_result(&self, result: vk::Result) {
        self.lock().present_script.push_back(result);
    }

    /// Fails a creation of `kind` with `result` after `skip` successful ones.
    pub fn fail_create(&self, kind: ResourceKind, skip: usize, result: vk::Result) {
        self.lock().failures.push(ScriptedFailure { kind, skip, result });
    }

    /// When hung, waits on submitted-but-unfinished fences time out.
    pub fn set_gpu_hung(&self, hung: bool) {
        self.lock().gpu_hung = hung;
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub fn created(&self, kind: ResourceKind) -> usize {
        self.lock().created.get(&kind).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, kind: ResourceKind) -> usize {
        self.lock().destroyed.get(&kind).copied().unwrap_or(0)
    }

    /// Handles of `kind` created and not yet destroyed.
    pub fn live(&self, kind: ResourceKind) -> usize {
        self.lock().live.values().filter(|k| **k == kind).count()
    }

    /// All live handles of every kind.
    pub fn live_total(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_live(&self, raw: u64) -> bool {
        self.lock().live.contains_key(&raw)
    }

    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// Number of recorded events matching `predicate`.
    pub fn count_events(&self, predicate: impl Fn(&MockEvent) -> bool) -> usize {
        self.lock().events.iter().filter(|e| predicate(e)).count()
    }

    /// Panics with the full list when any misuse was recorded.
    pub fn assert_no_violations(&self) {
        let violations = self.violations();
        assert!(
            violations.is_empty(),
            "device misuse detected:\n{}",
            violations.join("\n")
        );
    }

    /// Panics when created and destroyed counts differ for any kind.
    pub fn assert_no_leaks(&self) {
        let state = self.lock();
        let leaked: Vec<String> = ResourceKind::ALL
            .iter()
            .filter_map(|kind| {
                let created = state.created.get(kind).copied().unwrap_or(0);
                let destroyed = state.destroyed.get(kind).copied().unwrap_or(0);
                (created != destroyed)
                    .then(|| format!("{}: {} created, {} destroyed", kind, created, destroyed))
            })
            .collect();
        assert!(leaked.is_empty(), "leaked handles:\n{}", leaked.join("\n"));
    }
}

fn scripted_outcome(result: Option<vk::Result>) -> Result<bool, vk::Result> {
    match result {
        None | Some(vk::Result::SUCCESS) => Ok(false),
        Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
        Some(error) => Err(error),
    }
}

impl DeviceContext for MockDevice {
    fn queue_family_index(&self) -> u32 {
        0
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.lock();
        for fence in state.fences.values_mut() {
            if fence.pending {
                fence.pending = false;
                fence.signaled = true;
            }
        }
        state.events.push(MockEvent::WaitIdle);
        Ok(())
    }

    fn surface_support(&self, _surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails> {
        let mut state = self.lock();
        let mut capabilities = state.capabilities;
        if let Some(current) = state.current_extent_script.pop_front() {
            capabilities.current_extent = current;
        }
        Ok(SwapchainSupportDetails {
            capabilities,
            formats: state.formats.clone(),
            present_modes: state.present_modes.clone(),
        })
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<vk::SwapchainKHR> {
        let mut state = self.lock();
        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violations.push(format!(
                "swapchain created with zero extent {}x{}",
                desc.extent.width, desc.extent.height
            ));
            return Err(RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED));
        }

        let raw = state.create(ResourceKind::Swapchain)?;
        let swapchain = vk::SwapchainKHR::from_raw(raw);
        let images = (0..desc.min_image_count)
            .map(|_| vk::Image::from_raw(state.fresh_handle()))
            .collect();
        state.swapchains.insert(
            swapchain,
            SwapchainState {
                images,
                next_image: 0,
            },
        );
        state.events.push(MockEvent::CreateSwapchain {
            swapchain,
            extent: desc.extent,
            image_count: desc.min_image_count,
            format: desc.surface_format.format,
            present_mode: desc.present_mode,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        let state = self.lock();
        state
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown swapchain {:?}", swapchain)))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.lock();
        state.swapchains.remove(&swapchain);
        state.destroy(ResourceKind::Swapchain, swapchain.as_raw());
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        signal_semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.check_live(ResourceKind::Semaphore, signal_semaphore.as_raw(), "acquire");
        let scripted = state.acquire_script.pop_front();

        let Some(chain) = state.swapchains.get_mut(&swapchain) else {
            state
                .violations
                .push(format!("acquire on dead swapchain {:?}", swapchain));
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };

        let outcome = scripted_outcome(scripted).map(|suboptimal| {
            let index = chain.next_image;
            chain.next_image = (chain.next_image + 1) % chain.images.len().max(1) as u32;
            (index, suboptimal)
        });

        state.events.push(MockEvent::Acquire {
            swapchain,
            signal: signal_semaphore,
            result: outcome.map(|(index, _)| index),
        });
        outcome
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let mut state = self.lock();
        state.check_live(ResourceKind::Swapchain, swapchain.as_raw(), "present");
        state.check_live(ResourceKind::Semaphore, wait_semaphore.as_raw(), "present");
        let scripted = state.present_script.pop_front();
        state.events.push(MockEvent::Present {
            swapchain,
            image_index,
            wait: wait_semaphore,
        });
        scripted_outcome(scripted)
    }

    fn create_image(&self, _desc: &ImageDesc) -> RhiResult<vk::Image> {
        let raw = self.lock().create(ResourceKind::Image)?;
        Ok(vk::Image::from_raw(raw))
    }

    fn destroy_image(&self, image: vk::Image) {
        self.lock().destroy(ResourceKind::Image, image.as_raw());
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView> {
        let raw = self.lock().create(ResourceKind::ImageView)?;
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.lock().destroy(ResourceKind::ImageView, view.as_raw());
    }

    fn create_buffer(&self, usage: BufferUsage, data: &[u8]) -> RhiResult<vk::Buffer> {
        if data.is_empty() {
            return Err(RhiError::InvalidHandle(format!(
                "{} buffer data must not be empty",
                usage.name()
            )));
        }
        let raw = self.lock().create(ResourceKind::Buffer)?;
        Ok(vk::Buffer::from_raw(raw))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.lock().destroy(ResourceKind::Buffer, buffer.as_raw());
    }

    fn create_render_pass(
        &self,
        _info: &vk::RenderPassCreateInfo<'_>,
    ) -> RhiResult<vk::RenderPass> {
        let raw = self.lock().create(ResourceKind::RenderPass)?;
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.lock()
            .destroy(ResourceKind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        let mut state = self.lock();
        state.check_live(ResourceKind::RenderPass, render_pass.as_raw(), "framebuffer");
        for view in attachments {
            state.check_live(ResourceKind::ImageView, view.as_raw(), "framebuffer");
        }
        if extent.width == 0 || extent.height == 0 {
            state
                .violations
                .push("framebuffer created with zero extent".to_string());
        }
        let raw = state.create(ResourceKind::Framebuffer)?;
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.lock()
            .destroy(ResourceKind::Framebuffer, framebuffer.as_raw());
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        let mut state = self.lock();
        if code.is_empty() {
            state
                .violations
                .push("shader module created from empty code".to_string());
        }
        let raw = state.create(ResourceKind::ShaderModule)?;
        Ok(vk::ShaderModule::from_raw(raw))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.lock()
            .destroy(ResourceKind::ShaderModule, module.as_raw());
    }

    fn create_pipeline_layout(
        &self,
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout> {
        let raw = self.lock().create(ResourceKind::PipelineLayout)?;
        Ok(vk::PipelineLayout::from_raw(raw))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.lock()
            .destroy(ResourceKind::PipelineLayout, layout.as_raw());
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline> {
        // Safety: the pointers in `info` are valid for the duration of the call.
        let stages: &[vk::PipelineShaderStageCreateInfo<'_>] =
            if info.p_stages.is_null() || info.stage_count == 0 {
                &[]
            } else {
                unsafe { std::slice::from_raw_parts(info.p_stages, info.stage_count as usize) }
            };
        let dynamic_states: Vec<vk::DynamicState> = if info.p_dynamic_state.is_null() {
            Vec::new()
        } else {
            let dynamic = unsafe { &*info.p_dynamic_state };
            if dynamic.p_dynamic_states.is_null() {
                Vec::new()
            } else {
                unsafe {
                    std::slice::from_raw_parts(
                        dynamic.p_dynamic_states,
                        dynamic.dynamic_state_count as usize,
                    )
                }
                .to_vec()
            }
        };

        let mut state = self.lock();
        state.check_live(ResourceKind::RenderPass, info.render_pass.as_raw(), "pipeline");
        state.check_live(ResourceKind::PipelineLayout, info.layout.as_raw(), "pipeline");
        for stage in stages {
            state.check_live(ResourceKind::ShaderModule, stage.module.as_raw(), "pipeline");
        }

        let raw = state.create(ResourceKind::Pipeline)?;
        let pipeline = vk::Pipeline::from_raw(raw);
        state.events.push(MockEvent::CreatePipeline {
            pipeline,
            render_pass: info.render_pass,
            layout: info.layout,
            stage_count: info.stage_count,
            dynamic_states,
        });
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.lock().destroy(ResourceKind::Pipeline, pipeline.as_raw());
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let raw = self.lock().create(ResourceKind::Semaphore)?;
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.lock()
            .destroy(ResourceKind::Semaphore, semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.lock();
        let raw = state.create(ResourceKind::Fence)?;
        let fence = vk::Fence::from_raw(raw);
        state.fences.insert(
            fence,
            FenceState {
                signaled,
                pending: false,
            },
        );
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.lock();
        let pending = state.fences.remove(&fence).is_some_and(|f| f.pending);
        if pending {
            state
                .violations
                .push(format!("fence {:?} destroyed while GPU work is pending", fence));
        }
        state.destroy(ResourceKind::Fence, fence.as_raw());
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> RhiResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let hung = state.gpu_hung;
        let mut timed_out = false;

        for &fence in fences {
            state.events.push(MockEvent::WaitFence(fence));
            let Some(fence_state) = state.fences.get_mut(&fence) else {
                state
                    .violations
                    .push(format!("wait on unknown fence {:?}", fence));
                continue;
            };
            if fence_state.signaled {
                continue;
            }
            if fence_state.pending && !hung {
                fence_state.pending = false;
                fence_state.signaled = true;
            } else {
                timed_out = true;
            }
        }

        if timed_out {
            return Err(RhiError::Timeout(format!(
                "fence not signaled within {} ns",
                timeout
            )));
        }
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        for &fence in fences {
            state.events.push(MockEvent::ResetFence(fence));
            match state.fences.get_mut(&fence) {
                Some(fence_state) if fence_state.pending => {
                    state
                        .violations
                        .push(format!("reset of fence {:?} with pending work", fence));
                }
                Some(fence_state) => fence_state.signaled = false,
                None => state
                    .violations
                    .push(format!("reset of unknown fence {:?}", fence)),
            }
        }
        Ok(())
    }

    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        let raw = self.lock().create(ResourceKind::CommandPool)?;
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.lock();
        state.command_buffers.retain(|_, owner| *owner != pool);
        state.destroy(ResourceKind::CommandPool, pool.as_raw());
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let mut state = self.lock();
        state.check_live(ResourceKind::CommandPool, pool.as_raw(), "allocate");
        let buffers: Vec<vk::CommandBuffer> = (0..count)
            .map(|_| vk::CommandBuffer::from_raw(state.fresh_handle()))
            .collect();
        for &buffer in &buffers {
            state.command_buffers.insert(buffer, pool);
        }
        Ok(buffers)
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.lock()
            .events
            .push(MockEvent::ResetCommandBuffer(command_buffer));
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.lock();
        if !state.command_buffers.contains_key(&command_buffer) {
            state
                .violations
                .push(format!("begin on freed command buffer {:?}", command_buffer));
        }
        state
            .events
            .push(MockEvent::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.lock()
            .events
            .push(MockEvent::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        let mut state = self.lock();
        state.check_live(
            ResourceKind::RenderPass,
            begin.render_pass.as_raw(),
            "begin render pass",
        );
        state.check_live(
            ResourceKind::Framebuffer,
            begin.framebuffer.as_raw(),
            "begin render pass",
        );
        state.events.push(MockEvent::BeginRenderPass {
            command_buffer,
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            extent: begin.extent,
        });
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.lock()
            .events
            .push(MockEvent::EndRenderPass(command_buffer));
    }

    fn cmd_bind_pipeline(&self, _command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        let mut state = self.lock();
        state.check_live(ResourceKind::Pipeline, pipeline.as_raw(), "bind pipeline");
        state.events.push(MockEvent::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&self, _command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.lock().events.push(MockEvent::SetViewport(viewport));
    }

    fn cmd_set_scissor(&self, _command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.lock().events.push(MockEvent::SetScissor(scissor));
    }

    fn cmd_push_constants(
        &self,
        _command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        data: &[u8],
    ) {
        let mut state = self.lock();
        state.check_live(ResourceKind::PipelineLayout, layout.as_raw(), "push constants");
        state.events.push(MockEvent::PushConstants {
            layout,
            size: data.len(),
        });
    }

    fn cmd_bind_vertex_buffer(&self, _command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        let mut state = self.lock();
        state.check_live(ResourceKind::Buffer, buffer.as_raw(), "bind vertex buffer");
        state.events.push(MockEvent::BindVertexBuffer(buffer));
    }

    fn cmd_draw(
        &self,
        _command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.lock().events.push(MockEvent::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn queue_submit(&self, submit: &SubmitDesc) -> RhiResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.check_live(ResourceKind::Semaphore, submit.wait_semaphore.as_raw(), "submit");
        state.check_live(ResourceKind::Semaphore, submit.signal_semaphore.as_raw(), "submit");
        state.check_live(ResourceKind::Fence, submit.fence.as_raw(), "submit");

        match state.fences.get_mut(&submit.fence) {
            Some(fence) if fence.signaled || fence.pending => {
                state.violations.push(format!(
                    "submit with fence {:?} that is not reset",
                    submit.fence
                ));
            }
            Some(fence) => fence.pending = true,
            None => {}
        }

        state.events.push(MockEvent::Submit {
            command_buffer: submit.command_buffer,
            wait: submit.wait_semaphore,
            signal: submit.signal_semaphore,
            fence: submit.fence,
        });
        Ok(())
    }
}

/// Windowing double that replays scripted framebuffer extents.
#[derive(Debug)]
pub struct ScriptedExtent {
    script: Mutex<VecDeque<vk::Extent2D>>,
    fallback: Mutex<vk::Extent2D>,
    polls: AtomicUsize,
    waits: AtomicUsize,
}

impl ScriptedExtent {
    /// Reports `fallback` once the script runs out.
    pub fn new(fallback: vk::Extent2D) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            polls: AtomicUsize::new(0),
            waits: AtomicUsize::new(0),
        }
    }

    /// Queues an extent to be reported by the next poll.
    pub fn push(&self, width: u32, height: u32) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(extent(width, height));
    }

    /// Changes the extent reported after the script runs out (a window resize).
    pub fn set_fallback(&self, width: u32, height: u32) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = extent(width, height);
    }

    /// Number of extent queries so far.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Number of times a caller waited for window events.
    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl ExtentSource for ScriptedExtent {
    fn framebuffer_extent(&self) -> vk::Extent2D {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| *self.fallback.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn wait_events(&self) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_tracked() {
        let device = MockDevice::new();
        let a = device.create_semaphore().unwrap();
        let b = device.create_semaphore().unwrap();
        assert_ne!(a, b);
        assert_eq!(device.live(ResourceKind::Semaphore), 2);

        device.destroy_semaphore(a);
        device.destroy_semaphore(b);
        device.assert_no_leaks();
        device.assert_no_violations();
    }

    #[test]
    fn test_double_destroy_is_a_violation() {
        let device = MockDevice::new();
        let fence = device.create_fence(true).unwrap();
        device.destroy_fence(fence);
        device.destroy_fence(fence);
        assert_eq!(device.violations().len(), 1);
    }

    #[test]
    fn test_fence_model() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();

        // Never submitted: the wait would block forever
        assert!(matches!(
            device.wait_for_fences(&[fence], 10),
            Err(RhiError::Timeout(_))
        ));

        let semaphore = device.create_semaphore().unwrap();
        device
            .queue_submit(&SubmitDesc {
                command_buffer: vk::CommandBuffer::null(),
                wait_semaphore: semaphore,
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: semaphore,
                fence,
            })
            .unwrap();
        device.wait_for_fences(&[fence], 10).unwrap();
        device.assert_no_violations();
    }

    #[test]
    fn test_hung_gpu_times_out_pending_fences() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        device
            .queue_submit(&SubmitDesc {
                command_buffer: vk::CommandBuffer::null(),
                wait_semaphore: semaphore,
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: semaphore,
                fence,
            })
            .unwrap();

        device.set_gpu_hung(true);
        assert!(device.wait_for_fences(&[fence], 10).is_err());
    }

    #[test]
    fn test_scripted_failure_skips_then_fails_once() {
        let device = MockDevice::new();
        device.fail_create(
            ResourceKind::Semaphore,
            1,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        );

        assert!(device.create_semaphore().is_ok());
        assert!(matches!(
            device.create_semaphore(),
            Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert!(device.create_semaphore().is_ok());
    }

    #[test]
    fn test_scripted_extent_replays_then_falls_back() {
        let source = ScriptedExtent::new(extent(800, 600));
        source.push(0, 0);
        assert_eq!(source.framebuffer_extent(), extent(0, 0));
        assert_eq!(source.framebuffer_extent(), extent(800, 600));
        source.set_fallback(1024, 768);
        assert_eq!(source.framebuffer_extent(), extent(1024, 768));
        assert_eq!(source.polls(), 3);
    }
}
