//! The frame scheduler.
//!
//! [`FrameScheduler`] is the explicit context object that owns one window's
//! rendering: the presentation surface, the render targets and pipelines
//! built on it, the frames-in-flight ring, per-slot command buffers and the
//! uploaded meshes. A host drives it with [`initialize`](FrameScheduler::initialize),
//! one [`render_frame`](FrameScheduler::render_frame) per loop iteration and
//! a final [`shutdown`](FrameScheduler::shutdown).
//!
//! # Frame flow
//!
//! 1. Wait for the current ring slot's fence and reset it
//! 2. Acquire a presentable image (stale: rebuild and skip the frame)
//! 3. Record the render pass into the slot's command buffer
//! 4. Submit, waiting on image-acquired and signaling render-complete and the fence
//! 5. Present, waiting on render-complete (stale or suboptimal: rebuild)
//! 6. Advance the ring and the frame counter
//!
//! # State machine
//!
//! ```text
//! Uninitialized -> Ready <-> Recreating
//!        |           |            |
//!        +--------> Failed <------+
//!                    |
//!   any --------> ShuttingDown -> Terminated
//! ```

use std::fmt;
use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec4};
use tracing::{debug, error, info, trace, warn};

use vkframe_core::DeletionQueue;
use vkframe_rhi::buffer::BufferUsage;
use vkframe_rhi::command::{CommandBuffer, CommandPool};
use vkframe_rhi::context::{DeviceContext, RenderPassBegin, SubmitDesc};
use vkframe_rhi::swapchain::{AcquireOutcome, ExtentSource, PresentationSurface};
use vkframe_rhi::sync::FrameSyncRing;
use vkframe_scene::Camera;

use crate::config::SchedulerConfig;
use crate::error::{RenderError, RenderResult};
use crate::mesh::{GpuMesh, MeshData, MeshHandle};
use crate::pipeline_set::{MaterialHandle, PipelineSet};
use crate::push_constants::MeshPushConstants;
use crate::render_object::RenderObject;
use crate::render_targets::RenderTargetSet;
use crate::shaders::ShaderSource;

/// Lifecycle state of a [`FrameScheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, nothing built yet.
    Uninitialized,
    /// Frames can be rendered.
    Ready,
    /// Swapchain-dependent objects are being rebuilt.
    Recreating,
    /// A fatal error occurred; only `shutdown` is allowed.
    Failed,
    ShuttingDown,
    /// Everything has been released.
    Terminated,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Uninitialized => "uninitialized",
            SchedulerState::Ready => "ready",
            SchedulerState::Recreating => "recreating",
            SchedulerState::Failed => "failed",
            SchedulerState::ShuttingDown => "shutting down",
            SchedulerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What [`FrameScheduler::render_frame`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and handed to the presentation engine.
    Presented,
    /// The swapchain was stale at acquire; nothing was submitted and the
    /// swapchain has been rebuilt.
    Skipped,
}

/// Counters since initialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub recreations: u64,
}

/// Objects built by `initialize`. Fields are listed dependents first, so an
/// implicit drop releases them in a safe order.
struct Frames {
    command_buffers: Vec<CommandBuffer>,
    sync: FrameSyncRing,
    pipelines: PipelineSet,
    targets: RenderTargetSet,
    surface: PresentationSurface,
}

/// Drives acquire, record, submit and present for one window surface.
pub struct FrameScheduler {
    device: Arc<dyn DeviceContext>,
    /// Window surface; owned by the windowing layer.
    window_surface: vk::SurfaceKHR,
    extent_source: Arc<dyn ExtentSource>,
    config: SchedulerConfig,
    state: SchedulerState,
    frames: Option<Frames>,
    shaders: Option<Box<dyn ShaderSource>>,
    meshes: Vec<GpuMesh>,
    /// Command pool and mesh vertex buffers.
    deletion_queue: DeletionQueue,
    camera: Camera,
    frame_number: u64,
    stats: FrameStats,
    recreate_requested: bool,
}

impl FrameScheduler {
    /// Creates a scheduler for `window_surface`. Nothing is built until
    /// [`initialize`](Self::initialize).
    pub fn new(
        device: Arc<dyn DeviceContext>,
        window_surface: vk::SurfaceKHR,
        extent_source: Arc<dyn ExtentSource>,
        config: SchedulerConfig,
    ) -> Self {
        debug!(
            "Frame scheduler created: {} frames in flight, {} pipelines",
            config.frames_in_flight,
            config.pipelines.len()
        );
        Self {
            device,
            window_surface,
            extent_source,
            config,
            state: SchedulerState::Uninitialized,
            frames: None,
            shaders: None,
            meshes: Vec::new(),
            deletion_queue: DeletionQueue::new("frame scheduler"),
            camera: Camera::default(),
            frame_number: 0,
            stats: FrameStats::default(),
            recreate_requested: false,
        }
    }

    /// Builds the swapchain, render targets, pipelines and sync ring, and
    /// uploads `meshes`. Returns one handle per mesh, in order.
    ///
    /// `shaders` is kept to rebuild the pipelines on every recreation.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidState`] unless the scheduler is uninitialized,
    /// [`RenderError::EmptyMesh`] for a mesh without vertices, and any
    /// creation error. On a creation error everything built so far is
    /// released and the scheduler is `Failed`.
    pub fn initialize(
        &mut self,
        shaders: Box<dyn ShaderSource>,
        meshes: &[MeshData],
    ) -> RenderResult<Vec<MeshHandle>> {
        self.expect_state("initialize", SchedulerState::Uninitialized)?;

        if let Some(empty) = meshes.iter().find(|m| m.vertices.is_empty()) {
            return Err(RenderError::EmptyMesh(empty.name.clone()));
        }

        let (frames, resources, gpu_meshes) = match self.build(shaders.as_ref(), meshes) {
            Ok(built) => built,
            Err(e) => return Err(self.fail("initialize", e)),
        };

        let extent = frames.surface.extent();
        self.camera.set_viewport_size(extent.width, extent.height);
        info!(
            "Frame scheduler ready: {}x{}, {} images, {} frames in flight, {} pipelines, {} meshes",
            extent.width,
            extent.height,
            frames.surface.image_count(),
            frames.sync.len(),
            frames.pipelines.len(),
            gpu_meshes.len()
        );

        self.frames = Some(frames);
        self.deletion_queue = resources;
        self.meshes = gpu_meshes;
        self.shaders = Some(shaders);
        self.state = SchedulerState::Ready;

        Ok((0..self.meshes.len()).map(MeshHandle).collect())
    }

    fn build(
        &self,
        shaders: &dyn ShaderSource,
        meshes: &[MeshData],
    ) -> RenderResult<(Frames, DeletionQueue, Vec<GpuMesh>)> {
        let surface = PresentationSurface::create_for_window(
            Arc::clone(&self.device),
            self.window_surface,
            self.extent_source.as_ref(),
            self.config.prefer_low_latency,
        )?;
        let targets = RenderTargetSet::create(
            Arc::clone(&self.device),
            surface.format(),
            surface.extent(),
            surface.image_views(),
        )?;
        let pipelines = PipelineSet::build(
            &self.device,
            targets.render_pass(),
            shaders,
            &self.config.pipelines,
        )?;
        let sync = FrameSyncRing::new(
            Arc::clone(&self.device),
            self.config.frames_in_flight,
            self.config.fence_timeout_ns,
        )?;

        let mut resources = DeletionQueue::new("frame scheduler");

        let pool = CommandPool::new(Arc::clone(&self.device))?;
        let command_buffers = pool.allocate_command_buffers(sync.len() as u32)?;
        resources.push_action(move || drop(pool));

        let mut gpu_meshes = Vec::with_capacity(meshes.len());
        for mesh in meshes {
            let buffer = self.device.create_buffer(
                BufferUsage::Vertex,
                bytemuck::cast_slice(mesh.vertices.as_slice()),
            )?;
            let device = Arc::clone(&self.device);
            resources.push_action(move || device.destroy_buffer(buffer));
            debug!(
                "Uploaded mesh '{}' ({} vertices)",
                mesh.name,
                mesh.vertex_count()
            );
            gpu_meshes.push(GpuMesh {
                name: mesh.name.clone(),
                buffer,
                vertex_count: mesh.vertex_count(),
            });
        }

        let frames = Frames {
            command_buffers,
            sync,
            pipelines,
            targets,
            surface,
        };
        Ok((frames, resources, gpu_meshes))
    }

    /// Renders and presents one frame.
    ///
    /// Returns [`FrameOutcome::Skipped`] when the swapchain was stale at
    /// acquire. The swapchain and everything built on it has then been
    /// rebuilt, and the ring slot was not advanced.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidState`] unless the scheduler is ready, and
    /// [`RenderError::UnknownMesh`] / [`RenderError::UnknownMaterial`] for
    /// bad handles in `objects`; these leave the scheduler ready. Any other
    /// error (fence or acquire timeout, device loss, a failed rebuild) is
    /// fatal and moves the scheduler to `Failed`.
    pub fn render_frame(&mut self, objects: &[RenderObject]) -> RenderResult<FrameOutcome> {
        self.expect_state("render_frame", SchedulerState::Ready)?;
        self.validate_objects(objects)?;

        match self.run_frame(objects) {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail("render_frame", e)),
        }
    }

    fn run_frame(&mut self, objects: &[RenderObject]) -> RenderResult<FrameOutcome> {
        if self.recreate_requested {
            debug!("Recreation requested, rebuilding before acquire");
            self.rebuild()?;
        }

        let state = self.state;
        let frames = self
            .frames
            .as_mut()
            .ok_or_else(|| not_built("render_frame", state))?;

        let slot = frames.sync.current_slot();
        frames.sync.wait_and_reset(slot)?;

        let image_acquired = frames.sync.current().image_acquired_handle();
        let (image_index, acquire_suboptimal) = match frames
            .surface
            .acquire_next(self.config.acquire_timeout_ns, image_acquired)?
        {
            AcquireOutcome::Image { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::Stale => {
                info!(
                    "Swapchain out of date at acquire, skipping frame {}",
                    self.frame_number
                );
                self.stats.frames_skipped += 1;
                self.rebuild()?;
                return Ok(FrameOutcome::Skipped);
            }
        };

        let extent = frames.targets.extent();
        let framebuffer = frames.targets.framebuffer(image_index).ok_or_else(|| {
            vkframe_rhi::RhiError::InvalidHandle(format!(
                "No framebuffer for image {} ({} framebuffers)",
                image_index,
                frames.targets.framebuffer_count()
            ))
        })?;

        self.camera.set_viewport_size(extent.width, extent.height);
        let view_projection = self.camera.view_projection_matrix();
        let frame_data = Vec4::new(self.frame_number as f32, 0.0, 0.0, 0.0);

        let command_buffer = &frames.command_buffers[slot];
        let begin = RenderPassBegin {
            render_pass: frames.targets.render_pass(),
            framebuffer,
            extent,
            clear_color: self.config.clear_color,
            clear_depth: self.config.clear_depth,
        };
        record_frame(
            command_buffer,
            &begin,
            &frames.pipelines,
            &self.meshes,
            objects,
            view_projection,
            frame_data,
        )?;

        let sync_slot = frames.sync.current();
        let render_complete = sync_slot.render_complete_handle();
        self.device.queue_submit(&SubmitDesc {
            command_buffer: command_buffer.handle(),
            wait_semaphore: image_acquired,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: render_complete,
            fence: sync_slot.in_flight_handle(),
        })?;
        frames.sync.mark_submitted(slot);

        let presented = frames.surface.present(render_complete, image_index)?;
        if presented.needs_rebuild() || acquire_suboptimal {
            debug!(
                "Present returned {:?} (acquire suboptimal: {}), rebuilding",
                presented, acquire_suboptimal
            );
            self.rebuild()?;
        }

        if let Some(frames) = self.frames.as_mut() {
            frames.sync.advance();
        }
        self.frame_number += 1;
        self.stats.frames_rendered += 1;
        trace!(
            "Frame {} presented (slot {}, image {})",
            self.frame_number, slot, image_index
        );

        Ok(FrameOutcome::Presented)
    }

    /// Waits for the device, then rebuilds the swapchain, render targets
    /// and pipelines at the window's current size.
    ///
    /// Blocks while the window is minimized. Calling it twice in a row is
    /// fine; each call leaves a complete, consistent set.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidState`] unless the scheduler is ready. A failed
    /// rebuild is fatal and moves the scheduler to `Failed`.
    pub fn recreate_all(&mut self) -> RenderResult<()> {
        self.expect_state("recreate_all", SchedulerState::Ready)?;
        self.rebuild().map_err(|e| self.fail("recreate_all", e))
    }

    fn rebuild(&mut self) -> RenderResult<()> {
        self.state = SchedulerState::Recreating;
        self.device.wait_idle()?;

        let frames = self
            .frames
            .as_mut()
            .ok_or_else(|| not_built("recreate_all", SchedulerState::Recreating))?;
        let shaders = self
            .shaders
            .as_deref()
            .ok_or_else(|| not_built("recreate_all", SchedulerState::Recreating))?;

        let previous = frames.surface.extent();

        frames.pipelines.destroy();
        frames.targets.destroy();
        frames
            .surface
            .recreate(self.extent_source.framebuffer_extent(), self.extent_source.as_ref())?;

        frames.targets = RenderTargetSet::create(
            Arc::clone(&self.device),
            frames.surface.format(),
            frames.surface.extent(),
            frames.surface.image_views(),
        )?;
        frames.pipelines = PipelineSet::build(
            &self.device,
            frames.targets.render_pass(),
            shaders,
            &self.config.pipelines,
        )?;

        let extent = frames.surface.extent();
        self.camera.set_viewport_size(extent.width, extent.height);
        self.stats.recreations += 1;
        self.recreate_requested = false;
        self.state = SchedulerState::Ready;

        info!(
            "Recreated swapchain-dependent objects: {}x{} -> {}x{}, {} images",
            previous.width,
            previous.height,
            extent.width,
            extent.height,
            frames.surface.image_count()
        );
        Ok(())
    }

    /// Rebuilds before the next acquire, e.g. after a window resize event.
    pub fn request_recreate(&mut self) {
        if !self.recreate_requested {
            debug!("Swapchain recreation requested");
        }
        self.recreate_requested = true;
    }

    /// Waits for the device and releases everything, in dependency order.
    ///
    /// Allowed in every state, including `Failed`. Calling it again is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns the device-idle error if waiting failed. Resources are
    /// released regardless.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.state == SchedulerState::Terminated {
            return Ok(());
        }

        info!(
            "Shutting down frame scheduler ({} frames, {} skipped, {} recreations)",
            self.stats.frames_rendered, self.stats.frames_skipped, self.stats.recreations
        );
        self.state = SchedulerState::ShuttingDown;

        let idle = self.device.wait_idle();
        if let Err(e) = &idle {
            error!("Failed to wait for device idle during shutdown: {}", e);
        }

        let mut frames = self.frames.take();
        if let Some(frames) = frames.as_mut() {
            // Freed together with their pool
            frames.command_buffers.clear();
        }
        self.deletion_queue.flush();
        self.meshes.clear();

        if let Some(mut frames) = frames {
            frames.pipelines.destroy();
            frames.targets.destroy();
            frames.surface.destroy();
            frames.sync.destroy();
        }
        self.shaders = None;
        self.state = SchedulerState::Terminated;
        info!("Frame scheduler terminated");

        idle.map_err(RenderError::from)
    }

    fn expect_state(&self, operation: &'static str, expected: SchedulerState) -> RenderResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RenderError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Records a fatal error and moves to `Failed`.
    fn fail(&mut self, operation: &str, err: RenderError) -> RenderError {
        if err.is_fatal() {
            error!("{} failed, scheduler is now unusable: {}", operation, err);
            self.state = SchedulerState::Failed;
        } else {
            warn!("{} rejected: {}", operation, err);
        }
        err
    }

    fn validate_objects(&self, objects: &[RenderObject]) -> RenderResult<()> {
        for object in objects {
            if object.mesh.0 >= self.meshes.len() {
                return Err(RenderError::UnknownMesh(object.mesh));
            }
            if object.material.0 >= self.config.pipelines.len() {
                return Err(RenderError::UnknownMaterial(object.material));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Number of frames submitted and presented so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Ring slot the next frame uses.
    pub fn current_slot(&self) -> usize {
        self.frames
            .as_ref()
            .map_or(0, |frames| frames.sync.current_slot())
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// The camera used for the next frames. Its aspect ratio is overwritten
    /// from the render target extent at record time.
    #[inline]
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Handle of the pipeline called `name`.
    pub fn material(&self, name: &str) -> Option<MaterialHandle> {
        self.config
            .pipelines
            .iter()
            .position(|p| p.name == name)
            .map(MaterialHandle)
    }

    /// Handle of the uploaded mesh called `name`.
    pub fn mesh(&self, name: &str) -> Option<MeshHandle> {
        self.meshes
            .iter()
            .position(|m| m.name == name)
            .map(MeshHandle)
    }

    pub fn presentation(&self) -> Option<&PresentationSurface> {
        self.frames.as_ref().map(|frames| &frames.surface)
    }

    pub fn render_targets(&self) -> Option<&RenderTargetSet> {
        self.frames.as_ref().map(|frames| &frames.targets)
    }

    pub fn pipelines(&self) -> Option<&PipelineSet> {
        self.frames.as_ref().map(|frames| &frames.pipelines)
    }

    pub fn sync_ring(&self) -> Option<&FrameSyncRing> {
        self.frames.as_ref().map(|frames| &frames.sync)
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Frame scheduler shutdown on drop failed: {}", e);
        }
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("state", &self.state)
            .field("frame_number", &self.frame_number)
            .field("stats", &self.stats)
            .field("meshes", &self.meshes.len())
            .finish_non_exhaustive()
    }
}

fn not_built(operation: &'static str, state: SchedulerState) -> RenderError {
    RenderError::InvalidState { operation, state }
}

/// Records one render pass drawing `objects` in order.
fn record_frame(
    command_buffer: &CommandBuffer,
    begin: &RenderPassBegin,
    pipelines: &PipelineSet,
    meshes: &[GpuMesh],
    objects: &[RenderObject],
    view_projection: Mat4,
    frame_data: Vec4,
) -> RenderResult<()> {
    command_buffer.reset()?;
    command_buffer.begin()?;
    command_buffer.begin_render_pass(begin);

    let mut bound_material = None;
    let mut bound_mesh = None;

    for object in objects {
        let material = pipelines
            .get(object.material)
            .ok_or(RenderError::UnknownMaterial(object.material))?;
        let mesh = meshes
            .get(object.mesh.0)
            .ok_or(RenderError::UnknownMesh(object.mesh))?;

        if bound_material != Some(object.material) {
            command_buffer.bind_pipeline(material.pipeline());
            command_buffer.set_viewport_and_scissor(begin.extent);
            bound_material = Some(object.material);
        }

        if let Some(layout) = material.push_constants() {
            let constants =
                MeshPushConstants::new(frame_data, view_projection * object.transform);
            command_buffer.push_constants(material.layout(), layout.stages, &constants);
        }

        if bound_mesh != Some(object.mesh) {
            command_buffer.bind_vertex_buffer(mesh.buffer);
            bound_mesh = Some(object.mesh);
        }

        command_buffer.draw(mesh.vertex_count);
    }

    command_buffer.end_render_pass();
    command_buffer.end()?;
    Ok(())
}
