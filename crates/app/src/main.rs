//! vkframe demo host.
//!
//! Opens a window, builds the Vulkan device and drives the frame scheduler
//! from the winit event loop: a triangle and a spinning cube, rebuilt on
//! every resize and paused while minimized.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use raw_window_handle::HasDisplayHandle;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use vkframe_core::EngineConfig;
use vkframe_platform::{Surface, Window, required_extensions};
use vkframe_renderer::{
    FrameScheduler, MaterialHandle, MeshData, MeshHandle, RenderObject, SchedulerConfig,
    SpirvDirectory,
};
use vkframe_rhi::DeviceContext;
use vkframe_rhi::device::Device;
use vkframe_rhi::instance::Instance;
use vkframe_rhi::physical_device::select_physical_device;
use vkframe_scene::Transform;

/// Drives the vkframe frame scheduler in a window.
#[derive(Parser, Debug)]
#[command(name = "vkframe", version, about)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Spins about Y at this many radians per frame.
const SPIN_PER_FRAME: f32 = 0.01;

struct SceneObject {
    mesh: MeshHandle,
    material: MaterialHandle,
    transform: Transform,
    spins: bool,
}

/// Everything that lives as long as the window. Field order is drop order:
/// the scheduler releases its GPU objects before the device, the device goes
/// before the surface, and the surface before the instance.
struct Gpu {
    scheduler: FrameScheduler,
    objects: Vec<SceneObject>,
    _device: Arc<Device>,
    _surface: Surface,
    _instance: Instance,
    window: Arc<Window>,
}

impl Gpu {
    fn new(event_loop: &ActiveEventLoop, config: &EngineConfig) -> Result<Self> {
        let window = Arc::new(Window::new(
            event_loop,
            &config.window,
            Duration::from_millis(config.frames.minimized_poll_ms),
        )?);

        let display = window
            .display_handle()
            .context("Window has no display handle")?;
        let extensions = required_extensions(display.as_raw())?;
        let instance = Instance::new(config.render.validation, &extensions)?;
        let surface = window.create_surface(&instance)?;

        let gpu_info = select_physical_device(&instance, surface.handle())?;
        info!(
            "Using GPU '{}' ({})",
            gpu_info.device_name(),
            gpu_info.device_type_name()
        );
        let device = Device::new(&instance, &gpu_info)?;
        let context: Arc<dyn DeviceContext> = device.clone();

        let mut scheduler = FrameScheduler::new(
            context,
            surface.handle(),
            window.clone(),
            SchedulerConfig::from_engine_config(config),
        );
        let meshes = scheduler.initialize(
            Box::new(SpirvDirectory::new(&config.render.shader_dir)),
            &[MeshData::triangle(), MeshData::cube()],
        )?;

        let camera = scheduler.camera_mut();
        camera.position = Vec3::new(0.0, 1.5, 5.0);
        camera.target = Vec3::ZERO;

        let objects = build_scene(&scheduler, config, &meshes)?;
        info!("Scene ready: {} objects", objects.len());

        Ok(Self {
            scheduler,
            objects,
            _device: device,
            _surface: surface,
            _instance: instance,
            window,
        })
    }

    /// Returns false once the scheduler can no longer render.
    fn redraw(&mut self) -> bool {
        if self.window.is_minimized() {
            return true;
        }

        let angle = self.scheduler.frame_number() as f32 * SPIN_PER_FRAME;
        let objects: Vec<RenderObject> = self
            .objects
            .iter()
            .map(|object| {
                let mut transform = object.transform;
                if object.spins {
                    transform.rotate_y(angle);
                }
                RenderObject::new(object.mesh, object.material, transform.model_matrix())
            })
            .collect();

        match self.scheduler.render_frame(&objects) {
            Ok(_) => true,
            Err(e) if !e.is_fatal() => {
                warn!("Frame rejected: {}", e);
                true
            }
            Err(e) => {
                error!("Rendering stopped: {}", e);
                false
            }
        }
    }
}

/// One triangle on the left, one cube per configured pipeline to the right.
fn build_scene(
    scheduler: &FrameScheduler,
    config: &EngineConfig,
    meshes: &[MeshHandle],
) -> Result<Vec<SceneObject>> {
    let (triangle, cube) = match meshes {
        [triangle, cube, ..] => (*triangle, *cube),
        _ => anyhow::bail!("Expected the triangle and cube meshes"),
    };
    let first = config
        .pipelines
        .first()
        .context("No pipelines configured")?;
    let first = scheduler
        .material(&first.name)
        .with_context(|| format!("Pipeline '{}' was not built", first.name))?;

    let mut objects = vec![SceneObject {
        mesh: triangle,
        material: first,
        transform: Transform::new().with_position(Vec3::new(-2.0, 0.0, 0.0)),
        spins: false,
    }];

    for (i, pipeline) in config.pipelines.iter().enumerate() {
        let material = scheduler
            .material(&pipeline.name)
            .with_context(|| format!("Pipeline '{}' was not built", pipeline.name))?;
        objects.push(SceneObject {
            mesh: cube,
            material,
            transform: Transform::new()
                .with_position(Vec3::new(i as f32 * 1.5, 0.0, -(i as f32)))
                .with_scale(Vec3::splat(0.6)),
            spins: true,
        });
    }

    Ok(objects)
}

struct App {
    config: EngineConfig,
    gpu: Option<Gpu>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self { config, gpu: None }
    }

    fn shutdown(&mut self) {
        if let Some(mut gpu) = self.gpu.take() {
            let stats = gpu.scheduler.stats();
            info!(
                "Rendered {} frames ({} skipped, {} recreations)",
                stats.frames_rendered, stats.frames_skipped, stats.recreations
            );
            if let Err(e) = gpu.scheduler.shutdown() {
                error!("Shutdown did not complete cleanly: {}", e);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }

        match Gpu::new(event_loop, &self.config) {
            Ok(gpu) => {
                info!("Initialization complete, entering main loop");
                self.gpu = Some(gpu);
            }
            Err(e) => {
                error!("Failed to initialize: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                gpu.window.resized(size);
                gpu.scheduler.request_recreate();
            }
            WindowEvent::RedrawRequested => {
                if !gpu.redraw() {
                    self.shutdown();
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = self.gpu.as_ref() {
            gpu.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    vkframe_core::init_logging_with(&config.render.log_filter);
    info!("Starting vkframe");
    if let Some(path) = &args.config {
        info!("Configuration loaded from {}", path.display());
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
