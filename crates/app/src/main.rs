//! frameloop - demo scenes on a double-buffered frame loop.
//!
//! Opens a window and renders one scene through Vulkan, or with `--headless`
//! runs the same frame loop against the simulated backend for a fixed number
//! of frames and reports the synchronization statistics.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};

use frameloop_core::{DEFAULT_FRAMES_IN_FLIGHT, RendererConfig, Timer};
use frameloop_platform::{
    ActiveEventLoop, ApplicationHandler, ControlFlow, EventLoop, InputState, KeyCode, Window,
    WindowEvent, WindowId,
};
use frameloop_renderer::{Renderer, TickOutcome};
use frameloop_rhi::headless::HeadlessBackend;
use frameloop_rhi::vulkan::VulkanBackend;
use frameloop_scene::SceneKind;

/// Simulated frame time of a headless run.
const HEADLESS_STEP: Duration = Duration::from_micros(16_667);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
/// Scene to render.
enum CliScene {
    /// Vertex-colored spinning pyramid.
    Hades3,
    /// Lit static cube with normals.
    RedCube,
    /// Indexed red cube on a blue background.
    #[value(name = "red-cube-35")]
    RedCube35,
    /// Flat-colored spinning cube.
    #[default]
    SimpleCube,
}

impl From<CliScene> for SceneKind {
    fn from(scene: CliScene) -> Self {
        match scene {
            CliScene::Hades3 => SceneKind::Hades3,
            CliScene::RedCube => SceneKind::RedCube,
            CliScene::RedCube35 => SceneKind::RedCube35,
            CliScene::SimpleCube => SceneKind::SimpleCube,
        }
    }
}

#[derive(clap::Parser, Debug)]
#[command(name = "frameloop", version, about = "Demo scenes on a double-buffered frame loop", long_about = None)]
struct CliArgs {
    /// Scene to render.
    #[arg(long, value_enum, default_value_t = CliScene::SimpleCube)]
    scene: CliScene,

    /// Window width in pixels.
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Window height in pixels.
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Present without waiting for vertical blank.
    #[arg(long)]
    no_vsync: bool,

    /// Number of frame slots.
    #[arg(long, default_value_t = DEFAULT_FRAMES_IN_FLIGHT)]
    frames_in_flight: usize,

    /// Enable the Vulkan validation layer (always on in debug builds).
    #[arg(long)]
    validation: bool,

    /// Run without a window against the simulated backend.
    #[arg(long)]
    headless: bool,

    /// Frames to render in headless mode.
    #[arg(long, default_value_t = 120)]
    frames: u64,
}

impl CliArgs {
    fn config(&self) -> RendererConfig {
        let defaults = RendererConfig::default();
        RendererConfig {
            width: self.width,
            height: self.height,
            title: SceneKind::from(self.scene).desc().title.to_string(),
            vsync: !self.no_vsync,
            frames_in_flight: self.frames_in_flight,
            validation: self.validation || defaults.validation,
            headless_frames: self.frames,
        }
    }
}

/// Simulated GPU that lags one submission behind so throttling happens.
/// Only counters are kept; a per-call event log would grow with every frame.
fn headless_backend() -> HeadlessBackend {
    HeadlessBackend::new()
        .with_retire_after(1)
        .with_event_log(false)
}

fn run_headless(
    backend: &mut HeadlessBackend,
    scene: SceneKind,
    config: &RendererConfig,
) -> Result<()> {
    let mut renderer = Renderer::load(backend, scene.desc(), config)
        .with_context(|| format!("failed to load scene '{}'", scene))?;
    let mut timer = Timer::fixed_step(HEADLESS_STEP);

    let mut waits = 0u64;
    let mut result = Ok(());
    for _ in 0..config.headless_frames {
        match renderer.draw(backend, timer.delta_secs()) {
            Ok(outcome) => {
                if let Some(report) = outcome.report() {
                    debug!(
                        "Frame {}: slot {}, image {}, waited {}",
                        report.tick, report.slot, report.image_index, report.waited
                    );
                    waits += u64::from(report.waited);
                }
            }
            Err(e) => {
                result = Err(e).context("headless frame failed");
                break;
            }
        }
    }

    let frame_index = renderer.frame_loop().map_or(0, |frames| frames.frame_index());
    renderer.unload(backend);
    result?;

    info!(
        "Headless run of '{}' finished: {} frames in {:.2}s simulated, {} fence waits, \
         {} submissions, at most {} in flight, frame index {}",
        scene,
        config.headless_frames,
        timer.elapsed_secs(),
        waits,
        backend.submission_count(),
        backend.max_in_flight(),
        frame_index
    );
    Ok(())
}

/// Window, GPU and scene, created together once the event loop resumes.
struct Session {
    // Dropped in declaration order: the renderer goes before its backend.
    renderer: Renderer<VulkanBackend>,
    backend: VulkanBackend,
    window: Window,
}

impl Session {
    fn create(event_loop: &ActiveEventLoop, scene: SceneKind, config: &RendererConfig) -> Result<Self> {
        let window = Window::new(event_loop, config.width, config.height, &config.title)?;
        let (display, handle) = window.raw_handles()?;
        let mut backend = VulkanBackend::new(display, handle, config.validation)?;
        info!("Rendering on {}", backend.device_name());

        let window_config = RendererConfig {
            width: window.width(),
            height: window.height(),
            ..config.clone()
        };
        let renderer = Renderer::load(&mut backend, scene.desc(), &window_config)?;
        if let Some(format) = backend.swapchain_format() {
            debug!(
                "Swapchain format {:?}, validation {}",
                format,
                backend.has_validation()
            );
        }
        Ok(Self {
            renderer,
            backend,
            window,
        })
    }

    fn shutdown(&mut self) {
        self.renderer.unload(&mut self.backend);
    }
}

struct App {
    scene: SceneKind,
    config: RendererConfig,
    session: Option<Session>,
    input: InputState,
    timer: Timer,
    paused: bool,
    resize_pending: bool,
}

impl App {
    fn new(scene: SceneKind, config: RendererConfig) -> Self {
        Self {
            scene,
            config,
            session: None,
            input: InputState::new(),
            timer: Timer::new(),
            paused: false,
            resize_pending: false,
        }
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let delta = self.timer.delta_secs();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.window.is_minimized() {
            return;
        }

        if std::mem::take(&mut self.resize_pending) {
            let (width, height) = (session.window.width(), session.window.height());
            if let Err(e) = session.renderer.resize(&mut session.backend, width, height) {
                error!("Swapchain recreation failed: {}", e);
                self.exit(event_loop);
                return;
            }
        }

        let dt = if self.paused { 0.0 } else { delta };
        match session.renderer.draw(&mut session.backend, dt) {
            Ok(TickOutcome::Presented(_)) => {}
            Ok(outcome) => {
                debug!("Surface changed ({:?}), recreating swapchain", outcome);
                self.resize_pending = true;
            }
            Err(e) => {
                error!("Render error: {}", e);
                self.exit(event_loop);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }
        match Session::create(event_loop, self.scene, &self.config) {
            Ok(session) => {
                info!("Initialization complete, entering main loop");
                self.session = Some(session);
                self.timer.reset();
            }
            Err(e) => {
                error!("Failed to start: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.exit(event_loop);
            }
            WindowEvent::Resized(size) => {
                if let Some(session) = self.session.as_mut()
                    && session.window.resize(size.width, size.height)
                {
                    self.resize_pending = true;
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput { event, .. } => {
                self.input.on_keyboard_input(&event);
                if self.input.is_key_just_pressed(KeyCode::Escape) {
                    info!("Escape pressed, shutting down");
                    self.exit(event_loop);
                } else if self.input.is_key_just_pressed(KeyCode::Space) {
                    self.paused = !self.paused;
                    info!("Animation {}", if self.paused { "paused" } else { "resumed" });
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.input.begin_frame();
        if let Some(session) = self.session.as_ref() {
            session.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut session) = self.session.take() {
            warn!("Event loop exiting with a live session");
            session.shutdown();
        }
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    frameloop_core::init_logging();

    let scene = SceneKind::from(args.scene);
    let config = args.config();
    config.validate()?;
    info!("Starting frameloop: scene '{}', {:?}", scene, config);

    if args.headless {
        return run_headless(&mut headless_backend(), scene, &config);
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(scene, config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
