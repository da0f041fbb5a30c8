//! Scene loading and teardown around the frame loop.
//!
//! [`Renderer`] creates a scene's GPU objects in a fixed order:
//!
//! 1. swapchain
//! 2. depth target, when the scene tests depth
//! 3. graphics pipeline
//! 4. vertex and index buffers, flushed to the GPU
//! 5. frame slots ([`FrameLoop`])
//! 6. one descriptor set per slot
//!
//! A failure at any step releases everything created before it. Teardown runs
//! the same list backwards after the GPU has gone idle.

use tracing::{debug, info, warn};

use frameloop_core::RendererConfig;
use frameloop_rhi::backend::{
    BufferUsage, Extent2D, GpuBackend, MeshBinding, SurfaceInfo, SwapchainDesc,
};
use frameloop_scene::{SceneDesc, SceneState};

use crate::error::{LoadStage, RendererError, RendererResult, at};
use crate::frame_loop::{FrameLoop, FrameRecipe, TickOutcome};
use crate::uniform::UniformPayload;

/// Everything created for a loaded scene. Fields are filled in load order so
/// a partially loaded set can be released the same way as a full one.
struct GpuResources<B: GpuBackend> {
    swapchain: Option<SurfaceInfo>,
    depth_target: bool,
    pipeline: Option<B::Pipeline>,
    vertex_buffer: Option<B::Buffer>,
    index_buffer: Option<B::Buffer>,
    frames: Option<FrameLoop<B>>,
    descriptor_sets: Option<B::DescriptorSets>,
}

impl<B: GpuBackend> GpuResources<B> {
    fn empty() -> Self {
        Self {
            swapchain: None,
            depth_target: false,
            pipeline: None,
            vertex_buffer: None,
            index_buffer: None,
            frames: None,
            descriptor_sets: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.swapchain.is_none()
            && !self.depth_target
            && self.pipeline.is_none()
            && self.vertex_buffer.is_none()
            && self.index_buffer.is_none()
            && self.frames.is_none()
            && self.descriptor_sets.is_none()
    }

    /// Waits for the GPU, then destroys in reverse creation order.
    fn release(&mut self, backend: &mut B) {
        let idle = match self.frames.as_mut() {
            Some(frames) => frames.wait_idle(backend),
            None => backend.wait_idle(),
        };
        if let Err(e) = idle {
            warn!("Releasing scene resources without an idle GPU: {}", e);
        }

        if let Some(sets) = self.descriptor_sets.take() {
            backend.destroy_descriptor_sets(sets);
        }
        if let Some(frames) = self.frames.take() {
            frames.destroy(backend);
        }
        for buffer in [self.index_buffer.take(), self.vertex_buffer.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_buffer(buffer);
        }
        if let Some(pipeline) = self.pipeline.take() {
            backend.destroy_pipeline(pipeline);
        }
        if std::mem::take(&mut self.depth_target) {
            backend.destroy_depth_target();
        }
        if self.swapchain.take().is_some() {
            backend.destroy_swapchain();
        }
    }
}

/// Draws one scene through a [`FrameLoop`].
///
/// The renderer does not own the backend. Every call that touches the GPU
/// takes it explicitly, and [`Renderer::unload`] must be called before the
/// backend is dropped.
pub struct Renderer<B: GpuBackend> {
    scene: SceneDesc,
    state: SceneState,
    swapchain_desc: SwapchainDesc,
    resources: GpuResources<B>,
    recipe: Option<FrameRecipe<B>>,
}

impl<B: GpuBackend> Renderer<B> {
    /// Creates every GPU object the scene needs.
    ///
    /// # Errors
    ///
    /// [`RendererError::Config`] if `config` does not validate, otherwise
    /// [`RendererError::Load`] naming the failed stage. In both cases nothing
    /// created by this call is left alive.
    pub fn load(
        backend: &mut B,
        scene: SceneDesc,
        config: &RendererConfig,
    ) -> RendererResult<Self> {
        config.validate()?;

        info!(
            "Loading scene '{}' on {} backend ({}x{}, {} frame(s) in flight)",
            scene.kind,
            backend.name(),
            config.width,
            config.height,
            config.frames_in_flight
        );

        let swapchain_desc = SwapchainDesc {
            extent: Extent2D::new(config.width, config.height),
            vsync: config.vsync,
            min_image_count: config.frames_in_flight as u32 + 1,
        };

        let mut resources = GpuResources::empty();
        match Self::create_resources(backend, &scene, &swapchain_desc, config, &mut resources) {
            Ok(recipe) => {
                let state = scene.initial_state();
                info!("Scene '{}' loaded", scene.kind);
                Ok(Self {
                    scene,
                    state,
                    swapchain_desc,
                    resources,
                    recipe: Some(recipe),
                })
            }
            Err(e) => {
                warn!("Scene '{}' failed to load: {}", scene.kind, e);
                resources.release(backend);
                Err(e)
            }
        }
    }

    fn create_resources(
        backend: &mut B,
        scene: &SceneDesc,
        swapchain_desc: &SwapchainDesc,
        config: &RendererConfig,
        resources: &mut GpuResources<B>,
    ) -> RendererResult<FrameRecipe<B>> {
        let surface = backend
            .create_swapchain(swapchain_desc)
            .map_err(at(LoadStage::Swapchain))?;
        resources.swapchain = Some(surface);
        debug!(
            "Swapchain ready: {}x{}, {} images",
            surface.extent.width, surface.extent.height, surface.image_count
        );

        if scene.uses_depth() {
            backend
                .create_depth_target()
                .map_err(at(LoadStage::DepthTarget))?;
            resources.depth_target = true;
        }

        let pipeline = backend
            .create_pipeline(&scene.pipeline_desc(UniformPayload::SIZE as u64))
            .map_err(at(LoadStage::Pipeline))?;
        resources.pipeline = Some(pipeline);

        let vertex_buffer = backend
            .upload_static_buffer(BufferUsage::Vertex, scene.mesh.vertex_bytes())
            .map_err(at(LoadStage::MeshUpload))?;
        resources.vertex_buffer = Some(vertex_buffer);
        let index_buffer = match scene.mesh.indices() {
            Some(indices) => {
                let buffer = backend
                    .upload_static_buffer(BufferUsage::Index, indices.as_bytes())
                    .map_err(at(LoadStage::MeshUpload))?;
                resources.index_buffer = Some(buffer);
                Some((buffer, indices.format()))
            }
            None => None,
        };
        let upload = backend
            .flush_resource_updates()
            .map_err(at(LoadStage::MeshUpload))?;

        let mut frames = FrameLoop::new(backend, config.frames_in_flight, UniformPayload::SIZE as u64)
            .map_err(at(LoadStage::FrameSlots))?;
        frames.set_upload_wait(upload);
        let uniform_buffers = frames.uniform_buffers();
        resources.frames = Some(frames);

        let descriptor_sets = backend
            .create_descriptor_sets(pipeline, &uniform_buffers)
            .map_err(at(LoadStage::DescriptorSets))?;
        resources.descriptor_sets = Some(descriptor_sets);

        Ok(FrameRecipe {
            pipeline,
            descriptor_sets,
            mesh: MeshBinding {
                vertex_buffer,
                index_buffer,
            },
            draw: scene.mesh.draw_call(),
            clear: scene.clear,
        })
    }

    /// Advances the scene by `dt` seconds and renders one frame.
    ///
    /// # Errors
    ///
    /// [`RendererError::NotLoaded`] after [`Self::unload`], or the backend
    /// failure that stopped the tick.
    pub fn draw(&mut self, backend: &mut B, dt: f32) -> RendererResult<TickOutcome> {
        let recipe = self.recipe.as_ref().ok_or(RendererError::NotLoaded)?;
        let frames = self
            .resources
            .frames
            .as_mut()
            .ok_or(RendererError::NotLoaded)?;

        self.state.advance(dt);
        let payload = UniformPayload::new(self.state.mvp(self.swapchain_desc.extent), self.scene.color);
        Ok(frames.tick(backend, recipe, payload.as_bytes())?)
    }

    /// Recreates the swapchain and depth target at a new size.
    ///
    /// The pipeline, mesh and frame slots are kept. A zero-sized request
    /// (a minimized window) is ignored.
    ///
    /// # Errors
    ///
    /// [`RendererError::NotLoaded`] after [`Self::unload`], or the backend
    /// error from recreation. On error the renderer should be unloaded.
    pub fn resize(&mut self, backend: &mut B, width: u32, height: u32) -> RendererResult<()> {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to zero dimensions");
            return Ok(());
        }
        let frames = self
            .resources
            .frames
            .as_mut()
            .ok_or(RendererError::NotLoaded)?;

        let old = self.swapchain_desc.extent;
        debug!(
            "Recreating swapchain: {}x{} -> {}x{}",
            old.width, old.height, width, height
        );
        frames.wait_idle(backend)?;

        if std::mem::take(&mut self.resources.depth_target) {
            backend.destroy_depth_target();
        }
        if self.resources.swapchain.take().is_some() {
            backend.destroy_swapchain();
        }

        self.swapchain_desc.extent = Extent2D::new(width, height);
        let surface = backend.create_swapchain(&self.swapchain_desc)?;
        self.resources.swapchain = Some(surface);
        self.swapchain_desc.extent = surface.extent;
        if self.scene.uses_depth() {
            backend.create_depth_target()?;
            self.resources.depth_target = true;
        }
        info!(
            "Swapchain recreated: {}x{}",
            surface.extent.width, surface.extent.height
        );
        Ok(())
    }

    /// Waits for the GPU and destroys every object the scene created.
    /// Calling it again does nothing.
    pub fn unload(&mut self, backend: &mut B) {
        if self.resources.is_empty() {
            return;
        }
        let ticks = self.resources.frames.as_ref().map_or(0, FrameLoop::ticks);
        self.recipe = None;
        self.resources.release(backend);
        info!("Scene '{}' unloaded after {} frame(s)", self.scene.kind, ticks);
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.recipe.is_some()
    }

    #[inline]
    pub fn scene(&self) -> &SceneDesc {
        &self.scene
    }

    #[inline]
    pub fn state(&self) -> &SceneState {
        &self.state
    }

    /// Current swapchain extent.
    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.swapchain_desc.extent
    }

    pub fn frame_loop(&self) -> Option<&FrameLoop<B>> {
        self.resources.frames.as_ref()
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if !self.resources.is_empty() {
            warn!(
                "Renderer for '{}' dropped while loaded; objects stay alive until the backend is dropped",
                self.scene.kind
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::headless::{BackendEvent, HeadlessBackend};
    use frameloop_scene::SceneKind;

    fn config() -> RendererConfig {
        RendererConfig {
            width: 320,
            height: 240,
            ..Default::default()
        }
    }

    #[test]
    fn test_load_creates_depth_only_when_used() {
        let mut gpu = HeadlessBackend::new();
        let mut renderer = Renderer::load(&mut gpu, SceneKind::Hades3.desc(), &config()).unwrap();
        assert!(!gpu.has_depth_target());
        renderer.unload(&mut gpu);

        let mut renderer =
            Renderer::load(&mut gpu, SceneKind::RedCube.desc(), &config()).unwrap();
        assert!(gpu.has_depth_target());
        renderer.unload(&mut gpu);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn test_draw_uploads_scene_payload() {
        let mut gpu = HeadlessBackend::new();
        let mut renderer =
            Renderer::load(&mut gpu, SceneKind::RedCube35.desc(), &config()).unwrap();
        gpu.take_events();

        renderer.draw(&mut gpu, 0.5).unwrap();

        let mut expected = SceneKind::RedCube35.desc().initial_state();
        expected.advance(0.5);
        let payload = UniformPayload::new(
            expected.mvp(Extent2D::new(320, 240)),
            glam::Vec4::new(1.0, 0.0, 0.0, 1.0),
        );
        let written = gpu
            .events()
            .iter()
            .find_map(|e| match e {
                BackendEvent::UniformWrite { data, .. } => Some(data.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(written, payload.as_bytes());
        renderer.unload(&mut gpu);
    }

    #[test]
    fn test_indexed_scene_binds_index_buffer() {
        let mut gpu = HeadlessBackend::new();
        let mut renderer =
            Renderer::load(&mut gpu, SceneKind::RedCube.desc(), &config()).unwrap();
        gpu.take_events();
        renderer.draw(&mut gpu, 0.0).unwrap();
        assert!(gpu.events().iter().any(|e| matches!(
            e,
            BackendEvent::BindMesh {
                index_buffer: Some(_),
                ..
            }
        )));
        renderer.unload(&mut gpu);
    }

    #[test]
    fn test_draw_after_unload() {
        let mut gpu = HeadlessBackend::new();
        let mut renderer =
            Renderer::load(&mut gpu, SceneKind::SimpleCube.desc(), &config()).unwrap();
        renderer.unload(&mut gpu);
        assert!(!renderer.is_loaded());
        assert!(matches!(
            renderer.draw(&mut gpu, 0.0),
            Err(RendererError::NotLoaded)
        ));
        assert!(matches!(
            renderer.resize(&mut gpu, 10, 10),
            Err(RendererError::NotLoaded)
        ));
    }

    #[test]
    fn test_invalid_config_creates_nothing() {
        let mut gpu = HeadlessBackend::new();
        let bad = RendererConfig {
            frames_in_flight: 0,
            ..config()
        };
        let result = Renderer::load(&mut gpu, SceneKind::Hades3.desc(), &bad);
        assert!(matches!(result, Err(RendererError::Config(_))));
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn test_resize_keeps_slots() {
        let mut gpu = HeadlessBackend::new();
        let mut renderer =
            Renderer::load(&mut gpu, SceneKind::SimpleCube.desc(), &config()).unwrap();
        renderer.draw(&mut gpu, 0.0).unwrap();
        let live = gpu.live_objects();

        renderer.resize(&mut gpu, 640, 480).unwrap();
        assert_eq!(renderer.extent(), Extent2D::new(640, 480));
        assert_eq!(gpu.surface_extent(), Some(Extent2D::new(640, 480)));
        assert!(gpu.has_depth_target());
        assert_eq!(gpu.live_objects(), live);

        renderer.resize(&mut gpu, 0, 480).unwrap();
        assert_eq!(renderer.extent(), Extent2D::new(640, 480));

        renderer.draw(&mut gpu, 0.0).unwrap();
        renderer.unload(&mut gpu);
    }
}
