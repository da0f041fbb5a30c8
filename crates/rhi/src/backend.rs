//! The collaborator contract between the frame loop and a GPU.
//!
//! [`GpuBackend`] is everything the frame loop and the renderer are allowed to
//! ask of the graphics API: presentation targets, per-slot command buffers
//! and synchronization objects, persistently mapped uniform buffers, one-time
//! static uploads, pipelines, per-slot descriptor sets, command recording,
//! submission and presentation.
//!
//! Handles are small `Copy` values. The backend owns the objects behind them
//! and releases them when the matching `destroy_*` call is made, or when the
//! backend itself is dropped.
//!
//! Two implementations exist: [`crate::vulkan::VulkanBackend`] drives a real
//! device, [`crate::headless::HeadlessBackend`] simulates one on the CPU.
//!
//! # Synchronization model
//!
//! * A fence starts unsignaled. It is signaled by the GPU once the submission
//!   it was attached to completes, and must be reset before it is attached to
//!   another submission.
//! * A binary semaphore gets a pending signal from [`GpuBackend::acquire_next_image`]
//!   or from [`GpuBackend::submit`], and that signal is consumed by exactly one
//!   later submit or present wait.
//! * A command buffer must not be reset or re-recorded while a submission
//!   using it is still executing.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::RhiResult;

/// Width and height of a presentation target in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height, or 1.0 for a degenerate extent.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Parameters for swapchain creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub extent: Extent2D,
    pub vsync: bool,
    /// Lower bound on the number of presentable images.
    pub min_image_count: u32,
}

/// What the backend actually created for a [`SwapchainDesc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub extent: Extent2D,
    pub image_count: u32,
}

/// Outcome of an image acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// The image can be rendered to once the acquire semaphore is signaled.
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface changed and the swapchain must be recreated. The
    /// semaphore passed in was not signaled.
    OutOfDate,
}

/// Outcome of a present request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// Not presented; the swapchain must be recreated.
    OutOfDate,
}

/// Host view of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    Unsignaled,
}

/// The two states a swapchain image moves between within one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageState {
    /// Owned by the presentation engine.
    Present,
    /// Bound as the color attachment of the pass.
    RenderTarget,
}

/// How a static buffer is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

impl BufferUsage {
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
        }
    }
}

/// Element type of an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(self) -> usize {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Format of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Interleaved layout of a single vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: &'static [VertexAttribute],
}

/// Face culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Back,
    Front,
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Always,
}

/// Depth test configuration for a pipeline that renders with a depth target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub compare: CompareOp,
    pub write: bool,
}

/// Everything needed to build the one graphics pipeline a scene draws with.
///
/// Shader sources are GLSL. Set 0, binding 0 is a uniform buffer of
/// `uniform_size` bytes visible to both stages.
#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    pub label: &'a str,
    pub vertex_shader: &'a str,
    pub fragment_shader: &'a str,
    pub vertex_layout: VertexLayout,
    pub cull_mode: CullMode,
    pub depth: Option<DepthState>,
    pub uniform_size: u64,
}

/// Clear values for the start of the pass. `depth` is ignored when no depth
/// target exists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: Option<f32>,
}

/// Vertex buffer and optional index buffer bound for the draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBinding<B> {
    pub vertex_buffer: B,
    pub index_buffer: Option<(B, IndexFormat)>,
}

/// The single draw call of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    Vertices { count: u32 },
    Indexed { count: u32 },
}

/// Command buffer, fence and semaphore belonging to one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandles<C, F, S> {
    pub command_buffer: C,
    pub fence: F,
    pub semaphore: S,
}

/// One queue submission.
#[derive(Debug, Clone, Copy)]
pub struct SubmitDesc<'a, C, F, S> {
    pub command_buffer: C,
    pub wait_semaphores: &'a [S],
    pub signal_semaphores: &'a [S],
    pub signal_fence: Option<F>,
}

/// [`SlotHandles`] for backend `B`.
pub type SlotHandlesOf<B> = SlotHandles<
    <B as GpuBackend>::CommandBuffer,
    <B as GpuBackend>::Fence,
    <B as GpuBackend>::Semaphore,
>;

/// [`SubmitDesc`] for backend `B`.
pub type SubmitDescOf<'a, B> = SubmitDesc<
    'a,
    <B as GpuBackend>::CommandBuffer,
    <B as GpuBackend>::Fence,
    <B as GpuBackend>::Semaphore,
>;

/// Operations a GPU must provide to the frame loop and renderer.
///
/// All methods are called from the single rendering thread.
pub trait GpuBackend {
    type CommandBuffer: Copy + Eq + Hash + Debug;
    type Fence: Copy + Eq + Hash + Debug;
    type Semaphore: Copy + Eq + Hash + Debug;
    type Buffer: Copy + Eq + Hash + Debug;
    type Pipeline: Copy + Eq + Hash + Debug;
    /// A group of descriptor sets, one per frame slot, bound by index.
    type DescriptorSets: Copy + Eq + Hash + Debug;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    // ---------------------------------------------------------------------
    // Presentation targets
    // ---------------------------------------------------------------------

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> RhiResult<SurfaceInfo>;
    fn destroy_swapchain(&mut self);
    /// Creates a depth target matching the current swapchain extent.
    fn create_depth_target(&mut self) -> RhiResult<()>;
    fn destroy_depth_target(&mut self);

    // ---------------------------------------------------------------------
    // Frame slots and synchronization
    // ---------------------------------------------------------------------

    /// Allocates `count` command buffers, each with an unsignaled fence and
    /// a semaphore.
    fn allocate_command_slots(
        &mut self,
        count: usize,
    ) -> RhiResult<Vec<SlotHandles<Self::CommandBuffer, Self::Fence, Self::Semaphore>>>;
    fn release_command_slots(
        &mut self,
        slots: &[SlotHandles<Self::CommandBuffer, Self::Fence, Self::Semaphore>],
    );
    fn create_semaphore(&mut self) -> RhiResult<Self::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);
    fn fence_status(&mut self, fence: Self::Fence) -> RhiResult<FenceStatus>;
    /// Blocks until `fence` is signaled. There is no timeout.
    fn wait_for_fence(&mut self, fence: Self::Fence) -> RhiResult<()>;
    fn reset_fence(&mut self, fence: Self::Fence) -> RhiResult<()>;
    /// Blocks until all submitted work has completed.
    fn wait_idle(&mut self) -> RhiResult<()>;

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------

    /// Creates a host-visible, persistently mapped uniform buffer.
    fn create_uniform_buffer(&mut self, size: u64) -> RhiResult<Self::Buffer>;
    /// Copies `data` into a mapped buffer. Synchronous on the host.
    fn update_mapped_buffer(&mut self, buffer: Self::Buffer, data: &[u8]) -> RhiResult<()>;
    /// Creates an immutable buffer whose contents reach the GPU through the
    /// next [`GpuBackend::flush_resource_updates`].
    fn upload_static_buffer(&mut self, usage: BufferUsage, data: &[u8])
    -> RhiResult<Self::Buffer>;
    /// Submits pending uploads. Returns a semaphore the next submission must
    /// wait on when there was anything to upload.
    fn flush_resource_updates(&mut self) -> RhiResult<Option<Self::Semaphore>>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> RhiResult<Self::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);
    /// Creates one descriptor set per uniform buffer, in order.
    fn create_descriptor_sets(
        &mut self,
        pipeline: Self::Pipeline,
        uniform_buffers: &[Self::Buffer],
    ) -> RhiResult<Self::DescriptorSets>;
    fn destroy_descriptor_sets(&mut self, sets: Self::DescriptorSets);

    // ---------------------------------------------------------------------
    // Command recording
    // ---------------------------------------------------------------------

    fn reset_command_buffer(&mut self, cmd: Self::CommandBuffer) -> RhiResult<()>;
    fn begin_commands(&mut self, cmd: Self::CommandBuffer) -> RhiResult<()>;
    fn end_commands(&mut self, cmd: Self::CommandBuffer) -> RhiResult<()>;
    fn cmd_transition_image(
        &mut self,
        cmd: Self::CommandBuffer,
        image_index: u32,
        from: ImageState,
        to: ImageState,
    ) -> RhiResult<()>;
    /// Binds the swapchain image (and the depth target, if any) and clears them.
    fn cmd_begin_pass(
        &mut self,
        cmd: Self::CommandBuffer,
        image_index: u32,
        clear: &ClearValues,
    ) -> RhiResult<()>;
    fn cmd_bind_pipeline(
        &mut self,
        cmd: Self::CommandBuffer,
        pipeline: Self::Pipeline,
    ) -> RhiResult<()>;
    fn cmd_bind_mesh(
        &mut self,
        cmd: Self::CommandBuffer,
        mesh: &MeshBinding<Self::Buffer>,
    ) -> RhiResult<()>;
    /// Binds the `index`-th set of `sets`.
    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: Self::CommandBuffer,
        pipeline: Self::Pipeline,
        sets: Self::DescriptorSets,
        index: u32,
    ) -> RhiResult<()>;
    fn cmd_draw(&mut self, cmd: Self::CommandBuffer, draw: DrawCall) -> RhiResult<()>;
    fn cmd_end_pass(&mut self, cmd: Self::CommandBuffer) -> RhiResult<()>;

    // ---------------------------------------------------------------------
    // Queue
    // ---------------------------------------------------------------------

    /// Acquires the next swapchain image. May block.
    fn acquire_next_image(&mut self, semaphore: Self::Semaphore) -> RhiResult<AcquireResult>;
    fn submit(
        &mut self,
        desc: &SubmitDesc<'_, Self::CommandBuffer, Self::Fence, Self::Semaphore>,
    ) -> RhiResult<()>;
    fn present(
        &mut self,
        image_index: u32,
        wait_semaphores: &[Self::Semaphore],
    ) -> RhiResult<PresentResult>;
}
