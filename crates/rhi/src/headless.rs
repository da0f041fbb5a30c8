//! A CPU simulation of a GPU queue and presentation engine.
//!
//! [`HeadlessBackend`] implements [`GpuBackend`] without touching any driver.
//! It keeps enough state to reject the mistakes a real device would punish:
//!
//! * recording into or resetting a command buffer that is still executing,
//! * writing a uniform buffer that an executing submission reads,
//! * attaching a fence that is not unsignaled, or resetting a pending fence,
//! * waiting on a semaphore that has no pending signal,
//! * waiting on a fence that nothing will ever signal,
//! * presenting an image that was not acquired.
//!
//! Submissions execute in order. By default they never finish on their own:
//! a submission retires only when a fence wait (or [`GpuBackend::wait_idle`])
//! forces it, which models a GPU that is always slower than the CPU. With
//! [`HeadlessBackend::with_retire_after`] a submission also retires once `n`
//! later submissions have been queued.
//!
//! Every call is appended to an event log ([`BackendEvent`]) so tests can
//! assert on the exact sequence the frame loop produced. Long runs turn the
//! log off with [`HeadlessBackend::with_event_log`].
//!
//! # Example
//!
//! ```
//! use frameloop_rhi::backend::{GpuBackend, SwapchainDesc, Extent2D};
//! use frameloop_rhi::headless::HeadlessBackend;
//!
//! let mut gpu = HeadlessBackend::new().with_image_count(3);
//! let info = gpu
//!     .create_swapchain(&SwapchainDesc {
//!         extent: Extent2D::new(640, 480),
//!         vsync: true,
//!         min_image_count: 2,
//!     })
//!     .unwrap();
//! assert_eq!(info.image_count, 3);
//! gpu.destroy_swapchain();
//! assert_eq!(gpu.live_objects(), 0);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use tracing::{debug, trace, warn};

use crate::backend::{
    AcquireResult, BufferUsage, ClearValues, DrawCall, Extent2D, FenceStatus, GpuBackend,
    ImageState, MeshBinding, PipelineDesc, PresentResult, SlotHandles, SubmitDesc, SurfaceInfo,
    SwapchainDesc,
};
use crate::error::{RhiError, RhiResult};

macro_rules! headless_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            pub fn id(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

headless_handle!(
    /// Simulated command buffer.
    CommandBufferId,
    "Cmd"
);
headless_handle!(
    /// Simulated fence.
    FenceId,
    "Fence"
);
headless_handle!(
    /// Simulated binary semaphore.
    SemaphoreId,
    "Sem"
);
headless_handle!(
    /// Simulated buffer.
    BufferId,
    "Buf"
);
headless_handle!(
    /// Simulated pipeline.
    PipelineId,
    "Pipe"
);
headless_handle!(
    /// Simulated group of per-slot descriptor sets.
    DescriptorSetsId,
    "Desc"
);

/// A creation step that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateSwapchain,
    CreateDepthTarget,
    CreatePipeline,
    UploadStaticBuffer,
    CreateUniformBuffer,
    AllocateCommandSlots,
    CreateDescriptorSets,
    AcquireImage,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Acquire {
        image_index: u32,
        semaphore: SemaphoreId,
    },
    AcquireOutOfDate,
    FenceWait {
        fence: FenceId,
    },
    FenceReset {
        fence: FenceId,
    },
    UniformWrite {
        buffer: BufferId,
        data: Vec<u8>,
    },
    UploadFlush {
        semaphore: SemaphoreId,
        buffers: usize,
    },
    CommandReset {
        command_buffer: CommandBufferId,
    },
    CommandBegin {
        command_buffer: CommandBufferId,
    },
    Transition {
        command_buffer: CommandBufferId,
        image_index: u32,
        from: ImageState,
        to: ImageState,
    },
    BeginPass {
        command_buffer: CommandBufferId,
        image_index: u32,
        clear: ClearValues,
        depth: bool,
    },
    BindPipeline {
        command_buffer: CommandBufferId,
        pipeline: PipelineId,
    },
    BindMesh {
        command_buffer: CommandBufferId,
        vertex_buffer: BufferId,
        index_buffer: Option<BufferId>,
    },
    BindDescriptorSet {
        command_buffer: CommandBufferId,
        sets: DescriptorSetsId,
        index: u32,
    },
    Draw {
        command_buffer: CommandBufferId,
        draw: DrawCall,
    },
    EndPass {
        command_buffer: CommandBufferId,
    },
    CommandEnd {
        command_buffer: CommandBufferId,
    },
    Submit {
        serial: u64,
        command_buffer: CommandBufferId,
        wait_semaphores: Vec<SemaphoreId>,
        signal_semaphores: Vec<SemaphoreId>,
        fence: Option<FenceId>,
        uniform_reads: Vec<BufferId>,
    },
    Retire {
        serial: u64,
        fence: Option<FenceId>,
    },
    Present {
        image_index: u32,
        wait_semaphores: Vec<SemaphoreId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    Initial,
    Recording,
    Executable,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending(u64),
    Signaled,
}

#[derive(Debug)]
struct CommandBufferState {
    state: CommandState,
    in_pass: bool,
    uniform_reads: Vec<BufferId>,
}

#[derive(Debug)]
struct BufferState {
    usage: BufferUsage,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Submission {
    serial: u64,
    command_buffer: CommandBufferId,
    fence: Option<FenceId>,
    uniform_reads: Vec<BufferId>,
}

#[derive(Debug, Default)]
struct EventLog {
    disabled: bool,
    events: Vec<BackendEvent>,
}

impl EventLog {
    #[inline]
    fn push(&mut self, event: BackendEvent) {
        if !self.disabled {
            self.events.push(event);
        }
    }
}

#[derive(Debug)]
struct SimulatedSwapchain {
    extent: Extent2D,
    image_count: u32,
    next_image: u32,
    held: Vec<bool>,
}

/// Deterministic CPU stand-in for a GPU device.
#[derive(Debug)]
pub struct HeadlessBackend {
    image_count: u32,
    retire_after: Option<u64>,
    next_id: u32,

    swapchain: Option<SimulatedSwapchain>,
    depth_target: bool,
    command_buffers: HashMap<CommandBufferId, CommandBufferState>,
    fences: HashMap<FenceId, FenceState>,
    /// Semaphore to "has a pending signal".
    semaphores: HashMap<SemaphoreId, bool>,
    upload_semaphores: Vec<SemaphoreId>,
    buffers: HashMap<BufferId, BufferState>,
    pipelines: HashMap<PipelineId, String>,
    descriptor_sets: HashMap<DescriptorSetsId, Vec<BufferId>>,

    pending_uploads: usize,
    in_flight: VecDeque<Submission>,
    submitted: u64,
    max_in_flight: usize,

    fail_points: HashSet<FailPoint>,
    out_of_date_acquires: u32,
    suboptimal_acquires: u32,
    present_results: VecDeque<PresentResult>,
    events: EventLog,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    /// Creates a backend with three swapchain images and submissions that
    /// only finish when waited on.
    pub fn new() -> Self {
        Self {
            image_count: 3,
            retire_after: None,
            next_id: 0,
            swapchain: None,
            depth_target: false,
            command_buffers: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            upload_semaphores: Vec::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            descriptor_sets: HashMap::new(),
            pending_uploads: 0,
            in_flight: VecDeque::new(),
            submitted: 0,
            max_in_flight: 0,
            fail_points: HashSet::new(),
            out_of_date_acquires: 0,
            suboptimal_acquires: 0,
            present_results: VecDeque::new(),
            events: EventLog::default(),
        }
    }

    /// Sets the number of presentable images the swapchain reports.
    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = image_count.max(1);
        self
    }

    /// Lets a submission finish on its own once `n` later submissions have
    /// been queued. `0` finishes every submission immediately.
    pub fn with_retire_after(mut self, n: u64) -> Self {
        self.retire_after = Some(n);
        self
    }

    /// Turns the event log on or off. Counters such as
    /// [`Self::submission_count`] are kept either way.
    pub fn with_event_log(mut self, enabled: bool) -> Self {
        self.events.disabled = !enabled;
        self
    }

    /// Makes the given creation step fail until [`Self::clear_failures`].
    pub fn fail_at(&mut self, point: FailPoint) {
        self.fail_points.insert(point);
    }

    pub fn clear_failures(&mut self) {
        self.fail_points.clear();
    }

    /// Makes the next `count` acquisitions report [`AcquireResult::OutOfDate`].
    pub fn report_out_of_date(&mut self, count: u32) {
        self.out_of_date_acquires = count;
    }

    /// Makes the next `count` successful acquisitions report a suboptimal
    /// swapchain.
    pub fn report_suboptimal(&mut self, count: u32) {
        self.suboptimal_acquires = count;
    }

    /// Queues the results the next presents report, one per present. Once the
    /// queue is empty presents report [`PresentResult::Presented`]. The image
    /// is released and the wait semaphores consumed whatever the result.
    pub fn report_present_results(&mut self, results: impl IntoIterator<Item = PresentResult>) {
        self.present_results.extend(results);
    }

    /// All events recorded so far.
    #[inline]
    pub fn events(&self) -> &[BackendEvent] {
        &self.events.events
    }

    /// Returns and clears the event log.
    pub fn take_events(&mut self) -> Vec<BackendEvent> {
        std::mem::take(&mut self.events.events)
    }

    /// Number of submissions queued so far.
    #[inline]
    pub fn submission_count(&self) -> u64 {
        self.submitted
    }

    /// Submissions that have not yet retired.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Highest number of simultaneously executing submissions observed.
    #[inline]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    pub fn surface_extent(&self) -> Option<Extent2D> {
        self.swapchain.as_ref().map(|s| s.extent)
    }

    pub fn has_depth_target(&self) -> bool {
        self.depth_target
    }

    /// Objects created through the public API and not yet destroyed.
    pub fn live_objects(&self) -> usize {
        let user_semaphores = self
            .semaphores
            .len()
            .saturating_sub(self.upload_semaphores.len());
        usize::from(self.swapchain.is_some())
            + usize::from(self.depth_target)
            + self.command_buffers.len()
            + self.fences.len()
            + user_semaphores
            + self.buffers.len()
            + self.pipelines.len()
            + self.descriptor_sets.len()
    }

    fn next_raw_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_fail(&self, point: FailPoint) -> RhiResult<()> {
        if self.fail_points.contains(&point) {
            debug!("Injected failure at {:?}", point);
            return Err(RhiError::Injected(format!("{:?}", point)));
        }
        Ok(())
    }

    fn recording(&mut self, cmd: CommandBufferId) -> RhiResult<&mut CommandBufferState> {
        let state = self
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", cmd)))?;
        if state.state != CommandState::Recording {
            return Err(RhiError::InvalidOperation(format!(
                "{:?} is not recording ({:?})",
                cmd, state.state
            )));
        }
        Ok(state)
    }

    fn check_image(&self, image_index: u32) -> RhiResult<()> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| RhiError::InvalidOperation("no swapchain".into()))?;
        if image_index >= swapchain.image_count {
            return Err(RhiError::InvalidHandle(format!(
                "swapchain image {}",
                image_index
            )));
        }
        Ok(())
    }

    fn consume_signal(&mut self, semaphore: SemaphoreId) -> RhiResult<()> {
        match self.semaphores.get_mut(&semaphore) {
            Some(pending) if *pending => {
                *pending = false;
                Ok(())
            }
            Some(_) => Err(RhiError::InvalidOperation(format!(
                "wait on {:?} which has no pending signal",
                semaphore
            ))),
            None => Err(RhiError::InvalidHandle(format!("{:?}", semaphore))),
        }
    }

    fn add_signal(&mut self, semaphore: SemaphoreId) -> RhiResult<()> {
        match self.semaphores.get_mut(&semaphore) {
            Some(pending) if !*pending => {
                *pending = true;
                Ok(())
            }
            Some(_) => Err(RhiError::InvalidOperation(format!(
                "{:?} already has a pending signal",
                semaphore
            ))),
            None => Err(RhiError::InvalidHandle(format!("{:?}", semaphore))),
        }
    }

    /// Retires every submission up to and including `serial`.
    fn retire_through(&mut self, serial: u64) {
        while self.in_flight.front().is_some_and(|s| s.serial <= serial) {
            let Some(done) = self.in_flight.pop_front() else {
                break;
            };
            if let Some(cmd) = self.command_buffers.get_mut(&done.command_buffer) {
                cmd.state = CommandState::Executable;
            }
            if let Some(fence) = done.fence
                && let Some(state) = self.fences.get_mut(&fence)
            {
                *state = FenceState::Signaled;
            }
            trace!("Submission {} retired", done.serial);
            self.events.push(BackendEvent::Retire {
                serial: done.serial,
                fence: done.fence,
            });
        }
    }

    /// Retires whatever the configured GPU speed would have finished by now.
    fn advance_gpu(&mut self) {
        let Some(lag) = self.retire_after else {
            return;
        };
        if let Some(front) = self.in_flight.front()
            && self.submitted > front.serial + lag
        {
            let last_done = self.submitted - lag - 1;
            self.retire_through(last_done);
        }
    }

    fn reclaim_upload_semaphores(&mut self) {
        let semaphores = &mut self.semaphores;
        self.upload_semaphores.retain(|s| {
            let keep = semaphores.get(s).copied().unwrap_or(false);
            if !keep {
                semaphores.remove(s);
            }
            keep
        });
    }
}

impl GpuBackend for HeadlessBackend {
    type CommandBuffer = CommandBufferId;
    type Fence = FenceId;
    type Semaphore = SemaphoreId;
    type Buffer = BufferId;
    type Pipeline = PipelineId;
    type DescriptorSets = DescriptorSetsId;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> RhiResult<SurfaceInfo> {
        self.check_fail(FailPoint::CreateSwapchain)?;
        if self.swapchain.is_some() {
            return Err(RhiError::SwapchainError("swapchain already exists".into()));
        }
        if desc.extent.is_empty() {
            return Err(RhiError::SwapchainError(format!(
                "surface extent is {}x{}",
                desc.extent.width, desc.extent.height
            )));
        }
        let image_count = self.image_count.max(desc.min_image_count);
        self.swapchain = Some(SimulatedSwapchain {
            extent: desc.extent,
            image_count,
            next_image: 0,
            held: vec![false; image_count as usize],
        });
        debug!(
            "Headless swapchain created: {}x{}, {} images",
            desc.extent.width, desc.extent.height, image_count
        );
        Ok(SurfaceInfo {
            extent: desc.extent,
            image_count,
        })
    }

    fn destroy_swapchain(&mut self) {
        if self.swapchain.take().is_some() {
            debug!("Headless swapchain destroyed");
        }
    }

    fn create_depth_target(&mut self) -> RhiResult<()> {
        self.check_fail(FailPoint::CreateDepthTarget)?;
        if self.swapchain.is_none() {
            return Err(RhiError::SwapchainError(
                "depth target needs a swapchain extent".into(),
            ));
        }
        self.depth_target = true;
        Ok(())
    }

    fn destroy_depth_target(&mut self) {
        self.depth_target = false;
    }

    fn allocate_command_slots(
        &mut self,
        count: usize,
    ) -> RhiResult<Vec<SlotHandles<CommandBufferId, FenceId, SemaphoreId>>> {
        self.check_fail(FailPoint::AllocateCommandSlots)?;
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let command_buffer = CommandBufferId(self.next_raw_id());
            let fence = FenceId(self.next_raw_id());
            let semaphore = SemaphoreId(self.next_raw_id());
            self.command_buffers.insert(
                command_buffer,
                CommandBufferState {
                    state: CommandState::Initial,
                    in_pass: false,
                    uniform_reads: Vec::new(),
                },
            );
            self.fences.insert(fence, FenceState::Unsignaled);
            self.semaphores.insert(semaphore, false);
            slots.push(SlotHandles {
                command_buffer,
                fence,
                semaphore,
            });
        }
        Ok(slots)
    }

    fn release_command_slots(
        &mut self,
        slots: &[SlotHandles<CommandBufferId, FenceId, SemaphoreId>],
    ) {
        for slot in slots {
            if self
                .command_buffers
                .get(&slot.command_buffer)
                .is_some_and(|c| c.state == CommandState::Pending)
            {
                warn!("{:?} released while executing", slot.command_buffer);
            }
            self.command_buffers.remove(&slot.command_buffer);
            self.fences.remove(&slot.fence);
            self.semaphores.remove(&slot.semaphore);
        }
    }

    fn create_semaphore(&mut self) -> RhiResult<SemaphoreId> {
        let semaphore = SemaphoreId(self.next_raw_id());
        self.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreId) {
        self.semaphores.remove(&semaphore);
        self.upload_semaphores.retain(|&s| s != semaphore);
    }

    fn fence_status(&mut self, fence: FenceId) -> RhiResult<FenceStatus> {
        self.advance_gpu();
        match self.fences.get(&fence) {
            Some(FenceState::Signaled) => Ok(FenceStatus::Signaled),
            Some(_) => Ok(FenceStatus::Unsignaled),
            None => Err(RhiError::InvalidHandle(format!("{:?}", fence))),
        }
    }

    fn wait_for_fence(&mut self, fence: FenceId) -> RhiResult<()> {
        self.events.push(BackendEvent::FenceWait { fence });
        match self.fences.get(&fence).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending(serial)) => {
                self.retire_through(serial);
                Ok(())
            }
            Some(FenceState::Unsignaled) => Err(RhiError::InvalidOperation(format!(
                "wait on {:?} which no submission will signal",
                fence
            ))),
            None => Err(RhiError::InvalidHandle(format!("{:?}", fence))),
        }
    }

    fn reset_fence(&mut self, fence: FenceId) -> RhiResult<()> {
        let state = self
            .fences
            .get_mut(&fence)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", fence)))?;
        if let FenceState::Pending(_) = state {
            return Err(RhiError::InvalidOperation(format!(
                "reset of {:?} while its submission executes",
                fence
            )));
        }
        *state = FenceState::Unsignaled;
        self.events.push(BackendEvent::FenceReset { fence });
        Ok(())
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        if let Some(last) = self.in_flight.back().map(|s| s.serial) {
            self.retire_through(last);
        }
        self.reclaim_upload_semaphores();
        Ok(())
    }

    fn create_uniform_buffer(&mut self, size: u64) -> RhiResult<BufferId> {
        self.check_fail(FailPoint::CreateUniformBuffer)?;
        if size == 0 {
            return Err(RhiError::InvalidOperation(
                "buffer size must be greater than 0".into(),
            ));
        }
        let buffer = BufferId(self.next_raw_id());
        self.buffers.insert(
            buffer,
            BufferState {
                usage: BufferUsage::Uniform,
                data: vec![0; size as usize],
            },
        );
        Ok(buffer)
    }

    fn update_mapped_buffer(&mut self, buffer: BufferId, data: &[u8]) -> RhiResult<()> {
        if self
            .in_flight
            .iter()
            .any(|s| s.uniform_reads.contains(&buffer))
        {
            return Err(RhiError::InvalidOperation(format!(
                "{:?} written while an executing submission reads it",
                buffer
            )));
        }
        let state = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", buffer)))?;
        if state.usage != BufferUsage::Uniform {
            return Err(RhiError::InvalidOperation(format!(
                "{:?} is a {} buffer and is not host mapped",
                buffer,
                state.usage.name()
            )));
        }
        if data.len() > state.data.len() {
            return Err(RhiError::InvalidOperation(format!(
                "write of {} bytes into {} byte buffer",
                data.len(),
                state.data.len()
            )));
        }
        state.data[..data.len()].copy_from_slice(data);
        self.events.push(BackendEvent::UniformWrite {
            buffer,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn upload_static_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> RhiResult<BufferId> {
        self.check_fail(FailPoint::UploadStaticBuffer)?;
        if data.is_empty() {
            return Err(RhiError::InvalidOperation(
                "static buffer upload with no data".into(),
            ));
        }
        let buffer = BufferId(self.next_raw_id());
        self.buffers.insert(
            buffer,
            BufferState {
                usage,
                data: data.to_vec(),
            },
        );
        self.pending_uploads += 1;
        Ok(buffer)
    }

    fn flush_resource_updates(&mut self) -> RhiResult<Option<SemaphoreId>> {
        if self.pending_uploads == 0 {
            return Ok(None);
        }
        let semaphore = SemaphoreId(self.next_raw_id());
        self.semaphores.insert(semaphore, true);
        self.upload_semaphores.push(semaphore);
        self.events.push(BackendEvent::UploadFlush {
            semaphore,
            buffers: self.pending_uploads,
        });
        self.pending_uploads = 0;
        Ok(Some(semaphore))
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self
            .in_flight
            .iter()
            .any(|s| s.uniform_reads.contains(&buffer))
        {
            warn!("{:?} destroyed while in use", buffer);
        }
        self.buffers.remove(&buffer);
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> RhiResult<PipelineId> {
        self.check_fail(FailPoint::CreatePipeline)?;
        if desc.vertex_shader.trim().is_empty() || desc.fragment_shader.trim().is_empty() {
            return Err(RhiError::ShaderError(format!(
                "pipeline '{}' has an empty shader stage",
                desc.label
            )));
        }
        if desc.depth.is_some() && !self.depth_target {
            return Err(RhiError::PipelineError(format!(
                "pipeline '{}' tests depth but no depth target exists",
                desc.label
            )));
        }
        let pipeline = PipelineId(self.next_raw_id());
        self.pipelines.insert(pipeline, desc.label.to_owned());
        Ok(pipeline)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.pipelines.remove(&pipeline);
    }

    fn create_descriptor_sets(
        &mut self,
        pipeline: PipelineId,
        uniform_buffers: &[BufferId],
    ) -> RhiResult<DescriptorSetsId> {
        self.check_fail(FailPoint::CreateDescriptorSets)?;
        if !self.pipelines.contains_key(&pipeline) {
            return Err(RhiError::InvalidHandle(format!("{:?}", pipeline)));
        }
        if let Some(missing) = uniform_buffers
            .iter()
            .find(|b| !self.buffers.contains_key(b))
        {
            return Err(RhiError::InvalidHandle(format!("{:?}", missing)));
        }
        let sets = DescriptorSetsId(self.next_raw_id());
        self.descriptor_sets.insert(sets, uniform_buffers.to_vec());
        Ok(sets)
    }

    fn destroy_descriptor_sets(&mut self, sets: DescriptorSetsId) {
        self.descriptor_sets.remove(&sets);
    }

    fn reset_command_buffer(&mut self, cmd: CommandBufferId) -> RhiResult<()> {
        let state = self
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", cmd)))?;
        if state.state == CommandState::Pending {
            return Err(RhiError::InvalidOperation(format!(
                "reset of {:?} while it executes",
                cmd
            )));
        }
        state.state = CommandState::Initial;
        state.in_pass = false;
        state.uniform_reads.clear();
        self.events.push(BackendEvent::CommandReset {
            command_buffer: cmd,
        });
        Ok(())
    }

    fn begin_commands(&mut self, cmd: CommandBufferId) -> RhiResult<()> {
        let state = self
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", cmd)))?;
        if state.state != CommandState::Initial {
            return Err(RhiError::InvalidOperation(format!(
                "begin on {:?} in state {:?}",
                cmd, state.state
            )));
        }
        state.state = CommandState::Recording;
        self.events.push(BackendEvent::CommandBegin {
            command_buffer: cmd,
        });
        Ok(())
    }

    fn end_commands(&mut self, cmd: CommandBufferId) -> RhiResult<()> {
        let state = self.recording(cmd)?;
        if state.in_pass {
            return Err(RhiError::InvalidOperation(format!(
                "{:?} ended inside a pass",
                cmd
            )));
        }
        state.state = CommandState::Executable;
        self.events.push(BackendEvent::CommandEnd {
            command_buffer: cmd,
        });
        Ok(())
    }

    fn cmd_transition_image(
        &mut self,
        cmd: CommandBufferId,
        image_index: u32,
        from: ImageState,
        to: ImageState,
    ) -> RhiResult<()> {
        self.check_image(image_index)?;
        self.recording(cmd)?;
        self.events.push(BackendEvent::Transition {
            command_buffer: cmd,
            image_index,
            from,
            to,
        });
        Ok(())
    }

    fn cmd_begin_pass(
        &mut self,
        cmd: CommandBufferId,
        image_index: u32,
        clear: &ClearValues,
    ) -> RhiResult<()> {
        self.check_image(image_index)?;
        let depth = self.depth_target;
        let state = self.recording(cmd)?;
        if state.in_pass {
            return Err(RhiError::InvalidOperation("nested pass".into()));
        }
        state.in_pass = true;
        self.events.push(BackendEvent::BeginPass {
            command_buffer: cmd,
            image_index,
            clear: *clear,
            depth,
        });
        Ok(())
    }

    fn cmd_bind_pipeline(&mut self, cmd: CommandBufferId, pipeline: PipelineId) -> RhiResult<()> {
        if !self.pipelines.contains_key(&pipeline) {
            return Err(RhiError::InvalidHandle(format!("{:?}", pipeline)));
        }
        self.recording(cmd)?;
        self.events.push(BackendEvent::BindPipeline {
            command_buffer: cmd,
            pipeline,
        });
        Ok(())
    }

    fn cmd_bind_mesh(
        &mut self,
        cmd: CommandBufferId,
        mesh: &MeshBinding<BufferId>,
    ) -> RhiResult<()> {
        let index_buffer = mesh.index_buffer.map(|(buffer, _)| buffer);
        for buffer in std::iter::once(mesh.vertex_buffer).chain(index_buffer) {
            if !self.buffers.contains_key(&buffer) {
                return Err(RhiError::InvalidHandle(format!("{:?}", buffer)));
            }
        }
        self.recording(cmd)?;
        self.events.push(BackendEvent::BindMesh {
            command_buffer: cmd,
            vertex_buffer: mesh.vertex_buffer,
            index_buffer,
        });
        Ok(())
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferId,
        pipeline: PipelineId,
        sets: DescriptorSetsId,
        index: u32,
    ) -> RhiResult<()> {
        if !self.pipelines.contains_key(&pipeline) {
            return Err(RhiError::InvalidHandle(format!("{:?}", pipeline)));
        }
        let buffer = self
            .descriptor_sets
            .get(&sets)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", sets)))?
            .get(index as usize)
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}[{}]", sets, index)))?;
        self.recording(cmd)?.uniform_reads.push(buffer);
        self.events.push(BackendEvent::BindDescriptorSet {
            command_buffer: cmd,
            sets,
            index,
        });
        Ok(())
    }

    fn cmd_draw(&mut self, cmd: CommandBufferId, draw: DrawCall) -> RhiResult<()> {
        if !self.recording(cmd)?.in_pass {
            return Err(RhiError::InvalidOperation("draw outside a pass".into()));
        }
        self.events.push(BackendEvent::Draw {
            command_buffer: cmd,
            draw,
        });
        Ok(())
    }

    fn cmd_end_pass(&mut self, cmd: CommandBufferId) -> RhiResult<()> {
        let state = self.recording(cmd)?;
        if !state.in_pass {
            return Err(RhiError::InvalidOperation("end of pass never begun".into()));
        }
        state.in_pass = false;
        self.events.push(BackendEvent::EndPass {
            command_buffer: cmd,
        });
        Ok(())
    }

    fn acquire_next_image(&mut self, semaphore: SemaphoreId) -> RhiResult<AcquireResult> {
        self.check_fail(FailPoint::AcquireImage)?;
        self.advance_gpu();
        if self.out_of_date_acquires > 0 {
            self.out_of_date_acquires -= 1;
            self.events.push(BackendEvent::AcquireOutOfDate);
            return Ok(AcquireResult::OutOfDate);
        }
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| RhiError::InvalidOperation("acquire without a swapchain".into()))?;
        let image_index = swapchain.next_image;
        if swapchain.held[image_index as usize] {
            return Err(RhiError::InvalidOperation(format!(
                "image {} acquired again before it was presented",
                image_index
            )));
        }
        swapchain.held[image_index as usize] = true;
        swapchain.next_image = (image_index + 1) % swapchain.image_count;
        self.add_signal(semaphore)?;
        self.events.push(BackendEvent::Acquire {
            image_index,
            semaphore,
        });
        let suboptimal = self.suboptimal_acquires > 0;
        self.suboptimal_acquires = self.suboptimal_acquires.saturating_sub(1);
        Ok(AcquireResult::Acquired {
            image_index,
            suboptimal,
        })
    }

    fn submit(
        &mut self,
        desc: &SubmitDesc<'_, CommandBufferId, FenceId, SemaphoreId>,
    ) -> RhiResult<()> {
        let cmd = desc.command_buffer;
        let cmd_state = self
            .command_buffers
            .get(&cmd)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", cmd)))?;
        if cmd_state.state != CommandState::Executable {
            return Err(RhiError::InvalidOperation(format!(
                "submit of {:?} in state {:?}",
                cmd, cmd_state.state
            )));
        }
        if let Some(fence) = desc.signal_fence {
            match self.fences.get(&fence) {
                Some(FenceState::Unsignaled) => {}
                Some(state) => {
                    return Err(RhiError::InvalidOperation(format!(
                        "{:?} attached to a submission while {:?}",
                        fence, state
                    )));
                }
                None => return Err(RhiError::InvalidHandle(format!("{:?}", fence))),
            }
        }
        for &semaphore in desc.wait_semaphores {
            self.consume_signal(semaphore)?;
        }
        for &semaphore in desc.signal_semaphores {
            self.add_signal(semaphore)?;
        }

        let serial = self.submitted;
        self.submitted += 1;
        let uniform_reads = self
            .command_buffers
            .get_mut(&cmd)
            .map(|c| {
                c.state = CommandState::Pending;
                c.uniform_reads.clone()
            })
            .unwrap_or_default();
        if let Some(fence) = desc.signal_fence {
            self.fences.insert(fence, FenceState::Pending(serial));
        }
        self.events.push(BackendEvent::Submit {
            serial,
            command_buffer: cmd,
            wait_semaphores: desc.wait_semaphores.to_vec(),
            signal_semaphores: desc.signal_semaphores.to_vec(),
            fence: desc.signal_fence,
            uniform_reads: uniform_reads.clone(),
        });
        self.in_flight.push_back(Submission {
            serial,
            command_buffer: cmd,
            fence: desc.signal_fence,
            uniform_reads,
        });
        self.max_in_flight = self.max_in_flight.max(self.in_flight.len());
        self.advance_gpu();
        Ok(())
    }

    fn present(
        &mut self,
        image_index: u32,
        wait_semaphores: &[SemaphoreId],
    ) -> RhiResult<PresentResult> {
        self.check_image(image_index)?;
        let held = self
            .swapchain
            .as_ref()
            .is_some_and(|s| s.held[image_index as usize]);
        if !held {
            return Err(RhiError::InvalidOperation(format!(
                "present of image {} which was not acquired",
                image_index
            )));
        }
        for &semaphore in wait_semaphores {
            self.consume_signal(semaphore)?;
        }
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.held[image_index as usize] = false;
        }
        self.events.push(BackendEvent::Present {
            image_index,
            wait_semaphores: wait_semaphores.to_vec(),
        });
        Ok(self
            .present_results
            .pop_front()
            .unwrap_or(PresentResult::Presented))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_with_swapchain() -> HeadlessBackend {
        let mut gpu = HeadlessBackend::new();
        gpu.create_swapchain(&SwapchainDesc {
            extent: Extent2D::new(320, 240),
            vsync: true,
            min_image_count: 2,
        })
        .unwrap();
        gpu
    }

    fn record_empty(gpu: &mut HeadlessBackend, cmd: CommandBufferId) {
        gpu.reset_command_buffer(cmd).unwrap();
        gpu.begin_commands(cmd).unwrap();
        gpu.end_commands(cmd).unwrap();
    }

    #[test]
    fn test_fence_pending_until_waited() {
        let mut gpu = backend_with_swapchain();
        let slot = gpu.allocate_command_slots(1).unwrap()[0];
        record_empty(&mut gpu, slot.command_buffer);
        gpu.submit(&SubmitDesc {
            command_buffer: slot.command_buffer,
            wait_semaphores: &[],
            signal_semaphores: &[],
            signal_fence: Some(slot.fence),
        })
        .unwrap();

        assert_eq!(gpu.fence_status(slot.fence).unwrap(), FenceStatus::Unsignaled);
        assert!(gpu.reset_fence(slot.fence).is_err());
        gpu.wait_for_fence(slot.fence).unwrap();
        assert_eq!(gpu.fence_status(slot.fence).unwrap(), FenceStatus::Signaled);
        gpu.reset_fence(slot.fence).unwrap();
        assert_eq!(gpu.in_flight(), 0);
    }

    #[test]
    fn test_wait_on_unsubmitted_fence_is_rejected() {
        let mut gpu = HeadlessBackend::new();
        let slot = gpu.allocate_command_slots(1).unwrap()[0];
        assert!(matches!(
            gpu.wait_for_fence(slot.fence),
            Err(RhiError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_reset_of_executing_command_buffer_is_rejected() {
        let mut gpu = HeadlessBackend::new();
        let slot = gpu.allocate_command_slots(1).unwrap()[0];
        record_empty(&mut gpu, slot.command_buffer);
        gpu.submit(&SubmitDesc {
            command_buffer: slot.command_buffer,
            wait_semaphores: &[],
            signal_semaphores: &[],
            signal_fence: Some(slot.fence),
        })
        .unwrap();
        assert!(gpu.reset_command_buffer(slot.command_buffer).is_err());
        gpu.wait_for_fence(slot.fence).unwrap();
        gpu.reset_command_buffer(slot.command_buffer).unwrap();
    }

    #[test]
    fn test_retire_after_lag() {
        let mut gpu = HeadlessBackend::new().with_retire_after(1);
        let slots = gpu.allocate_command_slots(2).unwrap();
        for slot in &slots {
            record_empty(&mut gpu, slot.command_buffer);
            gpu.submit(&SubmitDesc {
                command_buffer: slot.command_buffer,
                wait_semaphores: &[],
                signal_semaphores: &[],
                signal_fence: Some(slot.fence),
            })
            .unwrap();
        }
        assert_eq!(gpu.fence_status(slots[0].fence).unwrap(), FenceStatus::Signaled);
        assert_eq!(gpu.fence_status(slots[1].fence).unwrap(), FenceStatus::Unsignaled);
    }

    #[test]
    fn test_semaphore_wait_requires_signal() {
        let mut gpu = HeadlessBackend::new();
        let slot = gpu.allocate_command_slots(1).unwrap()[0];
        let unsignaled = gpu.create_semaphore().unwrap();
        record_empty(&mut gpu, slot.command_buffer);
        let result = gpu.submit(&SubmitDesc {
            command_buffer: slot.command_buffer,
            wait_semaphores: &[unsignaled],
            signal_semaphores: &[],
            signal_fence: None,
        });
        assert!(matches!(result, Err(RhiError::InvalidOperation(_))));
    }

    #[test]
    fn test_acquire_rotates_and_present_releases() {
        let mut gpu = backend_with_swapchain();
        let a = gpu.create_semaphore().unwrap();
        let b = gpu.create_semaphore().unwrap();
        let first = gpu.acquire_next_image(a).unwrap();
        assert_eq!(
            first,
            AcquireResult::Acquired {
                image_index: 0,
                suboptimal: false
            }
        );
        assert!(gpu.present(1, &[]).is_err());
        assert_eq!(gpu.present(0, &[a]).unwrap(), PresentResult::Presented);
        assert!(matches!(
            gpu.acquire_next_image(b).unwrap(),
            AcquireResult::Acquired { image_index: 1, .. }
        ));
    }

    #[test]
    fn test_uniform_write_while_read_is_rejected() {
        let mut gpu = backend_with_swapchain();
        let slot = gpu.allocate_command_slots(1).unwrap()[0];
        let ubo = gpu.create_uniform_buffer(16).unwrap();
        let pipeline = gpu
            .create_pipeline(&PipelineDesc {
                label: "test",
                vertex_shader: "void main() {}",
                fragment_shader: "void main() {}",
                vertex_layout: crate::backend::VertexLayout {
                    stride: 12,
                    attributes: &[],
                },
                cull_mode: Default::default(),
                depth: None,
                uniform_size: 16,
            })
            .unwrap();
        let sets = gpu.create_descriptor_sets(pipeline, &[ubo]).unwrap();

        gpu.reset_command_buffer(slot.command_buffer).unwrap();
        gpu.begin_commands(slot.command_buffer).unwrap();
        gpu.cmd_bind_descriptor_set(slot.command_buffer, pipeline, sets, 0)
            .unwrap();
        gpu.end_commands(slot.command_buffer).unwrap();
        gpu.submit(&SubmitDesc {
            command_buffer: slot.command_buffer,
            wait_semaphores: &[],
            signal_semaphores: &[],
            signal_fence: Some(slot.fence),
        })
        .unwrap();

        assert!(gpu.update_mapped_buffer(ubo, &[1; 16]).is_err());
        gpu.wait_for_fence(slot.fence).unwrap();
        gpu.update_mapped_buffer(ubo, &[1; 16]).unwrap();
        assert_eq!(gpu.buffer_contents(ubo).unwrap(), &[1; 16]);
    }

    #[test]
    fn test_upload_flush_once() {
        let mut gpu = HeadlessBackend::new();
        gpu.upload_static_buffer(BufferUsage::Vertex, &[0; 36])
            .unwrap();
        let semaphore = gpu.flush_resource_updates().unwrap();
        assert!(semaphore.is_some());
        assert!(gpu.flush_resource_updates().unwrap().is_none());
        assert_eq!(gpu.live_objects(), 1);
    }

    #[test]
    fn test_upload_semaphore_outlives_idle_until_waited() {
        let mut gpu = HeadlessBackend::new();
        let slot = gpu.allocate_command_slots(1).unwrap()[0];
        gpu.upload_static_buffer(BufferUsage::Vertex, &[0; 36])
            .unwrap();
        let upload = gpu.flush_resource_updates().unwrap().unwrap();

        // Nothing has waited on the semaphore yet, so idling keeps it.
        gpu.wait_idle().unwrap();
        record_empty(&mut gpu, slot.command_buffer);
        gpu.submit(&SubmitDesc {
            command_buffer: slot.command_buffer,
            wait_semaphores: &[upload],
            signal_semaphores: &[],
            signal_fence: Some(slot.fence),
        })
        .unwrap();

        // Consumed and idle: the semaphore is gone and cannot be waited again.
        gpu.wait_idle().unwrap();
        gpu.reset_fence(slot.fence).unwrap();
        record_empty(&mut gpu, slot.command_buffer);
        let result = gpu.submit(&SubmitDesc {
            command_buffer: slot.command_buffer,
            wait_semaphores: &[upload],
            signal_semaphores: &[],
            signal_fence: Some(slot.fence),
        });
        assert!(matches!(result, Err(RhiError::InvalidHandle(_))));
    }

    #[test]
    fn test_destroyed_upload_semaphore_is_not_counted() {
        let mut gpu = HeadlessBackend::new();
        gpu.upload_static_buffer(BufferUsage::Index, &[0; 12])
            .unwrap();
        let upload = gpu.flush_resource_updates().unwrap().unwrap();
        gpu.destroy_semaphore(upload);
        let extra = gpu.create_semaphore().unwrap();
        // The uploaded buffer and the new semaphore.
        assert_eq!(gpu.live_objects(), 2);
        gpu.destroy_semaphore(extra);
        assert_eq!(gpu.live_objects(), 1);
    }

    #[test]
    fn test_queued_suboptimal_results() {
        let mut gpu = backend_with_swapchain();
        let a = gpu.create_semaphore().unwrap();
        gpu.report_suboptimal(1);
        gpu.report_present_results([PresentResult::OutOfDate]);

        assert_eq!(
            gpu.acquire_next_image(a).unwrap(),
            AcquireResult::Acquired {
                image_index: 0,
                suboptimal: true
            }
        );
        assert_eq!(gpu.present(0, &[a]).unwrap(), PresentResult::OutOfDate);

        // The image was released and the semaphore consumed all the same.
        assert!(matches!(
            gpu.acquire_next_image(a).unwrap(),
            AcquireResult::Acquired {
                image_index: 1,
                suboptimal: false
            }
        ));
        assert_eq!(gpu.present(1, &[a]).unwrap(), PresentResult::Presented);
    }

    #[test]
    fn test_event_log_can_be_disabled() {
        let mut gpu = HeadlessBackend::new().with_event_log(false);
        gpu.create_swapchain(&SwapchainDesc {
            extent: Extent2D::new(320, 240),
            vsync: true,
            min_image_count: 2,
        })
        .unwrap();
        let slot = gpu.allocate_command_slots(1).unwrap()[0];
        for _ in 0..100 {
            record_empty(&mut gpu, slot.command_buffer);
            gpu.submit(&SubmitDesc {
                command_buffer: slot.command_buffer,
                wait_semaphores: &[],
                signal_semaphores: &[],
                signal_fence: Some(slot.fence),
            })
            .unwrap();
            gpu.wait_for_fence(slot.fence).unwrap();
            gpu.reset_fence(slot.fence).unwrap();
        }
        assert!(gpu.events().is_empty());
        assert_eq!(gpu.submission_count(), 100);
    }

    #[test]
    fn test_injected_failure() {
        let mut gpu = HeadlessBackend::new();
        gpu.fail_at(FailPoint::CreateSwapchain);
        let desc = SwapchainDesc {
            extent: Extent2D::new(1, 1),
            vsync: false,
            min_image_count: 2,
        };
        assert!(matches!(
            gpu.create_swapchain(&desc),
            Err(RhiError::Injected(_))
        ));
        gpu.clear_failures();
        assert!(gpu.create_swapchain(&desc).is_ok());
    }

    #[test]
    fn test_handle_debug_format() {
        assert_eq!(format!("{:?}", FenceId(3)), "Fence#3");
        assert_eq!(format!("{:?}", SemaphoreId(0)), "Sem#0");
    }
}
