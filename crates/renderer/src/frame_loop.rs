//! The per-frame rendering loop.
//!
//! [`FrameLoop`] owns a ring of [`FrameSlot`]s and drives one frame per call
//! to [`FrameLoop::tick`]:
//!
//! 1. acquire a swapchain image
//! 2. select slot `frame_index % slot_count`
//! 3. if the slot was submitted before and its fence is not signaled, block
//!    on the fence; then reset it
//! 4. copy the frame's uniform payload into the slot's buffer
//! 5. re-record the slot's command buffer
//! 6. submit, waiting on the pending upload semaphore (first frame only) and
//!    the acquire semaphore, signaling the slot semaphore and fence
//! 7. present the acquired image after the slot semaphore
//! 8. advance the frame index
//!
//! At most `slot_count` submissions are ever outstanding, and a slot's
//! uniform buffer and command buffer are only touched after the GPU is done
//! with that slot's previous frame.
//!
//! # Example
//!
//! ```
//! use frameloop_renderer::frame_loop::{FrameLoop, FrameRecipe};
//! use frameloop_rhi::backend::*;
//! use frameloop_rhi::headless::HeadlessBackend;
//!
//! # fn main() -> frameloop_rhi::RhiResult<()> {
//! let mut gpu = HeadlessBackend::new();
//! gpu.create_swapchain(&SwapchainDesc {
//!     extent: Extent2D::new(640, 480),
//!     vsync: true,
//!     min_image_count: 2,
//! })?;
//! let pipeline = gpu.create_pipeline(&PipelineDesc {
//!     label: "example",
//!     vertex_shader: "void main() {}",
//!     fragment_shader: "void main() {}",
//!     vertex_layout: VertexLayout { stride: 12, attributes: &[] },
//!     cull_mode: CullMode::None,
//!     depth: None,
//!     uniform_size: 16,
//! })?;
//! let vertices = gpu.upload_static_buffer(BufferUsage::Vertex, &[0; 36])?;
//!
//! let mut frames = FrameLoop::new(&mut gpu, 2, 16)?;
//! frames.set_upload_wait(gpu.flush_resource_updates()?);
//! let sets = gpu.create_descriptor_sets(pipeline, &frames.uniform_buffers())?;
//! let recipe = FrameRecipe {
//!     pipeline,
//!     descriptor_sets: sets,
//!     mesh: MeshBinding { vertex_buffer: vertices, index_buffer: None },
//!     draw: DrawCall::Vertices { count: 3 },
//!     clear: ClearValues { color: [0.0, 0.0, 0.0, 1.0], depth: None },
//! };
//!
//! for _ in 0..4 {
//!     frames.tick(&mut gpu, &recipe, &[0u8; 16])?;
//! }
//! assert_eq!(frames.frame_index(), 0);
//! frames.destroy(&mut gpu);
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info, trace, warn};

use frameloop_rhi::backend::{
    AcquireResult, ClearValues, DrawCall, FenceStatus, GpuBackend, ImageState, MeshBinding,
    PresentResult, SlotHandlesOf, SubmitDesc,
};
use frameloop_rhi::{RhiError, RhiResult};

use crate::frame::{FrameSlot, SlotState};

/// The fixed draw a tick records: what to bind and how to draw it.
pub struct FrameRecipe<B: GpuBackend> {
    pub pipeline: B::Pipeline,
    /// One set per slot, bound by slot index.
    pub descriptor_sets: B::DescriptorSets,
    pub mesh: MeshBinding<B::Buffer>,
    pub draw: DrawCall,
    pub clear: ClearValues,
}

/// Details of a tick that reached presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Tick number, counted from zero.
    pub tick: u64,
    pub slot: usize,
    pub image_index: u32,
    /// Whether the CPU blocked on the slot's fence.
    pub waited: bool,
}

/// Result of one [`FrameLoop::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Presented(FrameReport),
    /// The frame was submitted, but acquire or present reported that the
    /// swapchain no longer matches the surface.
    Suboptimal(FrameReport),
    /// Acquisition failed because the surface changed. Nothing was recorded
    /// or submitted and the frame index did not move.
    SurfaceOutdated,
}

impl TickOutcome {
    /// True when the caller should recreate the swapchain.
    pub fn needs_resize(&self) -> bool {
        !matches!(self, TickOutcome::Presented(_))
    }

    pub fn report(&self) -> Option<&FrameReport> {
        match self {
            TickOutcome::Presented(report) | TickOutcome::Suboptimal(report) => Some(report),
            TickOutcome::SurfaceOutdated => None,
        }
    }
}

/// Ring of frame slots plus the acquire semaphore pool.
pub struct FrameLoop<B: GpuBackend> {
    slots: Vec<FrameSlot<B>>,
    /// `slot_count + 1` semaphores. Acquisition happens before the throttle,
    /// so the semaphore used by a slot's previous frame may still be waited
    /// on by that frame's submission.
    acquire_semaphores: Vec<B::Semaphore>,
    next_acquire: usize,
    upload_wait: Option<B::Semaphore>,
    frame_index: usize,
    ticks: u64,
}

impl<B: GpuBackend> FrameLoop<B> {
    /// Allocates `slot_count` slots, each with a uniform buffer of
    /// `uniform_size` bytes, and the acquire semaphores.
    ///
    /// On failure everything allocated so far is released.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidOperation`] for a zero slot count, or whatever the
    /// backend reports.
    pub fn new(backend: &mut B, slot_count: usize, uniform_size: u64) -> RhiResult<Self> {
        if slot_count == 0 {
            return Err(RhiError::InvalidOperation(
                "frame loop needs at least one slot".into(),
            ));
        }

        let handles = backend.allocate_command_slots(slot_count)?;
        let mut uniform_buffers = Vec::with_capacity(slot_count);
        let mut acquire_semaphores = Vec::with_capacity(slot_count + 1);

        if let Err(e) = Self::create_slot_objects(
            backend,
            slot_count,
            uniform_size,
            &mut uniform_buffers,
            &mut acquire_semaphores,
        ) {
            warn!("Frame loop creation failed, releasing partial slots: {}", e);
            for semaphore in acquire_semaphores {
                backend.destroy_semaphore(semaphore);
            }
            for buffer in uniform_buffers {
                backend.destroy_buffer(buffer);
            }
            backend.release_command_slots(&handles);
            return Err(e);
        }

        let slots = handles
            .into_iter()
            .zip(uniform_buffers)
            .enumerate()
            .map(|(index, (handles, buffer))| FrameSlot::new(index, handles, buffer))
            .collect();

        info!(
            "Frame loop created on {} backend: {} slot(s), {} byte uniforms",
            backend.name(),
            slot_count,
            uniform_size
        );

        Ok(Self {
            slots,
            acquire_semaphores,
            next_acquire: 0,
            upload_wait: None,
            frame_index: 0,
            ticks: 0,
        })
    }

    /// Fills `uniform_buffers` with one buffer per slot and
    /// `acquire_semaphores` with `slot_count + 1` semaphores. Stops at the
    /// first failure, leaving what was created in the vectors.
    fn create_slot_objects(
        backend: &mut B,
        slot_count: usize,
        uniform_size: u64,
        uniform_buffers: &mut Vec<B::Buffer>,
        acquire_semaphores: &mut Vec<B::Semaphore>,
    ) -> RhiResult<()> {
        for _ in 0..slot_count {
            uniform_buffers.push(backend.create_uniform_buffer(uniform_size)?);
        }
        for _ in 0..=slot_count {
            acquire_semaphores.push(backend.create_semaphore()?);
        }
        Ok(())
    }

    /// Makes the next submission wait on `semaphore`, typically the one
    /// returned by [`GpuBackend::flush_resource_updates`].
    pub fn set_upload_wait(&mut self, semaphore: Option<B::Semaphore>) {
        if let Some(semaphore) = semaphore {
            if let Some(previous) = self.upload_wait.replace(semaphore) {
                warn!("Upload wait {:?} replaced before it was consumed", previous);
            }
        }
    }

    /// Runs one frame. See the module documentation for the exact order.
    ///
    /// # Errors
    ///
    /// Any backend failure other than an out-of-date surface. Such errors
    /// leave the loop in an undefined state; the caller is expected to tear
    /// down.
    pub fn tick(
        &mut self,
        backend: &mut B,
        recipe: &FrameRecipe<B>,
        payload: &[u8],
    ) -> RhiResult<TickOutcome> {
        // 1. acquire
        let acquire_semaphore = self.acquire_semaphores[self.next_acquire];
        let (image_index, acquire_suboptimal) = match backend.acquire_next_image(acquire_semaphore)? {
            AcquireResult::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireResult::OutOfDate => {
                debug!("Surface out of date at tick {}", self.ticks);
                return Ok(TickOutcome::SurfaceOutdated);
            }
        };
        self.next_acquire = (self.next_acquire + 1) % self.acquire_semaphores.len();

        // 2. select
        let slot_index = self.frame_index % self.slots.len();

        // 3. throttle
        let waited = self.throttle(backend, slot_index)?;

        // 4. uniforms
        let slot = &mut self.slots[slot_index];
        backend.update_mapped_buffer(slot.uniform_buffer(), payload)?;

        // 5. record
        slot.set_state(SlotState::Recording);
        let cmd = slot.command_buffer();
        Self::record(backend, cmd, image_index, slot_index as u32, recipe)?;

        // 6. submit
        let mut wait_semaphores = Vec::with_capacity(2);
        wait_semaphores.extend(self.upload_wait.take());
        wait_semaphores.push(acquire_semaphore);
        let slot_semaphore = slot.semaphore();
        backend.submit(&SubmitDesc {
            command_buffer: cmd,
            wait_semaphores: &wait_semaphores,
            signal_semaphores: &[slot_semaphore],
            signal_fence: Some(slot.fence()),
        })?;
        slot.record_submission();

        // 7. present
        let present = backend.present(image_index, &[slot_semaphore])?;

        let report = FrameReport {
            tick: self.ticks,
            slot: slot_index,
            image_index,
            waited,
        };
        trace!("Tick {:?}, present {:?}", report, present);

        // 8. advance
        self.frame_index = (self.frame_index + 1) % self.slots.len();
        self.ticks += 1;

        Ok(match present {
            PresentResult::Presented if !acquire_suboptimal => TickOutcome::Presented(report),
            PresentResult::Presented | PresentResult::Suboptimal | PresentResult::OutOfDate => {
                debug!(
                    "Swapchain suboptimal at tick {} (acquire {}, present {:?})",
                    report.tick, acquire_suboptimal, present
                );
                TickOutcome::Suboptimal(report)
            }
        })
    }

    /// Makes the slot safe to reuse. Returns whether the CPU blocked.
    fn throttle(&mut self, backend: &mut B, slot_index: usize) -> RhiResult<bool> {
        let slot = &mut self.slots[slot_index];
        let mut waited = false;
        match slot.state() {
            SlotState::Idle => return Ok(false),
            SlotState::Submitted => {
                if backend.fence_status(slot.fence())? == FenceStatus::Unsignaled {
                    trace!("Waiting on slot {} fence {:?}", slot_index, slot.fence());
                    backend.wait_for_fence(slot.fence())?;
                    slot.record_wait();
                    waited = true;
                }
            }
            SlotState::Retired => {}
            SlotState::Recording => {
                return Err(RhiError::InvalidOperation(format!(
                    "slot {} is still recording",
                    slot_index
                )));
            }
        }
        backend.reset_fence(slot.fence())?;
        slot.set_state(SlotState::Idle);
        Ok(waited)
    }

    fn record(
        backend: &mut B,
        cmd: B::CommandBuffer,
        image_index: u32,
        slot_index: u32,
        recipe: &FrameRecipe<B>,
    ) -> RhiResult<()> {
        backend.reset_command_buffer(cmd)?;
        backend.begin_commands(cmd)?;
        backend.cmd_transition_image(cmd, image_index, ImageState::Present, ImageState::RenderTarget)?;
        backend.cmd_begin_pass(cmd, image_index, &recipe.clear)?;
        backend.cmd_bind_pipeline(cmd, recipe.pipeline)?;
        backend.cmd_bind_mesh(cmd, &recipe.mesh)?;
        backend.cmd_bind_descriptor_set(cmd, recipe.pipeline, recipe.descriptor_sets, slot_index)?;
        backend.cmd_draw(cmd, recipe.draw)?;
        backend.cmd_end_pass(cmd)?;
        backend.cmd_transition_image(cmd, image_index, ImageState::RenderTarget, ImageState::Present)?;
        backend.end_commands(cmd)
    }

    /// Blocks until every submitted slot has finished, then idles the
    /// backend. All slots end up `Retired` or `Idle`.
    pub fn wait_idle(&mut self, backend: &mut B) -> RhiResult<()> {
        for slot in &mut self.slots {
            if slot.state() == SlotState::Submitted {
                backend.wait_for_fence(slot.fence())?;
                slot.set_state(SlotState::Retired);
            }
        }
        backend.wait_idle()
    }

    /// Waits for the GPU and releases every slot object and acquire
    /// semaphore.
    pub fn destroy(mut self, backend: &mut B) {
        if let Err(e) = self.wait_idle(backend) {
            warn!("Frame loop teardown without idle GPU: {}", e);
        }
        for semaphore in self.acquire_semaphores.drain(..) {
            backend.destroy_semaphore(semaphore);
        }
        let handles: Vec<SlotHandlesOf<B>> = self.slots.iter().map(FrameSlot::handles).collect();
        for slot in &self.slots {
            backend.destroy_buffer(slot.uniform_buffer());
        }
        backend.release_command_slots(&handles);
        info!(
            "Frame loop destroyed after {} tick(s), {} slot(s)",
            self.ticks,
            self.slots.len()
        );
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of ticks that reached submission.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot<B>> {
        self.slots.get(index)
    }

    /// Uniform buffers in slot order, for descriptor set creation.
    pub fn uniform_buffers(&self) -> Vec<B::Buffer> {
        self.slots.iter().map(FrameSlot::uniform_buffer).collect()
    }

    /// Slots whose submission has not been observed complete.
    pub fn outstanding_submissions(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state() == SlotState::Submitted)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::backend::{
        BufferUsage, CullMode, Extent2D, PipelineDesc, SwapchainDesc, VertexLayout,
    };
    use frameloop_rhi::headless::{BackendEvent, FailPoint, HeadlessBackend};

    const UNIFORM_SIZE: u64 = 16;

    fn setup(
        mut gpu: HeadlessBackend,
        slot_count: usize,
    ) -> (
        HeadlessBackend,
        FrameLoop<HeadlessBackend>,
        FrameRecipe<HeadlessBackend>,
    ) {
        gpu.create_swapchain(&SwapchainDesc {
            extent: Extent2D::new(320, 240),
            vsync: true,
            min_image_count: 2,
        })
        .unwrap();
        let pipeline = gpu
            .create_pipeline(&PipelineDesc {
                label: "test",
                vertex_shader: "void main() {}",
                fragment_shader: "void main() {}",
                vertex_layout: VertexLayout {
                    stride: 12,
                    attributes: &[],
                },
                cull_mode: CullMode::None,
                depth: None,
                uniform_size: UNIFORM_SIZE,
            })
            .unwrap();
        let vertices = gpu
            .upload_static_buffer(BufferUsage::Vertex, &[0; 36])
            .unwrap();
        let mut frames = FrameLoop::new(&mut gpu, slot_count, UNIFORM_SIZE).unwrap();
        frames.set_upload_wait(gpu.flush_resource_updates().unwrap());
        let descriptor_sets = gpu
            .create_descriptor_sets(pipeline, &frames.uniform_buffers())
            .unwrap();
        let recipe = FrameRecipe {
            pipeline,
            descriptor_sets,
            mesh: MeshBinding {
                vertex_buffer: vertices,
                index_buffer: None,
            },
            draw: DrawCall::Vertices { count: 3 },
            clear: ClearValues {
                color: [0.0, 0.0, 1.0, 1.0],
                depth: None,
            },
        };
        gpu.take_events();
        (gpu, frames, recipe)
    }

    fn payload(tick: u64) -> [u8; UNIFORM_SIZE as usize] {
        let mut bytes = [0u8; UNIFORM_SIZE as usize];
        bytes[..8].copy_from_slice(&tick.to_le_bytes());
        bytes
    }

    fn run(
        gpu: &mut HeadlessBackend,
        frames: &mut FrameLoop<HeadlessBackend>,
        recipe: &FrameRecipe<HeadlessBackend>,
        ticks: u64,
    ) -> Vec<TickOutcome> {
        (0..ticks)
            .map(|t| frames.tick(gpu, recipe, &payload(t)).unwrap())
            .collect()
    }

    fn fence_waits(events: &[BackendEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::FenceWait { fence } => Some(fence.id()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_frame_index_wraps() {
        for slot_count in 1..=3 {
            let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), slot_count);
            for t in 0..10u64 {
                frames.tick(&mut gpu, &recipe, &payload(t)).unwrap();
                assert_eq!(frames.frame_index(), ((t + 1) as usize) % slot_count);
            }
            assert_eq!(frames.ticks(), 10);
        }
    }

    #[test]
    fn test_outstanding_never_exceeds_slot_count() {
        for slot_count in 1..=3 {
            let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), slot_count);
            for t in 0..12 {
                frames.tick(&mut gpu, &recipe, &payload(t)).unwrap();
                assert!(frames.outstanding_submissions() <= slot_count);
                assert!(gpu.in_flight() <= slot_count);
            }
            assert_eq!(gpu.max_in_flight(), slot_count);
        }
    }

    #[test]
    fn test_first_use_never_waits_and_reuse_waits_once() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        let f0 = frames.slot(0).unwrap().fence();
        let f1 = frames.slot(1).unwrap().fence();

        let outcomes = run(&mut gpu, &mut frames, &recipe, 2);
        assert!(outcomes.iter().all(|o| !o.report().unwrap().waited));
        assert!(fence_waits(gpu.events()).is_empty());

        gpu.take_events();
        let third = frames.tick(&mut gpu, &recipe, &payload(2)).unwrap();
        assert!(third.report().unwrap().waited);
        assert_eq!(fence_waits(gpu.events()), vec![f0.id()]);

        gpu.take_events();
        frames.tick(&mut gpu, &recipe, &payload(3)).unwrap();
        assert_eq!(fence_waits(gpu.events()), vec![f1.id()]);

        assert_eq!(frames.slot(0).unwrap().waits(), 1);
        assert_eq!(frames.slot(1).unwrap().waits(), 1);
    }

    #[test]
    fn test_no_wait_when_gpu_keeps_up() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new().with_retire_after(0), 2);
        let outcomes = run(&mut gpu, &mut frames, &recipe, 8);
        assert!(outcomes.iter().all(|o| !o.report().unwrap().waited));
        assert!(fence_waits(gpu.events()).is_empty());
        // Fences are still reset before every reuse.
        let resets = gpu
            .events()
            .iter()
            .filter(|e| matches!(e, BackendEvent::FenceReset { .. }))
            .count();
        assert_eq!(resets, 6);
    }

    #[test]
    fn test_wait_happens_at_most_once_per_reuse() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new().with_retire_after(1), 2);
        run(&mut gpu, &mut frames, &recipe, 10);
        for i in 0..2 {
            let slot = frames.slot(i).unwrap();
            assert_eq!(slot.submissions(), 5);
            assert!(slot.waits() <= slot.submissions() - 1);
        }
    }

    #[test]
    fn test_single_slot_runs_serially() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 1);
        let fence = frames.slot(0).unwrap().fence();
        let outcomes = run(&mut gpu, &mut frames, &recipe, 5);

        assert!(!outcomes[0].report().unwrap().waited);
        assert!(outcomes[1..].iter().all(|o| o.report().unwrap().waited));
        assert_eq!(fence_waits(gpu.events()), vec![fence.id(); 4]);
        assert_eq!(gpu.max_in_flight(), 1);
    }

    #[test]
    fn test_uniform_payload_is_never_stale() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        let buffers = frames.uniform_buffers();
        run(&mut gpu, &mut frames, &recipe, 6);

        let mut tick = 0u64;
        let mut last_write = None;
        for event in gpu.events() {
            match event {
                BackendEvent::UniformWrite { buffer, data } => {
                    assert_eq!(*buffer, buffers[(tick % 2) as usize]);
                    assert_eq!(data.as_slice(), payload(tick).as_slice());
                    last_write = Some(*buffer);
                }
                BackendEvent::Submit { uniform_reads, .. } => {
                    assert_eq!(uniform_reads.as_slice(), &[last_write.unwrap()]);
                    tick += 1;
                }
                _ => {}
            }
        }
        assert_eq!(tick, 6);
        assert_eq!(
            gpu.buffer_contents(buffers[1]).unwrap(),
            payload(5).as_slice()
        );
    }

    #[test]
    fn test_present_uses_image_acquired_in_same_tick() {
        let (mut gpu, mut frames, recipe) =
            setup(HeadlessBackend::new().with_image_count(3), 2);
        let outcomes = run(&mut gpu, &mut frames, &recipe, 7);

        let mut acquired = None;
        for event in gpu.events() {
            match event {
                BackendEvent::Acquire { image_index, .. } => acquired = Some(*image_index),
                BackendEvent::Present { image_index, .. } => {
                    assert_eq!(Some(*image_index), acquired.take());
                }
                _ => {}
            }
        }
        for (t, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.report().unwrap().image_index, (t % 3) as u32);
        }
    }

    #[test]
    fn test_submit_wait_and_signal_order() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        run(&mut gpu, &mut frames, &recipe, 3);

        let submits: Vec<_> = gpu
            .events()
            .iter()
            .filter_map(|e| match e {
                BackendEvent::Submit {
                    wait_semaphores,
                    signal_semaphores,
                    fence,
                    ..
                } => Some((wait_semaphores.clone(), signal_semaphores.clone(), *fence)),
                _ => None,
            })
            .collect();
        let acquires: Vec<_> = gpu
            .events()
            .iter()
            .filter_map(|e| match e {
                BackendEvent::Acquire { semaphore, .. } => Some(*semaphore),
                _ => None,
            })
            .collect();

        // The upload semaphore comes first and only on the first submission.
        assert_eq!(submits[0].0.len(), 2);
        assert_eq!(submits[0].0[1], acquires[0]);
        assert_eq!(submits[1].0, vec![acquires[1]]);
        assert_eq!(submits[2].0, vec![acquires[2]]);

        for (t, (_, signals, fence)) in submits.iter().enumerate() {
            let slot = frames.slot(t % 2).unwrap();
            assert_eq!(signals.as_slice(), &[slot.semaphore()]);
            assert_eq!(*fence, Some(slot.fence()));
        }
    }

    #[test]
    fn test_recording_order() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        frames.tick(&mut gpu, &recipe, &payload(0)).unwrap();

        let kinds: Vec<&'static str> = gpu
            .events()
            .iter()
            .map(|e| match e {
                BackendEvent::Acquire { .. } => "acquire",
                BackendEvent::UniformWrite { .. } => "uniform",
                BackendEvent::CommandReset { .. } => "reset",
                BackendEvent::CommandBegin { .. } => "begin",
                BackendEvent::Transition {
                    to: ImageState::RenderTarget,
                    ..
                } => "to-target",
                BackendEvent::Transition {
                    to: ImageState::Present,
                    ..
                } => "to-present",
                BackendEvent::BeginPass { .. } => "begin-pass",
                BackendEvent::BindPipeline { .. } => "pipeline",
                BackendEvent::BindMesh { .. } => "mesh",
                BackendEvent::BindDescriptorSet { .. } => "descriptors",
                BackendEvent::Draw { .. } => "draw",
                BackendEvent::EndPass { .. } => "end-pass",
                BackendEvent::CommandEnd { .. } => "end",
                BackendEvent::Submit { .. } => "submit",
                BackendEvent::Present { .. } => "present",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "acquire",
                "uniform",
                "reset",
                "begin",
                "to-target",
                "begin-pass",
                "pipeline",
                "mesh",
                "descriptors",
                "draw",
                "end-pass",
                "to-present",
                "end",
                "submit",
                "present",
            ]
        );
    }

    #[test]
    fn test_descriptor_set_matches_slot() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 3);
        run(&mut gpu, &mut frames, &recipe, 6);
        let indices: Vec<u32> = gpu
            .events()
            .iter()
            .filter_map(|e| match e {
                BackendEvent::BindDescriptorSet { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_out_of_date_acquire_changes_nothing() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        frames.tick(&mut gpu, &recipe, &payload(0)).unwrap();
        gpu.report_out_of_date(1);

        let outcome = frames.tick(&mut gpu, &recipe, &payload(1)).unwrap();
        assert_eq!(outcome, TickOutcome::SurfaceOutdated);
        assert!(outcome.needs_resize());
        assert_eq!(frames.frame_index(), 1);
        assert_eq!(frames.ticks(), 1);
        assert_eq!(gpu.submission_count(), 1);

        let next = frames.tick(&mut gpu, &recipe, &payload(1)).unwrap();
        assert_eq!(next.report().unwrap().slot, 1);
    }

    #[test]
    fn test_suboptimal_acquire_still_presents_and_advances() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        gpu.report_suboptimal(1);

        let outcome = frames.tick(&mut gpu, &recipe, &payload(0)).unwrap();
        assert!(matches!(outcome, TickOutcome::Suboptimal(_)));
        assert!(outcome.needs_resize());
        assert_eq!(outcome.report().map(|r| r.slot), Some(0));
        assert_eq!(frames.frame_index(), 1);
        assert_eq!(frames.ticks(), 1);
        assert!(gpu
            .events()
            .iter()
            .any(|e| matches!(e, BackendEvent::Present { image_index: 0, .. })));

        let next = frames.tick(&mut gpu, &recipe, &payload(1)).unwrap();
        assert!(matches!(next, TickOutcome::Presented(_)));
    }

    #[test]
    fn test_suboptimal_or_out_of_date_present_advances() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        gpu.report_present_results([PresentResult::Suboptimal, PresentResult::OutOfDate]);

        let outcomes = run(&mut gpu, &mut frames, &recipe, 3);
        for (tick, outcome) in outcomes.iter().take(2).enumerate() {
            assert!(matches!(outcome, TickOutcome::Suboptimal(_)));
            assert!(outcome.needs_resize());
            assert_eq!(outcome.report().map(|r| r.tick), Some(tick as u64));
        }
        assert!(matches!(outcomes[2], TickOutcome::Presented(_)));
        assert_eq!(frames.ticks(), 3);
        assert_eq!(frames.frame_index(), 1);
        assert_eq!(gpu.submission_count(), 3);
    }

    #[test]
    fn test_upload_wait_survives_wait_idle() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        frames.wait_idle(&mut gpu).unwrap();

        frames.tick(&mut gpu, &recipe, &payload(0)).unwrap();
        let first_waits = gpu
            .events()
            .iter()
            .find_map(|e| match e {
                BackendEvent::Submit {
                    wait_semaphores, ..
                } => Some(wait_semaphores.len()),
                _ => None,
            })
            .unwrap();
        assert_eq!(first_waits, 2);
    }

    #[test]
    fn test_wait_idle_retires_everything() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        run(&mut gpu, &mut frames, &recipe, 3);
        assert_eq!(frames.outstanding_submissions(), 2);

        frames.wait_idle(&mut gpu).unwrap();
        assert_eq!(frames.outstanding_submissions(), 0);
        assert_eq!(gpu.in_flight(), 0);

        // Retired slots are reused without blocking.
        let outcome = frames.tick(&mut gpu, &recipe, &payload(3)).unwrap();
        assert!(!outcome.report().unwrap().waited);
    }

    #[test]
    fn test_destroy_releases_all_slot_objects() {
        let (mut gpu, mut frames, recipe) = setup(HeadlessBackend::new(), 2);
        run(&mut gpu, &mut frames, &recipe, 4);
        let before = gpu.live_objects();
        frames.destroy(&mut gpu);
        // 2 x (command buffer, fence, semaphore, uniform buffer) + 3 acquire semaphores
        assert_eq!(before - gpu.live_objects(), 11);
    }

    #[test]
    fn test_zero_slots_rejected() {
        let mut gpu = HeadlessBackend::new();
        assert!(matches!(
            FrameLoop::new(&mut gpu, 0, UNIFORM_SIZE),
            Err(RhiError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_partial_creation_is_released() {
        let mut gpu = HeadlessBackend::new();
        gpu.fail_at(FailPoint::CreateUniformBuffer);
        assert!(FrameLoop::new(&mut gpu, 2, UNIFORM_SIZE).is_err());
        assert_eq!(gpu.live_objects(), 0);
    }
}
