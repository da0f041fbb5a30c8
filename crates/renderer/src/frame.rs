//! Per-frame slot resources and lifecycle.

use std::fmt;

use frameloop_rhi::backend::{GpuBackend, SlotHandlesOf};

/// Lifecycle of a frame slot.
///
/// `Idle -> Recording -> Submitted -> Retired -> Idle`. The step out of
/// `Submitted` is only ever taken after the slot's fence has been observed
/// signaled, either by polling or by a completed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Free to record. Its fence is unsignaled and not attached to any work.
    #[default]
    Idle,
    Recording,
    /// Work is queued and the fence has not been observed signaled.
    Submitted,
    /// The GPU is done with the slot; its fence is still signaled.
    Retired,
}

/// One in-flight frame: command buffer, fence, semaphore and uniform buffer.
pub struct FrameSlot<B: GpuBackend> {
    index: usize,
    handles: SlotHandlesOf<B>,
    uniform_buffer: B::Buffer,
    state: SlotState,
    submissions: u64,
    waits: u64,
}

impl<B: GpuBackend> FrameSlot<B> {
    pub(crate) fn new(index: usize, handles: SlotHandlesOf<B>, uniform_buffer: B::Buffer) -> Self {
        Self {
            index,
            handles,
            uniform_buffer,
            state: SlotState::Idle,
            submissions: 0,
            waits: 0,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    #[inline]
    pub fn command_buffer(&self) -> B::CommandBuffer {
        self.handles.command_buffer
    }

    #[inline]
    pub fn fence(&self) -> B::Fence {
        self.handles.fence
    }

    /// Semaphore signaled when this slot's commands complete.
    #[inline]
    pub fn semaphore(&self) -> B::Semaphore {
        self.handles.semaphore
    }

    #[inline]
    pub fn uniform_buffer(&self) -> B::Buffer {
        self.uniform_buffer
    }

    /// Number of times this slot has been submitted.
    #[inline]
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// Number of times the CPU blocked on this slot's fence.
    #[inline]
    pub fn waits(&self) -> u64 {
        self.waits
    }

    #[inline]
    pub(crate) fn handles(&self) -> SlotHandlesOf<B> {
        self.handles
    }

    pub(crate) fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    pub(crate) fn record_submission(&mut self) {
        self.state = SlotState::Submitted;
        self.submissions += 1;
    }

    pub(crate) fn record_wait(&mut self) {
        self.waits += 1;
    }
}

impl<B: GpuBackend> fmt::Debug for FrameSlot<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSlot")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("fence", &self.handles.fence)
            .field("submissions", &self.submissions)
            .field("waits", &self.waits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::headless::HeadlessBackend;

    #[test]
    fn test_slot_state_default_is_idle() {
        assert_eq!(SlotState::default(), SlotState::Idle);
    }

    #[test]
    fn test_slot_counters() {
        let mut gpu = HeadlessBackend::new();
        let handles = gpu.allocate_command_slots(1).unwrap()[0];
        let ubo = gpu.create_uniform_buffer(16).unwrap();
        let mut slot = FrameSlot::<HeadlessBackend>::new(0, handles, ubo);

        assert_eq!(slot.state(), SlotState::Idle);
        slot.set_state(SlotState::Recording);
        slot.record_submission();
        slot.record_wait();
        assert_eq!(slot.state(), SlotState::Submitted);
        assert_eq!(slot.submissions(), 1);
        assert_eq!(slot.waits(), 1);
        assert_eq!(slot.fence(), handles.fence);
        assert!(format!("{:?}", slot).contains("Submitted"));
    }
}
