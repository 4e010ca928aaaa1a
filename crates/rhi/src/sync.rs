//! Synchronization primitives and the frames-in-flight ring.
//!
//! This module provides:
//! - [`Semaphore`] - GPU-to-GPU synchronization (between queue operations)
//! - [`Fence`] - GPU-to-CPU synchronization (for host waiting)
//! - [`FrameSyncRing`] - a fixed ring of per-frame slots bounding how many
//!   frames may be queued to the GPU at once
//!
//! # Slot lifecycle
//!
//! ```text
//! Idle ──wait_and_reset──▶ Recording ──mark_submitted──▶ InFlight
//!   ▲                         │  ▲                          │
//!   │                         └──┘ (acquire stale,          │
//!   │                              slot reused as is)       │
//!   └──────────────── wait_and_reset (fence signaled) ◀─────┘
//! ```
//!
//! Fences start signaled so the first wait on every slot returns at once.
//! A slot whose fence was reset but never submitted stays `Recording`; waiting
//! on it again is a no-op, so a skipped frame cannot deadlock the next frame.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::context::DeviceContext;
//! use vkframe_rhi::sync::FrameSyncRing;
//!
//! # fn example(device: Arc<dyn DeviceContext>) -> vkframe_rhi::RhiResult<()> {
//! let mut ring = FrameSyncRing::new(device, 2, 1_000_000_000)?;
//!
//! let slot = ring.current_slot();
//! ring.wait_and_reset(slot)?;
//! // ... acquire, record, submit with ring.current().in_flight_handle() ...
//! ring.mark_submitted(slot);
//! ring.advance();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, trace};

use crate::context::DeviceContext;
use crate::error::{RhiError, RhiResult};

/// Vulkan semaphore wrapper.
///
/// Used for GPU-to-GPU ordering: image acquisition before rendering, and
/// rendering before presentation.
pub struct Semaphore {
    device: Arc<dyn DeviceContext>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new unsignaled semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<dyn DeviceContext>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        trace!("Created semaphore");
        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
        trace!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
///
/// Fences let the host wait for submitted GPU work to complete.
pub struct Fence {
    device: Arc<dyn DeviceContext>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence, optionally in the signaled state.
    ///
    /// A signaled fence is useful for fences that are waited on before the
    /// first GPU operation that would signal them.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<dyn DeviceContext>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;

        trace!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds pass.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] when the deadline expires.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fences(&[self.fence], timeout)
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be in use by any queue operation when this is called.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fences(&[self.fence])
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
        trace!("Destroyed fence");
    }
}

/// Where a ring slot is in its reuse cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled, nothing pending.
    Idle,
    /// Fence reset, command buffer may be recorded; nothing submitted yet.
    Recording,
    /// Work submitted; the fence signals when it completes.
    InFlight,
}

/// Synchronization objects for one frame in flight.
pub struct FrameSlot {
    /// Signaled when the acquired swapchain image is ready for rendering.
    image_acquired: Semaphore,
    /// Signaled when rendering completes; presentation waits on it.
    render_complete: Semaphore,
    /// Signaled when the slot's submitted work has finished on the GPU.
    in_flight: Fence,
    state: SlotState,
}

impl FrameSlot {
    fn new(device: &Arc<dyn DeviceContext>) -> RhiResult<Self> {
        let image_acquired = Semaphore::new(Arc::clone(device))?;
        let render_complete = Semaphore::new(Arc::clone(device))?;
        // Start signaled so the first wait doesn't block forever
        let in_flight = Fence::new(Arc::clone(device), true)?;

        Ok(Self {
            image_acquired,
            render_complete,
            in_flight,
            state: SlotState::Idle,
        })
    }

    #[inline]
    pub fn image_acquired_handle(&self) -> vk::Semaphore {
        self.image_acquired.handle()
    }

    #[inline]
    pub fn render_complete_handle(&self) -> vk::Semaphore {
        self.render_complete.handle()
    }

    #[inline]
    pub fn in_flight_handle(&self) -> vk::Fence {
        self.in_flight.handle()
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// A fixed ring of K frame slots, advanced round-robin.
///
/// Work submitted with slot `i`'s fence is complete before slot `i` is
/// recorded again, K frames later. This bounds the GPU queue depth to K.
pub struct FrameSyncRing {
    device: Arc<dyn DeviceContext>,
    slots: Vec<FrameSlot>,
    current: usize,
    fence_timeout_ns: u64,
}

impl FrameSyncRing {
    /// Creates `frames_in_flight` slots. Every fence starts signaled.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for an empty ring, or the creation
    /// error of a semaphore or fence. Objects created before a failure are released.
    pub fn new(
        device: Arc<dyn DeviceContext>,
        frames_in_flight: usize,
        fence_timeout_ns: u64,
    ) -> RhiResult<Self> {
        if frames_in_flight == 0 {
            return Err(RhiError::InvalidHandle(
                "Frame sync ring needs at least one slot".to_string(),
            ));
        }

        let slots = (0..frames_in_flight)
            .map(|_| FrameSlot::new(&device))
            .collect::<RhiResult<Vec<_>>>()?;

        info!("Created frame sync ring with {} slots", slots.len());

        Ok(Self {
            device,
            slots,
            current: 0,
            fence_timeout_ns,
        })
    }

    /// Number of slots (K).
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` once the ring has been destroyed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the slot the next frame uses.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// The current slot.
    ///
    /// # Panics
    ///
    /// Panics if the ring has been destroyed.
    #[inline]
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Waits for the slot's fence using the ring's default timeout, then resets it.
    pub fn wait_and_reset(&mut self, slot: usize) -> RhiResult<()> {
        self.wait_and_reset_with_timeout(slot, self.fence_timeout_ns)
    }

    /// Blocks until the slot's previous work has completed, then resets its
    /// fence so it can be submitted with again.
    ///
    /// A slot that is already `Recording` is returned to as is.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] when the fence does not signal within
    /// `timeout_ns`; the slot is left unchanged. [`RhiError::InvalidHandle`]
    /// for an index outside the ring.
    pub fn wait_and_reset_with_timeout(&mut self, slot: usize, timeout_ns: u64) -> RhiResult<()> {
        let len = self.slots.len();
        let entry = self.slots.get_mut(slot).ok_or_else(|| {
            RhiError::InvalidHandle(format!("Frame slot {} out of range ({} slots)", slot, len))
        })?;

        if entry.state == SlotState::Recording {
            trace!("Frame slot {} already reset, reusing", slot);
            return Ok(());
        }

        entry.in_flight.wait(timeout_ns).map_err(|e| match e {
            RhiError::Timeout(msg) => RhiError::Timeout(format!("frame slot {}: {}", slot, msg)),
            other => other,
        })?;
        entry.in_flight.reset()?;
        entry.state = SlotState::Recording;
        Ok(())
    }

    /// Records that the slot's fence was handed to a queue submission.
    pub fn mark_submitted(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.state = SlotState::InFlight;
        }
    }

    /// Moves to the next slot, wrapping after the last.
    pub fn advance(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Waits for every in-flight slot, then releases all semaphores and fences.
    ///
    /// Wait failures are logged and do not stop the release. Calling it
    /// again is a no-op.
    pub fn destroy(&mut self) {
        if self.slots.is_empty() {
            return;
        }

        let pending: Vec<vk::Fence> = self
            .slots
            .iter()
            .filter(|s| s.state == SlotState::InFlight)
            .map(|s| s.in_flight.handle())
            .collect();

        if !pending.is_empty() {
            debug!("Waiting for {} in-flight frame(s)", pending.len());
            if let Err(e) = self.device.wait_for_fences(&pending, self.fence_timeout_ns) {
                error!("Failed waiting for in-flight frames before teardown: {}", e);
            }
        }

        let count = self.slots.len();
        self.slots.clear();
        self.current = 0;
        info!("Frame sync ring destroyed ({} slots)", count);
    }
}

impl Drop for FrameSyncRing {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for FrameSyncRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSyncRing")
            .field("slots", &self.slots.len())
            .field("current", &self.current)
            .field(
                "states",
                &self.slots.iter().map(|s| s.state).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SubmitDesc;
    use crate::testing::{MockDevice, MockEvent, ResourceKind};

    const TIMEOUT: u64 = 1_000_000;

    fn submit_slot(mock: &MockDevice, ring: &mut FrameSyncRing) {
        let slot = ring.current_slot();
        mock.queue_submit(&SubmitDesc {
            command_buffer: vk::CommandBuffer::null(),
            wait_semaphore: ring.current().image_acquired_handle(),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: ring.current().render_complete_handle(),
            fence: ring.current().in_flight_handle(),
        })
        .unwrap();
        ring.mark_submitted(slot);
    }

    #[test]
    fn test_zero_slots_rejected() {
        let mock = Arc::new(MockDevice::new());
        let result = FrameSyncRing::new(mock.clone(), 0, TIMEOUT);
        assert!(matches!(result, Err(RhiError::InvalidHandle(_))));
        assert_eq!(mock.live_total(), 0);
    }

    #[test]
    fn test_creates_two_semaphores_and_one_fence_per_slot() {
        let mock = Arc::new(MockDevice::new());
        let ring = FrameSyncRing::new(mock.clone(), 3, TIMEOUT).unwrap();

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.current_slot(), 0);
        assert_eq!(mock.live(ResourceKind::Semaphore), 6);
        assert_eq!(mock.live(ResourceKind::Fence), 3);
        assert!(ring.slot(2).is_some());
        assert!(ring.slot(3).is_none());
    }

    #[test]
    fn test_first_wait_does_not_block() {
        let mock = Arc::new(MockDevice::new());
        let mut ring = FrameSyncRing::new(mock.clone(), 2, TIMEOUT).unwrap();

        ring.wait_and_reset(0).unwrap();
        assert_eq!(ring.current().state(), SlotState::Recording);
        mock.assert_no_violations();
    }

    #[test]
    fn test_advance_wraps_around() {
        let mock = Arc::new(MockDevice::new());
        let mut ring = FrameSyncRing::new(mock, 2, TIMEOUT).unwrap();

        let visited: Vec<usize> = (0..5)
            .map(|_| {
                let slot = ring.current_slot();
                ring.advance();
                slot
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_recording_slot_is_not_waited_again() {
        let mock = Arc::new(MockDevice::new());
        let mut ring = FrameSyncRing::new(mock.clone(), 2, TIMEOUT).unwrap();

        ring.wait_and_reset(0).unwrap();
        mock.clear_events();

        // Nothing was submitted, so waiting on the reset fence would time out
        ring.wait_and_reset(0).unwrap();
        assert_eq!(
            mock.count_events(|e| matches!(e, MockEvent::WaitFence(_))),
            0
        );
    }

    #[test]
    fn test_submitted_slot_waits_before_reuse() {
        let mock = Arc::new(MockDevice::new());
        let mut ring = FrameSyncRing::new(mock.clone(), 1, TIMEOUT).unwrap();

        ring.wait_and_reset(0).unwrap();
        submit_slot(&mock, &mut ring);
        assert_eq!(ring.current().state(), SlotState::InFlight);

        ring.wait_and_reset(0).unwrap();
        assert_eq!(ring.current().state(), SlotState::Recording);
        mock.assert_no_violations();
    }

    #[test]
    fn test_hung_gpu_times_out_with_slot_context() {
        let mock = Arc::new(MockDevice::new());
        let mut ring = FrameSyncRing::new(mock.clone(), 2, TIMEOUT).unwrap();

        ring.wait_and_reset(0).unwrap();
        submit_slot(&mock, &mut ring);
        mock.set_gpu_hung(true);

        let err = ring.wait_and_reset(0).unwrap_err();
        assert!(matches!(err, RhiError::Timeout(ref msg) if msg.contains("frame slot 0")));
        assert_eq!(ring.current().state(), SlotState::InFlight);

        mock.set_gpu_hung(false);
    }

    #[test]
    fn test_destroy_releases_everything_once() {
        let mock = Arc::new(MockDevice::new());
        let mut ring = FrameSyncRing::new(mock.clone(), 2, TIMEOUT).unwrap();

        ring.wait_and_reset(0).unwrap();
        submit_slot(&mock, &mut ring);

        ring.destroy();
        ring.destroy();

        assert!(ring.is_empty());
        mock.assert_no_leaks();
        mock.assert_no_violations();
    }

    #[test]
    fn test_frame_sync_ring_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameSyncRing>();
    }
}
