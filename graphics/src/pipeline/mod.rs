//! Frame pipeline for managing multiple frames in flight.
//!
//! This module provides [`FramePipeline`], which bounds how far the CPU may
//! run ahead of the GPU. The CPU prepares frame N+1 while the GPU renders
//! frame N, but never more than `frames_in_flight` frames are outstanding.
//!
//! # Frame Slots
//!
//! With N frames in flight there are N slots. Frame `k` always uses slot
//! `k % N`, so per-frame resources (uniform ring regions, mesh uploads) are
//! indexed by [`FrameSlot::index`]. A slot is busy from
//! [`acquire_slot`](FramePipeline::acquire_slot) until its [`SlotRelease`]
//! token is released, normally from the GPU completion handler of the frame
//! that used it.
//!
//! ```text
//! frames_in_flight = 3
//!
//! Slot 0: [Frame 0] ──► [Frame 3] ──► [Frame 6] ──►
//! Slot 1: [Frame 1] ──► [Frame 4] ──► [Frame 7] ──►
//! Slot 2: [Frame 2] ──► [Frame 5] ──► [Frame 8] ──►
//! ```
//!
//! A CPU that gets ahead blocks in `acquire_slot`. No extra slots are ever
//! allocated.
//!
//! # Example
//!
//! ```ignore
//! let mut pipeline = FramePipeline::new(3);
//!
//! loop {
//!     let slot = pipeline.acquire_slot(); // may block if the GPU is behind
//!     uniforms.write(&slot, &frame_uniforms)?;
//!
//!     let mut graph = RenderGraph::new("frame");
//!     // ... record passes bound to `uniforms.binding(&slot)` ...
//!     let release = slot.into_release();
//!     graph.add_completed_handler(move || release.release());
//!
//!     let fence = device.submit(graph)?;
//!     pipeline.end_frame(fence);
//! }
//!
//! // Shutdown: wait for all in-flight GPU work.
//! pipeline.wait_idle();
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::scheduler::Fence;

#[derive(Debug)]
struct SlotState {
    busy: Mutex<Vec<bool>>,
    available: Condvar,
}

impl SlotState {
    fn release(&self, index: usize) {
        let mut busy = self.busy.lock();
        busy[index] = false;
        self.available.notify_all();
    }
}

/// Bounds the number of frames the CPU may have in flight.
///
/// `FramePipeline` is owned by the render thread. Release tokens handed out
/// with each [`FrameSlot`] are `Send` and may be released from any thread.
#[derive(Debug)]
pub struct FramePipeline {
    slots: Arc<SlotState>,

    /// Fence of the last submission recorded for each slot.
    frame_fences: Vec<Option<Fence>>,

    frames_in_flight: usize,

    /// Total frames started.
    frame_count: u64,
}

impl FramePipeline {
    /// Create a new frame pipeline.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is 0.
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");

        Self {
            slots: Arc::new(SlotState {
                busy: Mutex::new(vec![false; frames_in_flight]),
                available: Condvar::new(),
            }),
            frame_fences: (0..frames_in_flight).map(|_| None).collect(),
            frames_in_flight,
            frame_count: 0,
        }
    }

    /// Acquire the slot for the next frame.
    ///
    /// Blocks until the frame that used this slot `frames_in_flight` frames
    /// ago has released it.
    pub fn acquire_slot(&mut self) -> FrameSlot {
        let index = self.next_index();
        {
            let mut busy = self.slots.busy.lock();
            while busy[index] {
                log::trace!("Waiting for frame slot {index}");
                self.slots.available.wait(&mut busy);
            }
            busy[index] = true;
        }
        self.begin(index)
    }

    /// Acquire the slot for the next frame, giving up after `timeout`.
    ///
    /// Returns `None` if the slot is still busy when the timeout elapses. The
    /// frame counter does not advance in that case.
    pub fn acquire_slot_timeout(&mut self, timeout: Duration) -> Option<FrameSlot> {
        let index = self.next_index();
        let deadline = Instant::now() + timeout;
        {
            let mut busy = self.slots.busy.lock();
            while busy[index] {
                if self
                    .slots
                    .available
                    .wait_until(&mut busy, deadline)
                    .timed_out()
                    && busy[index]
                {
                    return None;
                }
            }
            busy[index] = true;
        }
        Some(self.begin(index))
    }

    fn next_index(&self) -> usize {
        (self.frame_count % self.frames_in_flight as u64) as usize
    }

    fn begin(&mut self, index: usize) -> FrameSlot {
        let frame_number = self.frame_count;
        self.frame_count += 1;
        log::trace!("Begin frame {frame_number} (slot {index})");

        FrameSlot {
            index,
            frame_number,
            release: SlotRelease {
                slots: Some(Arc::clone(&self.slots)),
                index,
            },
        }
    }

    /// Record the fence of the frame just submitted, for [`wait_idle`](Self::wait_idle).
    pub fn end_frame(&mut self, slot_index: usize, fence: Fence) {
        log::trace!("End frame {} (slot {slot_index})", self.frame_count);
        self.frame_fences[slot_index] = Some(fence);
    }

    /// Wait for all in-flight GPU work to complete.
    pub fn wait_idle(&self) {
        log::trace!("Waiting for GPU idle ({} slots)", self.frames_in_flight);
        for fence in self.frame_fences.iter().flatten() {
            fence.wait();
        }
        log::trace!("GPU idle");
    }

    /// Wait for all in-flight GPU work with a timeout.
    ///
    /// Returns `true` if the GPU is idle, `false` if the timeout elapsed.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let start = Instant::now();

        for fence in self.frame_fences.iter().flatten() {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return fence.is_signaled();
            }
            if !fence.wait_timeout(timeout - elapsed) {
                return false;
            }
        }

        true
    }

    /// Number of frames that may be in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Total number of frames started.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Number of slots currently held by unreleased frames.
    pub fn busy_slots(&self) -> usize {
        self.slots.busy.lock().iter().filter(|busy| **busy).count()
    }

    /// Check if a slot is free (non-blocking).
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn is_slot_ready(&self, slot: usize) -> bool {
        assert!(slot < self.frames_in_flight, "Invalid slot index");
        !self.slots.busy.lock()[slot]
    }
}

impl Default for FramePipeline {
    /// Creates a pipeline with 3 frames in flight.
    fn default() -> Self {
        Self::new(3)
    }
}

/// A frame slot held by the CPU while it records a frame.
#[derive(Debug)]
pub struct FrameSlot {
    index: usize,
    frame_number: u64,
    release: SlotRelease,
}

impl FrameSlot {
    /// Slot index in `0..frames_in_flight`.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Sequential number of the frame using this slot.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Give up the slot view, keeping only the release token.
    pub fn into_release(self) -> SlotRelease {
        self.release
    }
}

/// Token that frees a frame slot.
///
/// The slot is freed by [`release`](Self::release) or when the token is
/// dropped, whichever comes first.
#[derive(Debug)]
#[must_use = "dropping the token frees the slot immediately"]
pub struct SlotRelease {
    slots: Option<Arc<SlotState>>,
    index: usize,
}

impl SlotRelease {
    /// Index of the slot this token frees.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Free the slot.
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(slots) = self.slots.take() {
            log::trace!("Release frame slot {}", self.index);
            slots.release(self.index);
        }
    }
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.release_now();
    }
}

static_assertions::assert_impl_all!(SlotRelease: Send, Sync);
static_assertions::assert_impl_all!(FramePipeline: Send);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let pipeline = FramePipeline::new(2);
        assert_eq!(pipeline.frames_in_flight(), 2);
        assert_eq!(pipeline.frame_count(), 0);
        assert_eq!(pipeline.busy_slots(), 0);
    }

    #[test]
    fn test_default() {
        let pipeline = FramePipeline::default();
        assert_eq!(pipeline.frames_in_flight(), 3);
    }

    #[test]
    #[should_panic(expected = "frames_in_flight must be at least 1")]
    fn test_zero_frames_panics() {
        FramePipeline::new(0);
    }

    #[test]
    fn test_slots_rotate() {
        let mut pipeline = FramePipeline::new(3);
        let indices: Vec<usize> = (0..7)
            .map(|_| {
                let slot = pipeline.acquire_slot();
                let index = slot.index();
                slot.into_release().release();
                index
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(pipeline.frame_count(), 7);
    }

    #[test]
    fn test_frame_numbers_are_sequential() {
        let mut pipeline = FramePipeline::new(2);
        let a = pipeline.acquire_slot();
        let b = pipeline.acquire_slot();
        assert_eq!(a.frame_number(), 0);
        assert_eq!(b.frame_number(), 1);
    }

    #[test]
    fn test_busy_until_released() {
        let mut pipeline = FramePipeline::new(2);
        let slot = pipeline.acquire_slot();
        assert!(!pipeline.is_slot_ready(0));
        assert_eq!(pipeline.busy_slots(), 1);

        let release = slot.into_release();
        assert!(!pipeline.is_slot_ready(0));

        release.release();
        assert!(pipeline.is_slot_ready(0));
    }

    #[test]
    fn test_drop_releases() {
        let mut pipeline = FramePipeline::new(1);
        drop(pipeline.acquire_slot());
        assert!(pipeline.is_slot_ready(0));
    }

    #[test]
    fn test_timeout_when_ring_is_full() {
        let mut pipeline = FramePipeline::new(2);
        let _a = pipeline.acquire_slot();
        let _b = pipeline.acquire_slot();

        assert!(
            pipeline
                .acquire_slot_timeout(Duration::from_millis(10))
                .is_none()
        );
        assert_eq!(pipeline.frame_count(), 2);
    }

    #[test]
    fn test_timeout_succeeds_after_release() {
        let mut pipeline = FramePipeline::new(1);
        let first = pipeline.acquire_slot();
        first.into_release().release();

        let second = pipeline.acquire_slot_timeout(Duration::from_millis(10));
        assert_eq!(second.map(|s| s.frame_number()), Some(1));
    }

    #[test]
    fn test_wait_idle_with_signaled_fences() {
        let mut pipeline = FramePipeline::new(2);
        let slot = pipeline.acquire_slot();
        pipeline.end_frame(slot.index(), Fence::new_signaled());

        pipeline.wait_idle();
        assert!(pipeline.wait_idle_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_idle_timeout_pending() {
        let mut pipeline = FramePipeline::new(2);
        pipeline.end_frame(0, Fence::new_unsignaled());
        assert!(!pipeline.wait_idle_timeout(Duration::from_millis(5)));
    }

    #[test]
    #[should_panic(expected = "Invalid slot index")]
    fn test_is_slot_ready_invalid() {
        let pipeline = FramePipeline::new(2);
        pipeline.is_slot_ready(5);
    }
}
