//! Dummy GPU backend for testing and headless runs.
//!
//! This backend doesn't perform actual GPU operations. It keeps buffer
//! contents in host memory, records a [`GraphSummary`] of every submission
//! and completes submissions either immediately or when asked to, which lets
//! tests simulate a GPU that falls behind.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::graph::GraphSummary;
use crate::resources::PixelBuffer;
use crate::scheduler::Submission;
use crate::types::{BufferDescriptor, TextureDescriptor};

use super::{GpuBackend, GpuBuffer, GpuTexture};

/// When the dummy backend completes submitted work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Complete each submission inside `submit`.
    #[default]
    Immediate,
    /// Hold submissions until [`DummyBackend::complete_next`] is called.
    Manual,
}

/// Dummy GPU backend.
pub struct DummyBackend {
    mode: CompletionMode,
    pending: Mutex<VecDeque<Submission>>,
    history: Mutex<Vec<GraphSummary>>,
}

impl DummyBackend {
    /// Create a backend that completes work immediately.
    pub fn new() -> Self {
        Self::with_completion(CompletionMode::Immediate)
    }

    /// Create a backend with the given completion mode.
    pub fn with_completion(mode: CompletionMode) -> Self {
        Self {
            mode,
            pending: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// The completion mode of this backend.
    pub fn completion_mode(&self) -> CompletionMode {
        self.mode
    }

    /// Complete the oldest pending submission.
    ///
    /// Returns `false` if nothing was pending.
    pub fn complete_next(&self) -> bool {
        // Pop first so handlers run without the queue locked.
        let next = self.pending.lock().pop_front();
        match next {
            Some(submission) => {
                log::trace!("DummyBackend: completing submission {}", submission.id());
                submission.complete();
                true
            }
            None => false,
        }
    }

    /// Complete every pending submission in order.
    pub fn complete_all(&self) -> usize {
        let mut completed = 0;
        while self.complete_next() {
            completed += 1;
        }
        completed
    }

    /// Number of submissions awaiting completion.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Summaries of every submission so far, oldest first.
    pub fn submissions(&self) -> Vec<GraphSummary> {
        self.history.lock().clone()
    }

    /// Summary of the most recent submission.
    pub fn last_submission(&self) -> Option<GraphSummary> {
        self.history.lock().last().cloned()
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("mode", &self.mode)
            .field("pending", &self.pending_count())
            .field("submitted", &self.history.lock().len())
            .finish()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        Ok(GpuBuffer::Dummy {
            contents: Mutex::new(vec![0u8; descriptor.size as usize]),
        })
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );
        Ok(GpuTexture::Dummy)
    }

    fn import_texture(
        &self,
        descriptor: &TextureDescriptor,
        source: &PixelBuffer,
        plane: usize,
    ) -> Result<GpuTexture, GraphicsError> {
        log::trace!(
            "DummyBackend: importing plane {} of {}x{} pixel buffer as {:?}",
            plane,
            source.width(),
            source.height(),
            descriptor.format
        );
        Ok(GpuTexture::DummyImported { plane })
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        match buffer {
            GpuBuffer::Dummy { contents } => {
                let mut contents = contents.lock();
                let start = offset as usize;
                contents[start..start + data.len()].copy_from_slice(data);
            }
        }
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        match buffer {
            GpuBuffer::Dummy { contents } => {
                let contents = contents.lock();
                let start = offset as usize;
                contents[start..start + size as usize].to_vec()
            }
        }
    }

    fn submit(&self, submission: Submission) -> Result<(), GraphicsError> {
        let summary = submission.graph().summary();
        log::trace!(
            "DummyBackend: submission {} '{}' with {} groups",
            submission.id(),
            summary.label,
            summary.groups.len()
        );
        self.history.lock().push(summary);

        match self.mode {
            CompletionMode::Immediate => submission.complete(),
            CompletionMode::Manual => self.pending.lock().push_back(submission),
        }
        Ok(())
    }
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);
