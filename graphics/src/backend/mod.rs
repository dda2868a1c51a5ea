//! GPU backend abstraction layer.
//!
//! This module provides a trait-based abstraction for GPU backends,
//! allowing the graphics crate to work with different GPU APIs.
//!
//! # Available Backends
//!
//! - `dummy` (default): records submitted work and completes it either
//!   immediately or on demand, for headless runs and tests
//!
//! # Architecture
//!
//! Each backend implements the [`GpuBackend`] trait, which provides:
//! - Resource creation (buffers, textures, imported pixel buffer planes)
//! - Host writes and reads of buffer memory
//! - Submission of a recorded [`RenderGraph`](crate::graph::RenderGraph)
//!   and its completion

pub mod dummy;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::resources::PixelBuffer;
use crate::scheduler::Submission;
use crate::types::{BufferDescriptor, TextureDescriptor};

pub use dummy::{CompletionMode, DummyBackend};

/// Handle to a GPU buffer resource.
pub enum GpuBuffer {
    /// Dummy backend buffer backed by host memory.
    Dummy { contents: Mutex<Vec<u8>> },
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { contents } => f
                .debug_struct("GpuBuffer::Dummy")
                .field("len", &contents.lock().len())
                .finish(),
        }
    }
}

/// Handle to a GPU texture resource.
#[derive(Debug)]
pub enum GpuTexture {
    /// Dummy backend texture (no GPU allocation).
    Dummy,
    /// Dummy texture aliasing one plane of a pixel buffer.
    DummyImported { plane: usize },
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a buffer resource.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError>;

    /// Create a texture resource.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError>;

    /// Alias one plane of a pixel buffer as a texture without copying.
    fn import_texture(
        &self,
        descriptor: &TextureDescriptor,
        source: &PixelBuffer,
        plane: usize,
    ) -> Result<GpuTexture, GraphicsError>;

    /// Write data to a host-visible buffer.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]);

    /// Read data from a buffer.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8>;

    /// Submit recorded work.
    ///
    /// The backend must eventually call [`Submission::complete`], which signals
    /// the fence, presents and runs the graph's completion handlers.
    fn submit(&self, submission: Submission) -> Result<(), GraphicsError>;
}

/// Selects and creates the appropriate backend based on available features.
pub fn create_backend() -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    #[cfg(feature = "dummy")]
    {
        log::info!("Using dummy backend");
        return Ok(Arc::new(DummyBackend::new()));
    }

    #[allow(unreachable_code)]
    Err(GraphicsError::InitializationFailed(
        "no GPU backend enabled".to_string(),
    ))
}
