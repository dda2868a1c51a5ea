//! # FaceLens Graphics
//!
//! GPU abstraction for the FaceLens face-filter renderer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsInstance`] and [`GraphicsDevice`] - resource creation, pipelines and submission
//! - [`RenderGraph`] - one frame of passes recorded into labelled command groups
//! - [`FramePipeline`] - bounded frames in flight with blocking slot acquisition
//! - [`UniformRing`] and [`SlotRing`] - per-slot buffers for per-frame data
//! - [`PixelBuffer`] and [`PixelBufferPool`] - planar host images imported as textures
//! - [`GpuBackend`] - trait for backends, with the [`DummyBackend`] for headless runs
//!
//! ## Example
//!
//! ```ignore
//! use facelens_graphics::{FramePipeline, GraphicsInstance, RenderGraph};
//!
//! let device = GraphicsInstance::new()?.create_device()?;
//! let mut pipeline = FramePipeline::new(3);
//!
//! let slot = pipeline.acquire_slot();
//! let mut graph = RenderGraph::new("frame");
//! // ... record command groups ...
//! let release = slot.into_release();
//! graph.add_completed_handler(move || release.release());
//! let fence = device.submit(graph)?;
//! ```

pub mod backend;
pub mod device;
pub mod error;
pub mod graph;
pub mod instance;
pub mod pipeline;
pub mod resources;
pub mod scheduler;
pub mod shader;
pub mod swapchain;
pub mod types;

pub use backend::{CompletionMode, DummyBackend, GpuBackend};
pub use device::{DeviceCapabilities, GraphicsDevice};
pub use error::GraphicsError;
pub use graph::{
    BufferBinding, ColorAttachment, ComputePass, DepthStencilAttachment, DrawCommand,
    GraphSummary, GraphicsPass, GroupSummary, LoadOp, PassKind, PassSummary, RenderGraph,
    RenderTargetConfig,
};
pub use instance::GraphicsInstance;
pub use pipeline::{FramePipeline, FrameSlot, SlotRelease};
pub use resources::{
    Buffer, PixelBuffer, PixelBufferAttributes, PixelBufferPool, PixelFormat, PooledPixelBuffer,
    SlotRing, Texture, UniformRing,
};
pub use scheduler::{Fence, FenceStatus};
pub use shader::{
    BlendMode, ComputePipeline, ComputePipelineDescriptor, RenderPipeline,
    RenderPipelineDescriptor, ShaderLibrary,
};
pub use swapchain::{Surface, SurfaceConfiguration, SurfaceTexture};
pub use types::{
    BufferDescriptor, BufferUsage, ClearValue, Extent3d, IndexFormat, TextureDescriptor,
    TextureFormat, TextureUsage, Viewport,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// This should be called before using any graphics functionality.
pub fn init() {
    log::info!("FaceLens Graphics v{} initialized", VERSION);
}
