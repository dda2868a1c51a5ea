//! # FaceLens Renderer
//!
//! Real-time face-filter compositor built on [`facelens_graphics`].
//!
//! Each frame the [`Renderer`] takes a camera image and the latest face
//! tracking data and records one render graph:
//!
//! - captured camera image and base presentation
//! - seven-pass skin smoothing on the tracked face
//! - composite and feedback into the captured image
//! - the active overlay scene, lit from the light estimate
//! - optional color grading
//! - readback into pooled pixel buffers for export
//!
//! Overlays are swapped in one frame at a time through [`SwapController`],
//! and resources the GPU may still read stay alive until the frame that used
//! them completes.
//!
//! ## Example
//!
//! ```ignore
//! use facelens_graphics::GraphicsInstance;
//! use facelens_renderer::{Renderer, RendererConfig, default_library};
//!
//! let device = GraphicsInstance::new()?.create_device()?;
//! let mut renderer = Renderer::new(device, RendererConfig::default(), &default_library())?;
//! let outcome = renderer.render_frame(Some(&camera_frame));
//! ```

pub mod camera;
pub mod compositor;
pub mod config;
pub mod error;
pub mod output;
pub mod overlay;
pub mod renderer;
pub mod scene;
pub mod tracking;
pub mod uniforms;
pub mod viewport;

pub use camera::{CameraFrame, CameraTextureBridge, CameraTextures};
pub use compositor::{
    Compositor, CompositorOptions, FrameEncodeReport, FrameInputs, PipelineStateSet,
    default_library, groups,
};
pub use config::{RendererConfig, ViewportConfig, load_config};
pub use error::RendererError;
pub use output::{ExportedFrame, OutputSink, PixelBufferConsumer, SnapshotCallback};
pub use overlay::{
    LutKind, MaskInfo, MaskKind, MaskTier, MaterialHandle, MeshHandle, OverlayAsset,
    OverlayAssetBuilder, OverlayState, SwapController,
};
pub use renderer::{FrameOutcome, Renderer, RendererCommand, RendererHandle, SkipReason};
pub use scene::{OverlaySceneHandle, SceneGraph, SceneLights, SceneNode};
pub use tracking::{
    Anchor, BlendShapes, CameraIntrinsics, CameraPose, FaceAnchor, FaceMesh, LightEstimate,
    TrackedFace, TrackingPublisher, TrackingSnapshot, TrackingState, TrackingUpdate, WorldAnchor,
};
pub use uniforms::{ColorProcessingParameters, FrameUniforms, SmoothingPassParameters};
pub use viewport::{IntermediateTextures, ViewportChange, ViewportManager};
