//! The frame loop.
//!
//! [`Renderer::render_frame`] runs once per display refresh on the render
//! thread:
//!
//! 1. apply control commands queued through [`RendererHandle`];
//! 2. take the latest tracking snapshot and pose the scene;
//! 3. resolve viewport changes;
//! 4. acquire a frame slot, blocking while the GPU is too far behind;
//! 5. encode every step into one render graph and submit it;
//! 6. finish a pending overlay swap.
//!
//! Resources the GPU may still read are moved into the graph and released by
//! its completion handlers, together with the frame slot.

use std::sync::Arc;

use facelens_graphics::{
    FramePipeline, GraphicsDevice, GraphicsError, RenderGraph, ShaderLibrary, Surface,
    SurfaceConfiguration, TextureFormat,
};
use glam::UVec2;
use parking_lot::Mutex;

use crate::camera::{CameraFrame, CameraTextureBridge};
use crate::compositor::{Compositor, CompositorOptions, FrameEncodeReport, FrameInputs};
use crate::config::RendererConfig;
use crate::error::RendererError;
use crate::output::{OutputSink, PixelBufferConsumer, SnapshotCallback};
use crate::overlay::{OverlayAsset, SwapController};
use crate::scene::SceneGraph;
use crate::tracking::{SwapFlag, TrackingPublisher, TrackingState};
use crate::uniforms::ColorProcessingParameters;
use crate::viewport::ViewportManager;

/// Color format of the surface and intermediate targets.
pub const SURFACE_FORMAT: TextureFormat = TextureFormat::Bgra8Unorm;

/// Control requests accepted from any thread.
pub enum RendererCommand {
    Resize { width: u32, height: u32 },
    SwapOverlay(Arc<OverlayAsset>),
    ClearOverlay,
    SetTracking(bool),
    StartExport(Arc<dyn PixelBufferConsumer>),
    StopExport,
    CaptureSnapshot(SnapshotCallback),
    SetColorParameters(ColorProcessingParameters),
}

impl std::fmt::Debug for RendererCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resize { width, height } => write!(f, "Resize({width}x{height})"),
            Self::SwapOverlay(asset) => write!(f, "SwapOverlay({})", asset.name()),
            Self::ClearOverlay => write!(f, "ClearOverlay"),
            Self::SetTracking(enabled) => write!(f, "SetTracking({enabled})"),
            Self::StartExport(_) => write!(f, "StartExport"),
            Self::StopExport => write!(f, "StopExport"),
            Self::CaptureSnapshot(_) => write!(f, "CaptureSnapshot"),
            Self::SetColorParameters(params) => write!(f, "SetColorParameters({params:?})"),
        }
    }
}

/// Why a frame was not submitted.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Intermediate textures could not be allocated; retried next frame.
    Viewport(GraphicsError),
    /// No surface image could be acquired.
    Surface(GraphicsError),
    /// The device rejected the submission.
    Submit(GraphicsError),
}

/// Result of one [`Renderer::render_frame`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Rendered(FrameEncodeReport),
    Skipped(SkipReason),
}

impl FrameOutcome {
    pub fn report(&self) -> Option<&FrameEncodeReport> {
        match self {
            Self::Rendered(report) => Some(report),
            Self::Skipped(_) => None,
        }
    }

    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }
}

/// Cloneable control surface for threads other than the render thread.
///
/// Commands are queued and applied at the start of the next frame.
#[derive(Clone)]
pub struct RendererHandle {
    commands: Arc<Mutex<Vec<RendererCommand>>>,
    tracking: TrackingPublisher,
}

impl RendererHandle {
    fn push(&self, command: RendererCommand) {
        self.commands.lock().push(command);
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.push(RendererCommand::Resize { width, height });
    }

    pub fn swap_overlay(&self, asset: Arc<OverlayAsset>) {
        self.push(RendererCommand::SwapOverlay(asset));
    }

    pub fn clear_overlay(&self) {
        self.push(RendererCommand::ClearOverlay);
    }

    pub fn set_tracking(&self, enabled: bool) {
        self.push(RendererCommand::SetTracking(enabled));
    }

    pub fn start_export(&self, consumer: Arc<dyn PixelBufferConsumer>) {
        self.push(RendererCommand::StartExport(consumer));
    }

    pub fn stop_export(&self) {
        self.push(RendererCommand::StopExport);
    }

    pub fn capture_snapshot(&self, callback: impl FnOnce(crate::ExportedFrame) + Send + 'static) {
        self.push(RendererCommand::CaptureSnapshot(Box::new(callback)));
    }

    pub fn set_color_parameters(&self, parameters: ColorProcessingParameters) {
        self.push(RendererCommand::SetColorParameters(parameters));
    }

    /// Publisher for the tracking source.
    pub fn tracking(&self) -> &TrackingPublisher {
        &self.tracking
    }
}

impl std::fmt::Debug for RendererHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererHandle")
            .field("queued", &self.commands.lock().len())
            .finish()
    }
}

/// The face-filter renderer.
pub struct Renderer {
    device: Arc<GraphicsDevice>,
    config: RendererConfig,
    surface: Surface,
    frame_pipeline: FramePipeline,
    compositor: Compositor,
    camera_bridge: CameraTextureBridge,
    tracking: Arc<TrackingState>,
    overlay: SwapController,
    scene: SceneGraph,
    viewport: ViewportManager,
    output: OutputSink,
    color_parameters: ColorProcessingParameters,
    retired: Vec<Arc<OverlayAsset>>,
    commands: Arc<Mutex<Vec<RendererCommand>>>,
    last_frame_time: Option<f64>,
    frames_rendered: u64,
}

impl Renderer {
    /// Create a renderer on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the surface,
    /// per-slot buffers or export thread cannot be created. Missing shader
    /// functions are not an error; the affected steps are disabled.
    pub fn new(
        device: Arc<GraphicsDevice>,
        config: RendererConfig,
        library: &ShaderLibrary,
    ) -> Result<Self, RendererError> {
        config.validate()?;
        let size = UVec2::new(config.viewport.width, config.viewport.height);

        let surface = Surface::new(
            Arc::clone(&device),
            SurfaceConfiguration::new(size.x, size.y).with_format(SURFACE_FORMAT),
        )?;
        let compositor = Compositor::new(
            &device,
            library,
            CompositorOptions::from_config(&config, SURFACE_FORMAT),
        )?;

        let swap_flag = SwapFlag::new();
        let tracking = TrackingState::new(config.world_anchor_id.clone(), swap_flag.clone());
        let overlay = SwapController::new(swap_flag, config.tracking_fade_seconds);
        let output = OutputSink::new(&config.export_thread_name)?;

        log::info!(
            "Renderer created: {}x{}, {} frames in flight",
            size.x,
            size.y,
            config.frames_in_flight
        );

        Ok(Self {
            camera_bridge: CameraTextureBridge::new(Arc::clone(&device)),
            frame_pipeline: FramePipeline::new(config.frames_in_flight),
            viewport: ViewportManager::new(size)
                .with_denoise(compositor.pipelines().denoise.is_some()),
            scene: SceneGraph::new(),
            color_parameters: ColorProcessingParameters::default(),
            retired: Vec::new(),
            commands: Arc::new(Mutex::new(Vec::new())),
            last_frame_time: None,
            frames_rendered: 0,
            device,
            config,
            surface,
            compositor,
            tracking,
            overlay,
            output,
        })
    }

    /// Handle for controlling the renderer from other threads.
    pub fn handle(&self) -> RendererHandle {
        RendererHandle {
            commands: Arc::clone(&self.commands),
            tracking: self.tracking.publisher(),
        }
    }

    pub fn publisher(&self) -> TrackingPublisher {
        self.tracking.publisher()
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn tracking(&self) -> &Arc<TrackingState> {
        &self.tracking
    }

    pub fn overlay(&self) -> &SwapController {
        &self.overlay
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn viewport(&self) -> &ViewportManager {
        &self.viewport
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn frame_pipeline(&self) -> &FramePipeline {
        &self.frame_pipeline
    }

    pub fn color_parameters(&self) -> ColorProcessingParameters {
        self.color_parameters
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Assets retired by a swap and waiting for the next submission.
    pub fn retired_assets(&self) -> usize {
        self.retired.len()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport.on_resize(width, height);
    }

    pub fn swap_overlay(&mut self, asset: Arc<OverlayAsset>) {
        self.overlay.swap_overlay(asset, &mut self.scene);
    }

    pub fn clear_overlay(&mut self) {
        self.overlay.clear_overlay(&mut self.scene);
    }

    pub fn set_tracking(&mut self, enabled: bool) {
        self.overlay.set_tracking(enabled, &mut self.scene);
    }

    pub fn start_export(&mut self, consumer: Arc<dyn PixelBufferConsumer>) {
        self.output.start_export(consumer);
    }

    pub fn stop_export(&mut self) {
        self.output.stop_export();
    }

    pub fn capture_snapshot(
        &mut self,
        callback: impl FnOnce(crate::ExportedFrame) + Send + 'static,
    ) {
        self.output.capture_snapshot(Box::new(callback));
    }

    pub fn set_color_parameters(&mut self, parameters: ColorProcessingParameters) {
        self.color_parameters = parameters;
    }

    fn apply(&mut self, command: RendererCommand) {
        log::trace!("Applying {command:?}");
        match command {
            RendererCommand::Resize { width, height } => self.resize(width, height),
            RendererCommand::SwapOverlay(asset) => self.swap_overlay(asset),
            RendererCommand::ClearOverlay => self.clear_overlay(),
            RendererCommand::SetTracking(enabled) => self.set_tracking(enabled),
            RendererCommand::StartExport(consumer) => self.start_export(consumer),
            RendererCommand::StopExport => self.stop_export(),
            RendererCommand::CaptureSnapshot(callback) => self.output.capture_snapshot(callback),
            RendererCommand::SetColorParameters(parameters) => {
                self.set_color_parameters(parameters)
            }
        }
    }

    fn advance_frame_time(&mut self, time: f64) -> f32 {
        let dt = self
            .last_frame_time
            .map_or(0.0, |last| (time - last).max(0.0) as f32);
        self.last_frame_time = Some(time);
        dt
    }

    /// Render one frame.
    ///
    /// Blocks while `frames_in_flight` earlier frames are still on the GPU.
    /// Never panics on missing or malformed frame data; affected steps are
    /// left out of the frame instead.
    pub fn render_frame(&mut self, camera: Option<&CameraFrame>) -> FrameOutcome {
        let commands = std::mem::take(&mut *self.commands.lock());
        for command in commands {
            self.apply(command);
        }

        let snapshot = self.tracking.snapshot();
        if let Some(face) = &snapshot.face {
            self.overlay.update_face_tracking(face.is_tracked, &mut self.scene);
            if face.is_tracked {
                self.scene.update_face(face.transform);
            }
        }
        if let Some(world) = snapshot.world_transform {
            self.scene.update_world(world);
        }
        if let Some(estimate) = &snapshot.light_estimate {
            self.scene.apply_light_estimate(estimate);
        }
        let frame_time = camera.map_or(snapshot.timestamp, |c| c.timestamp);
        let dt = self.advance_frame_time(frame_time);
        self.overlay.update_fade(dt, &mut self.scene);

        if let Some(camera) = camera
            && let Err(e) = self
                .output
                .configure(camera.pixel_buffer.width(), camera.pixel_buffer.height())
        {
            log::error!("Export pool unavailable: {e}");
        }

        match self
            .viewport
            .resolve(&self.device, camera.map(CameraFrame::resolution), SURFACE_FORMAT)
        {
            Ok(Some(change)) => {
                if change.size != UVec2::new(self.surface.width(), self.surface.height())
                    && let Err(e) = self.surface.resize(change.size.x, change.size.y)
                {
                    log::error!("Surface resize failed: {e}");
                    self.viewport.mark_dirty();
                    return FrameOutcome::Skipped(SkipReason::Surface(e));
                }
                log::debug!("Viewport resolved: {change:?}");
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Intermediate textures unavailable, frame skipped: {e}");
                return FrameOutcome::Skipped(SkipReason::Viewport(e));
            }
        }
        let Some(textures) = self.viewport.textures().cloned() else {
            return FrameOutcome::Skipped(SkipReason::Viewport(GraphicsError::Internal(
                "viewport resolved without textures".to_string(),
            )));
        };

        let slot = self.frame_pipeline.acquire_slot();
        let slot_index = slot.index();

        let surface_texture = match self.surface.acquire_texture() {
            Ok(texture) => texture,
            Err(e) => {
                log::error!("Surface image unavailable, frame skipped: {e}");
                return FrameOutcome::Skipped(SkipReason::Surface(e));
            }
        };

        let camera_textures = camera.and_then(|c| self.camera_bridge.bind(c));
        let export = if self.compositor.can_export() {
            self.output.prepare_export(&self.device, snapshot.timestamp)
        } else {
            None
        };

        let mut graph = RenderGraph::new(format!("frame_{}", slot.frame_number()));
        let report = self.compositor.encode(
            &mut graph,
            FrameInputs {
                slot: &slot,
                surface: &surface_texture,
                camera: camera_textures.as_ref(),
                textures: &textures,
                image_plane: self.viewport.image_plane(),
                tracking: &snapshot,
                overlay: &self.overlay,
                scene: &mut self.scene,
                color_parameters: self.overlay.grading_parameters(self.color_parameters),
                export_target: export.as_ref().map(|e| &e.texture),
            },
        );

        graph.retain(camera_textures);
        graph.retain(textures);
        let retired = std::mem::take(&mut self.retired);
        if !retired.is_empty() {
            log::debug!("{} retired overlay(s) released with this frame", retired.len());
        }
        graph.retain(retired);
        if let Some(export) = export {
            graph.retain(export.texture);
            let delivery = export.delivery;
            graph.add_completed_handler(move || delivery.deliver());
        }
        let release = slot.into_release();
        graph.add_completed_handler(move || release.release());

        match self.device.submit(graph) {
            Ok(fence) => self.frame_pipeline.end_frame(slot_index, fence),
            Err(e) => {
                log::error!("Frame submission failed: {e}");
                return FrameOutcome::Skipped(SkipReason::Submit(e));
            }
        }
        self.frames_rendered += 1;

        self.overlay.advance(
            &mut self.scene,
            &mut self.color_parameters,
            &mut self.viewport,
            &mut self.retired,
        );

        FrameOutcome::Rendered(report)
    }

    /// Block until every submitted frame has completed.
    pub fn wait_idle(&self) {
        self.frame_pipeline.wait_idle();
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("viewport", &self.viewport.size())
            .field("overlay", &self.overlay.state())
            .field("frames_rendered", &self.frames_rendered)
            .finish()
    }
}

static_assertions::assert_impl_all!(RendererHandle: Send, Sync);
static_assertions::assert_impl_all!(Renderer: Send);
