//! Per-frame multi-pass compositing.
//!
//! The [`Compositor`] records one frame as a [`RenderGraph`] of up to nine
//! labelled command groups, always in this order:
//!
//! ```text
//! CapturedImage -> BasePresent -> SkinSmoothing -> Composite -> FeedbackComposite
//!     -> OverlayScene -> ColorGrading -> Readback -> Present
//! ```
//!
//! Steps whose inputs are missing this frame are left out; the remaining
//! ones keep their relative order. All hazards between passes are resolved
//! by that order within the single submission.

use std::sync::Arc;

use facelens_graphics::{
    BlendMode, BufferUsage, ClearValue, ColorAttachment, ComputePass, ComputePipeline,
    ComputePipelineDescriptor, DepthStencilAttachment, DrawCommand, FrameSlot, GraphicsDevice,
    GraphicsError, GraphicsPass, IndexFormat, LoadOp, RenderGraph, RenderPipeline,
    RenderPipelineDescriptor, RenderTargetConfig, ShaderLibrary, SlotRing, SurfaceTexture,
    Texture, TextureDescriptor, TextureFormat, TextureUsage, UniformRing, Viewport,
};
use glam::UVec2;

use crate::camera::CameraTextures;
use crate::config::RendererConfig;
use crate::error::RendererError;
use crate::overlay::{LutKind, SwapController};
use crate::scene::SceneGraph;
use crate::tracking::{MAX_FACE_INDICES, MAX_FACE_VERTICES, TrackedFace, TrackingSnapshot};
use crate::uniforms::{
    ColorProcessingParameters, FrameUniforms, SmoothingPassParameters, projection_matrix,
};
use crate::viewport::{DEPTH_STENCIL_FORMAT, IMAGE_PLANE_FLOATS, IntermediateTextures};

/// Command group labels, in encoding order.
pub mod groups {
    pub const CAPTURED_IMAGE: &str = "CapturedImage";
    pub const BASE_PRESENT: &str = "BasePresent";
    pub const SKIN_SMOOTHING: &str = "SkinSmoothing";
    pub const COMPOSITE: &str = "Composite";
    pub const FEEDBACK_COMPOSITE: &str = "FeedbackComposite";
    pub const OVERLAY_SCENE: &str = "OverlayScene";
    pub const COLOR_GRADING: &str = "ColorGrading";
    pub const READBACK: &str = "Readback";
    pub const PRESENT: &str = "Present";

    pub const ALL: [&str; 9] = [
        CAPTURED_IMAGE,
        BASE_PRESENT,
        SKIN_SMOOTHING,
        COMPOSITE,
        FEEDBACK_COMPOSITE,
        OVERLAY_SCENE,
        COLOR_GRADING,
        READBACK,
        PRESENT,
    ];
}

/// Skin smoothing sub-passes as `(smoothing texture, clear)`.
///
/// The pass index handed to the shader is the position in this table.
pub const SMOOTHING_PASS_INSTRUCTIONS: [(usize, bool); 7] = [
    (1, true),
    (2, true),
    (3, true),
    (4, true),
    (2, false),
    (3, false),
    (0, true),
];

/// Shader entry points the compositor looks up.
pub mod functions {
    pub const CAPTURED_IMAGE_VERTEX: &str = "capturedImageVertexFunction";
    pub const CAPTURED_IMAGE_FRAGMENT: &str = "capturedImageFragmentFunction";
    pub const COMPOSITE_VERTEX: &str = "compositeVertexFunction";
    pub const COMPOSITE_FRAGMENT: &str = "compositeFragmentFunction";
    pub const RETOUCH_VERTEX: &str = "retouchVertexFunction";
    pub const RETOUCH_FRAGMENT: &str = "retouchFragmentFunction";
    pub const COLOR_PROCESSING_VERTEX: &str = "colorProcessingVertexFunction";
    pub const COLOR_PROCESSING_FRAGMENT: &str = "colorProcessingFragmentFunction";
    pub const EXPORT_VERTEX: &str = "cvVertexFunction";
    pub const EXPORT_FRAGMENT: &str = "cvFragmentFunction";
    pub const SCENE_VERTEX: &str = "sceneVertexFunction";
    pub const SCENE_FRAGMENT: &str = "sceneFragmentFunction";
    pub const DENOISE_KERNEL: &str = "denoiseKernel";

    pub const ALL: [&str; 13] = [
        CAPTURED_IMAGE_VERTEX,
        CAPTURED_IMAGE_FRAGMENT,
        COMPOSITE_VERTEX,
        COMPOSITE_FRAGMENT,
        RETOUCH_VERTEX,
        RETOUCH_FRAGMENT,
        COLOR_PROCESSING_VERTEX,
        COLOR_PROCESSING_FRAGMENT,
        EXPORT_VERTEX,
        EXPORT_FRAGMENT,
        SCENE_VERTEX,
        SCENE_FRAGMENT,
        DENOISE_KERNEL,
    ];
}

/// Library exposing every entry point the compositor uses.
pub fn default_library() -> ShaderLibrary {
    ShaderLibrary::new("facelens", functions::ALL)
}

const DENOISE_WORKGROUP_SIZE: u32 = 8;

/// Pipelines built once at startup.
///
/// An entry that fails to build is logged and stays `None` for the lifetime
/// of the process; its step is never encoded.
#[derive(Debug, Default)]
pub struct PipelineStateSet {
    pub captured_image: Option<Arc<RenderPipeline>>,
    pub composite: Option<Arc<RenderPipeline>>,
    pub skin_smoothing: Option<Arc<RenderPipeline>>,
    pub color_processing: Option<Arc<RenderPipeline>>,
    pub export_convert: Option<Arc<RenderPipeline>>,
    pub overlay_scene: Option<Arc<RenderPipeline>>,
    pub denoise: Option<Arc<ComputePipeline>>,
}

impl PipelineStateSet {
    /// Build every pipeline from `library`. The denoise kernel is only
    /// looked up when `denoise` is set.
    pub fn new(
        device: &GraphicsDevice,
        library: &ShaderLibrary,
        color_format: TextureFormat,
        denoise: bool,
    ) -> Self {
        use functions::*;

        let render = |descriptor: RenderPipelineDescriptor| {
            let label = descriptor.label.clone();
            device
                .create_render_pipeline(library, &descriptor)
                .map_err(|e| log::error!("Pipeline '{label}' disabled: {e}"))
                .ok()
        };

        let denoise = if denoise {
            device
                .create_compute_pipeline(
                    library,
                    &ComputePipelineDescriptor::new("denoise", DENOISE_KERNEL),
                )
                .map_err(|e| log::error!("Pipeline 'denoise' disabled: {e}"))
                .ok()
        } else {
            None
        };

        let set = Self {
            captured_image: render(
                RenderPipelineDescriptor::new(
                    "captured_image",
                    CAPTURED_IMAGE_VERTEX,
                    CAPTURED_IMAGE_FRAGMENT,
                )
                .with_color_format(color_format),
            ),
            composite: render(
                RenderPipelineDescriptor::new("composite", COMPOSITE_VERTEX, COMPOSITE_FRAGMENT)
                    .with_color_format(color_format)
                    .with_blend(BlendMode::Alpha),
            ),
            skin_smoothing: render(
                RenderPipelineDescriptor::new("skin_smoothing", RETOUCH_VERTEX, RETOUCH_FRAGMENT)
                    .with_color_format(color_format),
            ),
            color_processing: render(
                RenderPipelineDescriptor::new(
                    "color_processing",
                    COLOR_PROCESSING_VERTEX,
                    COLOR_PROCESSING_FRAGMENT,
                )
                .with_color_format(color_format),
            ),
            export_convert: render(
                RenderPipelineDescriptor::new("export_convert", EXPORT_VERTEX, EXPORT_FRAGMENT)
                    .with_color_format(TextureFormat::Bgra8Unorm),
            ),
            overlay_scene: render(
                RenderPipelineDescriptor::new("overlay_scene", SCENE_VERTEX, SCENE_FRAGMENT)
                    .with_color_format(color_format)
                    .with_depth_stencil_format(DEPTH_STENCIL_FORMAT)
                    .with_blend(BlendMode::Alpha),
            ),
            denoise,
        };

        log::info!(
            "Pipeline state set built: {} of {} render pipelines available",
            set.available_render_pipelines(),
            6
        );
        set
    }

    fn available_render_pipelines(&self) -> usize {
        [
            &self.captured_image,
            &self.composite,
            &self.skin_smoothing,
            &self.color_processing,
            &self.export_convert,
            &self.overlay_scene,
        ]
        .iter()
        .filter(|p| p.is_some())
        .count()
    }
}

/// Which optional steps the compositor may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorOptions {
    pub frames_in_flight: usize,
    pub color_format: TextureFormat,
    pub skin_smoothing: bool,
    pub denoise: bool,
    pub color_grading: bool,
}

impl CompositorOptions {
    pub fn from_config(config: &RendererConfig, color_format: TextureFormat) -> Self {
        Self {
            frames_in_flight: config.frames_in_flight,
            color_format,
            skin_smoothing: config.skin_smoothing,
            denoise: config.denoise,
            color_grading: config.color_grading,
        }
    }
}

/// Steps encoded for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameEncodeReport {
    pub denoise: bool,
    pub captured_image: bool,
    pub base_present: bool,
    pub skin_smoothing: bool,
    pub composite: bool,
    pub feedback_composite: bool,
    pub overlay_scene: bool,
    pub color_grading: bool,
    pub readback: bool,
    pub present: bool,
}

impl FrameEncodeReport {
    /// Labels of the encoded command groups in order.
    pub fn encoded_groups(&self) -> Vec<&'static str> {
        let flags = [
            self.captured_image,
            self.base_present,
            self.skin_smoothing,
            self.composite,
            self.feedback_composite,
            self.overlay_scene,
            self.color_grading,
            self.readback,
            self.present,
        ];
        groups::ALL
            .iter()
            .zip(flags)
            .filter_map(|(label, encoded)| encoded.then_some(*label))
            .collect()
    }
}

/// Everything one frame is composited from.
pub struct FrameInputs<'a> {
    pub slot: &'a FrameSlot,
    pub surface: &'a SurfaceTexture,
    pub camera: Option<&'a CameraTextures>,
    pub textures: &'a IntermediateTextures,
    pub image_plane: &'a [f32; IMAGE_PLANE_FLOATS],
    pub tracking: &'a TrackingSnapshot,
    pub overlay: &'a SwapController,
    pub scene: &'a mut SceneGraph,
    pub color_parameters: ColorProcessingParameters,
    /// Readback target imported from an export pixel buffer.
    pub export_target: Option<&'a Arc<Texture>>,
}

/// Encodes frames against a fixed [`PipelineStateSet`].
pub struct Compositor {
    pipelines: PipelineStateSet,
    options: CompositorOptions,
    frame_uniforms: UniformRing<FrameUniforms>,
    image_plane: SlotRing,
    face_vertices: SlotRing,
    face_texture_coordinates: SlotRing,
    face_indices: SlotRing,
    default_skin_mask: Arc<Texture>,
}

impl Compositor {
    /// Build the pipelines and per-slot buffers.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        library: &ShaderLibrary,
        options: CompositorOptions,
    ) -> Result<Self, GraphicsError> {
        let pipelines =
            PipelineStateSet::new(device, library, options.color_format, options.denoise);
        let slots = options.frames_in_flight;

        let ring = |size: usize, usage: BufferUsage, label: &str| {
            SlotRing::new(device, slots, size as u64, usage, label)
        };

        let default_skin_mask = device.create_texture(
            &TextureDescriptor::new_2d(
                1,
                1,
                TextureFormat::R8Unorm,
                TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            )
            .with_label("default_skin_mask"),
        )?;

        Ok(Self {
            frame_uniforms: UniformRing::new(device, slots, "frame_uniforms")?,
            image_plane: ring(
                IMAGE_PLANE_FLOATS * std::mem::size_of::<f32>(),
                BufferUsage::VERTEX,
                "image_plane",
            )?,
            face_vertices: ring(MAX_FACE_VERTICES * 12, BufferUsage::VERTEX, "face_vertices")?,
            face_texture_coordinates: ring(
                MAX_FACE_VERTICES * 8,
                BufferUsage::VERTEX,
                "face_texture_coordinates",
            )?,
            face_indices: ring(MAX_FACE_INDICES * 2, BufferUsage::INDEX, "face_indices")?,
            default_skin_mask,
            pipelines,
            options,
        })
    }

    pub fn pipelines(&self) -> &PipelineStateSet {
        &self.pipelines
    }

    pub fn options(&self) -> &CompositorOptions {
        &self.options
    }

    /// Returns true if a readback pass can be encoded, so export buffers
    /// are only taken when they will be filled.
    pub fn can_export(&self) -> bool {
        self.pipelines.export_convert.is_some()
    }

    /// Record all steps for one frame into `graph`.
    pub fn encode(
        &self,
        graph: &mut RenderGraph,
        mut frame: FrameInputs<'_>,
    ) -> FrameEncodeReport {
        let mut report = FrameEncodeReport::default();
        let textures = frame.textures;
        let viewport = textures.size();
        let full_viewport = Viewport::from_dimensions(viewport.x, viewport.y);

        if let Err(e) = self.image_plane.write(
            frame.slot,
            0,
            bytemuck::cast_slice(frame.image_plane.as_slice()),
        ) {
            log::error!("Failed to upload image plane: {e}");
        }

        // 1. Camera image into the captured image texture.
        if let (Some(camera), Some(pipeline)) = (frame.camera, &self.pipelines.captured_image) {
            graph.begin_group(groups::CAPTURED_IMAGE);
            let mut luma = &camera.luma;
            if self.options.denoise
                && let Some(denoise) = &self.pipelines.denoise
                && let Some(denoised) = &textures.denoised_luma
                && denoised.size() == camera.luma.size()
            {
                let mut pass = ComputePass::new("denoise", Arc::clone(denoise));
                pass.add_texture(Arc::clone(&camera.luma));
                pass.add_storage_texture(Arc::clone(denoised));
                pass.dispatch(
                    denoised.width().div_ceil(DENOISE_WORKGROUP_SIZE),
                    denoised.height().div_ceil(DENOISE_WORKGROUP_SIZE),
                    1,
                );
                graph.add_compute_pass(pass);
                luma = denoised;
                report.denoise = true;
            }
            let target = ColorAttachment::from_texture(Arc::clone(&textures.captured_image))
                .with_load_op(LoadOp::DontCare);
            graph.add_graphics_pass(self.camera_pass(
                "captured_image",
                pipeline,
                target,
                luma,
                camera,
                &frame,
            ));
            graph.end_group();
            report.captured_image = true;

            // 2. The same image straight to the surface.
            graph.begin_group(groups::BASE_PRESENT);
            let target =
                ColorAttachment::from_surface(frame.surface).with_load_op(LoadOp::DontCare);
            graph.add_graphics_pass(self.camera_pass(
                "base_present",
                pipeline,
                target,
                luma,
                camera,
                &frame,
            ));
            graph.end_group();
            report.base_present = true;
        } else {
            log::trace!("No camera textures this frame, camera passes skipped");
        }

        // 3. Skin smoothing on the tracked face.
        report.skin_smoothing = self.encode_skin_smoothing(graph, &frame);

        // 4. Composite onto the surface.
        if let Some(pipeline) = &self.pipelines.composite {
            let source = if report.skin_smoothing {
                &textures.smoothing[0]
            } else {
                &textures.captured_image
            };
            graph.begin_group(groups::COMPOSITE);
            graph.add_graphics_pass(self.composite_pass(
                "composite",
                pipeline,
                ColorAttachment::from_surface(frame.surface),
                source,
                full_viewport,
                &frame,
            ));
            graph.end_group();
            report.composite = true;

            // 5. Feed the smoothed face back into the captured image.
            if report.skin_smoothing {
                graph.begin_group(groups::FEEDBACK_COMPOSITE);
                graph.add_graphics_pass(self.composite_pass(
                    "feedback_composite",
                    pipeline,
                    ColorAttachment::from_texture(Arc::clone(&textures.captured_image)),
                    &textures.smoothing[0],
                    full_viewport,
                    &frame,
                ));
                graph.end_group();
                report.feedback_composite = true;

                if frame.overlay.active().is_some_and(|a| a.needs_camera_texture())
                    && let Some(node) = frame.scene.face_node_mut()
                {
                    node.set_camera_texture(Some(Arc::clone(&textures.captured_image)));
                }
            }
        }

        // 6. Overlay scene.
        report.overlay_scene = self.encode_overlay_scene(graph, &frame, viewport);

        // 7. Color grading.
        report.color_grading = self.encode_color_grading(graph, &frame);

        // 8. Readback into the export buffer.
        let readback = (frame.export_target, &self.pipelines.export_convert);
        if let (Some(target), Some(pipeline)) = readback {
            graph.begin_group(groups::READBACK);
            let mut pass = GraphicsPass::new(
                "readback",
                Arc::clone(pipeline),
                RenderTargetConfig::new().with_color(
                    ColorAttachment::from_texture(Arc::clone(target))
                        .with_load_op(LoadOp::DontCare),
                ),
            )
            .with_viewport(Viewport::from_dimensions(target.width(), target.height()));
            pass.add_vertex_buffer(self.image_plane.binding(frame.slot));
            pass.add_texture(Arc::clone(frame.surface.texture()));
            pass.add_draw(DrawCommand::fullscreen_quad());
            graph.add_graphics_pass(pass);
            graph.end_group();
            report.readback = true;
        }

        // 9. Present.
        graph.begin_group(groups::PRESENT);
        graph.present(frame.surface);
        graph.end_group();
        report.present = true;

        log::trace!("Frame encoded: {:?}", report.encoded_groups());
        report
    }

    fn camera_pass(
        &self,
        name: &str,
        pipeline: &Arc<RenderPipeline>,
        target: ColorAttachment,
        luma: &Arc<Texture>,
        camera: &CameraTextures,
        frame: &FrameInputs<'_>,
    ) -> GraphicsPass {
        let mut pass = GraphicsPass::new(
            name,
            Arc::clone(pipeline),
            RenderTargetConfig::new().with_color(target),
        );
        pass.add_vertex_buffer(self.image_plane.binding(frame.slot));
        pass.add_texture(Arc::clone(luma));
        pass.add_texture(Arc::clone(&camera.chroma));
        pass.add_draw(DrawCommand::fullscreen_quad());
        pass
    }

    fn composite_pass(
        &self,
        name: &str,
        pipeline: &Arc<RenderPipeline>,
        target: ColorAttachment,
        source: &Arc<Texture>,
        viewport: Viewport,
        frame: &FrameInputs<'_>,
    ) -> GraphicsPass {
        let mut pass = GraphicsPass::new(
            name,
            Arc::clone(pipeline),
            RenderTargetConfig::new().with_color(target.with_load_op(LoadOp::Load)),
        )
        .with_viewport(viewport);
        pass.add_vertex_buffer(self.image_plane.binding(frame.slot));
        pass.add_texture(Arc::clone(source));
        pass.add_draw(DrawCommand::fullscreen_quad());
        pass
    }

    fn smoothing_face<'f>(&self, frame: &'f FrameInputs<'_>) -> Option<&'f TrackedFace> {
        if !self.options.skin_smoothing {
            return None;
        }
        let face = frame.tracking.face.as_ref()?;
        if !face.is_tracked {
            log::trace!("Skin smoothing skipped: face not tracked");
            return None;
        }
        if !frame.overlay.tracking_enabled() {
            log::trace!("Skin smoothing skipped: tracking disabled");
            return None;
        }
        if frame.overlay.is_swapping() || frame.overlay.active().is_none() {
            log::trace!("Skin smoothing skipped: no installed overlay");
            return None;
        }
        Some(face)
    }

    fn upload_face_mesh(&self, slot: &FrameSlot, face: &TrackedFace) -> Result<(), RendererError> {
        face.mesh.validate()?;
        let upload = |ring: &SlotRing, bytes: &[u8]| -> Result<(), GraphicsError> {
            ring.write(slot, 0, bytes)?;
            let rest = (ring.slot_size() as usize).saturating_sub(bytes.len());
            if rest > 0 {
                ring.write(slot, bytes.len() as u64, &vec![0; rest])?;
            }
            Ok(())
        };
        upload(&self.face_vertices, face.mesh.vertex_bytes())?;
        upload(
            &self.face_texture_coordinates,
            face.mesh.texture_coordinate_bytes(),
        )?;
        upload(&self.face_indices, face.mesh.index_bytes())?;
        Ok(())
    }

    fn encode_skin_smoothing(&self, graph: &mut RenderGraph, frame: &FrameInputs<'_>) -> bool {
        let Some(pipeline) = &self.pipelines.skin_smoothing else {
            return false;
        };
        let Some(face) = self.smoothing_face(frame) else {
            return false;
        };
        if let Err(e) = self.upload_face_mesh(frame.slot, face) {
            log::warn!("Skin smoothing skipped: {e}");
            return false;
        }

        let textures = frame.textures;
        let viewport = textures.size();
        let view = frame.tracking.view_matrix();
        let model = view.inverse() * face.transform;
        let image_resolution = frame
            .tracking
            .camera
            .map_or(viewport, |c| c.image_resolution);
        let skin_mask = frame
            .overlay
            .active()
            .and_then(|a| a.skin_mask())
            .unwrap_or(&self.default_skin_mask);

        graph.begin_group(groups::SKIN_SMOOTHING);
        for (pass_index, &(buffer, clear)) in SMOOTHING_PASS_INSTRUCTIONS.iter().enumerate() {
            let target = &textures.smoothing[buffer];
            let size = UVec2::new(target.width(), target.height());
            let load_op = if clear {
                LoadOp::Clear(ClearValue::transparent())
            } else {
                LoadOp::Load
            };

            let mut pass = GraphicsPass::new(
                format!("smoothing_pass_{pass_index}"),
                Arc::clone(pipeline),
                RenderTargetConfig::new().with_color(
                    ColorAttachment::from_texture(Arc::clone(target)).with_load_op(load_op),
                ),
            )
            .with_viewport(Viewport::from_dimensions(size.x, size.y));

            let parameters = SmoothingPassParameters::new(
                pass_index as u32,
                size,
                view,
                model,
                projection_matrix(frame.tracking.intrinsics.as_ref(), image_resolution, size),
            );
            pass.set_push_constants(&parameters);
            pass.add_vertex_buffer(self.face_vertices.binding(frame.slot));
            pass.add_vertex_buffer(self.face_texture_coordinates.binding(frame.slot));
            pass.add_texture(Arc::clone(&textures.captured_image));
            pass.add_texture(Arc::clone(skin_mask));
            for smoothing in &textures.smoothing[1..=4] {
                pass.add_texture(Arc::clone(smoothing));
            }
            pass.add_draw(DrawCommand::Indexed {
                index_buffer: self.face_indices.binding(frame.slot),
                index_format: IndexFormat::Uint16,
                index_count: MAX_FACE_INDICES as u32,
            });
            graph.add_graphics_pass(pass);
        }
        graph.end_group();
        true
    }

    fn encode_overlay_scene(
        &self,
        graph: &mut RenderGraph,
        frame: &FrameInputs<'_>,
        viewport: UVec2,
    ) -> bool {
        let Some(pipeline) = &self.pipelines.overlay_scene else {
            return false;
        };
        if frame.overlay.is_swapping() || frame.overlay.active().is_none() {
            return false;
        }

        let tracking = frame.tracking;
        let image_resolution = tracking.camera.map_or(viewport, |c| c.image_resolution);
        let uniforms = FrameUniforms::new(
            tracking.view_matrix(),
            projection_matrix(tracking.intrinsics.as_ref(), image_resolution, viewport),
            frame.scene.lights(),
        );
        if let Err(e) = self.frame_uniforms.write(frame.slot, &uniforms) {
            log::error!("Overlay scene skipped: {e}");
            return false;
        }

        let mut pass = GraphicsPass::new(
            "overlay_scene",
            Arc::clone(pipeline),
            RenderTargetConfig::new()
                .with_color(ColorAttachment::from_surface(frame.surface))
                .with_depth_stencil(DepthStencilAttachment::from_texture(Arc::clone(
                    &frame.textures.depth_stencil,
                ))),
        )
        .with_viewport(Viewport::from_dimensions(viewport.x, viewport.y));
        pass.add_uniform_buffer(self.frame_uniforms.binding(frame.slot));
        if let Some(texture) = frame.scene.face_node().and_then(|n| n.camera_texture()) {
            pass.add_texture(Arc::clone(texture));
        }
        for draw in frame.scene.visible_draws() {
            pass.add_draw(draw);
        }

        graph.begin_group(groups::OVERLAY_SCENE);
        graph.add_graphics_pass(pass);
        graph.end_group();
        true
    }

    fn encode_color_grading(&self, graph: &mut RenderGraph, frame: &FrameInputs<'_>) -> bool {
        if !self.options.color_grading {
            return false;
        }
        let Some(pipeline) = &self.pipelines.color_processing else {
            return false;
        };
        let lut = frame
            .overlay
            .grading_asset()
            .and_then(|a| a.lookup_table(LutKind::World));
        if lut.is_none() && !frame.color_parameters.adjusts_color() {
            return false;
        }

        let mut pass = GraphicsPass::new(
            "color_grading",
            Arc::clone(pipeline),
            RenderTargetConfig::new().with_color(ColorAttachment::from_surface(frame.surface)),
        );
        pass.add_vertex_buffer(self.image_plane.binding(frame.slot));
        if let Some(lut) = lut {
            pass.add_texture(Arc::clone(lut));
        }
        pass.set_push_constants(&frame.color_parameters);
        pass.add_draw(DrawCommand::fullscreen_quad());

        graph.begin_group(groups::COLOR_GRADING);
        graph.add_graphics_pass(pass);
        graph.end_group();
        true
    }
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("pipelines", &self.pipelines)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelens_graphics::{DeviceCapabilities, GraphicsInstance};

    fn device() -> Arc<GraphicsDevice> {
        GraphicsInstance::new().unwrap().create_device().unwrap()
    }

    #[test]
    fn test_pipeline_state_set_complete() {
        let set = PipelineStateSet::new(
            &device(),
            &default_library(),
            TextureFormat::Bgra8Unorm,
            true,
        );
        assert_eq!(set.available_render_pipelines(), 6);
        assert!(set.denoise.is_some());
        let overlay = set.overlay_scene.as_ref().unwrap();
        assert_eq!(
            overlay.descriptor().depth_stencil_format,
            Some(DEPTH_STENCIL_FORMAT)
        );
    }

    #[test]
    fn test_missing_function_disables_entry() {
        let library = default_library().without_function(functions::RETOUCH_FRAGMENT);
        let set = PipelineStateSet::new(&device(), &library, TextureFormat::Bgra8Unorm, false);
        assert!(set.skin_smoothing.is_none());
        assert!(set.composite.is_some());
        assert!(set.denoise.is_none());
    }

    #[test]
    fn test_denoise_needs_compute_support() {
        let device = GraphicsInstance::new()
            .unwrap()
            .create_device_with_capabilities(DeviceCapabilities {
                compute_shaders: false,
                ..Default::default()
            })
            .unwrap();
        let set =
            PipelineStateSet::new(&device, &default_library(), TextureFormat::Bgra8Unorm, true);
        assert!(set.denoise.is_none());
        assert!(set.captured_image.is_some());
    }

    #[test]
    fn test_smoothing_instructions() {
        let buffers: Vec<usize> = SMOOTHING_PASS_INSTRUCTIONS.iter().map(|(b, _)| *b).collect();
        assert_eq!(buffers, vec![1, 2, 3, 4, 2, 3, 0]);
        let clears = SMOOTHING_PASS_INSTRUCTIONS.iter().filter(|(_, c)| *c).count();
        assert_eq!(clears, 5);
    }

    #[test]
    fn test_report_groups_in_order() {
        let report = FrameEncodeReport {
            captured_image: true,
            composite: true,
            present: true,
            ..Default::default()
        };
        assert_eq!(
            report.encoded_groups(),
            vec![groups::CAPTURED_IMAGE, groups::COMPOSITE, groups::PRESENT]
        );
    }
}
