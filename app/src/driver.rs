//! Synthetic camera and tracking source.
//!
//! Produces bi-planar camera frames with a moving luma ramp and a face that
//! circles the image center once every four seconds.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use facelens_graphics::{
    GraphicsDevice, GraphicsError, PixelBuffer, PixelFormat, TextureDescriptor, TextureFormat,
    TextureUsage,
};
use facelens_renderer::{
    Anchor, BlendShapes, CameraFrame, CameraIntrinsics, CameraPose, ExportedFrame, FaceAnchor,
    FaceMesh, LightEstimate, LutKind, MaskInfo, MaskKind, MeshHandle, OverlayAsset,
    OverlaySceneHandle, PixelBufferConsumer, RendererError, TrackingUpdate,
};
use glam::{Mat4, UVec2, Vec2, Vec3};

const ORBIT_PERIOD_SECONDS: f64 = 4.0;
const ORBIT_RADIUS: f32 = 0.05;
const FACE_DISTANCE: f32 = 0.45;

pub struct SyntheticSource {
    resolution: UVec2,
    fps: f64,
    frame: u64,
    mesh: Arc<FaceMesh>,
}

impl SyntheticSource {
    pub fn new(resolution: UVec2, fps: f64) -> Self {
        Self {
            resolution,
            fps,
            frame: 0,
            mesh: Arc::new(face_grid(8)),
        }
    }

    fn timestamp(&self) -> f64 {
        self.frame as f64 / self.fps
    }

    /// Next camera image.
    pub fn camera_frame(&self) -> Result<CameraFrame, GraphicsError> {
        let buffer = PixelBuffer::new(
            self.resolution.x,
            self.resolution.y,
            PixelFormat::YCbCr420BiPlanar,
        )?;
        let row = buffer.bytes_per_row() as usize;
        let luma: Vec<u8> = (0..row * self.resolution.y as usize)
            .map(|i| ((i % row) as u64 + self.frame) as u8)
            .collect();
        buffer.write_plane(0, &luma)?;
        Ok(CameraFrame::new(Arc::new(buffer), self.timestamp()))
    }

    /// Tracking result for the current frame.
    pub fn tracking_update(&self) -> TrackingUpdate {
        let phase = (self.timestamp() / ORBIT_PERIOD_SECONDS * std::f64::consts::TAU) as f32;
        let position = Vec3::new(
            ORBIT_RADIUS * phase.cos(),
            ORBIT_RADIUS * phase.sin(),
            -FACE_DISTANCE,
        );
        let focal = self.resolution.x as f32 * 0.75;

        TrackingUpdate {
            timestamp: self.timestamp(),
            camera: CameraPose {
                view_matrix: Mat4::IDENTITY,
                image_resolution: self.resolution,
            },
            anchors: vec![Anchor::Face(FaceAnchor {
                transform: Mat4::from_translation(position),
                is_tracked: true,
                mesh: Arc::clone(&self.mesh),
                intrinsics: Some(CameraIntrinsics {
                    fx: focal,
                    fy: focal,
                    cx: self.resolution.x as f32 / 2.0,
                    cy: self.resolution.y as f32 / 2.0,
                }),
                blend_shapes: BlendShapes::new()
                    .with(BlendShapes::JAW_OPEN, 0.5 + 0.5 * phase.sin()),
            })],
            light_estimate: Some(LightEstimate {
                ambient_intensity: 1000.0,
                ambient_color_temperature: 6500.0,
                primary_intensity: Some(0.8),
                primary_direction: Some(Vec3::new(0.0, -1.0, -1.0)),
            }),
        }
    }

    pub fn advance(&mut self) {
        self.frame += 1;
    }
}

/// A flat `n`x`n` vertex grid facing the camera.
fn face_grid(n: u16) -> FaceMesh {
    let step = 1.0 / f32::from(n - 1);
    let mut vertices = Vec::new();
    let mut texture_coordinates = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let uv = Vec2::new(f32::from(x) * step, f32::from(y) * step);
            vertices.push(Vec3::new((uv.x - 0.5) * 0.16, (0.5 - uv.y) * 0.2, 0.0));
            texture_coordinates.push(uv);
        }
    }
    let mut indices = Vec::new();
    for y in 0..n - 1 {
        for x in 0..n - 1 {
            let i = y * n + x;
            indices.extend_from_slice(&[i, i + 1, i + n, i + n, i + 1, i + n + 1]);
        }
    }
    FaceMesh {
        vertices,
        texture_coordinates,
        indices,
    }
}

/// Demo overlay with a warm world LUT.
pub fn demo_overlay(
    device: &Arc<GraphicsDevice>,
    name: &str,
) -> Result<Arc<OverlayAsset>, RendererError> {
    let lut = device.create_texture(
        &TextureDescriptor::new_2d(
            64,
            64,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        )
        .with_label(format!("{name}_world_lut")),
    )?;
    OverlayAsset::builder(MaskInfo::new(1, name, MaskKind::Mask), MeshHandle(1))
        .with_overlay_scene(OverlaySceneHandle(format!("{name}_scene")))
        .with_lookup_table(LutKind::World, lut)
        .build()
}

/// Counts exported frames.
#[derive(Debug, Default)]
pub struct CountingConsumer {
    received: AtomicU64,
}

impl CountingConsumer {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl PixelBufferConsumer for CountingConsumer {
    fn rendered_output(&self, frame: ExportedFrame) {
        let count = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!(
            "Exported frame {count} at {:.3}s ({}x{})",
            frame.timestamp,
            frame.width,
            frame.height
        );
    }
}
