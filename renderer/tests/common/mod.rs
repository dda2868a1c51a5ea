//! Common utilities for renderer integration tests.
//!
//! Renderers run on the dummy backend. [`TestContext::manual`] keeps frames
//! on the simulated GPU until the test completes them.

use std::sync::{Arc, mpsc};

use facelens_graphics::{
    CompletionMode, DummyBackend, GraphicsDevice, GraphicsInstance, PixelBuffer, PixelFormat,
    Texture, TextureDescriptor, TextureFormat, TextureUsage,
};
use facelens_renderer::{
    Anchor, BlendShapes, CameraFrame, CameraIntrinsics, CameraPose, ExportedFrame, FaceAnchor,
    FaceMesh, LightEstimate, LutKind, MaskInfo, MaskKind, MeshHandle, OverlayAsset,
    OverlaySceneHandle, PixelBufferConsumer, Renderer, RendererConfig, TrackingUpdate,
    default_library,
};
use glam::{Mat4, UVec2, Vec2, Vec3};

/// Camera resolution used by [`TestContext::camera_frame`].
pub const CAMERA_SIZE: UVec2 = UVec2::new(1920, 1440);

/// Test context providing a device on a dummy backend.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub device: Arc<GraphicsDevice>,
}

impl TestContext {
    #[allow(dead_code)]
    pub fn immediate() -> Self {
        Self::with_mode(CompletionMode::Immediate)
    }

    #[allow(dead_code)]
    pub fn manual() -> Self {
        Self::with_mode(CompletionMode::Manual)
    }

    fn with_mode(mode: CompletionMode) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(DummyBackend::with_completion(mode));
        let instance = GraphicsInstance::with_backend(backend.clone());
        let device = instance.create_device().expect("Failed to create device");
        Self { backend, device }
    }

    /// Renderer with the full shader library.
    pub fn renderer(&self, config: RendererConfig) -> Renderer {
        Renderer::new(Arc::clone(&self.device), config, &default_library())
            .expect("Failed to create renderer")
    }

    /// A bi-planar camera image.
    pub fn camera_frame(&self, timestamp: f64) -> CameraFrame {
        let buffer =
            PixelBuffer::new(CAMERA_SIZE.x, CAMERA_SIZE.y, PixelFormat::YCbCr420BiPlanar)
                .expect("Failed to create pixel buffer");
        CameraFrame::new(Arc::new(buffer), timestamp)
    }

    /// A 16x16 lookup table texture.
    pub fn lookup_table(&self) -> Arc<Texture> {
        self.device
            .create_texture(
                &TextureDescriptor::new_2d(
                    16,
                    16,
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
                )
                .with_label("world_lut"),
            )
            .expect("Failed to create lookup table")
    }

    /// An overlay asset with a scene, optionally carrying a world LUT.
    pub fn asset(&self, id: u64, name: &str, world_lut: bool) -> Arc<OverlayAsset> {
        let info = MaskInfo::new(id, name, MaskKind::Mask);
        let mut builder = OverlayAsset::builder(info, MeshHandle(id))
            .with_overlay_scene(OverlaySceneHandle(format!("{name}_scene")));
        if world_lut {
            builder = builder.with_lookup_table(LutKind::World, self.lookup_table());
        }
        builder.build().expect("Failed to build asset")
    }
}

/// Default config with `frames_in_flight` slots.
pub fn config(frames_in_flight: usize) -> RendererConfig {
    RendererConfig {
        frames_in_flight,
        ..Default::default()
    }
}

/// A quad of two triangles.
pub fn face_mesh() -> Arc<FaceMesh> {
    Arc::new(FaceMesh {
        vertices: vec![
            Vec3::new(-0.1, -0.1, 0.0),
            Vec3::new(0.1, -0.1, 0.0),
            Vec3::new(-0.1, 0.1, 0.0),
            Vec3::new(0.1, 0.1, 0.0),
        ],
        texture_coordinates: vec![
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
        ],
        indices: vec![0, 1, 2, 2, 1, 3],
    })
}

/// A tracking update with a tracked face half a meter in front of the camera.
pub fn face_update(timestamp: f64, intrinsics: Option<CameraIntrinsics>) -> TrackingUpdate {
    TrackingUpdate {
        timestamp,
        camera: CameraPose {
            view_matrix: Mat4::IDENTITY,
            image_resolution: CAMERA_SIZE,
        },
        anchors: vec![Anchor::Face(FaceAnchor {
            transform: Mat4::from_translation(Vec3::new(0.0, 0.0, -0.5)),
            is_tracked: true,
            mesh: face_mesh(),
            intrinsics,
            blend_shapes: BlendShapes::new(),
        })],
        light_estimate: Some(LightEstimate {
            ambient_intensity: 1000.0,
            ambient_color_temperature: 6500.0,
            primary_intensity: None,
            primary_direction: None,
        }),
    }
}

/// Like [`face_update`], but the tracker has lost the face.
#[allow(dead_code)]
pub fn lost_face_update(timestamp: f64) -> TrackingUpdate {
    let mut update = face_update(timestamp, None);
    for anchor in &mut update.anchors {
        if let Anchor::Face(face) = anchor {
            face.is_tracked = false;
        }
    }
    update
}

pub fn intrinsics(fx: f32) -> CameraIntrinsics {
    CameraIntrinsics {
        fx,
        fy: fx,
        cx: CAMERA_SIZE.x as f32 / 2.0,
        cy: CAMERA_SIZE.y as f32 / 2.0,
    }
}

/// Forwards exported frames to a channel.
pub struct ChannelConsumer(pub parking_lot::Mutex<mpsc::Sender<ExportedFrame>>);

impl ChannelConsumer {
    #[allow(dead_code)]
    pub fn new() -> (Arc<Self>, mpsc::Receiver<ExportedFrame>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self(parking_lot::Mutex::new(tx))), rx)
    }
}

impl PixelBufferConsumer for ChannelConsumer {
    fn rendered_output(&self, frame: ExportedFrame) {
        let _ = self.0.lock().send(frame);
    }
}
