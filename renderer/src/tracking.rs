//! Tracking state shared between the tracking source and the render thread.
//!
//! The tracking source publishes [`TrackingUpdate`]s from its own thread
//! through a [`TrackingPublisher`]. Each update builds a new
//! [`TrackingSnapshot`] from the previous one and swaps it in under a single
//! lock, so the render thread always reads a consistent pose, mesh and light
//! estimate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use glam::{Mat4, UVec2, Vec2, Vec3};
use parking_lot::Mutex;

use crate::error::RendererError;

/// Maximum number of vertices in a face mesh.
pub const MAX_FACE_VERTICES: usize = 1220;
/// Number of indices in a face mesh (2304 triangles).
pub const MAX_FACE_INDICES: usize = 6912;

/// Pinhole camera intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

/// Camera pose for one tracking update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    /// World to view transform.
    pub view_matrix: Mat4,
    /// Resolution of the captured camera image.
    pub image_resolution: UVec2,
}

/// Scene lighting estimated by the tracking source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightEstimate {
    /// Ambient intensity in lumens; 1000 is neutral.
    pub ambient_intensity: f32,
    /// Ambient color temperature in Kelvin.
    pub ambient_color_temperature: f32,
    pub primary_intensity: Option<f32>,
    pub primary_direction: Option<Vec3>,
}

/// Triangle mesh of the tracked face in anchor space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceMesh {
    pub vertices: Vec<Vec3>,
    pub texture_coordinates: Vec<Vec2>,
    pub indices: Vec<u16>,
}

impl FaceMesh {
    /// Check the mesh against the fixed upload limits.
    pub fn validate(&self) -> Result<(), RendererError> {
        if self.vertices.len() > MAX_FACE_VERTICES {
            return Err(RendererError::InvalidAsset(format!(
                "face mesh has {} vertices, limit is {MAX_FACE_VERTICES}",
                self.vertices.len()
            )));
        }
        if self.indices.len() > MAX_FACE_INDICES {
            return Err(RendererError::InvalidAsset(format!(
                "face mesh has {} indices, limit is {MAX_FACE_INDICES}",
                self.indices.len()
            )));
        }
        if self.texture_coordinates.len() != self.vertices.len() {
            return Err(RendererError::InvalidAsset(format!(
                "face mesh has {} vertices but {} texture coordinates",
                self.vertices.len(),
                self.texture_coordinates.len()
            )));
        }
        if let Some(index) = self
            .indices
            .iter()
            .find(|&&i| usize::from(i) >= self.vertices.len())
        {
            return Err(RendererError::InvalidAsset(format!(
                "face mesh index {index} out of range"
            )));
        }
        Ok(())
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn texture_coordinate_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texture_coordinates)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Named blend shape coefficients in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlendShapes {
    coefficients: BTreeMap<String, f32>,
}

impl BlendShapes {
    pub const JAW_OPEN: &'static str = "jaw_open";
    pub const MOUTH_CLOSE: &'static str = "mouth_close";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f32) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f32) {
        self.coefficients.insert(name.into(), value.clamp(0.0, 1.0));
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.coefficients.get(name).copied()
    }

    /// How far the mouth is open, or `None` if the jaw is not tracked.
    ///
    /// Lips pressed together with an open jaw count as closed.
    pub fn mouth_openness(&self) -> Option<f32> {
        let jaw = self.get(Self::JAW_OPEN)?;
        let close = self.get(Self::MOUTH_CLOSE).unwrap_or(0.0);
        Some((jaw - close).clamp(0.0, 1.0))
    }
}

/// A tracked face as reported by the tracking source.
#[derive(Debug, Clone)]
pub struct FaceAnchor {
    /// Anchor to world transform.
    pub transform: Mat4,
    pub is_tracked: bool,
    pub mesh: Arc<FaceMesh>,
    pub intrinsics: Option<CameraIntrinsics>,
    pub blend_shapes: BlendShapes,
}

/// Any non-face anchor placed in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldAnchor {
    pub id: String,
    pub transform: Mat4,
}

#[derive(Debug, Clone)]
pub enum Anchor {
    Face(FaceAnchor),
    World(WorldAnchor),
}

/// One update from the tracking source.
#[derive(Debug, Clone)]
pub struct TrackingUpdate {
    pub timestamp: f64,
    pub camera: CameraPose,
    pub anchors: Vec<Anchor>,
    pub light_estimate: Option<LightEstimate>,
}

/// The face as last seen, in view space.
#[derive(Debug, Clone)]
pub struct TrackedFace {
    /// Anchor to view transform.
    pub transform: Mat4,
    pub mesh: Arc<FaceMesh>,
    pub is_tracked: bool,
    pub blend_shapes: BlendShapes,
}

/// Immutable view of the latest tracking data.
#[derive(Debug, Clone, Default)]
pub struct TrackingSnapshot {
    pub timestamp: f64,
    pub camera: Option<CameraPose>,
    pub face: Option<TrackedFace>,
    pub intrinsics: Option<CameraIntrinsics>,
    pub light_estimate: Option<LightEstimate>,
    /// Configured world anchor to view transform.
    pub world_transform: Option<Mat4>,
}

impl TrackingSnapshot {
    /// Returns true if a face pose exists and is currently tracked.
    pub fn is_tracked(&self) -> bool {
        self.face.as_ref().is_some_and(|f| f.is_tracked)
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.camera.map_or(Mat4::IDENTITY, |c| c.view_matrix)
    }
}

/// Flag raised by the swap controller while an overlay asset is being
/// replaced.
#[derive(Debug, Clone, Default)]
pub struct SwapFlag(Arc<AtomicBool>);

impl SwapFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Latest tracking data, shared between threads.
#[derive(Debug)]
pub struct TrackingState {
    snapshot: Mutex<Arc<TrackingSnapshot>>,
    world_anchor_id: Option<String>,
    swap_flag: SwapFlag,
    dropped_updates: AtomicU64,
}

impl TrackingState {
    pub fn new(world_anchor_id: Option<String>, swap_flag: SwapFlag) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(Arc::new(TrackingSnapshot::default())),
            world_anchor_id,
            swap_flag,
            dropped_updates: AtomicU64::new(0),
        })
    }

    /// Handle for the tracking source thread.
    pub fn publisher(self: &Arc<Self>) -> TrackingPublisher {
        TrackingPublisher {
            state: Arc::clone(self),
        }
    }

    /// Apply an update. Returns false if it was dropped because an overlay
    /// swap is in progress.
    pub fn update(&self, update: TrackingUpdate) -> bool {
        if self.swap_flag.is_set() {
            self.dropped_updates.fetch_add(1, Ordering::Relaxed);
            log::trace!(
                "Tracking update at {:.3}s dropped during overlay swap",
                update.timestamp
            );
            return false;
        }

        let mut guard = self.snapshot.lock();
        let mut next = TrackingSnapshot::clone(&guard);
        let view = update.camera.view_matrix;

        next.timestamp = update.timestamp;
        next.camera = Some(update.camera);
        next.light_estimate = update.light_estimate;

        for anchor in update.anchors {
            match anchor {
                Anchor::Face(face) => {
                    if next.intrinsics.is_none()
                        && face.is_tracked
                        && let Some(intrinsics) = face.intrinsics
                    {
                        log::debug!("Camera intrinsics captured: {intrinsics:?}");
                        next.intrinsics = Some(intrinsics);
                    }
                    next.face = Some(TrackedFace {
                        transform: view * face.transform,
                        mesh: face.mesh,
                        is_tracked: face.is_tracked,
                        blend_shapes: face.blend_shapes,
                    });
                }
                Anchor::World(world) => {
                    if self.world_anchor_id.as_deref() == Some(world.id.as_str()) {
                        next.world_transform = Some(view * world.transform);
                    }
                }
            }
        }

        *guard = Arc::new(next);
        true
    }

    pub fn snapshot(&self) -> Arc<TrackingSnapshot> {
        Arc::clone(&self.snapshot.lock())
    }

    pub fn is_tracked(&self) -> bool {
        self.snapshot.lock().is_tracked()
    }

    /// Number of updates dropped during overlay swaps.
    pub fn dropped_updates(&self) -> u64 {
        self.dropped_updates.load(Ordering::Relaxed)
    }
}

/// Cloneable handle for publishing tracking updates from any thread.
#[derive(Debug, Clone)]
pub struct TrackingPublisher {
    state: Arc<TrackingState>,
}

impl TrackingPublisher {
    pub fn publish(&self, update: TrackingUpdate) -> bool {
        self.state.update(update)
    }
}

static_assertions::assert_impl_all!(TrackingState: Send, Sync);
static_assertions::assert_impl_all!(TrackingPublisher: Send, Sync);
