//! Viewport size and the intermediate textures that depend on it.
//!
//! Resize requests arrive at any time but only take effect in
//! [`ViewportManager::resolve`], which runs before anything is encoded for a
//! frame. Every texture a frame samples or renders into is therefore sized
//! for that frame's viewport.

use std::sync::Arc;

use facelens_graphics::{
    Extent3d, GraphicsDevice, GraphicsError, Texture, TextureDescriptor, TextureFormat,
    TextureUsage,
};
use glam::{UVec2, Vec2};

/// Scale of each smoothing texture relative to the viewport.
pub const SMOOTHING_SCALES: [f64; 5] = [1.0, 0.25, 0.2, 0.2, 0.2];

/// Format of the overlay scene's depth/stencil target.
pub const DEPTH_STENCIL_FORMAT: TextureFormat = TextureFormat::Depth32FloatStencil8;

/// Number of floats in the image-plane vertex data.
pub const IMAGE_PLANE_FLOATS: usize = 16;

/// Full-screen triangle strip as `x, y, u, v` per vertex, unrotated.
pub const IMAGE_PLANE_VERTICES: [f32; IMAGE_PLANE_FLOATS] = [
    -1.0, -1.0, 0.0, 1.0, //
    1.0, -1.0, 1.0, 1.0, //
    -1.0, 1.0, 0.0, 0.0, //
    1.0, 1.0, 1.0, 0.0,
];

/// Image-plane vertices that show a landscape camera image in a portrait
/// viewport with aspect fill.
///
/// The image is rotated a quarter turn so its long axis runs vertically,
/// then the overflowing axis is cropped symmetrically.
pub fn image_plane_vertices(camera: UVec2, viewport: UVec2) -> [f32; IMAGE_PLANE_FLOATS] {
    let mut vertices = IMAGE_PLANE_VERTICES;
    if camera.min_element() == 0 || viewport.min_element() == 0 {
        return vertices;
    }

    // On screen the rotated image measures camera.y wide and camera.x tall.
    let displayed = Vec2::new(camera.y as f32, camera.x as f32);
    let ratio = viewport.as_vec2() / displayed;
    let visible = ratio / ratio.max_element();

    for vertex in vertices.chunks_exact_mut(4) {
        let screen_x = vertex[2];
        let screen_y = vertex[3];
        vertex[2] = 0.5 + (screen_y - 0.5) * visible.y;
        vertex[3] = 0.5 + (0.5 - screen_x) * visible.x;
    }
    vertices
}

/// Render targets sized to the viewport.
#[derive(Debug, Clone)]
pub struct IntermediateTextures {
    /// The camera image converted to RGB at viewport size.
    pub captured_image: Arc<Texture>,
    /// Skin smoothing targets at [`SMOOTHING_SCALES`].
    pub smoothing: [Arc<Texture>; 5],
    pub depth_stencil: Arc<Texture>,
    /// Output of the denoise stage at camera resolution, when enabled.
    pub denoised_luma: Option<Arc<Texture>>,
}

impl IntermediateTextures {
    /// Allocate all textures for `size`, plus a denoised luma target at
    /// `denoise_size` if given.
    pub fn allocate(
        device: &Arc<GraphicsDevice>,
        size: UVec2,
        color_format: TextureFormat,
        denoise_size: Option<UVec2>,
    ) -> Result<Self, GraphicsError> {
        let usage = TextureUsage::TEXTURE_BINDING
            | TextureUsage::STORAGE_BINDING
            | TextureUsage::RENDER_ATTACHMENT
            | TextureUsage::COPY_SRC;
        let extent = Extent3d::new_2d(size.x, size.y);

        let color = |extent: Extent3d, label: String| {
            device.create_texture(
                &TextureDescriptor::new_2d(extent.width, extent.height, color_format, usage)
                    .with_label(label),
            )
        };

        let captured_image = color(extent, "captured_image".to_string())?;
        let smoothing = [
            color(extent.scaled_ceil(SMOOTHING_SCALES[0]), "smoothing_0".to_string())?,
            color(extent.scaled_ceil(SMOOTHING_SCALES[1]), "smoothing_1".to_string())?,
            color(extent.scaled_ceil(SMOOTHING_SCALES[2]), "smoothing_2".to_string())?,
            color(extent.scaled_ceil(SMOOTHING_SCALES[3]), "smoothing_3".to_string())?,
            color(extent.scaled_ceil(SMOOTHING_SCALES[4]), "smoothing_4".to_string())?,
        ];
        let depth_stencil = device.create_texture(
            &TextureDescriptor::new_2d(
                size.x,
                size.y,
                DEPTH_STENCIL_FORMAT,
                TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            )
            .with_label("depth_stencil"),
        )?;
        let denoised_luma = denoise_size
            .map(|luma| {
                device.create_texture(
                    &TextureDescriptor::new_2d(
                        luma.x,
                        luma.y,
                        TextureFormat::R8Unorm,
                        TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING,
                    )
                    .with_label("denoised_luma"),
                )
            })
            .transpose()?;

        Ok(Self {
            captured_image,
            smoothing,
            depth_stencil,
            denoised_luma,
        })
    }

    /// Size of the viewport the textures were allocated for.
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.captured_image.width(), self.captured_image.height())
    }
}

/// What [`ViewportManager::resolve`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportChange {
    pub previous: UVec2,
    pub size: UVec2,
    pub textures_reallocated: bool,
    pub texcoords_updated: bool,
}

/// Tracks the viewport size and owns the textures sized to it.
#[derive(Debug)]
pub struct ViewportManager {
    current_size: UVec2,
    pending_size: Option<UVec2>,
    min_size: UVec2,
    dirty: bool,
    denoise: bool,
    camera_resolution: Option<UVec2>,
    textures: Option<IntermediateTextures>,
    image_plane: [f32; IMAGE_PLANE_FLOATS],
}

impl ViewportManager {
    /// Create a manager for `size`. Textures are allocated on the first
    /// [`resolve`](Self::resolve).
    pub fn new(size: UVec2) -> Self {
        Self {
            current_size: size.max(UVec2::ONE),
            pending_size: None,
            min_size: UVec2::ONE,
            dirty: true,
            denoise: false,
            camera_resolution: None,
            textures: None,
            image_plane: IMAGE_PLANE_VERTICES,
        }
    }

    /// Also allocate a denoised luma target sized to the camera image.
    pub fn with_denoise(mut self, enabled: bool) -> Self {
        self.denoise = enabled;
        self
    }

    /// Request a new viewport size.
    pub fn on_resize(&mut self, width: u32, height: u32) {
        let size = UVec2::new(width, height).max(self.min_size);

        if size == self.current_size {
            self.pending_size = None;
            return;
        }
        if Some(size) == self.pending_size {
            return;
        }

        self.pending_size = Some(size);
        self.dirty = true;
        log::trace!("Viewport resize requested: {}x{}", size.x, size.y);
    }

    /// Force reallocation on the next resolve.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag, returning its previous value.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Size in effect for the current frame.
    pub fn size(&self) -> UVec2 {
        self.current_size
    }

    pub fn pending_size(&self) -> Option<UVec2> {
        self.pending_size
    }

    pub fn textures(&self) -> Option<&IntermediateTextures> {
        self.textures.as_ref()
    }

    pub fn image_plane(&self) -> &[f32; IMAGE_PLANE_FLOATS] {
        &self.image_plane
    }

    /// Apply pending changes before a frame is encoded.
    ///
    /// Reallocates the intermediate textures when dirty, or when the camera
    /// resolution changed and a denoised luma target is kept. Recomputes
    /// the image-plane texture coordinates when the size or the camera
    /// resolution changed.
    ///
    /// # Errors
    ///
    /// Returns the allocation error and stays dirty, so the next frame
    /// retries.
    pub fn resolve(
        &mut self,
        device: &Arc<GraphicsDevice>,
        camera_resolution: Option<UVec2>,
        color_format: TextureFormat,
    ) -> Result<Option<ViewportChange>, GraphicsError> {
        let camera_changed =
            camera_resolution.is_some() && camera_resolution != self.camera_resolution;
        let needs_textures =
            self.take_dirty() || self.textures.is_none() || (self.denoise && camera_changed);

        if !needs_textures && !camera_changed {
            return Ok(None);
        }

        let previous = self.current_size;
        if needs_textures {
            let size = self.pending_size.unwrap_or(self.current_size);
            let denoise_size = camera_resolution
                .or(self.camera_resolution)
                .filter(|_| self.denoise);
            match IntermediateTextures::allocate(device, size, color_format, denoise_size) {
                Ok(textures) => {
                    self.textures = Some(textures);
                    self.current_size = size;
                    self.pending_size = None;
                    log::debug!(
                        "Intermediate textures allocated at {}x{}",
                        size.x,
                        size.y
                    );
                }
                Err(e) => {
                    self.dirty = true;
                    return Err(e);
                }
            }
        }

        if camera_changed {
            self.camera_resolution = camera_resolution;
        }
        let texcoords_updated = match self.camera_resolution {
            Some(camera) => {
                self.image_plane = image_plane_vertices(camera, self.current_size);
                true
            }
            None => false,
        };

        Ok(Some(ViewportChange {
            previous,
            size: self.current_size,
            textures_reallocated: needs_textures,
            texcoords_updated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelens_graphics::GraphicsInstance;

    fn device() -> Arc<GraphicsDevice> {
        GraphicsInstance::new().unwrap().create_device().unwrap()
    }

    #[test]
    fn test_resize_clamps_and_ignores_duplicates() {
        let mut manager = ViewportManager::new(UVec2::new(100, 200));
        manager.take_dirty();

        manager.on_resize(100, 200);
        assert!(!manager.is_dirty());

        manager.on_resize(0, 50);
        assert_eq!(manager.pending_size(), Some(UVec2::new(1, 50)));
        assert!(manager.is_dirty());
        assert_eq!(manager.size(), UVec2::new(100, 200));
    }

    #[test]
    fn test_resolve_allocates_scaled_textures() {
        let device = device();
        let mut manager = ViewportManager::new(UVec2::new(1170, 2169));
        let change = manager
            .resolve(&device, None, TextureFormat::Bgra8Unorm)
            .unwrap()
            .unwrap();
        assert!(change.textures_reallocated);
        assert!(!change.texcoords_updated);

        let textures = manager.textures().unwrap();
        let sizes: Vec<_> = textures
            .smoothing
            .iter()
            .map(|t| (t.width(), t.height()))
            .collect();
        assert_eq!(
            sizes,
            vec![(1170, 2169), (293, 543), (234, 434), (234, 434), (234, 434)]
        );
        assert_eq!(textures.depth_stencil.format(), DEPTH_STENCIL_FORMAT);
        assert_eq!(textures.captured_image.label(), Some("captured_image"));

        assert!(
            manager
                .resolve(&device, None, TextureFormat::Bgra8Unorm)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_resolve_applies_pending_size() {
        let device = device();
        let mut manager = ViewportManager::new(UVec2::new(100, 200));
        manager.resolve(&device, None, TextureFormat::Bgra8Unorm).unwrap();

        manager.on_resize(50, 80);
        let change = manager
            .resolve(&device, None, TextureFormat::Bgra8Unorm)
            .unwrap()
            .unwrap();
        assert_eq!(change.previous, UVec2::new(100, 200));
        assert_eq!(change.size, UVec2::new(50, 80));
        assert_eq!(manager.textures().unwrap().size(), UVec2::new(50, 80));
        assert_eq!(manager.pending_size(), None);
    }

    #[test]
    fn test_resize_back_to_current_size_cancels_pending() {
        let device = device();
        let mut manager = ViewportManager::new(UVec2::new(100, 200));
        manager.resolve(&device, None, TextureFormat::Bgra8Unorm).unwrap();

        manager.on_resize(50, 80);
        manager.on_resize(100, 200);
        assert_eq!(manager.pending_size(), None);

        manager.resolve(&device, None, TextureFormat::Bgra8Unorm).unwrap();
        assert_eq!(manager.size(), UVec2::new(100, 200));
        assert_eq!(manager.textures().unwrap().size(), UVec2::new(100, 200));
    }

    #[test]
    fn test_camera_change_updates_texcoords_only() {
        let device = device();
        let mut manager = ViewportManager::new(UVec2::new(1440, 1920));
        manager.resolve(&device, None, TextureFormat::Bgra8Unorm).unwrap();

        let change = manager
            .resolve(&device, Some(UVec2::new(1920, 1440)), TextureFormat::Bgra8Unorm)
            .unwrap()
            .unwrap();
        assert!(!change.textures_reallocated);
        assert!(change.texcoords_updated);
    }

    #[test]
    fn test_denoised_luma_follows_camera_resolution() {
        let device = device();
        let mut manager = ViewportManager::new(UVec2::new(100, 200)).with_denoise(true);
        manager.resolve(&device, None, TextureFormat::Bgra8Unorm).unwrap();
        assert!(manager.textures().unwrap().denoised_luma.is_none());

        let change = manager
            .resolve(&device, Some(UVec2::new(64, 48)), TextureFormat::Bgra8Unorm)
            .unwrap()
            .unwrap();
        assert!(change.textures_reallocated);
        let luma = manager.textures().unwrap().denoised_luma.clone().unwrap();
        assert_eq!((luma.width(), luma.height()), (64, 48));
        assert!(luma.descriptor().usage.contains(TextureUsage::STORAGE_BINDING));

        let mut plain = ViewportManager::new(UVec2::new(100, 200));
        plain
            .resolve(&device, Some(UVec2::new(64, 48)), TextureFormat::Bgra8Unorm)
            .unwrap();
        assert!(plain.textures().unwrap().denoised_luma.is_none());
    }

    #[test]
    fn test_allocation_failure_stays_dirty() {
        let device = device();
        let mut manager = ViewportManager::new(UVec2::new(100, 100));
        manager.on_resize(100_000, 100);
        assert!(manager.resolve(&device, None, TextureFormat::Bgra8Unorm).is_err());
        assert!(manager.is_dirty());
        assert!(manager.textures().is_none());
    }

    #[test]
    fn test_image_plane_matching_aspect_covers_image() {
        let vertices = image_plane_vertices(UVec2::new(1920, 1440), UVec2::new(1440, 1920));
        let mut us: Vec<f32> = vertices.chunks_exact(4).map(|v| v[2]).collect();
        let mut vs: Vec<f32> = vertices.chunks_exact(4).map(|v| v[3]).collect();
        us.sort_by(f32::total_cmp);
        vs.sort_by(f32::total_cmp);
        assert_eq!((us[0], us[3]), (0.0, 1.0));
        assert_eq!((vs[0], vs[3]), (0.0, 1.0));
    }

    #[test]
    fn test_image_plane_crops_symmetrically() {
        // Narrow viewport: the rotated image is cropped left and right.
        let vertices = image_plane_vertices(UVec2::new(1920, 1440), UVec2::new(1170, 2169));
        let vs: Vec<f32> = vertices.chunks_exact(4).map(|v| v[3]).collect();
        let min = vs.iter().copied().fold(f32::MAX, f32::min);
        let max = vs.iter().copied().fold(f32::MIN, f32::max);
        assert!(min > 0.0);
        assert!((min + max - 1.0).abs() < 1e-6);

        let us: Vec<f32> = vertices.chunks_exact(4).map(|v| v[2]).collect();
        assert!(us.iter().all(|u| *u == 0.0 || *u == 1.0));
    }
}
