//! Zero-copy binding of camera frames to textures.

use std::sync::Arc;

use facelens_graphics::{GraphicsDevice, PixelBuffer, Texture, TextureFormat};
use glam::UVec2;

/// A captured camera image in bi-planar YCbCr 4:2:0.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub pixel_buffer: Arc<PixelBuffer>,
    /// Capture time in seconds.
    pub timestamp: f64,
}

impl CameraFrame {
    pub fn new(pixel_buffer: Arc<PixelBuffer>, timestamp: f64) -> Self {
        Self {
            pixel_buffer,
            timestamp,
        }
    }

    pub fn resolution(&self) -> UVec2 {
        UVec2::new(self.pixel_buffer.width(), self.pixel_buffer.height())
    }
}

/// Luma and chroma planes of one camera frame.
///
/// Both textures alias the frame's pixel buffer and keep it alive.
#[derive(Debug, Clone)]
pub struct CameraTextures {
    pub luma: Arc<Texture>,
    pub chroma: Arc<Texture>,
}

/// Imports camera pixel buffers as textures.
#[derive(Debug)]
pub struct CameraTextureBridge {
    device: Arc<GraphicsDevice>,
}

impl CameraTextureBridge {
    pub fn new(device: Arc<GraphicsDevice>) -> Self {
        Self { device }
    }

    /// Import plane 0 as `R8Unorm` luma and plane 1 as `Rg8Unorm` chroma.
    ///
    /// Returns `None` if the frame is not bi-planar or an import fails; the
    /// frame then renders without the camera image.
    pub fn bind(&self, frame: &CameraFrame) -> Option<CameraTextures> {
        let buffer = &frame.pixel_buffer;
        if buffer.plane_count() < 2 {
            log::debug!(
                "Camera frame at {:.3}s has {} plane(s), expected 2",
                frame.timestamp,
                buffer.plane_count()
            );
            return None;
        }

        let import = |plane: usize, format: TextureFormat, label: &str| {
            self.device
                .import_pixel_buffer_plane(buffer, plane, format, label)
                .map_err(|e| log::debug!("Failed to import camera plane {plane}: {e}"))
                .ok()
        };

        let luma = import(0, TextureFormat::R8Unorm, "camera_luma")?;
        let chroma = import(1, TextureFormat::Rg8Unorm, "camera_chroma")?;
        Some(CameraTextures { luma, chroma })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelens_graphics::{GraphicsInstance, PixelFormat};

    fn bridge() -> CameraTextureBridge {
        let device = GraphicsInstance::new().unwrap().create_device().unwrap();
        CameraTextureBridge::new(device)
    }

    #[test]
    fn test_bind_biplanar_frame() {
        let bridge = bridge();
        let buffer = Arc::new(PixelBuffer::new(64, 48, PixelFormat::YCbCr420BiPlanar).unwrap());
        let frame = CameraFrame::new(Arc::clone(&buffer), 0.5);
        assert_eq!(frame.resolution(), UVec2::new(64, 48));

        let textures = bridge.bind(&frame).unwrap();
        assert_eq!(textures.luma.format(), TextureFormat::R8Unorm);
        assert_eq!(textures.chroma.format(), TextureFormat::Rg8Unorm);
        assert_eq!((textures.luma.width(), textures.luma.height()), (64, 48));
        assert_eq!((textures.chroma.width(), textures.chroma.height()), (32, 24));
        assert!(Arc::ptr_eq(textures.luma.source().unwrap(), &buffer));
    }

    #[test]
    fn test_bind_single_plane_frame_fails() {
        let bridge = bridge();
        let buffer = Arc::new(PixelBuffer::new(64, 48, PixelFormat::Bgra32).unwrap());
        assert!(bridge.bind(&CameraFrame::new(buffer, 0.0)).is_none());
    }

    #[test]
    fn test_textures_keep_buffer_alive() {
        let bridge = bridge();
        let buffer = Arc::new(PixelBuffer::new(16, 16, PixelFormat::YCbCr420BiPlanar).unwrap());
        let textures = bridge.bind(&CameraFrame::new(Arc::clone(&buffer), 0.0)).unwrap();
        assert_eq!(Arc::strong_count(&buffer), 3);
        drop(textures);
        assert_eq!(Arc::strong_count(&buffer), 1);
    }
}
