//! GPU texture resource.

use std::sync::Arc;

use crate::backend::GpuTexture;
use crate::device::GraphicsDevice;
use crate::resources::PixelBuffer;
use crate::types::{Extent3d, TextureDescriptor, TextureFormat};

/// A GPU texture resource.
///
/// Textures are created by [`GraphicsDevice::create_texture`], or by
/// [`GraphicsDevice::import_pixel_buffer_plane`] which aliases one plane of a
/// [`PixelBuffer`] without copying. An imported texture keeps its pixel
/// buffer alive for as long as the texture exists.
///
/// # Example
///
/// ```ignore
/// let texture = device.create_texture(&TextureDescriptor::new_2d(
///     1920, 1080,
///     TextureFormat::Bgra8Unorm,
///     TextureUsage::RENDER_ATTACHMENT,
/// ))?;
/// println!("Texture size: {}x{}", texture.width(), texture.height());
/// ```
pub struct Texture {
    device: Arc<GraphicsDevice>,
    descriptor: TextureDescriptor,
    gpu: GpuTexture,
    source: Option<Arc<PixelBuffer>>,
}

impl Texture {
    /// Create a new texture (called by GraphicsDevice).
    pub(crate) fn new(
        device: Arc<GraphicsDevice>,
        descriptor: TextureDescriptor,
        gpu: GpuTexture,
        source: Option<Arc<PixelBuffer>>,
    ) -> Self {
        Self {
            device,
            descriptor,
            gpu,
            source,
        }
    }

    /// Get the parent device.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Get the texture size.
    pub fn size(&self) -> Extent3d {
        self.descriptor.size
    }

    /// Get the texture width.
    pub fn width(&self) -> u32 {
        self.descriptor.size.width
    }

    /// Get the texture height.
    pub fn height(&self) -> u32 {
        self.descriptor.size.height
    }

    /// Get the texture format.
    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    /// Get the texture label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// The pixel buffer this texture aliases, if it was imported.
    pub fn source(&self) -> Option<&Arc<PixelBuffer>> {
        self.source.as_ref()
    }

    /// Returns true if the texture aliases pixel buffer memory.
    pub fn is_imported(&self) -> bool {
        matches!(self.gpu, GpuTexture::DummyImported { .. })
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("label", &self.descriptor.label)
            .field("imported", &self.is_imported())
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
