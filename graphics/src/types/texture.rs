//! Texture types and descriptors.

use super::Extent3d;
use bitflags::bitflags;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit red channel, unsigned normalized. Camera luma plane.
    R8Unorm,
    /// 8-bit RG channels, unsigned normalized. Camera chroma plane.
    Rg8Unorm,
    /// 8-bit RGBA channels, unsigned normalized.
    Rgba8Unorm,
    /// 8-bit BGRA channels, unsigned normalized.
    #[default]
    Bgra8Unorm,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit depth float with 8-bit stencil.
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Self::Depth32FloatStencil8)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm => 2,
            Self::Rgba8Unorm | Self::Bgra8Unorm => 4,
            Self::Rgba16Float | Self::Depth32FloatStencil8 => 8,
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// Texture can be used as a storage texture.
        const STORAGE_BINDING = 1 << 3;
        /// Texture can be used as a render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    /// Two-dimensional texture.
    #[default]
    D2,
    /// Three-dimensional texture, used for color lookup tables.
    D3,
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Size of the texture.
    pub size: Extent3d,
    /// Dimensionality.
    pub dimension: TextureDimension,
    /// Pixel format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a descriptor for a 2D texture.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            dimension: TextureDimension::D2,
            format,
            usage,
        }
    }

    /// Create a descriptor for a 3D texture.
    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            label: None,
            size: Extent3d::new_3d(width, height, depth),
            dimension: TextureDimension::D3,
            format,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Total size of the texture contents in bytes.
    pub fn byte_size(&self) -> u64 {
        self.size.width as u64
            * self.size.height as u64
            * self.size.depth as u64
            * self.format.block_size() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        assert_eq!(TextureFormat::R8Unorm.block_size(), 1);
        assert_eq!(TextureFormat::Rg8Unorm.block_size(), 2);
        assert_eq!(TextureFormat::Bgra8Unorm.block_size(), 4);
        assert!(TextureFormat::Depth32FloatStencil8.is_depth_stencil());
        assert!(!TextureFormat::Bgra8Unorm.is_depth_stencil());
    }

    #[test]
    fn test_descriptor_3d() {
        let desc = TextureDescriptor::new_3d(
            16,
            16,
            16,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        )
        .with_label("lut");
        assert_eq!(desc.dimension, TextureDimension::D3);
        assert_eq!(desc.byte_size(), 16 * 16 * 16 * 4);
        assert_eq!(desc.label.as_deref(), Some("lut"));
    }
}
