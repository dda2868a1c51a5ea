//! Presentation surface.
//!
//! A [`Surface`] owns a small rotating set of color images. Each frame the
//! renderer acquires one as a [`SurfaceTexture`], renders into it and
//! schedules presentation through
//! [`RenderGraph::present`](crate::graph::RenderGraph::present). The
//! presentation itself happens when the GPU completes the graph.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::Texture;
use crate::types::{TextureDescriptor, TextureFormat, TextureUsage};

/// Configuration for a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceConfiguration {
    /// Width of the surface images.
    pub width: u32,
    /// Height of the surface images.
    pub height: u32,
    /// Color format of the surface images.
    pub format: TextureFormat,
    /// Number of images in the rotation.
    pub image_count: u32,
}

impl SurfaceConfiguration {
    /// Create a configuration with BGRA8 images and triple buffering.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Bgra8Unorm,
            image_count: 3,
        }
    }

    /// Set the color format.
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }
}

/// A surface for presenting rendered frames.
pub struct Surface {
    device: Arc<GraphicsDevice>,
    config: RwLock<SurfaceConfiguration>,
    images: RwLock<Vec<Arc<Texture>>>,
    frame_index: AtomicU64,
    presented: Arc<AtomicU64>,
}

impl Surface {
    /// Create and configure a surface.
    pub fn new(
        device: Arc<GraphicsDevice>,
        config: SurfaceConfiguration,
    ) -> Result<Self, GraphicsError> {
        let images = create_images(&device, &config)?;
        log::info!(
            "Surface configured: {}x{} {:?} ({} images)",
            config.width,
            config.height,
            config.format,
            config.image_count
        );
        Ok(Self {
            device,
            config: RwLock::new(config),
            images: RwLock::new(images),
            frame_index: AtomicU64::new(0),
            presented: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Reconfigure the surface, recreating its images.
    pub fn configure(&self, config: SurfaceConfiguration) -> Result<(), GraphicsError> {
        let images = create_images(&self.device, &config)?;
        *self.images.write() = images;
        *self.config.write() = config;
        log::debug!("Surface reconfigured: {}x{}", config.width, config.height);
        Ok(())
    }

    /// Resize the surface images, keeping format and image count.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), GraphicsError> {
        let config = SurfaceConfiguration {
            width,
            height,
            ..self.config()
        };
        self.configure(config)
    }

    /// Get the current configuration.
    pub fn config(&self) -> SurfaceConfiguration {
        *self.config.read()
    }

    /// Get the current width.
    pub fn width(&self) -> u32 {
        self.config.read().width
    }

    /// Get the current height.
    pub fn height(&self) -> u32 {
        self.config.read().height
    }

    /// Acquire the next image for rendering.
    pub fn acquire_texture(&self) -> Result<SurfaceTexture, GraphicsError> {
        let images = self.images.read();
        if images.is_empty() {
            return Err(GraphicsError::Internal(
                "surface has no images".to_string(),
            ));
        }
        let frame_index = self.frame_index.fetch_add(1, Ordering::Relaxed);
        let texture = Arc::clone(&images[(frame_index % images.len() as u64) as usize]);
        Ok(SurfaceTexture {
            texture,
            frame_index,
            presented: Arc::clone(&self.presented),
        })
    }

    /// Number of frames presented so far.
    pub fn presented_count(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("config", &self.config())
            .field("presented", &self.presented_count())
            .finish()
    }
}

fn create_images(
    device: &Arc<GraphicsDevice>,
    config: &SurfaceConfiguration,
) -> Result<Vec<Arc<Texture>>, GraphicsError> {
    (0..config.image_count)
        .map(|index| {
            device.create_texture(
                &TextureDescriptor::new_2d(
                    config.width,
                    config.height,
                    config.format,
                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                )
                .with_label(format!("surface_image_{index}")),
            )
        })
        .collect()
}

/// An image acquired from the surface for rendering.
#[derive(Clone)]
pub struct SurfaceTexture {
    texture: Arc<Texture>,
    frame_index: u64,
    presented: Arc<AtomicU64>,
}

impl SurfaceTexture {
    /// The color texture to render into.
    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }

    /// Get the texture format.
    pub fn format(&self) -> TextureFormat {
        self.texture.format()
    }

    /// Get the texture width.
    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    /// Get the texture height.
    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    /// Get the frame index (for debugging/profiling).
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub(crate) fn mark_presented(&self) {
        log::trace!("Presenting frame {}", self.frame_index);
        self.presented.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for SurfaceTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceTexture")
            .field("frame_index", &self.frame_index)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

static_assertions::assert_impl_all!(Surface: Send, Sync);
static_assertions::assert_impl_all!(SurfaceTexture: Send, Sync);
