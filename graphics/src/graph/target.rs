//! Render target types for render passes.
//!
//! This module defines the types used to configure render targets (color and depth/stencil
//! attachments) for graphics passes.

use std::sync::Arc;

use crate::resources::Texture;
use crate::swapchain::SurfaceTexture;
use crate::types::{ClearValue, Extent3d};

/// Operation to perform when loading an attachment at the start of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LoadOp {
    /// Clear the attachment with a specified value.
    Clear(ClearValue),
    /// Load the existing contents of the attachment.
    #[default]
    Load,
    /// Don't care about the existing contents (may be undefined).
    DontCare,
}

impl LoadOp {
    /// Create a clear operation with a color value.
    pub fn clear_color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Clear(ClearValue::color(r, g, b, a))
    }

    /// Returns true if the attachment is cleared at the start of the pass.
    pub fn is_clear(&self) -> bool {
        matches!(self, Self::Clear(_))
    }
}

/// A color attachment of a graphics pass.
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    texture: Arc<Texture>,
    load_op: LoadOp,
}

impl ColorAttachment {
    /// Create a color attachment that loads the existing contents.
    pub fn from_texture(texture: Arc<Texture>) -> Self {
        Self {
            texture,
            load_op: LoadOp::Load,
        }
    }

    /// Create a color attachment targeting a surface texture.
    pub fn from_surface(surface_texture: &SurfaceTexture) -> Self {
        Self::from_texture(Arc::clone(surface_texture.texture()))
    }

    /// Set the load operation.
    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    /// Clear to the given color before rendering.
    pub fn with_clear_color(mut self, r: f32, g: f32, b: f32, a: f32) -> Self {
        self.load_op = LoadOp::clear_color(r, g, b, a);
        self
    }

    /// The texture rendered to.
    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }

    /// The load operation.
    pub fn load_op(&self) -> LoadOp {
        self.load_op
    }
}

/// A depth/stencil attachment of a graphics pass.
#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    texture: Arc<Texture>,
    load_op: LoadOp,
}

impl DepthStencilAttachment {
    /// Create a depth/stencil attachment cleared to depth 1.0 and stencil 0.
    pub fn from_texture(texture: Arc<Texture>) -> Self {
        Self {
            texture,
            load_op: LoadOp::Clear(ClearValue::depth_stencil(1.0, 0)),
        }
    }

    /// The depth/stencil texture.
    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }

    /// The load operation.
    pub fn load_op(&self) -> LoadOp {
        self.load_op
    }
}

/// Render target configuration for a graphics pass.
#[derive(Debug, Clone, Default)]
pub struct RenderTargetConfig {
    /// Color attachments.
    pub color_attachments: Vec<ColorAttachment>,
    /// Optional depth/stencil attachment.
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

impl RenderTargetConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a color attachment.
    pub fn with_color(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    /// Set the depth/stencil attachment.
    pub fn with_depth_stencil(mut self, attachment: DepthStencilAttachment) -> Self {
        self.depth_stencil_attachment = Some(attachment);
        self
    }

    /// Size of the first attachment.
    pub fn dimensions(&self) -> Option<Extent3d> {
        self.color_attachments
            .first()
            .map(|c| c.texture().size())
            .or_else(|| {
                self.depth_stencil_attachment
                    .as_ref()
                    .map(|d| d.texture().size())
            })
    }

    /// Returns true if any attachment is configured.
    pub fn has_attachments(&self) -> bool {
        !self.color_attachments.is_empty() || self.depth_stencil_attachment.is_some()
    }
}
