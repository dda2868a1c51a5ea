//! Common types shared across the graphics system.

/// Viewport configuration for rendering.
///
/// Defines the rectangular region of the framebuffer that will be rendered to,
/// along with the depth range mapping. Depth range is `[0, 1]` and the origin is
/// the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// X coordinate of the viewport's top-left corner.
    pub x: f32,
    /// Y coordinate of the viewport's top-left corner.
    pub y: f32,
    /// Width of the viewport.
    pub width: f32,
    /// Height of the viewport.
    pub height: f32,
    /// Minimum depth value (default: 0.0).
    pub min_depth: f32,
    /// Maximum depth value (default: 1.0).
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    /// Create a new viewport with standard `[0, 1]` depth range.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Create a viewport from dimensions with origin at (0, 0).
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Create a viewport covering a 2D extent.
    pub fn from_extent(extent: Extent3d) -> Self {
        Self::from_dimensions(extent.width, extent.height)
    }
}

/// 3D extent for textures and buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in pixels (1 for 2D textures).
    pub depth: u32,
}

impl Extent3d {
    /// Create a new 2D extent.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    /// Create a new 3D extent.
    pub fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Scale a 2D extent by `factor`, rounding each dimension up.
    ///
    /// The result is never smaller than 1x1.
    pub fn scaled_ceil(&self, factor: f64) -> Self {
        let width = (self.width as f64 * factor).ceil().max(1.0) as u32;
        let height = (self.height as f64 * factor).ceil().max(1.0) as u32;
        Self::new_2d(width, height)
    }
}

/// Clear value for render targets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClearValue {
    /// No clear operation.
    #[default]
    None,
    /// Clear color attachment with RGBA values.
    Color { r: f32, g: f32, b: f32, a: f32 },
    /// Clear depth attachment.
    Depth(f32),
    /// Clear depth and stencil attachments.
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    /// Create a color clear value.
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Color { r, g, b, a }
    }

    /// Transparent black.
    pub fn transparent() -> Self {
        Self::color(0.0, 0.0, 0.0, 0.0)
    }

    /// Create a depth/stencil clear value.
    pub fn depth_stencil(depth: f32, stencil: u32) -> Self {
        Self::DepthStencil { depth, stencil }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_ceil_rounds_up() {
        let extent = Extent3d::new_2d(1170, 2169);
        assert_eq!(extent.scaled_ceil(1.0), Extent3d::new_2d(1170, 2169));
        assert_eq!(extent.scaled_ceil(0.25), Extent3d::new_2d(293, 543));
    }

    #[test]
    fn test_scaled_ceil_never_zero() {
        let extent = Extent3d::new_2d(1, 1);
        assert_eq!(extent.scaled_ceil(0.2), Extent3d::new_2d(1, 1));
    }

    #[test]
    fn test_viewport_from_extent() {
        let viewport = Viewport::from_extent(Extent3d::new_2d(640, 480));
        assert_eq!(viewport.width, 640.0);
        assert_eq!(viewport.height, 480.0);
        assert_eq!(viewport.max_depth, 1.0);
    }
}
