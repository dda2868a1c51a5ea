//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! used throughout the graphics system.

mod buffer;
mod common;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, IndexFormat};
pub use common::{ClearValue, Extent3d, Viewport};
pub use texture::{TextureDescriptor, TextureDimension, TextureFormat, TextureUsage};
