//! GPU resources.
//!
//! This module contains the resource types that are created by [`GraphicsDevice`]:
//! - [`Buffer`] - GPU memory buffer
//! - [`Texture`] - GPU texture, either allocated or aliasing a pixel buffer plane
//! - [`SlotRing`] / [`UniformRing`] - per-frame-slot regions of one buffer
//! - [`PixelBuffer`] / [`PixelBufferPool`] - CPU-addressable images shared with the GPU
//!
//! Resources are reference-counted with [`Arc`] and can be shared across threads.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice
//! [`Arc`]: std::sync::Arc

mod buffer;
mod pixel_buffer;
mod ring_buffer;
mod texture;

pub use buffer::Buffer;
pub use pixel_buffer::{
    PixelBuffer, PixelBufferAttributes, PixelBufferPool, PixelFormat, PlaneLayout,
    PooledPixelBuffer,
};
pub use ring_buffer::{SlotRing, UniformRing, align_up};
pub use texture::Texture;
