//! CPU-addressable images shared with the GPU.
//!
//! A [`PixelBuffer`] is the exchange format with the outside world: camera
//! frames arrive as bi-planar YCbCr pixel buffers and exported frames leave
//! as BGRA pixel buffers. Planes can be aliased as textures with
//! [`GraphicsDevice::import_pixel_buffer_plane`](crate::GraphicsDevice::import_pixel_buffer_plane).
//!
//! [`PixelBufferPool`] recycles BGRA buffers for export with a hard cap on
//! how many may be outstanding at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::TextureFormat;

/// Row pitch alignment of every plane, in bytes.
pub const ROW_ALIGNMENT: u32 = 64;

/// Pixel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Single plane, 8-bit BGRA.
    Bgra32,
    /// Full-range 4:2:0 YCbCr: a luma plane and a half-resolution interleaved chroma plane.
    YCbCr420BiPlanar,
}

impl PixelFormat {
    /// Number of planes.
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Bgra32 => 1,
            Self::YCbCr420BiPlanar => 2,
        }
    }

    /// Texture format a plane is imported as.
    pub fn plane_texture_format(&self, plane: usize) -> Option<TextureFormat> {
        match (self, plane) {
            (Self::Bgra32, 0) => Some(TextureFormat::Bgra8Unorm),
            (Self::YCbCr420BiPlanar, 0) => Some(TextureFormat::R8Unorm),
            (Self::YCbCr420BiPlanar, 1) => Some(TextureFormat::Rg8Unorm),
            _ => None,
        }
    }

    fn plane_layouts(&self, width: u32, height: u32) -> Vec<PlaneLayout> {
        let mut offset = 0;
        let mut layouts = Vec::with_capacity(self.plane_count());
        for plane in 0..self.plane_count() {
            let (plane_width, plane_height) = match (self, plane) {
                (Self::YCbCr420BiPlanar, 1) => (width.div_ceil(2), height.div_ceil(2)),
                _ => (width, height),
            };
            let bytes_per_pixel = self
                .plane_texture_format(plane)
                .map(|f| f.block_size())
                .unwrap_or(1);
            let layout = PlaneLayout {
                width: plane_width,
                height: plane_height,
                bytes_per_pixel,
                bytes_per_row: align_row(plane_width * bytes_per_pixel),
                offset,
            };
            offset += layout.byte_len();
            layouts.push(layout);
        }
        layouts
    }
}

fn align_row(bytes: u32) -> u32 {
    bytes.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
}

/// Memory layout of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaneLayout {
    /// Plane width in pixels.
    pub width: u32,
    /// Plane height in pixels.
    pub height: u32,
    /// Bytes per pixel.
    pub bytes_per_pixel: u32,
    /// Row pitch in bytes.
    pub bytes_per_row: u32,
    /// Byte offset of the plane in the buffer.
    pub offset: usize,
}

impl PlaneLayout {
    /// Size of the plane in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes_per_row as usize * self.height as usize
    }
}

/// Attributes describing pixel buffers a pool produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelBufferAttributes {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
}

impl PixelBufferAttributes {
    /// BGRA32 attributes of the given size.
    pub fn bgra(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Bgra32,
        }
    }
}

/// A planar image in host memory.
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<PlaneLayout>,
    data: Mutex<Vec<u8>>,
}

impl PixelBuffer {
    /// Allocate a zeroed pixel buffer.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "pixel buffer dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let planes = format.plane_layouts(width, height);
        let len = planes.iter().map(PlaneLayout::byte_len).sum();
        Ok(Self {
            width,
            height,
            format,
            planes,
            data: Mutex::new(vec![0; len]),
        })
    }

    /// Allocate a pixel buffer matching `attributes`.
    pub fn with_attributes(attributes: PixelBufferAttributes) -> Result<Self, GraphicsError> {
        Self::new(attributes.width, attributes.height, attributes.format)
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel layout.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Attributes of this buffer.
    pub fn attributes(&self) -> PixelBufferAttributes {
        PixelBufferAttributes {
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    /// Number of planes.
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Layout of a plane.
    pub fn plane(&self, index: usize) -> Option<&PlaneLayout> {
        self.planes.get(index)
    }

    /// Row pitch of the first plane.
    pub fn bytes_per_row(&self) -> u32 {
        self.planes.first().map(|p| p.bytes_per_row).unwrap_or(0)
    }

    /// Overwrite the contents of a plane.
    pub fn write_plane(&self, index: usize, bytes: &[u8]) -> Result<(), GraphicsError> {
        let layout = self.plane(index).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("pixel buffer has no plane {index}"))
        })?;
        if bytes.len() != layout.byte_len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "plane {index} holds {} bytes, got {}",
                layout.byte_len(),
                bytes.len()
            )));
        }
        self.data.lock()[layout.offset..layout.offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy the contents of a plane.
    pub fn read_plane(&self, index: usize) -> Option<Vec<u8>> {
        let layout = self.plane(index)?;
        let data = self.data.lock();
        Some(data[layout.offset..layout.offset + layout.byte_len()].to_vec())
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("planes", &self.planes.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(PixelBuffer: Send, Sync);

struct PoolShared {
    free: Mutex<Vec<Arc<PixelBuffer>>>,
    outstanding: AtomicUsize,
}

/// A recycling pool of identically sized pixel buffers.
///
/// At most `allocation_threshold` buffers may be handed out at once.
/// [`acquire`](Self::acquire) never blocks: when the threshold is reached it
/// returns [`GraphicsError::PoolExhausted`].
pub struct PixelBufferPool {
    attributes: PixelBufferAttributes,
    allocation_threshold: usize,
    shared: Arc<PoolShared>,
}

impl PixelBufferPool {
    /// Create a pool and preallocate `minimum_buffer_count` buffers.
    pub fn new(
        attributes: PixelBufferAttributes,
        minimum_buffer_count: usize,
        allocation_threshold: usize,
    ) -> Result<Self, GraphicsError> {
        if allocation_threshold == 0 {
            return Err(GraphicsError::InvalidParameter(
                "pool allocation threshold cannot be zero".to_string(),
            ));
        }
        let free = (0..minimum_buffer_count)
            .map(|_| PixelBuffer::with_attributes(attributes).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Pixel buffer pool: {}x{} {:?}, {} preallocated, threshold {}",
            attributes.width,
            attributes.height,
            attributes.format,
            free.len(),
            allocation_threshold
        );

        Ok(Self {
            attributes,
            allocation_threshold,
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                outstanding: AtomicUsize::new(0),
            }),
        })
    }

    /// Attributes of the buffers this pool produces.
    pub fn attributes(&self) -> PixelBufferAttributes {
        self.attributes
    }

    /// Maximum number of buffers outstanding at once.
    pub fn allocation_threshold(&self) -> usize {
        self.allocation_threshold
    }

    /// Number of buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle buffers ready for reuse.
    pub fn idle(&self) -> usize {
        self.shared.free.lock().len()
    }

    /// Take a buffer from the pool.
    pub fn acquire(&self) -> Result<PooledPixelBuffer, GraphicsError> {
        let reserved = self
            .shared
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.allocation_threshold).then_some(count + 1)
            });
        if reserved.is_err() {
            return Err(GraphicsError::PoolExhausted);
        }

        let recycled = self.shared.free.lock().pop();
        let buffer = match recycled {
            Some(buffer) => buffer,
            None => match PixelBuffer::with_attributes(self.attributes) {
                Ok(buffer) => Arc::new(buffer),
                Err(err) => {
                    self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
                    return Err(err);
                }
            },
        };

        Ok(PooledPixelBuffer {
            buffer: Some(buffer),
            pool: Arc::downgrade(&self.shared),
        })
    }
}

impl std::fmt::Debug for PixelBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBufferPool")
            .field("attributes", &self.attributes)
            .field("outstanding", &self.outstanding())
            .field("threshold", &self.allocation_threshold)
            .finish()
    }
}

/// A pixel buffer on loan from a [`PixelBufferPool`].
///
/// Returns to the pool when dropped.
pub struct PooledPixelBuffer {
    buffer: Option<Arc<PixelBuffer>>,
    pool: Weak<PoolShared>,
}

impl PooledPixelBuffer {
    /// Shared handle to the underlying buffer, for importing as a texture.
    pub fn pixel_buffer(&self) -> &Arc<PixelBuffer> {
        // Only `Drop` takes the buffer out.
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("pooled pixel buffer used after release"),
        }
    }
}

impl std::ops::Deref for PooledPixelBuffer {
    type Target = PixelBuffer;

    fn deref(&self) -> &PixelBuffer {
        self.pixel_buffer()
    }
}

impl Drop for PooledPixelBuffer {
    fn drop(&mut self) {
        let Some(buffer) = self.buffer.take() else {
            return;
        };
        if let Some(pool) = self.pool.upgrade() {
            pool.free.lock().push(buffer);
            pool.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for PooledPixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledPixelBuffer")
            .field(self.pixel_buffer())
            .finish()
    }
}

static_assertions::assert_impl_all!(PooledPixelBuffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ycbcr_plane_layouts() {
        let buffer = PixelBuffer::new(1920, 1440, PixelFormat::YCbCr420BiPlanar).unwrap();
        assert_eq!(buffer.plane_count(), 2);

        let luma = buffer.plane(0).unwrap();
        assert_eq!((luma.width, luma.height), (1920, 1440));
        assert_eq!(luma.bytes_per_row, 1920);

        let chroma = buffer.plane(1).unwrap();
        assert_eq!((chroma.width, chroma.height), (960, 720));
        assert_eq!(chroma.bytes_per_pixel, 2);
        assert_eq!(chroma.offset, luma.byte_len());
    }

    #[test]
    fn test_bgra_rows_are_aligned() {
        let buffer = PixelBuffer::new(1170, 10, PixelFormat::Bgra32).unwrap();
        assert_eq!(buffer.plane_count(), 1);
        assert_eq!(buffer.bytes_per_row(), 4736);
        assert_eq!(buffer.bytes_per_row() % ROW_ALIGNMENT, 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            PixelBuffer::new(0, 10, PixelFormat::Bgra32),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_write_and_read_plane() {
        let buffer = PixelBuffer::new(4, 2, PixelFormat::YCbCr420BiPlanar).unwrap();
        let chroma_len = buffer.plane(1).unwrap().byte_len();
        buffer.write_plane(1, &vec![7; chroma_len]).unwrap();

        assert!(buffer.read_plane(1).unwrap().iter().all(|&b| b == 7));
        assert!(buffer.read_plane(0).unwrap().iter().all(|&b| b == 0));
        assert!(buffer.write_plane(1, &[1, 2, 3]).is_err());
        assert!(buffer.write_plane(2, &[]).is_err());
    }

    #[test]
    fn test_pool_exhaustion_and_recycling() {
        let pool = PixelBufferPool::new(PixelBufferAttributes::bgra(32, 16), 3, 3).unwrap();
        assert_eq!(pool.idle(), 3);

        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        let _c = pool.acquire().unwrap();
        assert_eq!(pool.outstanding(), 3);
        assert_eq!(pool.acquire().unwrap_err(), GraphicsError::PoolExhausted);

        let first = Arc::clone(a.pixel_buffer());
        drop(a);
        assert_eq!(pool.outstanding(), 2);

        let again = pool.acquire().unwrap();
        assert!(Arc::ptr_eq(again.pixel_buffer(), &first));
    }

    #[test]
    fn test_pool_buffers_match_attributes() {
        let attributes = PixelBufferAttributes::bgra(1170, 2169);
        let pool = PixelBufferPool::new(attributes, 1, 3).unwrap();
        let buffer = pool.acquire().unwrap();
        assert_eq!(buffer.attributes(), attributes);
    }

    #[test]
    fn test_pool_allocates_past_minimum_up_to_threshold() {
        let pool = PixelBufferPool::new(PixelBufferAttributes::bgra(8, 8), 0, 2).unwrap();
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());
    }
}
