//! GPU buffer resource.

use std::sync::{Arc, Weak};

use crate::backend::GpuBuffer;
use crate::device::GraphicsDevice;
use crate::types::BufferDescriptor;

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`] and are reference-counted.
/// They hold a weak reference back to their parent device. Host writes go
/// through [`GraphicsDevice::write_buffer`].
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// device.write_buffer(&buffer, 0, bytemuck::cast_slice(&vertices))?;
/// ```
pub struct Buffer {
    device: Weak<GraphicsDevice>,
    descriptor: BufferDescriptor,
    gpu: GpuBuffer,
}

impl Buffer {
    /// Create a new buffer (called by GraphicsDevice).
    pub(crate) fn new(
        device: Weak<GraphicsDevice>,
        descriptor: BufferDescriptor,
        gpu: GpuBuffer,
    ) -> Self {
        Self {
            device,
            descriptor,
            gpu,
        }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub(crate) fn gpu(&self) -> &GpuBuffer {
        &self.gpu
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferUsage;
    use parking_lot::Mutex;

    fn detached(desc: BufferDescriptor) -> Buffer {
        let gpu = GpuBuffer::Dummy {
            contents: Mutex::new(vec![0; desc.size as usize]),
        };
        Buffer::new(Weak::new(), desc, gpu)
    }

    #[test]
    fn test_buffer_debug() {
        let buffer = detached(BufferDescriptor::new(1024, BufferUsage::VERTEX));
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }

    #[test]
    fn test_buffer_label() {
        let buffer =
            detached(BufferDescriptor::new(16, BufferUsage::UNIFORM).with_label("uniforms"));
        assert_eq!(buffer.label(), Some("uniforms"));
        assert_eq!(buffer.size(), 16);
        assert!(buffer.device().is_none());
    }
}
