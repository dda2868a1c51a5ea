//! Per-slot GPU buffers for data that changes every frame.
//!
//! A slot ring is one buffer divided into `frames_in_flight` regions. The
//! frame holding [`FrameSlot`] `i` writes only region `i`, so the CPU can
//! fill the next frame's data while the GPU still reads the previous ones.
//! Writes are bounds-checked against the slot's region.
//!
//! # Example
//!
//! ```ignore
//! let uniforms = UniformRing::<FrameUniforms>::new(&device, 3, "frame_uniforms")?;
//!
//! let slot = pipeline.acquire_slot();
//! uniforms.write(&slot, &frame_uniforms)?;
//! pass.add_uniform_buffer(uniforms.binding(&slot));
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::graph::BufferBinding;
use crate::pipeline::FrameSlot;
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage};

/// Alignment of every slot region, matching the minimum uniform offset alignment.
pub const SLOT_ALIGNMENT: u64 = 256;

/// Align a value up to the given power-of-two alignment.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// An untyped per-slot buffer.
pub struct SlotRing {
    device: Arc<GraphicsDevice>,
    buffer: Arc<Buffer>,
    slot_size: u64,
    stride: u64,
    slot_count: usize,
}

impl SlotRing {
    /// Create a ring with `slot_count` regions of at least `slot_size` bytes.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        slot_count: usize,
        slot_size: u64,
        usage: BufferUsage,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        if slot_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "slot ring needs at least one slot".to_string(),
            ));
        }
        if slot_size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "slot ring slot size cannot be zero".to_string(),
            ));
        }

        let stride = align_up(slot_size, SLOT_ALIGNMENT);
        let descriptor = BufferDescriptor::new(
            stride * slot_count as u64,
            usage | BufferUsage::MAP_WRITE | BufferUsage::COPY_DST,
        )
        .with_label(format!("{label}_ring"));
        let buffer = device.create_buffer(&descriptor)?;

        Ok(Self {
            device: Arc::clone(device),
            buffer,
            slot_size,
            stride,
            slot_count,
        })
    }

    /// The underlying GPU buffer.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Usable bytes per slot.
    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    /// Distance between slot regions in bytes.
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Byte offset of a slot's region.
    pub fn offset(&self, slot: &FrameSlot) -> u64 {
        self.offset_of(slot.index())
    }

    fn offset_of(&self, index: usize) -> u64 {
        self.stride * index as u64
    }

    fn check(&self, index: usize, offset: u64, len: u64) -> Result<(), GraphicsError> {
        if index >= self.slot_count {
            return Err(GraphicsError::InvalidParameter(format!(
                "slot {index} out of range for ring of {}",
                self.slot_count
            )));
        }
        if offset + len > self.slot_size {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {len} bytes at {offset} exceeds slot size {}",
                self.slot_size
            )));
        }
        Ok(())
    }

    /// Copy `data` into a slot's region at `offset`.
    pub fn write(&self, slot: &FrameSlot, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        self.check(slot.index(), offset, data.len() as u64)?;
        self.device
            .write_buffer(&self.buffer, self.offset_of(slot.index()) + offset, data)
    }

    /// Read back `len` bytes of a slot's region.
    pub fn read(&self, slot: &FrameSlot, offset: u64, len: u64) -> Result<Vec<u8>, GraphicsError> {
        self.check(slot.index(), offset, len)?;
        self.device
            .read_buffer(&self.buffer, self.offset_of(slot.index()) + offset, len)
    }

    /// Binding covering a slot's whole region.
    pub fn binding(&self, slot: &FrameSlot) -> BufferBinding {
        self.range_binding(slot, 0, self.slot_size)
    }

    /// Binding covering `size` bytes of a slot's region starting at `offset`.
    pub fn range_binding(&self, slot: &FrameSlot, offset: u64, size: u64) -> BufferBinding {
        BufferBinding::range(
            Arc::clone(&self.buffer),
            self.offset_of(slot.index()) + offset,
            size,
        )
    }
}

impl std::fmt::Debug for SlotRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRing")
            .field("slot_size", &self.slot_size)
            .field("stride", &self.stride)
            .field("slot_count", &self.slot_count)
            .field("buffer", &self.buffer.label())
            .finish()
    }
}

/// A per-slot buffer holding one `T` per slot.
pub struct UniformRing<T: bytemuck::Pod> {
    ring: SlotRing,
    _marker: PhantomData<fn() -> T>,
}

impl<T: bytemuck::Pod> UniformRing<T> {
    /// Create a uniform ring with `slot_count` slots.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        slot_count: usize,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        let ring = SlotRing::new(
            device,
            slot_count,
            std::mem::size_of::<T>() as u64,
            BufferUsage::UNIFORM,
            label,
        )?;
        Ok(Self {
            ring,
            _marker: PhantomData,
        })
    }

    /// Write the value for a slot.
    pub fn write(&self, slot: &FrameSlot, value: &T) -> Result<(), GraphicsError> {
        self.ring.write(slot, 0, bytemuck::bytes_of(value))
    }

    /// Read the value last written for a slot.
    pub fn read(&self, slot: &FrameSlot) -> Result<T, GraphicsError> {
        let bytes = self.ring.read(slot, 0, self.ring.slot_size())?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Byte offset of a slot's value.
    pub fn offset(&self, slot: &FrameSlot) -> u64 {
        self.ring.offset(slot)
    }

    /// Binding of a slot's value.
    pub fn binding(&self, slot: &FrameSlot) -> BufferBinding {
        self.ring.binding(slot)
    }

    /// Distance between slot values in bytes.
    pub fn stride(&self) -> u64 {
        self.ring.stride()
    }

    /// The underlying GPU buffer.
    pub fn buffer(&self) -> &Arc<Buffer> {
        self.ring.buffer()
    }
}

impl<T: bytemuck::Pod> std::fmt::Debug for UniformRing<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformRing")
            .field("type", &std::any::type_name::<T>())
            .field("ring", &self.ring)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::GraphicsInstance;
    use crate::pipeline::FramePipeline;

    fn create_test_device() -> Arc<GraphicsDevice> {
        let instance = GraphicsInstance::new().unwrap();
        instance.create_device().unwrap()
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct TestUniforms {
        value: [f32; 4],
        index: u32,
        _pad: [u32; 3],
    }

    #[test]
    fn test_stride_is_aligned() {
        let device = create_test_device();
        let ring = SlotRing::new(&device, 3, 100, BufferUsage::UNIFORM, "test").unwrap();
        assert_eq!(ring.stride(), 256);
        assert_eq!(ring.buffer().size(), 768);
        assert_eq!(ring.buffer().label(), Some("test_ring"));
    }

    #[test]
    fn test_slot_offsets() {
        let device = create_test_device();
        let mut pipeline = FramePipeline::new(3);
        let ring = UniformRing::<TestUniforms>::new(&device, 3, "frame").unwrap();

        let offsets: Vec<u64> = (0..4)
            .map(|_| {
                let slot = pipeline.acquire_slot();
                let offset = ring.offset(&slot);
                slot.into_release().release();
                offset
            })
            .collect();
        assert_eq!(offsets, vec![0, 256, 512, 0]);
    }

    #[test]
    fn test_slots_hold_independent_values() {
        let device = create_test_device();
        let mut pipeline = FramePipeline::new(2);
        let ring = UniformRing::<TestUniforms>::new(&device, 2, "frame").unwrap();

        let first = pipeline.acquire_slot();
        let second = pipeline.acquire_slot();
        let a = TestUniforms {
            value: [1.0; 4],
            index: 1,
            _pad: [0; 3],
        };
        let b = TestUniforms {
            value: [2.0; 4],
            index: 2,
            _pad: [0; 3],
        };
        ring.write(&first, &a).unwrap();
        ring.write(&second, &b).unwrap();

        assert_eq!(ring.read(&first).unwrap(), a);
        assert_eq!(ring.read(&second).unwrap(), b);

        let binding = ring.binding(&second);
        assert_eq!(binding.offset, 256);
        assert_eq!(binding.size, std::mem::size_of::<TestUniforms>() as u64);
    }

    #[test]
    fn test_write_past_slot_is_rejected() {
        let device = create_test_device();
        let mut pipeline = FramePipeline::new(2);
        let ring = SlotRing::new(&device, 2, 16, BufferUsage::VERTEX, "mesh").unwrap();
        let slot = pipeline.acquire_slot();

        assert!(ring.write(&slot, 0, &[0; 16]).is_ok());
        assert!(matches!(
            ring.write(&slot, 8, &[0; 16]),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_slot_count_mismatch_is_rejected() {
        let device = create_test_device();
        let mut pipeline = FramePipeline::new(3);
        let ring = SlotRing::new(&device, 2, 16, BufferUsage::VERTEX, "mesh").unwrap();
        drop(pipeline.acquire_slot());
        drop(pipeline.acquire_slot());
        let third = pipeline.acquire_slot();

        assert!(ring.write(&third, 0, &[1]).is_err());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let device = create_test_device();
        assert!(SlotRing::new(&device, 0, 16, BufferUsage::UNIFORM, "a").is_err());
        assert!(SlotRing::new(&device, 2, 0, BufferUsage::UNIFORM, "b").is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(100, 64), 128);
    }
}
