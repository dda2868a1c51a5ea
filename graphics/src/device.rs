//! Graphics device.
//!
//! The [`GraphicsDevice`] is the main interface for creating GPU resources,
//! building pipelines and submitting recorded frames. It is created by
//! [`GraphicsInstance::create_device`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::error::GraphicsError;
use crate::graph::RenderGraph;
use crate::instance::GraphicsInstance;
use crate::resources::{Buffer, PixelBuffer, Texture};
use crate::scheduler::{Fence, Submission};
use crate::shader::{
    ComputePipeline, ComputePipelineDescriptor, RenderPipeline, RenderPipelineDescriptor,
    ShaderLibrary,
};
use crate::types::{BufferDescriptor, TextureDescriptor, TextureFormat, TextureUsage};

/// Capabilities of a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Maximum texture dimension.
    pub max_texture_dimension: u32,
    /// Maximum buffer size.
    pub max_buffer_size: u64,
    /// Whether compute shaders are supported.
    pub compute_shaders: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension: 16384,
            max_buffer_size: 1 << 30, // 1 GB
            compute_shaders: true,
        }
    }
}

/// A graphics device for creating GPU resources.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync` and can be safely shared across threads.
///
/// # Example
///
/// ```ignore
/// let instance = GraphicsInstance::new()?;
/// let device = instance.create_device()?;
///
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// let texture = device.create_texture(&TextureDescriptor::new_2d(
///     1170, 2169,
///     TextureFormat::Bgra8Unorm,
///     TextureUsage::RENDER_ATTACHMENT,
/// ))?;
/// ```
pub struct GraphicsDevice {
    instance: Arc<GraphicsInstance>,
    name: String,
    capabilities: DeviceCapabilities,
    next_submission: AtomicU64,
    // Track allocated resources (weak references for debugging)
    buffers: RwLock<Vec<Weak<Buffer>>>,
    textures: RwLock<Vec<Weak<Texture>>>,
}

impl GraphicsDevice {
    pub(crate) fn new(
        instance: Arc<GraphicsInstance>,
        name: String,
        capabilities: DeviceCapabilities,
    ) -> Self {
        Self {
            instance,
            name,
            capabilities,
            next_submission: AtomicU64::new(0),
            buffers: RwLock::new(Vec::new()),
            textures: RwLock::new(Vec::new()),
        }
    }

    /// Get the parent instance.
    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the device capabilities.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Create a GPU buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer size is zero, exceeds device limits or
    /// allocation fails.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        if descriptor.size > self.capabilities.max_buffer_size {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer size {} exceeds maximum {}",
                descriptor.size, self.capabilities.max_buffer_size
            )));
        }

        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        let gpu = self.instance.backend().create_buffer(descriptor)?;
        let buffer = Arc::new(Buffer::new(Arc::downgrade(self), descriptor.clone(), gpu));

        self.track_buffer(&buffer);

        log::trace!(
            "GraphicsDevice: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );

        Ok(buffer)
    }

    fn validate_texture(&self, descriptor: &TextureDescriptor) -> Result<(), GraphicsError> {
        let max_dim = self.capabilities.max_texture_dimension;
        if descriptor.size.width > max_dim
            || descriptor.size.height > max_dim
            || descriptor.size.depth > max_dim
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture dimension exceeds maximum {max_dim}"
            )));
        }

        if descriptor.size.width == 0 || descriptor.size.height == 0 || descriptor.size.depth == 0
        {
            return Err(GraphicsError::InvalidParameter(
                "texture dimensions cannot be zero".to_string(),
            ));
        }

        Ok(())
    }

    // Dead entries are pruned on every insert.
    fn track_buffer(&self, buffer: &Arc<Buffer>) {
        if let Ok(mut buffers) = self.buffers.write() {
            buffers.retain(|w| w.strong_count() > 0);
            buffers.push(Arc::downgrade(buffer));
        }
    }

    fn track_texture(&self, texture: &Arc<Texture>) {
        if let Ok(mut textures) = self.textures.write() {
            textures.retain(|w| w.strong_count() > 0);
            textures.push(Arc::downgrade(texture));
        }
    }

    /// Create a GPU texture.
    ///
    /// # Errors
    ///
    /// Returns an error if the texture dimensions are zero, exceed device
    /// limits or allocation fails.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Texture>, GraphicsError> {
        self.validate_texture(descriptor)?;

        let gpu = self.instance.backend().create_texture(descriptor)?;
        let texture = Arc::new(Texture::new(
            Arc::clone(self),
            descriptor.clone(),
            gpu,
            None,
        ));
        self.track_texture(&texture);

        log::trace!(
            "GraphicsDevice: created texture {:?}, size={}x{}",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height
        );

        Ok(texture)
    }

    /// Alias one plane of a pixel buffer as a texture without copying.
    ///
    /// The texture keeps the pixel buffer alive. Its size is the plane's size.
    ///
    /// # Errors
    ///
    /// Returns an error if the plane does not exist, `format` does not match
    /// the plane's bytes per pixel, or the backend cannot import it.
    pub fn import_pixel_buffer_plane(
        self: &Arc<Self>,
        pixel_buffer: &Arc<PixelBuffer>,
        plane: usize,
        format: TextureFormat,
        label: &str,
    ) -> Result<Arc<Texture>, GraphicsError> {
        let layout = pixel_buffer.plane(plane).copied().ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "pixel buffer has {} planes, plane {plane} requested",
                pixel_buffer.plane_count()
            ))
        })?;

        if format.block_size() != layout.bytes_per_pixel {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} does not match plane {plane} with {} bytes per pixel",
                layout.bytes_per_pixel
            )));
        }

        let descriptor = TextureDescriptor::new_2d(
            layout.width,
            layout.height,
            format,
            TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT,
        )
        .with_label(label);
        self.validate_texture(&descriptor)?;

        let gpu = self
            .instance
            .backend()
            .import_texture(&descriptor, pixel_buffer, plane)?;
        let texture = Arc::new(Texture::new(
            Arc::clone(self),
            descriptor,
            gpu,
            Some(Arc::clone(pixel_buffer)),
        ));
        self.track_texture(&texture);

        Ok(texture)
    }

    /// Write data into a host-visible buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the write extends past the end of the buffer.
    pub fn write_buffer(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        check_range(buffer, offset, data.len() as u64)?;
        self.instance.backend().write_buffer(buffer.gpu(), offset, data);
        Ok(())
    }

    /// Read data back from a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the end of the buffer.
    pub fn read_buffer(
        &self,
        buffer: &Buffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        check_range(buffer, offset, size)?;
        Ok(self.instance.backend().read_buffer(buffer.gpu(), offset, size))
    }

    /// Build a render pipeline from functions of a shader library.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::ResourceCreationFailed`] if either entry point
    /// is missing from the library.
    pub fn create_render_pipeline(
        &self,
        library: &ShaderLibrary,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<Arc<RenderPipeline>, GraphicsError> {
        for function in [&descriptor.vertex_function, &descriptor.fragment_function] {
            if !library.has_function(function) {
                return Err(GraphicsError::ResourceCreationFailed(format!(
                    "pipeline '{}': function '{function}' not found in library '{}'",
                    descriptor.label,
                    library.label()
                )));
            }
        }

        log::debug!("GraphicsDevice: created render pipeline '{}'", descriptor.label);
        Ok(Arc::new(RenderPipeline::new(descriptor.clone())))
    }

    /// Build a compute pipeline from a kernel of a shader library.
    ///
    /// # Errors
    ///
    /// Returns an error if the device has no compute support or the kernel is
    /// missing from the library.
    pub fn create_compute_pipeline(
        &self,
        library: &ShaderLibrary,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<Arc<ComputePipeline>, GraphicsError> {
        if !self.capabilities.compute_shaders {
            return Err(GraphicsError::FeatureNotSupported(format!(
                "compute pipeline '{}' requires compute shaders",
                descriptor.label
            )));
        }
        if !library.has_function(&descriptor.function) {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "pipeline '{}': function '{}' not found in library '{}'",
                descriptor.label,
                descriptor.function,
                library.label()
            )));
        }

        log::debug!("GraphicsDevice: created compute pipeline '{}'", descriptor.label);
        Ok(Arc::new(ComputePipeline::new(descriptor.clone())))
    }

    /// Submit a recorded frame.
    ///
    /// Returns the fence that is signaled once the GPU has finished the
    /// graph. Completion handlers registered on the graph run at that point.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if the graph does not
    /// validate.
    pub fn submit(&self, graph: RenderGraph) -> Result<Fence, GraphicsError> {
        graph
            .validate()
            .map_err(|err| GraphicsError::InvalidParameter(err.to_string()))?;

        let id = self.next_submission.fetch_add(1, Ordering::Relaxed);
        let fence = Fence::new_unsignaled();
        log::trace!(
            "GraphicsDevice: submit {id} '{}' ({} passes)",
            graph.label(),
            graph.pass_count()
        );

        self.instance
            .backend()
            .submit(Submission::new(id, graph, fence.clone()))?;
        Ok(fence)
    }

    /// Number of graphs submitted so far.
    pub fn submission_count(&self) -> u64 {
        self.next_submission.load(Ordering::Relaxed)
    }

    /// Get the number of live buffers created by this device.
    pub fn buffer_count(&self) -> usize {
        self.buffers
            .read()
            .map(|b| b.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Get the number of live textures created by this device.
    pub fn texture_count(&self) -> usize {
        self.textures
            .read()
            .map(|t| t.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Clean up dead weak references to released resources.
    pub fn cleanup_dead_resources(&self) {
        if let Ok(mut buffers) = self.buffers.write() {
            buffers.retain(|w| w.strong_count() > 0);
        }
        if let Ok(mut textures) = self.textures.write() {
            textures.retain(|w| w.strong_count() > 0);
        }
    }
}

fn check_range(buffer: &Buffer, offset: u64, size: u64) -> Result<(), GraphicsError> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer.size() => Ok(()),
        _ => Err(GraphicsError::InvalidParameter(format!(
            "range {offset}+{size} exceeds buffer {:?} of size {}",
            buffer.label(),
            buffer.size()
        ))),
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);
