//! Pass types for the render graph.

use std::sync::Arc;

use crate::resources::{Buffer, Texture};
use crate::shader::{ComputePipeline, RenderPipeline};
use crate::types::{IndexFormat, Viewport};

use super::target::RenderTargetConfig;

/// A range of a buffer bound to a pass.
#[derive(Debug, Clone)]
pub struct BufferBinding {
    /// The bound buffer.
    pub buffer: Arc<Buffer>,
    /// Byte offset of the bound range.
    pub offset: u64,
    /// Byte size of the bound range.
    pub size: u64,
}

impl BufferBinding {
    /// Bind a whole buffer.
    pub fn whole(buffer: Arc<Buffer>) -> Self {
        let size = buffer.size();
        Self {
            buffer,
            offset: 0,
            size,
        }
    }

    /// Bind a sub-range of a buffer.
    pub fn range(buffer: Arc<Buffer>, offset: u64, size: u64) -> Self {
        Self {
            buffer,
            offset,
            size,
        }
    }
}

/// Primitive assembly mode for non-indexed draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Independent triangles.
    #[default]
    TriangleList,
    /// Triangle strip, used for full-screen quads.
    TriangleStrip,
}

/// A single draw recorded into a graphics pass.
#[derive(Clone)]
pub enum DrawCommand {
    /// Non-indexed primitives from the pass's vertex buffers.
    Primitives {
        vertex_count: u32,
        topology: PrimitiveTopology,
    },
    /// Indexed triangles.
    Indexed {
        index_buffer: BufferBinding,
        index_format: IndexFormat,
        index_count: u32,
    },
    /// A node of an externally rendered scene graph, blended at `opacity`.
    SceneNode {
        label: String,
        transform: [[f32; 4]; 4],
        opacity: f32,
    },
}

impl DrawCommand {
    /// Four-vertex triangle strip covering the viewport.
    pub fn fullscreen_quad() -> Self {
        Self::Primitives {
            vertex_count: 4,
            topology: PrimitiveTopology::TriangleStrip,
        }
    }
}

impl std::fmt::Debug for DrawCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primitives {
                vertex_count,
                topology,
            } => f
                .debug_struct("Primitives")
                .field("vertex_count", vertex_count)
                .field("topology", topology)
                .finish(),
            Self::Indexed {
                index_buffer,
                index_format,
                index_count,
            } => f
                .debug_struct("Indexed")
                .field("index_buffer", &index_buffer.buffer.label())
                .field("index_format", index_format)
                .field("index_count", index_count)
                .finish(),
            Self::SceneNode { label, opacity, .. } => f
                .debug_struct("SceneNode")
                .field("label", label)
                .field("opacity", opacity)
                .finish(),
        }
    }
}

/// A graphics (render) pass.
#[derive(Debug)]
pub struct GraphicsPass {
    name: String,
    pipeline: Arc<RenderPipeline>,
    render_targets: RenderTargetConfig,
    viewport: Option<Viewport>,
    vertex_buffers: Vec<BufferBinding>,
    uniform_buffers: Vec<BufferBinding>,
    textures: Vec<Arc<Texture>>,
    push_constants: Vec<u8>,
    draws: Vec<DrawCommand>,
}

impl GraphicsPass {
    /// Create a new graphics pass rendering with `pipeline` into `render_targets`.
    pub fn new(
        name: impl Into<String>,
        pipeline: Arc<RenderPipeline>,
        render_targets: RenderTargetConfig,
    ) -> Self {
        Self {
            name: name.into(),
            pipeline,
            render_targets,
            viewport: None,
            vertex_buffers: Vec::new(),
            uniform_buffers: Vec::new(),
            textures: Vec::new(),
            push_constants: Vec::new(),
            draws: Vec::new(),
        }
    }

    /// Restrict rendering to a viewport. Defaults to the full target.
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    /// Bind a vertex buffer at the next slot.
    pub fn add_vertex_buffer(&mut self, binding: BufferBinding) {
        self.vertex_buffers.push(binding);
    }

    /// Bind a uniform buffer range at the next slot.
    pub fn add_uniform_buffer(&mut self, binding: BufferBinding) {
        self.uniform_buffers.push(binding);
    }

    /// Bind a sampled texture at the next slot.
    pub fn add_texture(&mut self, texture: Arc<Texture>) {
        self.textures.push(texture);
    }

    /// Set small inline constant data for the pass.
    pub fn set_push_constants<T: bytemuck::Pod>(&mut self, value: &T) {
        self.push_constants = bytemuck::bytes_of(value).to_vec();
    }

    /// Record a draw.
    pub fn add_draw(&mut self, command: DrawCommand) {
        self.draws.push(command);
    }

    /// Get the pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the pipeline used by this pass.
    pub fn pipeline(&self) -> &Arc<RenderPipeline> {
        &self.pipeline
    }

    /// Get the render target configuration.
    pub fn render_targets(&self) -> &RenderTargetConfig {
        &self.render_targets
    }

    /// Get the viewport, if restricted.
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Vertex buffer bindings in slot order.
    pub fn vertex_buffers(&self) -> &[BufferBinding] {
        &self.vertex_buffers
    }

    /// Uniform buffer bindings in slot order.
    pub fn uniform_buffers(&self) -> &[BufferBinding] {
        &self.uniform_buffers
    }

    /// Sampled textures in slot order.
    pub fn textures(&self) -> &[Arc<Texture>] {
        &self.textures
    }

    /// Raw push constant bytes.
    pub fn push_constants(&self) -> &[u8] {
        &self.push_constants
    }

    /// Recorded draws.
    pub fn draws(&self) -> &[DrawCommand] {
        &self.draws
    }
}

/// A compute pass dispatching one kernel.
#[derive(Debug)]
pub struct ComputePass {
    name: String,
    pipeline: Arc<ComputePipeline>,
    textures: Vec<Arc<Texture>>,
    storage_textures: Vec<Arc<Texture>>,
    workgroups: [u32; 3],
}

impl ComputePass {
    /// Create a compute pass.
    pub fn new(name: impl Into<String>, pipeline: Arc<ComputePipeline>) -> Self {
        Self {
            name: name.into(),
            pipeline,
            textures: Vec::new(),
            storage_textures: Vec::new(),
            workgroups: [1, 1, 1],
        }
    }

    /// Bind a texture for reading.
    pub fn add_texture(&mut self, texture: Arc<Texture>) {
        self.textures.push(texture);
    }

    /// Bind a texture for writing.
    pub fn add_storage_texture(&mut self, texture: Arc<Texture>) {
        self.storage_textures.push(texture);
    }

    /// Set the dispatch size in workgroups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.workgroups = [x, y, z];
    }

    /// Get the pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the pipeline.
    pub fn pipeline(&self) -> &Arc<ComputePipeline> {
        &self.pipeline
    }

    /// Textures read by the kernel.
    pub fn textures(&self) -> &[Arc<Texture>] {
        &self.textures
    }

    /// Textures written by the kernel.
    pub fn storage_textures(&self) -> &[Arc<Texture>] {
        &self.storage_textures
    }

    /// Dispatch size in workgroups.
    pub fn workgroups(&self) -> [u32; 3] {
        self.workgroups
    }
}

/// A pass in the render graph.
#[derive(Debug)]
pub enum Pass {
    /// Graphics pass.
    Graphics(GraphicsPass),
    /// Compute pass.
    Compute(ComputePass),
}

impl Pass {
    /// Get the pass name.
    pub fn name(&self) -> &str {
        match self {
            Self::Graphics(pass) => pass.name(),
            Self::Compute(pass) => pass.name(),
        }
    }

    /// Get as a graphics pass, if it is one.
    pub fn as_graphics(&self) -> Option<&GraphicsPass> {
        match self {
            Self::Graphics(pass) => Some(pass),
            Self::Compute(_) => None,
        }
    }

    /// Get as a compute pass, if it is one.
    pub fn as_compute(&self) -> Option<&ComputePass> {
        match self {
            Self::Compute(pass) => Some(pass),
            Self::Graphics(_) => None,
        }
    }

    /// Returns true if this is a graphics pass.
    pub fn is_graphics(&self) -> bool {
        matches!(self, Self::Graphics(_))
    }
}
