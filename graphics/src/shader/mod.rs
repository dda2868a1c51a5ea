//! Shader libraries and pipeline state objects.
//!
//! Pipelines are created once through
//! [`GraphicsDevice::create_render_pipeline`](crate::GraphicsDevice::create_render_pipeline)
//! and [`GraphicsDevice::create_compute_pipeline`](crate::GraphicsDevice::create_compute_pipeline)
//! and are immutable afterwards.

mod library;

pub use library::ShaderLibrary;

use crate::types::TextureFormat;

/// How a pipeline combines its output with the attachment contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Overwrite the destination.
    #[default]
    Replace,
    /// Source-over alpha blending.
    Alpha,
}

/// Descriptor for a render pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPipelineDescriptor {
    /// Debug label.
    pub label: String,
    /// Vertex entry point.
    pub vertex_function: String,
    /// Fragment entry point.
    pub fragment_function: String,
    /// Color attachment format.
    pub color_format: TextureFormat,
    /// Depth/stencil attachment format, if the pipeline is used with one.
    pub depth_stencil_format: Option<TextureFormat>,
    /// Blending applied to the color attachment.
    pub blend: BlendMode,
}

impl RenderPipelineDescriptor {
    /// Create a descriptor rendering to `Bgra8Unorm` without depth.
    pub fn new(
        label: impl Into<String>,
        vertex_function: impl Into<String>,
        fragment_function: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            vertex_function: vertex_function.into(),
            fragment_function: fragment_function.into(),
            color_format: TextureFormat::Bgra8Unorm,
            depth_stencil_format: None,
            blend: BlendMode::Replace,
        }
    }

    /// Set the color attachment format.
    pub fn with_color_format(mut self, format: TextureFormat) -> Self {
        self.color_format = format;
        self
    }

    /// Set the depth/stencil attachment format.
    pub fn with_depth_stencil_format(mut self, format: TextureFormat) -> Self {
        self.depth_stencil_format = Some(format);
        self
    }

    /// Set the blend mode.
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }
}

/// An immutable render pipeline state object.
#[derive(Debug)]
pub struct RenderPipeline {
    descriptor: RenderPipelineDescriptor,
}

impl RenderPipeline {
    pub(crate) fn new(descriptor: RenderPipelineDescriptor) -> Self {
        Self { descriptor }
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.descriptor.label
    }

    /// The descriptor the pipeline was built from.
    pub fn descriptor(&self) -> &RenderPipelineDescriptor {
        &self.descriptor
    }
}

/// Descriptor for a compute pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePipelineDescriptor {
    /// Debug label.
    pub label: String,
    /// Kernel entry point.
    pub function: String,
}

impl ComputePipelineDescriptor {
    /// Create a compute pipeline descriptor.
    pub fn new(label: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            function: function.into(),
        }
    }
}

/// An immutable compute pipeline state object.
#[derive(Debug)]
pub struct ComputePipeline {
    descriptor: ComputePipelineDescriptor,
}

impl ComputePipeline {
    pub(crate) fn new(descriptor: ComputePipelineDescriptor) -> Self {
        Self { descriptor }
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.descriptor.label
    }

    /// Kernel entry point.
    pub fn function(&self) -> &str {
        &self.descriptor.function
    }
}

static_assertions::assert_impl_all!(RenderPipeline: Send, Sync);
static_assertions::assert_impl_all!(ComputePipeline: Send, Sync);
