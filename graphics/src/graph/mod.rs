//! Render graph infrastructure.
//!
//! A [`RenderGraph`] records one frame of GPU work in submission order. Passes
//! are grouped into labelled command groups (debug groups), so a frame reads
//! as a fixed sequence of named steps. Resource hazards between passes are
//! resolved by recording order alone: everything in one graph is a single
//! submission and executes in the order it was added.
//!
//! # Example
//!
//! ```ignore
//! let mut graph = RenderGraph::new("frame");
//!
//! graph.begin_group("Composite");
//! let mut pass = GraphicsPass::new(
//!     "composite",
//!     pipeline,
//!     RenderTargetConfig::new().with_color(ColorAttachment::from_surface(&surface_texture)),
//! );
//! pass.add_draw(DrawCommand::fullscreen_quad());
//! graph.add_graphics_pass(pass);
//! graph.end_group();
//!
//! graph.present(&surface_texture);
//! let fence = device.submit(graph)?;
//! ```

mod pass;
mod target;

pub use pass::{BufferBinding, ComputePass, DrawCommand, GraphicsPass, Pass, PrimitiveTopology};
pub use target::{ColorAttachment, DepthStencilAttachment, LoadOp, RenderTargetConfig};

use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use crate::swapchain::SurfaceTexture;
use crate::types::{Extent3d, TextureUsage, Viewport};

/// Handle to a pass in the render graph.
///
/// `PassHandle` is `Copy` and cheap to pass around. It is only valid within
/// the `RenderGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassHandle(u32);

impl PassHandle {
    fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index of the pass in recording order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Callback run once the GPU has finished a submitted graph.
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// A labelled, contiguous run of passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandGroup {
    label: String,
    passes: Range<usize>,
}

impl CommandGroup {
    /// The group label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Indices of the passes recorded inside this group.
    pub fn passes(&self) -> Range<usize> {
        self.passes.clone()
    }
}

/// One frame of recorded GPU work.
#[derive(Default)]
pub struct RenderGraph {
    label: String,
    passes: Vec<Pass>,
    groups: Vec<CommandGroup>,
    open_group: Option<(String, usize)>,
    present: Option<SurfaceTexture>,
    completed_handlers: Vec<CompletionHandler>,
    retained: Vec<Box<dyn Any + Send>>,
}

impl RenderGraph {
    /// Create a new empty render graph.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// The graph label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Open a command group. Passes added until [`end_group`](Self::end_group)
    /// belong to it.
    ///
    /// # Panics
    ///
    /// Panics if a group is already open. Groups do not nest.
    pub fn begin_group(&mut self, label: impl Into<String>) {
        let label = label.into();
        assert!(
            self.open_group.is_none(),
            "command group '{label}' opened while another group is open"
        );
        self.open_group = Some((label, self.passes.len()));
    }

    /// Close the open command group.
    ///
    /// # Panics
    ///
    /// Panics if no group is open.
    pub fn end_group(&mut self) {
        let (label, start) = self
            .open_group
            .take()
            .unwrap_or_else(|| panic!("end_group called without an open command group"));
        self.groups.push(CommandGroup {
            label,
            passes: start..self.passes.len(),
        });
    }

    /// Add a graphics pass to the graph.
    pub fn add_graphics_pass(&mut self, pass: GraphicsPass) -> PassHandle {
        let index = self.passes.len() as u32;
        self.passes.push(Pass::Graphics(pass));
        PassHandle::new(index)
    }

    /// Add a compute pass to the graph.
    pub fn add_compute_pass(&mut self, pass: ComputePass) -> PassHandle {
        let index = self.passes.len() as u32;
        self.passes.push(Pass::Compute(pass));
        PassHandle::new(index)
    }

    /// Schedule presentation of a surface texture once the graph completes.
    pub fn present(&mut self, surface_texture: &SurfaceTexture) {
        self.present = Some(surface_texture.clone());
    }

    /// Register a handler to run after the GPU finishes this graph.
    ///
    /// Handlers run in registration order, after presentation.
    pub fn add_completed_handler(&mut self, handler: impl FnOnce() + Send + 'static) {
        self.completed_handlers.push(Box::new(handler));
    }

    /// Keep a value alive until the graph has completed.
    pub fn retain<T: Send + 'static>(&mut self, value: T) {
        self.retained.push(Box::new(value));
    }

    /// Get all passes in recording order.
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Get the number of passes.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Get the closed command groups in order.
    pub fn groups(&self) -> &[CommandGroup] {
        &self.groups
    }

    /// Labels of the closed command groups in order.
    pub fn group_labels(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.label()).collect()
    }

    /// Returns true if presentation was scheduled.
    pub fn presents(&self) -> bool {
        self.present.is_some()
    }

    /// Check that the graph can be submitted.
    pub fn validate(&self) -> Result<(), GraphError> {
        if let Some((label, _)) = &self.open_group {
            return Err(GraphError::UnclosedGroup(label.clone()));
        }

        for (index, pass) in self.passes.iter().enumerate() {
            if !self.groups.iter().any(|g| g.passes.contains(&index)) {
                return Err(GraphError::UngroupedPass(pass.name().to_string()));
            }
            if let Pass::Graphics(graphics) = pass
                && !graphics.render_targets().has_attachments()
            {
                return Err(GraphError::MissingRenderTarget(pass.name().to_string()));
            }
            if let Pass::Compute(compute) = pass {
                for storage in compute.storage_textures() {
                    if !storage.descriptor().usage.contains(TextureUsage::STORAGE_BINDING) {
                        return Err(GraphError::InvalidStorageTexture(pass.name().to_string()));
                    }
                    if compute.textures().iter().any(|t| Arc::ptr_eq(t, storage)) {
                        return Err(GraphError::ReadWriteHazard(pass.name().to_string()));
                    }
                }
            }
        }

        Ok(())
    }

    /// Produce a resource-free description of the recorded work.
    pub fn summary(&self) -> GraphSummary {
        let groups = self
            .groups
            .iter()
            .map(|group| GroupSummary {
                label: group.label.clone(),
                passes: self.passes[group.passes()]
                    .iter()
                    .map(PassSummary::from_pass)
                    .collect(),
            })
            .collect();

        GraphSummary {
            label: self.label.clone(),
            groups,
            presents: self.presents(),
        }
    }

    /// Present, run completion handlers and release retained resources.
    pub(crate) fn finish(mut self) {
        if let Some(surface_texture) = self.present.take() {
            surface_texture.mark_presented();
        }
        for handler in self.completed_handlers.drain(..) {
            handler();
        }
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("label", &self.label)
            .field("passes", &self.passes.len())
            .field("groups", &self.group_labels())
            .field("presents", &self.presents())
            .field("completed_handlers", &self.completed_handlers.len())
            .finish()
    }
}

/// Kind of a recorded pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Graphics pass.
    Graphics,
    /// Compute pass.
    Compute,
}

/// Description of one recorded pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    /// Pass name.
    pub name: String,
    /// Pass kind.
    pub kind: PassKind,
    /// Label of the pipeline used.
    pub pipeline: String,
    /// Label of the first color attachment, or of the first written storage texture.
    pub target: Option<String>,
    /// Load operation of the first color attachment.
    pub load_op: Option<LoadOp>,
    /// Size of the render target.
    pub target_size: Option<Extent3d>,
    /// Restricted viewport, if any.
    pub viewport: Option<Viewport>,
    /// Labels of sampled textures in slot order.
    pub sampled: Vec<String>,
    /// Push constant bytes.
    pub push_constants: Vec<u8>,
    /// Number of draws (zero for compute).
    pub draw_count: usize,
    /// Label and opacity of each scene node draw.
    pub scene_nodes: Vec<(String, f32)>,
    /// Whether a depth/stencil attachment is bound.
    pub has_depth: bool,
}

fn texture_label(texture: &crate::resources::Texture) -> String {
    texture.label().unwrap_or("unnamed").to_string()
}

impl PassSummary {
    fn from_pass(pass: &Pass) -> Self {
        match pass {
            Pass::Graphics(graphics) => {
                let targets = graphics.render_targets();
                let color = targets.color_attachments.first();
                Self {
                    name: graphics.name().to_string(),
                    kind: PassKind::Graphics,
                    pipeline: graphics.pipeline().label().to_string(),
                    target: color.map(|c| texture_label(c.texture())),
                    load_op: color.map(|c| c.load_op()),
                    target_size: targets.dimensions(),
                    viewport: graphics.viewport(),
                    sampled: graphics.textures().iter().map(|t| texture_label(t)).collect(),
                    push_constants: graphics.push_constants().to_vec(),
                    draw_count: graphics.draws().len(),
                    scene_nodes: graphics
                        .draws()
                        .iter()
                        .filter_map(|draw| match draw {
                            DrawCommand::SceneNode { label, opacity, .. } => {
                                Some((label.clone(), *opacity))
                            }
                            _ => None,
                        })
                        .collect(),
                    has_depth: targets.depth_stencil_attachment.is_some(),
                }
            }
            Pass::Compute(compute) => Self {
                name: compute.name().to_string(),
                kind: PassKind::Compute,
                pipeline: compute.pipeline().label().to_string(),
                target: compute.storage_textures().first().map(|t| texture_label(t)),
                load_op: None,
                target_size: compute.storage_textures().first().map(|t| t.size()),
                viewport: None,
                sampled: compute.textures().iter().map(|t| texture_label(t)).collect(),
                push_constants: Vec::new(),
                draw_count: 0,
                scene_nodes: Vec::new(),
                has_depth: false,
            },
        }
    }
}

/// Description of one command group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    /// Group label.
    pub label: String,
    /// Passes in recording order.
    pub passes: Vec<PassSummary>,
}

/// Resource-free description of a submitted graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSummary {
    /// Graph label.
    pub label: String,
    /// Command groups in order.
    pub groups: Vec<GroupSummary>,
    /// Whether presentation was scheduled.
    pub presents: bool,
}

impl GraphSummary {
    /// Labels of all command groups in order.
    pub fn group_labels(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.label.as_str()).collect()
    }

    /// Find a group by label.
    pub fn group(&self, label: &str) -> Option<&GroupSummary> {
        self.groups.iter().find(|g| g.label == label)
    }

    /// Returns true if a group with this label was recorded.
    pub fn has_group(&self, label: &str) -> bool {
        self.group(label).is_some()
    }
}

/// Errors that can occur when validating a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A command group was never closed.
    UnclosedGroup(String),
    /// A pass was recorded outside of any command group.
    UngroupedPass(String),
    /// A graphics pass has no attachments.
    MissingRenderTarget(String),
    /// A compute pass writes a texture created without storage usage.
    InvalidStorageTexture(String),
    /// A compute pass samples the texture it writes.
    ReadWriteHazard(String),
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnclosedGroup(label) => write!(f, "command group '{label}' was not closed"),
            Self::UngroupedPass(name) => write!(f, "pass '{name}' is outside any command group"),
            Self::MissingRenderTarget(name) => write!(f, "pass '{name}' has no render targets"),
            Self::InvalidStorageTexture(name) => {
                write!(f, "pass '{name}' writes a texture without storage usage")
            }
            Self::ReadWriteHazard(name) => {
                write!(f, "pass '{name}' samples and writes the same texture")
            }
        }
    }
}

impl std::error::Error for GraphError {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::device::GraphicsDevice;
    use crate::instance::GraphicsInstance;
    use crate::resources::Texture;
    use crate::shader::{
        ComputePipelineDescriptor, RenderPipeline, RenderPipelineDescriptor, ShaderLibrary,
    };
    use crate::types::{TextureDescriptor, TextureFormat};

    fn create_test_device() -> Arc<GraphicsDevice> {
        let instance = GraphicsInstance::new().unwrap();
        instance.create_device().unwrap()
    }

    fn test_pipeline(device: &Arc<GraphicsDevice>) -> Arc<RenderPipeline> {
        let library = ShaderLibrary::new("test", ["quadVertex", "quadFragment"]);
        device
            .create_render_pipeline(
                &library,
                &RenderPipelineDescriptor::new("quad", "quadVertex", "quadFragment"),
            )
            .unwrap()
    }

    fn test_target(device: &Arc<GraphicsDevice>, label: &str) -> Arc<Texture> {
        device
            .create_texture(
                &TextureDescriptor::new_2d(
                    64,
                    32,
                    TextureFormat::Bgra8Unorm,
                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                )
                .with_label(label),
            )
            .unwrap()
    }

    fn quad_pass(device: &Arc<GraphicsDevice>, name: &str, target: Arc<Texture>) -> GraphicsPass {
        let mut pass = GraphicsPass::new(
            name,
            test_pipeline(device),
            RenderTargetConfig::new().with_color(
                ColorAttachment::from_texture(target).with_clear_color(0.0, 0.0, 0.0, 0.0),
            ),
        );
        pass.add_draw(DrawCommand::fullscreen_quad());
        pass
    }

    #[test]
    fn test_groups_record_pass_ranges() {
        let device = create_test_device();
        let target = test_target(&device, "offscreen");
        let mut graph = RenderGraph::new("frame");

        graph.begin_group("First");
        graph.add_graphics_pass(quad_pass(&device, "a", Arc::clone(&target)));
        graph.add_graphics_pass(quad_pass(&device, "b", Arc::clone(&target)));
        graph.end_group();
        graph.begin_group("Empty");
        graph.end_group();

        assert_eq!(graph.group_labels(), vec!["First", "Empty"]);
        assert_eq!(graph.groups()[0].passes(), 0..2);
        assert!(graph.groups()[1].passes().is_empty());
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_ungrouped_pass() {
        let device = create_test_device();
        let target = test_target(&device, "offscreen");
        let mut graph = RenderGraph::new("frame");
        graph.add_graphics_pass(quad_pass(&device, "loose", target));

        assert_eq!(
            graph.validate(),
            Err(GraphError::UngroupedPass("loose".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_unclosed_group() {
        let mut graph = RenderGraph::new("frame");
        graph.begin_group("Open");
        assert_eq!(
            graph.validate(),
            Err(GraphError::UnclosedGroup("Open".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_in_place_compute() {
        let device = create_test_device();
        let library = ShaderLibrary::new("test", ["filter"]);
        let pipeline = device
            .create_compute_pipeline(&library, &ComputePipelineDescriptor::new("filter", "filter"))
            .unwrap();
        let texture = |label: &str, usage: TextureUsage| {
            device
                .create_texture(
                    &TextureDescriptor::new_2d(8, 8, TextureFormat::R8Unorm, usage)
                        .with_label(label),
                )
                .unwrap()
        };
        let storage = TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING;
        let source = texture("source", TextureUsage::TEXTURE_BINDING);
        let output = texture("output", storage);

        let build = |sampled: &Arc<Texture>, written: &Arc<Texture>| {
            let mut pass = ComputePass::new("filter", Arc::clone(&pipeline));
            pass.add_texture(Arc::clone(sampled));
            pass.add_storage_texture(Arc::clone(written));
            pass.dispatch(1, 1, 1);
            let mut graph = RenderGraph::new("frame");
            graph.begin_group("Filter");
            graph.add_compute_pass(pass);
            graph.end_group();
            graph.validate()
        };

        assert!(build(&source, &output).is_ok());
        assert_eq!(
            build(&output, &output),
            Err(GraphError::ReadWriteHazard("filter".to_string()))
        );
        assert_eq!(
            build(&output, &source),
            Err(GraphError::InvalidStorageTexture("filter".to_string()))
        );
    }

    #[test]
    #[should_panic(expected = "opened while another group is open")]
    fn test_nested_group_panics() {
        let mut graph = RenderGraph::new("frame");
        graph.begin_group("Outer");
        graph.begin_group("Inner");
    }

    #[test]
    fn test_summary_describes_passes() {
        let device = create_test_device();
        let target = test_target(&device, "offscreen");
        let sampled = test_target(&device, "source");
        let mut graph = RenderGraph::new("frame");

        let mut pass = quad_pass(&device, "blit", target);
        pass.add_texture(sampled);
        pass.set_push_constants(&1.5f32);

        graph.begin_group("Blit");
        graph.add_graphics_pass(pass);
        graph.end_group();

        let summary = graph.summary();
        let blit = &summary.group("Blit").unwrap().passes[0];
        assert_eq!(blit.kind, PassKind::Graphics);
        assert_eq!(blit.pipeline, "quad");
        assert_eq!(blit.target.as_deref(), Some("offscreen"));
        assert!(blit.load_op.unwrap().is_clear());
        assert_eq!(blit.sampled, vec!["source".to_string()]);
        assert_eq!(blit.push_constants, 1.5f32.to_ne_bytes().to_vec());
        assert_eq!(blit.draw_count, 1);
        assert!(!summary.presents);
    }

    #[test]
    fn test_finish_runs_handlers_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut graph = RenderGraph::new("frame");

        let first = Arc::clone(&counter);
        graph.add_completed_handler(move || {
            assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
        });
        let second = Arc::clone(&counter);
        graph.add_completed_handler(move || {
            assert_eq!(second.fetch_add(1, Ordering::SeqCst), 1);
        });

        graph.finish();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retained_values_drop_on_finish() {
        let value = Arc::new(());
        let mut graph = RenderGraph::new("frame");
        graph.retain(Arc::clone(&value));
        assert_eq!(Arc::strong_count(&value), 2);

        graph.finish();
        assert_eq!(Arc::strong_count(&value), 1);
    }
}
