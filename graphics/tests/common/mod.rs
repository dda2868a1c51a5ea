//! Common utilities for graphics integration tests.
//!
//! Every test runs on the dummy backend. [`TestContext::manual`] holds
//! submissions until the test completes them, which simulates a GPU that
//! lags behind the CPU.

use std::sync::Arc;

use facelens_graphics::{
    ColorAttachment, CompletionMode, DrawCommand, DummyBackend, GraphicsDevice, GraphicsInstance,
    GraphicsPass, RenderGraph, RenderPipeline, RenderPipelineDescriptor, RenderTargetConfig,
    ShaderLibrary, Texture, TextureDescriptor, TextureFormat, TextureUsage,
};

/// Test context providing a device on a dummy backend.
pub struct TestContext {
    /// The backend, for completing submissions and inspecting history.
    pub backend: Arc<DummyBackend>,
    /// Graphics device for creating resources.
    pub device: Arc<GraphicsDevice>,
}

impl TestContext {
    /// Context whose submissions complete inside `submit`.
    #[allow(dead_code)]
    pub fn immediate() -> Self {
        Self::with_mode(CompletionMode::Immediate)
    }

    /// Context whose submissions complete only when the test says so.
    #[allow(dead_code)]
    pub fn manual() -> Self {
        Self::with_mode(CompletionMode::Manual)
    }

    fn with_mode(mode: CompletionMode) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(DummyBackend::with_completion(mode));
        let instance = GraphicsInstance::with_backend(backend.clone());
        let device = instance.create_device().expect("Failed to create device");
        Self { backend, device }
    }

    /// A pipeline drawing a full-screen quad.
    pub fn quad_pipeline(&self) -> Arc<RenderPipeline> {
        let library = ShaderLibrary::new("test", ["quadVertex", "quadFragment"]);
        self.device
            .create_render_pipeline(
                &library,
                &RenderPipelineDescriptor::new("quad", "quadVertex", "quadFragment"),
            )
            .expect("Failed to create pipeline")
    }

    /// Create a render target texture.
    pub fn create_render_target(&self, width: u32, height: u32, label: &str) -> Arc<Texture> {
        self.device
            .create_texture(
                &TextureDescriptor::new_2d(
                    width,
                    height,
                    TextureFormat::Bgra8Unorm,
                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                )
                .with_label(label),
            )
            .expect("Failed to create texture")
    }

    /// A one-group graph drawing a quad into `target`.
    pub fn single_pass_graph(&self, group: &str, target: Arc<Texture>) -> RenderGraph {
        let mut graph = RenderGraph::new("test_frame");
        graph.begin_group(group);
        let mut pass = GraphicsPass::new(
            group.to_lowercase(),
            self.quad_pipeline(),
            RenderTargetConfig::new().with_color(ColorAttachment::from_texture(target)),
        );
        pass.add_draw(DrawCommand::fullscreen_quad());
        graph.add_graphics_pass(pass);
        graph.end_group();
        graph
    }
}
