//! Overlay assets and the hot-swap state machine.
//!
//! Exactly one overlay asset is active at a time. Replacing it happens in two
//! steps on the render thread:
//!
//! 1. [`SwapController::swap_overlay`] enters [`OverlayState::Swapping`],
//!    raises the [`SwapFlag`] and hides the old face node. Face-dependent
//!    passes stop being encoded and tracking updates are dropped.
//! 2. After the next frame is submitted, [`SwapController::advance`]
//!    installs the new asset's scene content, retires the old asset and
//!    clears the flag.
//!
//! Retired assets are handed back to the renderer, which drops them from the
//! completion handler of the following submission so no encoded GPU work
//! outlives the resources it references.

use std::collections::HashMap;
use std::sync::Arc;

use facelens_graphics::Texture;
use serde::Deserialize;

use crate::error::RendererError;
use crate::scene::{OverlaySceneHandle, SceneGraph, SceneNode};
use crate::tracking::SwapFlag;
use crate::uniforms::ColorProcessingParameters;
use crate::viewport::ViewportManager;

/// Label of the scene node that carries the face mask.
pub const FACE_NODE_LABEL: &str = "face_mask";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskKind {
    #[default]
    Filter,
    Scene,
    Face,
    Mask,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskTier {
    #[default]
    Low,
    High,
}

/// Catalogue entry describing an overlay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MaskInfo {
    pub id: u64,
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: MaskKind,
    #[serde(default)]
    pub tier: MaskTier,
    #[serde(default)]
    pub resource_path: String,
}

impl MaskInfo {
    pub fn new(id: u64, name: impl Into<String>, kind: MaskKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            tier: MaskTier::Low,
            resource_path: String::new(),
        }
    }
}

/// Which part of the frame a lookup table grades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LutKind {
    Face,
    World,
}

/// Opaque handle to a mesh owned by the asset pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u64);

/// Opaque handle to a material owned by the asset pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub u64);

/// An immutable overlay: mesh, materials, lookup tables and scene content.
#[derive(Debug)]
pub struct OverlayAsset {
    info: MaskInfo,
    mesh: MeshHandle,
    materials: Vec<MaterialHandle>,
    lookup_tables: HashMap<LutKind, Arc<Texture>>,
    overlay_scene: Option<OverlaySceneHandle>,
    world_node: Option<SceneNode>,
    color_parameters: ColorProcessingParameters,
    needs_camera_texture: bool,
    skin_mask: Option<Arc<Texture>>,
}

impl OverlayAsset {
    pub fn builder(info: MaskInfo, mesh: MeshHandle) -> OverlayAssetBuilder {
        OverlayAssetBuilder {
            asset: OverlayAsset {
                info,
                mesh,
                materials: Vec::new(),
                lookup_tables: HashMap::new(),
                overlay_scene: None,
                world_node: None,
                color_parameters: ColorProcessingParameters::default(),
                needs_camera_texture: false,
                skin_mask: None,
            },
        }
    }

    pub fn info(&self) -> &MaskInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn mesh(&self) -> MeshHandle {
        self.mesh
    }

    pub fn materials(&self) -> &[MaterialHandle] {
        &self.materials
    }

    pub fn lookup_table(&self, kind: LutKind) -> Option<&Arc<Texture>> {
        self.lookup_tables.get(&kind)
    }

    pub fn overlay_scene(&self) -> Option<&OverlaySceneHandle> {
        self.overlay_scene.as_ref()
    }

    pub fn world_node(&self) -> Option<&SceneNode> {
        self.world_node.as_ref()
    }

    pub fn color_parameters(&self) -> ColorProcessingParameters {
        self.color_parameters
    }

    /// Returns true if a material samples the composited camera image.
    pub fn needs_camera_texture(&self) -> bool {
        self.needs_camera_texture
    }

    /// Mask restricting skin smoothing to skin areas.
    pub fn skin_mask(&self) -> Option<&Arc<Texture>> {
        self.skin_mask.as_ref()
    }
}

/// Builder for [`OverlayAsset`].
#[derive(Debug)]
pub struct OverlayAssetBuilder {
    asset: OverlayAsset,
}

impl OverlayAssetBuilder {
    pub fn with_material(mut self, material: MaterialHandle) -> Self {
        self.asset.materials.push(material);
        self
    }

    pub fn with_lookup_table(mut self, kind: LutKind, texture: Arc<Texture>) -> Self {
        self.asset.lookup_tables.insert(kind, texture);
        self
    }

    pub fn with_overlay_scene(mut self, scene: OverlaySceneHandle) -> Self {
        self.asset.overlay_scene = Some(scene);
        self
    }

    pub fn with_world_node(mut self, node: SceneNode) -> Self {
        self.asset.world_node = Some(node);
        self
    }

    pub fn with_color_parameters(mut self, parameters: ColorProcessingParameters) -> Self {
        self.asset.color_parameters = parameters;
        self
    }

    pub fn with_camera_texture(mut self, needs_camera_texture: bool) -> Self {
        self.asset.needs_camera_texture = needs_camera_texture;
        self
    }

    pub fn with_skin_mask(mut self, texture: Arc<Texture>) -> Self {
        self.asset.skin_mask = Some(texture);
        self
    }

    /// Finish the asset.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::InvalidAsset`] if the name is empty or a
    /// lookup table or skin mask is a depth texture.
    pub fn build(self) -> Result<Arc<OverlayAsset>, RendererError> {
        let asset = self.asset;
        if asset.info.name.trim().is_empty() {
            return Err(RendererError::InvalidAsset(format!(
                "overlay {} has no name",
                asset.info.id
            )));
        }
        for (kind, texture) in &asset.lookup_tables {
            if texture.format().is_depth_stencil() {
                return Err(RendererError::InvalidAsset(format!(
                    "{kind:?} lookup table of '{}' is a depth texture",
                    asset.info.name
                )));
            }
        }
        if let Some(mask) = &asset.skin_mask
            && mask.format().is_depth_stencil()
        {
            return Err(RendererError::InvalidAsset(format!(
                "skin mask of '{}' is a depth texture",
                asset.info.name
            )));
        }
        Ok(Arc::new(asset))
    }
}

/// Which overlay is installed.
#[derive(Debug, Clone, Default)]
pub enum OverlayState {
    #[default]
    NoAsset,
    Active(Arc<OverlayAsset>),
    /// Waiting for [`SwapController::advance`]. `new` is `None` when the
    /// overlay is being cleared.
    Swapping {
        old: Option<Arc<OverlayAsset>>,
        new: Option<Arc<OverlayAsset>>,
    },
}

/// Drives overlay replacement and tracking visibility.
#[derive(Debug)]
pub struct SwapController {
    state: OverlayState,
    swap_flag: SwapFlag,
    tracking_enabled: bool,
    face_tracked: bool,
    fade_seconds: f32,
}

impl SwapController {
    pub fn new(swap_flag: SwapFlag, fade_seconds: f32) -> Self {
        Self {
            state: OverlayState::NoAsset,
            swap_flag,
            tracking_enabled: true,
            face_tracked: true,
            fade_seconds,
        }
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    /// The installed asset. `None` while swapping.
    pub fn active(&self) -> Option<&Arc<OverlayAsset>> {
        match &self.state {
            OverlayState::Active(asset) => Some(asset),
            _ => None,
        }
    }

    /// The asset that owns the frame's color grading: the incoming asset
    /// while swapping, otherwise the active one.
    pub fn grading_asset(&self) -> Option<&Arc<OverlayAsset>> {
        match &self.state {
            OverlayState::NoAsset => None,
            OverlayState::Active(asset) => Some(asset),
            OverlayState::Swapping { new, .. } => new.as_ref(),
        }
    }

    pub fn is_swapping(&self) -> bool {
        matches!(self.state, OverlayState::Swapping { .. })
    }

    pub fn tracking_enabled(&self) -> bool {
        self.tracking_enabled
    }

    /// Whether the tracker reported the face as tracked in the latest frame.
    pub fn face_tracked(&self) -> bool {
        self.face_tracked
    }

    /// Color parameters the frame is graded with: the incoming asset's
    /// while swapping, so they match the lookup table from
    /// [`grading_asset`](Self::grading_asset).
    pub fn grading_parameters(
        &self,
        working_parameters: ColorProcessingParameters,
    ) -> ColorProcessingParameters {
        match &self.state {
            OverlayState::Swapping { new: Some(asset), .. } => asset.color_parameters(),
            OverlayState::Swapping { new: None, .. } => ColorProcessingParameters::default(),
            _ => working_parameters,
        }
    }

    fn face_opacity_target(&self) -> f32 {
        if self.tracking_enabled && self.face_tracked {
            1.0
        } else {
            0.0
        }
    }

    /// Begin replacing the overlay with `asset`.
    pub fn swap_overlay(&mut self, asset: Arc<OverlayAsset>, scene: &mut SceneGraph) {
        log::debug!("Overlay swap requested: '{}'", asset.name());
        self.begin_swap(Some(asset), scene);
    }

    /// Begin removing the overlay.
    pub fn clear_overlay(&mut self, scene: &mut SceneGraph) {
        log::debug!("Overlay clear requested");
        self.begin_swap(None, scene);
    }

    fn begin_swap(&mut self, new: Option<Arc<OverlayAsset>>, scene: &mut SceneGraph) {
        let old = match std::mem::take(&mut self.state) {
            OverlayState::NoAsset => None,
            OverlayState::Active(asset) => Some(asset),
            OverlayState::Swapping { old, new: pending } => {
                if let Some(pending) = pending {
                    log::debug!("Overlay '{}' superseded before install", pending.name());
                }
                old
            }
        };
        self.state = OverlayState::Swapping { old, new };
        self.swap_flag.set();
        if let Some(node) = scene.face_node_mut() {
            node.set_hidden(true);
        }
    }

    /// Finish a pending swap. Returns true if one was finished.
    ///
    /// The old asset is pushed onto `retired`; the caller must keep it alive
    /// until the GPU has completed the next submission.
    pub fn advance(
        &mut self,
        scene: &mut SceneGraph,
        working_parameters: &mut ColorProcessingParameters,
        viewport: &mut ViewportManager,
        retired: &mut Vec<Arc<OverlayAsset>>,
    ) -> bool {
        let (old, new) = match std::mem::take(&mut self.state) {
            OverlayState::Swapping { old, new } => (old, new),
            other => {
                self.state = other;
                return false;
            }
        };

        retired.extend(old);

        match &new {
            Some(asset) => {
                scene.set_overlay_scene(asset.overlay_scene().cloned());
                scene.replace_world_node(asset.world_node().cloned());

                let mut face_node = SceneNode::new(FACE_NODE_LABEL);
                face_node.set_opacity(self.face_opacity_target());
                scene.set_face_node(Some(face_node));

                *working_parameters = asset.color_parameters();
                log::info!(
                    "Overlay '{}' installed (id {}, {:?})",
                    asset.name(),
                    asset.info().id,
                    asset.info().kind
                );
            }
            None => {
                scene.set_overlay_scene(None);
                scene.replace_world_node(None);
                scene.set_face_node(None);
                *working_parameters = ColorProcessingParameters::default();
                log::info!("Overlay cleared");
            }
        }

        viewport.mark_dirty();
        self.state = new.map_or(OverlayState::NoAsset, OverlayState::Active);
        self.swap_flag.clear();
        true
    }

    /// Toggle whether tracking drives the overlay. The face node fades out
    /// or back in over the configured fade time.
    pub fn set_tracking(&mut self, enabled: bool, scene: &mut SceneGraph) {
        if self.tracking_enabled == enabled {
            return;
        }
        self.tracking_enabled = enabled;
        log::debug!("Overlay tracking {}", if enabled { "enabled" } else { "disabled" });
        self.retarget_face(scene);
    }

    /// Record whether the tracker currently sees the face. Losing the face
    /// fades the face node out; finding it again fades it back in.
    pub fn update_face_tracking(&mut self, tracked: bool, scene: &mut SceneGraph) {
        if self.face_tracked == tracked {
            return;
        }
        self.face_tracked = tracked;
        log::debug!("Face {}", if tracked { "found" } else { "lost" });
        self.retarget_face(scene);
    }

    fn retarget_face(&self, scene: &mut SceneGraph) {
        let target = self.face_opacity_target();
        if let Some(node) = scene.face_node_mut() {
            node.fade_to(target);
        }
    }

    /// Advance the face node fade by `dt` seconds of frame time.
    pub fn update_fade(&self, dt: f32, scene: &mut SceneGraph) {
        if let Some(node) = scene.face_node_mut() {
            node.step_fade(dt, self.fade_seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec2;

    fn asset(name: &str) -> Arc<OverlayAsset> {
        OverlayAsset::builder(MaskInfo::new(1, name, MaskKind::Face), MeshHandle(7))
            .with_material(MaterialHandle(1))
            .with_color_parameters(ColorProcessingParameters::new(0.5, 1.2, 0.1))
            .with_world_node(SceneNode::new("world"))
            .build()
            .unwrap()
    }

    struct Fixture {
        controller: SwapController,
        flag: SwapFlag,
        scene: SceneGraph,
        params: ColorProcessingParameters,
        viewport: ViewportManager,
        retired: Vec<Arc<OverlayAsset>>,
    }

    impl Fixture {
        fn new() -> Self {
            let flag = SwapFlag::new();
            let mut viewport = ViewportManager::new(UVec2::new(100, 200));
            viewport.take_dirty();
            Self {
                controller: SwapController::new(flag.clone(), 0.3),
                flag,
                scene: SceneGraph::new(),
                params: ColorProcessingParameters::default(),
                viewport,
                retired: Vec::new(),
            }
        }

        fn advance(&mut self) -> bool {
            self.controller.advance(
                &mut self.scene,
                &mut self.params,
                &mut self.viewport,
                &mut self.retired,
            )
        }
    }

    #[test]
    fn test_swap_from_no_asset() {
        let mut f = Fixture::new();
        assert!(!f.advance());

        let first = asset("first");
        f.controller.swap_overlay(Arc::clone(&first), &mut f.scene);
        assert!(f.controller.is_swapping());
        assert!(f.flag.is_set());
        assert!(f.controller.active().is_none());
        assert!(Arc::ptr_eq(f.controller.grading_asset().unwrap(), &first));

        assert!(f.advance());
        assert!(!f.flag.is_set());
        assert!(Arc::ptr_eq(f.controller.active().unwrap(), &first));
        assert!(f.retired.is_empty());
        assert_eq!(f.params, first.color_parameters());
        assert!(f.viewport.is_dirty());
        assert_eq!(f.scene.face_node().unwrap().label(), FACE_NODE_LABEL);
        assert_eq!(f.scene.world_node().unwrap().label(), "world");
    }

    #[test]
    fn test_swap_hides_old_node_and_retires_old_asset() {
        let mut f = Fixture::new();
        f.controller.swap_overlay(asset("first"), &mut f.scene);
        f.advance();

        f.controller.swap_overlay(asset("second"), &mut f.scene);
        assert!(f.scene.face_node().unwrap().is_hidden());
        f.advance();

        assert_eq!(f.retired.len(), 1);
        assert_eq!(f.retired[0].name(), "first");
        assert!(!f.scene.face_node().unwrap().is_hidden());
        assert_eq!(f.controller.active().unwrap().name(), "second");
    }

    #[test]
    fn test_superseded_swap_keeps_original_old() {
        let mut f = Fixture::new();
        f.controller.swap_overlay(asset("first"), &mut f.scene);
        f.advance();

        f.controller.swap_overlay(asset("second"), &mut f.scene);
        f.controller.swap_overlay(asset("third"), &mut f.scene);
        f.advance();
        assert_eq!(f.retired.len(), 1);
        assert_eq!(f.retired[0].name(), "first");
        assert_eq!(f.controller.active().unwrap().name(), "third");
    }

    #[test]
    fn test_clear_overlay() {
        let mut f = Fixture::new();
        f.controller.swap_overlay(asset("first"), &mut f.scene);
        f.advance();

        f.controller.clear_overlay(&mut f.scene);
        assert!(f.controller.grading_asset().is_none());
        f.advance();

        assert!(matches!(f.controller.state(), OverlayState::NoAsset));
        assert!(f.scene.face_node().is_none());
        assert!(f.scene.world_node().is_none());
        assert_eq!(f.params, ColorProcessingParameters::default());
        assert_eq!(f.retired.len(), 1);
    }

    #[test]
    fn test_tracking_toggle_fades_face_node() {
        let mut f = Fixture::new();
        f.controller.swap_overlay(asset("first"), &mut f.scene);
        f.advance();

        f.controller.set_tracking(false, &mut f.scene);
        assert!(!f.controller.tracking_enabled());
        f.controller.update_fade(0.1, &mut f.scene);
        let opacity = f.scene.face_node().unwrap().opacity();
        assert!(opacity > 0.6 && opacity < 0.7);
        f.controller.update_fade(0.3, &mut f.scene);
        assert_eq!(f.scene.face_node().unwrap().opacity(), 0.0);

        f.controller.swap_overlay(asset("second"), &mut f.scene);
        f.advance();
        assert_eq!(f.scene.face_node().unwrap().opacity(), 0.0);
    }

    #[test]
    fn test_lost_face_fades_out_and_back_in() {
        let mut f = Fixture::new();
        f.controller.swap_overlay(asset("first"), &mut f.scene);
        f.advance();

        f.controller.update_face_tracking(false, &mut f.scene);
        f.controller.update_fade(0.15, &mut f.scene);
        assert!((f.scene.face_node().unwrap().opacity() - 0.5).abs() < 1e-6);
        f.controller.update_fade(0.3, &mut f.scene);
        assert_eq!(f.scene.face_node().unwrap().opacity(), 0.0);

        // Found again, but the user toggle still holds it hidden.
        f.controller.set_tracking(false, &mut f.scene);
        f.controller.update_face_tracking(true, &mut f.scene);
        f.controller.update_fade(0.3, &mut f.scene);
        assert_eq!(f.scene.face_node().unwrap().opacity(), 0.0);

        f.controller.set_tracking(true, &mut f.scene);
        f.controller.update_fade(0.3, &mut f.scene);
        assert_eq!(f.scene.face_node().unwrap().opacity(), 1.0);
    }

    #[test]
    fn test_grading_parameters_follow_incoming_asset() {
        let mut f = Fixture::new();
        let working = ColorProcessingParameters::new(0.9, 1.0, 0.0);
        assert_eq!(f.controller.grading_parameters(working), working);

        let first = asset("first");
        f.controller.swap_overlay(Arc::clone(&first), &mut f.scene);
        assert_eq!(
            f.controller.grading_parameters(working),
            first.color_parameters()
        );
        f.advance();
        assert_eq!(f.controller.grading_parameters(f.params), first.color_parameters());

        f.controller.clear_overlay(&mut f.scene);
        assert_eq!(
            f.controller.grading_parameters(f.params),
            ColorProcessingParameters::default()
        );
    }

    #[test]
    fn test_builder_rejects_empty_name() {
        let err = OverlayAsset::builder(MaskInfo::new(9, " ", MaskKind::Mask), MeshHandle(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, RendererError::InvalidAsset(_)));
    }

    #[test]
    fn test_mask_info_from_toml() {
        let info: MaskInfo = toml::from_str(
            r#"
            id = 12
            name = "Tiger"
            type = "scene"
            tier = "high"
            "#,
        )
        .unwrap();
        assert_eq!(info.kind, MaskKind::Scene);
        assert_eq!(info.tier, MaskTier::High);
        assert!(info.resource_path.is_empty());
    }
}
