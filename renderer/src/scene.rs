//! The externally rendered overlay scene.
//!
//! The scene graph itself is drawn by the asset's scene renderer; the
//! compositor only needs to know which nodes are visible, where they are and
//! what they sample. [`SceneGraph`] tracks exactly that.

use std::sync::Arc;

use facelens_graphics::{DrawCommand, Texture};
use glam::{Mat4, Vec3};

use crate::tracking::LightEstimate;

/// A node of the overlay scene.
#[derive(Debug, Clone)]
pub struct SceneNode {
    label: String,
    transform: Mat4,
    hidden: bool,
    opacity: f32,
    target_opacity: f32,
    camera_texture: Option<Arc<Texture>>,
}

impl SceneNode {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            transform: Mat4::IDENTITY,
            hidden: false,
            opacity: 1.0,
            target_opacity: 1.0,
            camera_texture: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Set the opacity immediately, cancelling any fade.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
        self.target_opacity = self.opacity;
    }

    /// Start fading toward `target`.
    pub fn fade_to(&mut self, target: f32) {
        self.target_opacity = target.clamp(0.0, 1.0);
    }

    /// Advance the fade by `dt` seconds for a full fade lasting `duration`.
    pub fn step_fade(&mut self, dt: f32, duration: f32) {
        if duration <= 0.0 {
            self.opacity = self.target_opacity;
            return;
        }
        let step = dt / duration;
        if self.opacity < self.target_opacity {
            self.opacity = (self.opacity + step).min(self.target_opacity);
        } else {
            self.opacity = (self.opacity - step).max(self.target_opacity);
        }
    }

    pub fn is_visible(&self) -> bool {
        !self.hidden && self.opacity > 0.0
    }

    /// Texture bound to the material slot that shows the camera image.
    pub fn camera_texture(&self) -> Option<&Arc<Texture>> {
        self.camera_texture.as_ref()
    }

    pub fn set_camera_texture(&mut self, texture: Option<Arc<Texture>>) {
        self.camera_texture = texture;
    }

    fn draw(&self) -> DrawCommand {
        DrawCommand::SceneNode {
            label: self.label.clone(),
            transform: self.transform.to_cols_array_2d(),
            opacity: self.opacity,
        }
    }
}

/// Scene lighting driven by the light estimate. Intensities are in lumens,
/// where 1000 is neutral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneLights {
    pub ambient_intensity: f32,
    pub directional_intensity: f32,
    pub directional_direction: Vec3,
}

impl Default for SceneLights {
    fn default() -> Self {
        Self {
            ambient_intensity: 1000.0,
            directional_intensity: 1000.0,
            directional_direction: Vec3::NEG_Z,
        }
    }
}

/// Handle to an auxiliary scene loaded by the asset pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverlaySceneHandle(pub String);

/// Nodes the compositor draws in the overlay scene pass.
#[derive(Debug, Default)]
pub struct SceneGraph {
    face_node: Option<SceneNode>,
    world_node: Option<SceneNode>,
    overlay_scene: Option<OverlaySceneHandle>,
    lights: SceneLights,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn face_node(&self) -> Option<&SceneNode> {
        self.face_node.as_ref()
    }

    pub fn face_node_mut(&mut self) -> Option<&mut SceneNode> {
        self.face_node.as_mut()
    }

    /// Replace the face node, returning the previous one.
    pub fn set_face_node(&mut self, node: Option<SceneNode>) -> Option<SceneNode> {
        std::mem::replace(&mut self.face_node, node)
    }

    pub fn world_node(&self) -> Option<&SceneNode> {
        self.world_node.as_ref()
    }

    /// Replace the world node, or remove it with `None`.
    pub fn replace_world_node(&mut self, node: Option<SceneNode>) -> Option<SceneNode> {
        std::mem::replace(&mut self.world_node, node)
    }

    pub fn overlay_scene(&self) -> Option<&OverlaySceneHandle> {
        self.overlay_scene.as_ref()
    }

    pub fn set_overlay_scene(&mut self, scene: Option<OverlaySceneHandle>) {
        self.overlay_scene = scene;
    }

    pub fn lights(&self) -> &SceneLights {
        &self.lights
    }

    /// Place the face node at the tracked pose.
    pub fn update_face(&mut self, transform: Mat4) {
        if let Some(node) = &mut self.face_node {
            node.set_transform(transform);
        }
    }

    /// Place the world node at the configured world anchor.
    pub fn update_world(&mut self, transform: Mat4) {
        if let Some(node) = &mut self.world_node {
            node.set_transform(transform);
        }
    }

    pub fn apply_light_estimate(&mut self, estimate: &LightEstimate) {
        self.lights.ambient_intensity = estimate.ambient_intensity;
        if let Some(intensity) = estimate.primary_intensity {
            self.lights.directional_intensity = intensity;
        }
        if let Some(direction) = estimate.primary_direction
            && direction.length_squared() > 0.0
        {
            self.lights.directional_direction = direction.normalize();
        }
    }

    /// One draw per visible node.
    pub fn visible_draws(&self) -> Vec<DrawCommand> {
        let mut draws: Vec<DrawCommand> = [&self.face_node, &self.world_node]
            .into_iter()
            .flatten()
            .filter(|node| node.is_visible())
            .map(SceneNode::draw)
            .collect();
        if let Some(scene) = &self.overlay_scene {
            draws.push(DrawCommand::SceneNode {
                label: scene.0.clone(),
                transform: Mat4::IDENTITY.to_cols_array_2d(),
                opacity: 1.0,
            });
        }
        draws
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_reaches_target() {
        let mut node = SceneNode::new("face");
        node.fade_to(0.0);
        node.step_fade(0.15, 0.3);
        assert!((node.opacity() - 0.5).abs() < 1e-6);
        assert!(node.is_visible());
        node.step_fade(0.2, 0.3);
        assert_eq!(node.opacity(), 0.0);
        assert!(!node.is_visible());

        node.fade_to(1.0);
        node.step_fade(1.0, 0.0);
        assert_eq!(node.opacity(), 1.0);
    }

    #[test]
    fn test_visible_draws_skip_hidden_nodes() {
        let mut scene = SceneGraph::new();
        assert!(scene.visible_draws().is_empty());

        scene.set_face_node(Some(SceneNode::new("face")));
        scene.replace_world_node(Some(SceneNode::new("world")));
        scene.set_overlay_scene(Some(OverlaySceneHandle("sparkles".into())));
        assert_eq!(scene.visible_draws().len(), 3);

        scene.face_node_mut().unwrap().set_hidden(true);
        assert_eq!(scene.visible_draws().len(), 2);
    }

    #[test]
    fn test_draw_carries_fade_opacity() {
        let mut scene = SceneGraph::new();
        scene.set_face_node(Some(SceneNode::new("face")));
        let node = scene.face_node_mut().unwrap();
        node.fade_to(0.0);
        node.step_fade(0.1, 0.4);

        let draws = scene.visible_draws();
        let DrawCommand::SceneNode { label, opacity, .. } = &draws[0] else {
            panic!("expected a scene node draw, got {:?}", draws[0]);
        };
        assert_eq!(label, "face");
        assert!((opacity - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_light_estimate() {
        let mut scene = SceneGraph::new();
        scene.apply_light_estimate(&LightEstimate {
            ambient_intensity: 400.0,
            ambient_color_temperature: 5000.0,
            primary_intensity: Some(800.0),
            primary_direction: Some(Vec3::new(0.0, -2.0, 0.0)),
        });
        assert_eq!(scene.lights().ambient_intensity, 400.0);
        assert_eq!(scene.lights().directional_intensity, 800.0);
        assert_eq!(scene.lights().directional_direction, Vec3::NEG_Y);

        // A degenerate direction keeps the previous one.
        scene.apply_light_estimate(&LightEstimate {
            ambient_intensity: 400.0,
            ambient_color_temperature: 5000.0,
            primary_intensity: None,
            primary_direction: Some(Vec3::ZERO),
        });
        assert_eq!(scene.lights().directional_direction, Vec3::NEG_Y);
        assert_eq!(scene.lights().directional_intensity, 800.0);
    }
}
