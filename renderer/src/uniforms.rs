//! GPU-visible parameter records.
//!
//! All records are `#[repr(C)]` and [`Pod`] so they can be copied straight
//! into a [`UniformRing`](facelens_graphics::UniformRing) slot or stored as
//! push-constant bytes on a pass.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec2, Vec3};

use crate::scene::SceneLights;
use crate::tracking::CameraIntrinsics;

/// Near clip plane used for every projection.
pub const Z_NEAR: f32 = 0.001;
/// Far clip plane used for every projection.
pub const Z_FAR: f32 = 1000.0;
/// Vertical field of view used until the camera intrinsics are known.
pub const FALLBACK_FIELD_OF_VIEW: f32 = std::f32::consts::FRAC_PI_3;
/// Strength of the skin smoothing filter.
pub const SKIN_SMOOTHING_FACTOR: f32 = 0.6;
/// Specular exponent of the overlay material.
pub const MATERIAL_SHININESS: f32 = 30.0;

/// Per-frame uniforms shared by the overlay scene pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub ambient_light_color: Vec3,
    _pad0: f32,
    pub directional_light_direction: Vec3,
    _pad1: f32,
    pub directional_light_color: Vec3,
    pub material_shininess: f32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<FrameUniforms>(), 176);

impl FrameUniforms {
    /// Build the uniforms for one frame lit by `lights`.
    ///
    /// Intensities are scaled so that 1000 lumens gives the neutral colors.
    pub fn new(view: Mat4, projection: Mat4, lights: &SceneLights) -> Self {
        let ambient = lights.ambient_intensity / 1000.0;
        let directional = lights.directional_intensity / 1000.0;
        Self {
            view_matrix: view,
            projection_matrix: projection,
            ambient_light_color: Vec3::splat(0.5) * ambient,
            _pad0: 0.0,
            directional_light_direction: lights.directional_direction,
            _pad1: 0.0,
            directional_light_color: Vec3::splat(0.6) * directional,
            material_shininess: MATERIAL_SHININESS,
        }
    }
}

/// Parameters of one skin smoothing sub-pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SmoothingPassParameters {
    pub skin_smoothing_factor: f32,
    pub pass_index: u32,
    _pad0: [u32; 2],
    pub view_matrix: Mat4,
    pub model_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub image_size: Vec2,
    pub render_size: Vec2,
    pub inverse_resolution: Vec2,
    _pad1: [f32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<SmoothingPassParameters>(), 240);

impl SmoothingPassParameters {
    /// Parameters for sub-pass `pass_index` rendering at `render_size`.
    pub fn new(
        pass_index: u32,
        render_size: UVec2,
        view: Mat4,
        model: Mat4,
        projection: Mat4,
    ) -> Self {
        let size = render_size.max(UVec2::ONE).as_vec2();
        Self {
            skin_smoothing_factor: SKIN_SMOOTHING_FACTOR,
            pass_index,
            _pad0: [0; 2],
            view_matrix: view,
            model_matrix: model,
            projection_matrix: projection,
            image_size: size,
            render_size: size,
            inverse_resolution: Vec2::ONE / size,
            _pad1: [0.0; 2],
        }
    }
}

/// Color grading controls.
///
/// Saturation 1.0 and contrast 0.0 leave the image unchanged.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorProcessingParameters {
    pub lut_intensity: f32,
    pub saturation_intensity: f32,
    pub contrast_intensity: f32,
    _pad: f32,
}

impl Default for ColorProcessingParameters {
    fn default() -> Self {
        Self::new(1.0, 1.0, 0.0)
    }
}

impl ColorProcessingParameters {
    pub fn new(lut_intensity: f32, saturation_intensity: f32, contrast_intensity: f32) -> Self {
        Self {
            lut_intensity,
            saturation_intensity,
            contrast_intensity,
            _pad: 0.0,
        }
    }

    /// Returns true if the saturation and contrast terms alter the image.
    pub fn adjusts_color(&self) -> bool {
        self.contrast_intensity != 0.0 && self.saturation_intensity != 1.0
    }
}

/// Perspective projection for a portrait viewport showing the camera image
/// with aspect fill.
///
/// The camera image is landscape, so its long axis runs vertically on
/// screen and `fx` gives the vertical field of view. When the viewport is
/// wider than the rotated image, the vertical extent is cropped to match.
pub fn projection_matrix(
    intrinsics: Option<&CameraIntrinsics>,
    image_resolution: UVec2,
    render_size: UVec2,
) -> Mat4 {
    let render = render_size.max(UVec2::ONE).as_vec2();
    let aspect = render.x / render.y;

    let fov_y = match intrinsics {
        Some(intrinsics) if intrinsics.fx > 0.0 && image_resolution.min_element() > 0 => {
            let image = image_resolution.as_vec2();
            let half_tan = image.x / (2.0 * intrinsics.fx);
            let image_aspect = image.y / image.x;
            let half_tan = if aspect > image_aspect {
                half_tan * image_aspect / aspect
            } else {
                half_tan
            };
            2.0 * half_tan.atan()
        }
        _ => FALLBACK_FIELD_OF_VIEW,
    };

    Mat4::perspective_rh(fov_y, aspect, Z_NEAR, Z_FAR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_uniforms_default_lighting() {
        let uniforms = FrameUniforms::new(Mat4::IDENTITY, Mat4::IDENTITY, &SceneLights::default());
        assert_eq!(uniforms.ambient_light_color, Vec3::splat(0.5));
        assert_eq!(uniforms.directional_light_color, Vec3::splat(0.6));
        assert_eq!(uniforms.directional_light_direction, Vec3::NEG_Z);
        assert_eq!(uniforms.material_shininess, 30.0);
    }

    #[test]
    fn test_frame_uniforms_follow_scene_lights() {
        let lights = SceneLights {
            ambient_intensity: 500.0,
            directional_intensity: 2000.0,
            directional_direction: Vec3::NEG_Y,
        };
        let uniforms = FrameUniforms::new(Mat4::IDENTITY, Mat4::IDENTITY, &lights);
        assert_eq!(uniforms.ambient_light_color, Vec3::splat(0.25));
        assert_eq!(uniforms.directional_light_color, Vec3::splat(1.2));
        assert_eq!(uniforms.directional_light_direction, Vec3::NEG_Y);
    }

    #[test]
    fn test_smoothing_parameters() {
        let params = SmoothingPassParameters::new(
            4,
            UVec2::new(293, 543),
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            Mat4::IDENTITY,
        );
        assert_eq!(params.pass_index, 4);
        assert_eq!(params.skin_smoothing_factor, 0.6);
        assert_eq!(params.render_size, Vec2::new(293.0, 543.0));
        assert_eq!(params.image_size, params.render_size);
        assert!((params.inverse_resolution.x - 1.0 / 293.0).abs() < 1e-9);
    }

    #[test]
    fn test_color_parameters_identity() {
        let params = ColorProcessingParameters::default();
        assert_eq!(params.lut_intensity, 1.0);
        assert!(!params.adjusts_color());

        assert!(!ColorProcessingParameters::new(1.0, 1.0, 0.5).adjusts_color());
        assert!(!ColorProcessingParameters::new(1.0, 1.2, 0.0).adjusts_color());
        assert!(ColorProcessingParameters::new(1.0, 1.2, 0.1).adjusts_color());
    }

    #[test]
    fn test_projection_fallback_and_intrinsics() {
        let render = UVec2::new(1170, 2169);
        let fallback = projection_matrix(None, UVec2::new(1920, 1440), render);
        let expected = Mat4::perspective_rh(FALLBACK_FIELD_OF_VIEW, 1170.0 / 2169.0, Z_NEAR, Z_FAR);
        assert_eq!(fallback, expected);

        let intrinsics = CameraIntrinsics {
            fx: 1600.0,
            fy: 1600.0,
            cx: 960.0,
            cy: 720.0,
        };
        let projection = projection_matrix(Some(&intrinsics), UVec2::new(1920, 1440), render);
        let fov = 2.0 * (1920.0f32 / 3200.0).atan();
        let expected = Mat4::perspective_rh(fov, 1170.0 / 2169.0, Z_NEAR, Z_FAR);
        assert!(projection.abs_diff_eq(expected, 1e-5));
    }
}
