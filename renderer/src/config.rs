//! Renderer configuration loaded from `facelens.toml`.
//!
//! Every field has a default, so an empty file (or no file) yields the
//! stock configuration:
//!
//! ```toml
//! frames_in_flight = 3
//! skin_smoothing = true
//! denoise = false
//! color_grading = true
//! world_anchor_id = "placement"
//!
//! [viewport]
//! width = 1170
//! height = 2169
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::RendererError;

/// Initial viewport size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 1170,
            height: 2169,
        }
    }
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frames the CPU may encode ahead of the GPU.
    pub frames_in_flight: usize,
    pub viewport: ViewportConfig,
    /// Run the seven skin smoothing sub-passes when a face is tracked.
    pub skin_smoothing: bool,
    /// Run the denoise compute stage on the luma plane.
    pub denoise: bool,
    /// Allow the color grading step.
    pub color_grading: bool,
    /// Identifier of the world anchor that places the overlay's world node.
    pub world_anchor_id: Option<String>,
    /// Name of the thread that delivers exported frames.
    pub export_thread_name: String,
    /// Seconds the face node takes to fade when tracking is toggled or the
    /// face is lost or found.
    pub tracking_fade_seconds: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            viewport: ViewportConfig::default(),
            skin_smoothing: true,
            denoise: false,
            color_grading: true,
            world_anchor_id: None,
            export_thread_name: "facelens-export".to_string(),
            tracking_fade_seconds: 0.3,
        }
    }
}

impl RendererConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, RendererError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RendererError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), RendererError> {
        if self.frames_in_flight == 0 {
            return Err(RendererError::Config(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(RendererError::Config(format!(
                "viewport {}x{} has a zero dimension",
                self.viewport.width, self.viewport.height
            )));
        }
        if !self.tracking_fade_seconds.is_finite() || self.tracking_fade_seconds < 0.0 {
            return Err(RendererError::Config(format!(
                "tracking_fade_seconds must be a non-negative number, got {}",
                self.tracking_fade_seconds
            )));
        }
        Ok(())
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<RendererConfig, RendererError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RendererError::Config(format!("failed to read {}: {e}", path.display())))?;
    RendererConfig::from_toml_str(&content).map_err(|e| match e {
        RendererError::Config(msg) => RendererError::Config(format!("{}: {msg}", path.display())),
        other => other,
    })
}
