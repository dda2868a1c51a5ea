//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;
use facelens_renderer::{RendererConfig, RendererError, load_config};

/// FaceLens headless renderer.
#[derive(Parser, Debug)]
#[command(
    name = "facelens",
    about = "Render face-filter frames from a synthetic camera and tracker",
    long_about = "Drives the FaceLens renderer with a synthetic camera feed and a face \
        that circles the image center.\n\n\
        EXAMPLES:\n\
          # Render 90 frames with the default settings\n\
          facelens\n\
        \n\
          # Load settings and export every frame\n\
          facelens --config facelens.toml --export",
    version
)]
pub struct Args {
    /// TOML file with renderer settings.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Viewport width in pixels. Overrides the config file.
    #[arg(long)]
    pub width: Option<u32>,

    /// Viewport height in pixels. Overrides the config file.
    #[arg(long)]
    pub height: Option<u32>,

    /// Number of frames to render.
    #[arg(long, default_value = "90")]
    pub frames: u64,

    /// Frames the CPU may encode ahead of the GPU. Overrides the config file.
    #[arg(long)]
    pub frames_in_flight: Option<usize>,

    /// Camera frame rate of the synthetic feed.
    #[arg(long, default_value = "30")]
    pub fps: f64,

    /// Deliver every rendered frame to an export consumer.
    #[arg(long)]
    pub export: bool,

    /// Name of a demo overlay to install on the first frame.
    #[arg(long)]
    pub overlay: Option<String>,

    /// Disable skin smoothing.
    #[arg(long)]
    pub no_smoothing: bool,
}

impl Args {
    /// Renderer settings from the config file with command line overrides.
    pub fn renderer_config(&self) -> Result<RendererConfig, RendererError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => RendererConfig::default(),
        };
        if let Some(width) = self.width {
            config.viewport.width = width;
        }
        if let Some(height) = self.height {
            config.viewport.height = height;
        }
        if let Some(frames_in_flight) = self.frames_in_flight {
            config.frames_in_flight = frames_in_flight;
        }
        if self.no_smoothing {
            config.skin_smoothing = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["facelens"]).unwrap();
        assert_eq!(args.frames, 90);
        assert!(!args.export);
        assert_eq!(args.renderer_config().unwrap(), RendererConfig::default());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "facelens",
            "--width",
            "720",
            "--height",
            "1280",
            "--frames-in-flight",
            "2",
            "--no-smoothing",
        ])
        .unwrap();
        let config = args.renderer_config().unwrap();
        assert_eq!((config.viewport.width, config.viewport.height), (720, 1280));
        assert_eq!(config.frames_in_flight, 2);
        assert!(!config.skin_smoothing);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::try_parse_from(["facelens", "--frames-in-flight", "0"]).unwrap();
        assert!(matches!(
            args.renderer_config(),
            Err(RendererError::Config(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let args = Args::try_parse_from(["facelens", "--config", "/nonexistent/facelens.toml"])
            .unwrap();
        let err = args.renderer_config().unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
