//! FaceLens headless renderer.
//!
//! Renders a fixed number of frames from a synthetic camera and tracker on
//! the default graphics backend and reports what was presented and exported.

mod args;
mod driver;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use facelens_graphics::GraphicsInstance;
use facelens_renderer::{FrameOutcome, Renderer, RendererError, default_library};
use glam::UVec2;

use args::Args;
use driver::{CountingConsumer, SyntheticSource, demo_overlay};

/// Camera resolution of the synthetic feed.
const CAMERA_RESOLUTION: UVec2 = UVec2::new(1920, 1440);

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), RendererError> {
    facelens_graphics::init();
    let config = args.renderer_config()?;

    let device = GraphicsInstance::new()?.create_device()?;
    let mut renderer = Renderer::new(Arc::clone(&device), config, &default_library())?;
    let handle = renderer.handle();

    let consumer = Arc::new(CountingConsumer::default());
    if args.export {
        handle.start_export(consumer.clone());
    }

    let mut source = SyntheticSource::new(CAMERA_RESOLUTION, args.fps);
    handle.tracking().publish(source.tracking_update());
    if let Some(name) = &args.overlay {
        handle.swap_overlay(demo_overlay(&device, name)?);
    }

    let mut skipped = 0u64;
    for _ in 0..args.frames {
        let camera = source.camera_frame()?;
        match renderer.render_frame(Some(&camera)) {
            FrameOutcome::Rendered(report) => {
                log::trace!("Frame at {:.3}s: {:?}", camera.timestamp, report.encoded_groups());
            }
            FrameOutcome::Skipped(reason) => {
                skipped += 1;
                log::warn!("Frame at {:.3}s skipped: {reason:?}", camera.timestamp);
            }
        }
        source.advance();
        handle.tracking().publish(source.tracking_update());
    }

    renderer.wait_idle();
    let rendered = renderer.frames_rendered();
    let presented = renderer.surface().presented_count();
    // Joins the export thread.
    drop(renderer);

    log::info!(
        "Rendered {rendered} frames ({skipped} skipped), presented {presented}, exported {}",
        consumer.received()
    );
    Ok(())
}
