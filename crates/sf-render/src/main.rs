//! sf-render - Offline audio render driver
//!
//! Mixes a JSON clip list frame by frame through the deterministic export
//! mixdown and writes the result as a 32-bit float WAV.

mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use sf_core::AudioConfig;

use render::RenderJob;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON clip list
    #[arg(short, long)]
    project: PathBuf,

    /// Video frame rate driving the render clock
    #[arg(long, default_value_t = 60.0)]
    fps: f64,

    /// Render start (timeline seconds)
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// Render end (timeline seconds)
    #[arg(long)]
    end: f64,

    /// Output WAV file
    #[arg(short, long)]
    out: PathBuf,

    /// Audio configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AudioConfig::from_json_file(path)?,
        None => AudioConfig::headless(),
    };
    // Offline rendering is always frame-driven
    let config = AudioConfig {
        update_threads: 0,
        ..config
    };

    let job = RenderJob {
        clips: render::load_project(&args.project)?,
        fps: args.fps,
        start: args.start,
        end: args.end,
        output: args.out,
    };

    let stats = render::render(&job, config)?;
    println!(
        "Rendered {} frames ({} samples per channel) to {}",
        stats.frames,
        stats.samples_per_channel,
        job.output.display()
    );
    Ok(())
}
