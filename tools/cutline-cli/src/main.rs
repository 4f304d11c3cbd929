//! Cutline CLI: inspect media and render multi-track timelines to video.
//!
//! Usage:
//!   cutline render --output <FILE> --clip <PATH[@SECS]>...   Render clips to a video file
//!   cutline info <PATH>                                       Describe a media file as JSON
//!   cutline check                                             Check for ffmpeg and ffprobe

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cutline_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "cutline",
    about = "Multi-track timeline compositing and rendering",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render clips to a video file
    Render {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Media to place, optionally at a timeline position: PATH or PATH@SECS
        #[arg(short, long = "clip", required = true)]
        clips: Vec<String>,

        /// Put every clip on its own track instead of one after another
        #[arg(long)]
        layered: bool,

        /// Output width (defaults to the configured project width)
        #[arg(long)]
        width: Option<u32>,

        /// Output height (defaults to the configured project height)
        #[arg(long)]
        height: Option<u32>,

        /// Output frame rate (defaults to the configured project rate)
        #[arg(long)]
        fps: Option<u32>,

        /// Render length in seconds (defaults to the end of the last clip)
        #[arg(long)]
        duration: Option<f64>,

        /// How long still images stay on screen (seconds)
        #[arg(long, default_value = "5.0")]
        image_secs: f64,

        /// Video codec: h264|h265|vp9|mpeg4
        #[arg(long)]
        codec: Option<String>,

        /// Video bitrate in kbps
        #[arg(long)]
        bitrate: Option<u32>,

        /// Constant rate factor (overrides the bitrate)
        #[arg(long)]
        crf: Option<u8>,
    },

    /// Describe a media file
    Info {
        /// Path to the media file
        path: PathBuf,
    },

    /// Check for the external tools the ffmpeg backend needs
    Check,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, load_error) = match AppConfig::try_load() {
        Ok(config) => (config.unwrap_or_default(), None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    cutline_common::logging::init_logging(&logging);

    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config at {:?}, using defaults: {}",
            cutline_common::config::config_file_path(),
            e
        );
    }

    match cli.command {
        Commands::Render {
            output,
            clips,
            layered,
            width,
            height,
            fps,
            duration,
            image_secs,
            codec,
            bitrate,
            crf,
        } => commands::render::run(
            &config,
            commands::render::RenderArgs {
                output,
                clips,
                layered,
                width,
                height,
                fps,
                duration,
                image_secs,
                codec,
                bitrate,
                crf,
            },
        ),
        Commands::Info { path } => commands::info::run(path),
        Commands::Check => commands::check::run(),
    }
}
