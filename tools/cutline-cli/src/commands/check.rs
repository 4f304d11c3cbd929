//! Check for the external tools the ffmpeg backend needs.

use cutline_common::config::config_file_path;
use cutline_render_engine::ffmpeg::command_exists;

pub fn run() -> anyhow::Result<()> {
    println!("Cutline System Check");
    println!("{}", "=".repeat(50));

    let mut all_ok = true;
    for (binary, purpose) in [("ffmpeg", "decoding and encoding"), ("ffprobe", "media probing")] {
        if command_exists(binary) {
            println!("[OK]   {binary} ({purpose})");
        } else {
            println!("[MISS] {binary} ({purpose}): install FFmpeg and make sure it is on PATH");
            all_ok = false;
        }
    }

    let config_path = config_file_path();
    if config_path.exists() {
        println!("[OK]   Config: {}", config_path.display());
    } else {
        println!("[INFO] Config: {} (not present, using defaults)", config_path.display());
    }

    println!();
    if all_ok {
        println!("All required tools are available. Cutline is ready.");
    } else {
        println!("Some required tools are missing. See above for fixes.");
    }

    Ok(())
}
