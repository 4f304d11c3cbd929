//! Describe a media file.

use std::path::PathBuf;

use cutline_render_engine::ffmpeg::inspect_media;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let media = inspect_media(&path)
        .map_err(|e| anyhow::anyhow!("Failed to inspect {}: {e}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&media)?);
    Ok(())
}
