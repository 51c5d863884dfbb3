use std::path::Path;

use lipsync_media::face::is_model_available_at;
use lipsync_media::{check_ffmpeg, check_ffprobe};
use lipsync_models::ModelVariant;
use lipsync_worker::{locate_checkpoint, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "lipsync-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;

    let ffmpeg = check_ffmpeg()?;
    let ffprobe = check_ffprobe()?;
    println!("lipsync-selfcheck: ffmpeg={} ffprobe={}", ffmpeg.display(), ffprobe.display());

    let checkpoint = locate_checkpoint(&config.checkpoint_dir, ModelVariant::Standard)?;
    println!("lipsync-selfcheck: checkpoint={}", checkpoint.display());

    if !is_model_available_at(&config.detector_model) {
        return Err(anyhow::anyhow!(
            "face detector model missing at {}",
            config.detector_model.display()
        ));
    }

    println!("lipsync-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}
