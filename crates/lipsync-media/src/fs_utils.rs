//! Filesystem helpers: the per-run scratch area and final output placement.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Scratch area private to one run.
///
/// Backed by a [`TempDir`], so the directory and everything inside it is
/// removed when the value drops, whichever path the run exits through.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh scratch directory under `parent` (or the system temp dir).
    pub fn create(parent: Option<&Path>) -> MediaResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("lipsync-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        tracing::debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// 16 kHz mono WAV used for both the spectrogram and the mux.
    pub fn audio_wav(&self) -> PathBuf {
        self.dir.path().join("audio.wav")
    }

    /// Silent video holding the composited frames.
    pub fn intermediate_video(&self) -> PathBuf {
        self.dir.path().join("frames.mp4")
    }

    /// Re-encoded copy of the face input.
    pub fn optimized_input(&self) -> PathBuf {
        self.dir.path().join("input_optimized.mp4")
    }

    /// Muxed result, keeping the extension of the final target.
    pub fn muxed_output(&self, target: &Path) -> PathBuf {
        let ext = target
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        self.dir.path().join(format!("result.{ext}"))
    }
}

/// Fail with `FileNotFound` unless `path` is an existing regular file.
pub fn ensure_input_file(path: &Path) -> MediaResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Tries a rename first. On EXDEV it copies next to `dst` and renames
/// into place, so `dst` never holds a partial file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_then_rename(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// EXDEV is 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_then_rename(src: &Path, dst: &Path) -> MediaResult<()> {
    let staging = StagingFile::new(staging_path(dst));

    fs::copy(src, staging.path()).await?;
    fs::rename(staging.path(), dst).await?;
    staging.committed();

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!("Failed to remove {} after copy: {}", src.display(), e);
    }
    Ok(())
}

/// Partial copy that is deleted on drop unless it was renamed into place.
///
/// Covers both error returns and a copy future dropped mid-flight.
struct StagingFile {
    path: PathBuf,
    keep: bool,
}

impl StagingFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn committed(mut self) {
        self.keep = true;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Hidden sibling of `dst` used while copying.
fn staging_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    dst.with_file_name(format!(".{name}.partial"))
}
