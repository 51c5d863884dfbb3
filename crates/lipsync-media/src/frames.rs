//! Frame ingestion: decode, resize, rotate and crop the face input.
//!
//! Videos are decoded by FFmpeg straight into packed RGB24 at the target
//! size; still images are loaded with the `image` crate and repeated
//! logically rather than copied.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;
use lipsync_models::{PipelineConfig, PixelRect};
use tracing::{debug, info};

use crate::command::{format_fps, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_input_file;
use crate::probe::probe_video;

pub(crate) const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "m4v"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Upper bound on frame slots reserved up front; longer inputs grow as they decode.
const MAX_PREALLOCATED_FRAMES: usize = 4096;

/// A decoded, normalised input frame. Immutable once produced.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(index: usize, image: RgbImage) -> Self {
        Self {
            index,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// What kind of file the face input is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceInputKind {
    Video,
    Image,
}

impl FaceInputKind {
    /// Classify by extension; unknown extensions are unsupported.
    pub fn classify(path: &Path) -> MediaResult<Self> {
        ensure_input_file(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Ok(Self::Video)
        } else {
            Err(MediaError::UnsupportedFormat(format!(
                "face input {} (expected a video or a jpg/png image)",
                path.display()
            )))
        }
    }
}

/// Resize, rotate and crop steps resolved for one source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Size after resizing, before rotation
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub rotate: bool,
    /// Crop in rotated coordinates
    pub crop: PixelRect,
}

impl FrameGeometry {
    /// Resolve the configured transforms against a `width` x `height` source.
    pub fn plan(width: u32, height: u32, config: &PipelineConfig) -> MediaResult<Self> {
        let (mut w, mut h) = match config.out_height {
            Some(target) => {
                let w = (width as u64 * target as u64 / height.max(1) as u64) as u32;
                (w, target)
            }
            None => (width, height),
        };
        w = (w / config.resize_factor).max(1);
        h = (h / config.resize_factor).max(1);

        let (rw, rh) = if config.rotate { (h, w) } else { (w, h) };
        let crop = config.crop.resolve(rw, rh)?;

        Ok(Self {
            scaled_width: w,
            scaled_height: h,
            rotate: config.rotate,
            crop,
        })
    }

    /// Final frame size.
    pub fn output_size(&self) -> (u32, u32) {
        (self.crop.width, self.crop.height)
    }

    /// Apply resize (if needed), rotation and crop.
    pub fn apply(&self, image: RgbImage) -> RgbImage {
        let resized = if image.dimensions() == (self.scaled_width, self.scaled_height) {
            image
        } else {
            imageops::resize(
                &image,
                self.scaled_width,
                self.scaled_height,
                FilterType::Triangle,
            )
        };

        let rotated = if self.rotate {
            imageops::rotate90(&resized)
        } else {
            resized
        };

        let full = PixelRect::new(0, 0, rotated.width(), rotated.height());
        if self.crop == full {
            return rotated;
        }
        imageops::crop_imm(
            &rotated,
            self.crop.x,
            self.crop.y,
            self.crop.width,
            self.crop.height,
        )
        .to_image()
    }
}

/// All frames of one run, plus how to address them by chunk index.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<Frame>,
    is_static: bool,
    fps: f64,
}

impl FrameSequence {
    /// Sequence of distinct video frames.
    pub fn from_frames(frames: Vec<Frame>, fps: f64) -> Self {
        Self {
            frames,
            is_static: false,
            fps,
        }
    }

    /// One still frame repeated for every chunk.
    pub fn still(frame: Frame, fps: f64) -> Self {
        Self {
            frames: vec![frame],
            is_static: true,
            fps,
        }
    }

    /// Number of decoded frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Frames the face detector has to look at.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Decoded-frame index paired with mel chunk `chunk`.
    pub fn frame_index_for_chunk(&self, chunk: usize) -> usize {
        if self.is_static {
            0
        } else {
            chunk
        }
    }

    pub fn frame_for_chunk(&self, chunk: usize) -> Option<&Frame> {
        self.frames.get(self.frame_index_for_chunk(chunk))
    }

    /// Output length for `mel_chunks` chunks: the shorter stream wins.
    pub fn output_len(&self, mel_chunks: usize) -> usize {
        if self.frames.is_empty() {
            0
        } else if self.is_static {
            mel_chunks
        } else {
            mel_chunks.min(self.frames.len())
        }
    }
}

/// Opened face input, ready to decode.
#[derive(Debug)]
pub struct VideoFrameSource {
    path: PathBuf,
    kind: FaceInputKind,
    is_static: bool,
    fps: f64,
    geometry: FrameGeometry,
    /// Image inputs are decoded while opening
    still: Option<RgbImage>,
}

impl VideoFrameSource {
    /// Validate the input and resolve its geometry.
    pub async fn open(path: &Path, config: &PipelineConfig) -> MediaResult<Self> {
        let kind = FaceInputKind::classify(path)?;

        let (width, height, fps, still) = match kind {
            FaceInputKind::Image => {
                let image = image::open(path)
                    .map_err(|e| MediaError::invalid_input(path, format!("unreadable image: {e}")))?
                    .to_rgb8();
                (image.width(), image.height(), config.fps, Some(image))
            }
            FaceInputKind::Video => {
                let info = probe_video(path).await?;
                (info.width, info.height, info.fps, None)
            }
        };

        let geometry = FrameGeometry::plan(width, height, config)?;
        let is_static = kind == FaceInputKind::Image || config.static_input;

        info!(
            path = %path.display(),
            kind = ?kind,
            is_static,
            source_width = width,
            source_height = height,
            fps,
            output_width = geometry.output_size().0,
            output_height = geometry.output_size().1,
            "Opened face input"
        );

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            is_static,
            fps,
            geometry,
            still,
        })
    }

    /// Source frame rate, or the configured rate for a still image.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// Decode at most `limit` frames. Consumes the source.
    pub async fn read(self, runner: &FfmpegRunner, limit: usize) -> MediaResult<FrameSequence> {
        if limit == 0 {
            return Err(MediaError::internal("frame limit must be positive"));
        }

        if let Some(image) = self.still {
            return Ok(FrameSequence::still(
                Frame::new(0, self.geometry.apply(image)),
                self.fps,
            ));
        }

        let limit = if self.is_static { 1 } else { limit };
        let frames = self.decode_video(runner, limit).await?;

        if frames.is_empty() {
            return Err(MediaError::invalid_input(&self.path, "video has no decodable frames"));
        }

        let sequence = if self.is_static {
            let first = frames.into_iter().next().map(|f| FrameSequence::still(f, self.fps));
            first.ok_or_else(|| MediaError::internal("first frame vanished"))?
        } else {
            FrameSequence::from_frames(frames, self.fps)
        };

        info!(frames = sequence.len(), is_static = sequence.is_static(), "Read input frames");
        Ok(sequence)
    }

    async fn decode_video(&self, runner: &FfmpegRunner, limit: usize) -> MediaResult<Vec<Frame>> {
        debug_assert_eq!(self.kind, FaceInputKind::Video);
        let (w, h) = (self.geometry.scaled_width, self.geometry.scaled_height);

        let cmd = FfmpegCommand::to_stdout(&self.path)
            .input_arg("-noautorotate")
            .output_args(["-map", "0:v:0", "-an", "-sn"])
            .video_filter(format!("scale={w}:{h}:flags=bilinear"))
            .output_args(["-fps_mode", "passthrough"])
            .output_args(["-frames:v".to_string(), limit.to_string()])
            .output_args(["-f", "rawvideo", "-pix_fmt", "rgb24"]);

        debug!(
            width = w,
            height = h,
            limit,
            fps = %format_fps(self.fps),
            "Decoding video frames"
        );

        let mut process = runner.spawn(&cmd)?;
        let frame_len = w as usize * h as usize * 3;
        let mut frames = Vec::with_capacity(frame_capacity(limit));
        let mut buf = vec![0u8; frame_len];

        while frames.len() < limit && process.read_exact_or_eof(&mut buf).await? {
            let raw = RgbImage::from_raw(w, h, buf.clone())
                .ok_or_else(|| MediaError::internal("raw frame size mismatch"))?;
            frames.push(Frame::new(frames.len(), self.geometry.apply(raw)));
        }

        process.finish().await?;
        Ok(frames)
    }
}

/// Frame slots to reserve before decoding at most `limit` frames.
fn frame_capacity(limit: usize) -> usize {
    limit.min(MAX_PREALLOCATED_FRAMES)
}
