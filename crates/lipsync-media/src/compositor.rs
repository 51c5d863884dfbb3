//! Pastes generated patches back into copies of their source frames.

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{s, Array4, ArrayView3};
use rayon::prelude::*;

use crate::batch::{Batch, BGR};
use crate::error::{MediaError, MediaResult};

/// A finished frame, ordered by its output index.
#[derive(Debug, Clone)]
pub struct OutputFrame {
    pub index: usize,
    pub image: RgbImage,
}

/// Consumer of output frames, fed strictly in index order.
#[async_trait]
pub trait FrameSink: Send {
    async fn push(&mut self, frame: OutputFrame) -> MediaResult<()>;
}

/// Sink that keeps every frame in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub frames: Vec<OutputFrame>,
}

#[async_trait]
impl FrameSink for CollectingSink {
    async fn push(&mut self, frame: OutputFrame) -> MediaResult<()> {
        self.frames.push(frame);
        Ok(())
    }
}

/// Turns generator output back into full frames.
#[derive(Debug, Default)]
pub struct FrameCompositor {
    /// Next index expected, to catch reordering across batches
    next_index: usize,
}

impl FrameCompositor {
    pub fn new() -> Self {
        Self { next_index: 0 }
    }

    /// Frames composited so far.
    pub fn emitted(&self) -> usize {
        self.next_index
    }

    /// Composite one batch. Output keeps the batch's item order.
    ///
    /// Source frames are never modified; each result is a fresh copy.
    pub fn composite(&mut self, batch: &Batch, patches: &Array4<f32>) -> MediaResult<Vec<OutputFrame>> {
        if patches.dim().0 != batch.len() || patches.dim().1 != 3 {
            return Err(MediaError::inference(format!(
                "expected {} patches of 3 channels, got shape {:?}",
                batch.len(),
                patches.shape()
            )));
        }
        if let Some(first) = batch.items.first() {
            if first.index != self.next_index {
                return Err(MediaError::internal(format!(
                    "batch starts at frame {} but {} was expected",
                    first.index, self.next_index
                )));
            }
        }

        let frames: Vec<OutputFrame> = batch
            .items
            .par_iter()
            .enumerate()
            .map(|(b, item)| {
                let patch = patch_to_image(patches.slice(s![b, .., .., ..]));
                let rect = item.bbox.rect();
                let resized = imageops::resize(&patch, rect.width, rect.height, FilterType::Triangle);

                let mut image = item.frame.image.as_ref().clone();
                imageops::replace(&mut image, &resized, rect.x as i64, rect.y as i64);
                OutputFrame {
                    index: item.index,
                    image,
                }
            })
            .collect();

        self.next_index += frames.len();
        Ok(frames)
    }
}

/// `[3, S, S]` BGR patch in `[0, 1]` to an RGB image.
fn patch_to_image(patch: ArrayView3<'_, f32>) -> RgbImage {
    let (_, h, w) = patch.dim();
    let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let mut rgb = [0u8; 3];
        for (c, &channel) in BGR.iter().enumerate() {
            rgb[channel] = to_u8(patch[[c, y, x]]);
        }
        Rgb(rgb)
    })
}
