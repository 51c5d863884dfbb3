//! Packs frames, face crops and mel chunks into generator batches.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{s, Array4};
use rayon::prelude::*;

use crate::audio::MelChunks;
use crate::error::{MediaError, MediaResult};
use crate::face::{BoundingBox, FaceTrack};
use crate::frames::{Frame, FrameSequence};

/// Generator checkpoints were trained on BGR frames; tensor channel `c`
/// holds RGB channel `BGR[c]`.
pub(crate) const BGR: [usize; 3] = [2, 1, 0];

/// One output position inside a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Mel chunk index, which is also the output frame index
    pub index: usize,
    /// Source frame the patch is pasted into
    pub frame: Frame,
    pub bbox: BoundingBox,
}

/// Tensors and bookkeeping for one generator call.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[B, 6, S, S]`: lower-half-masked crop then full crop, in `[0, 1]`
    pub faces: Array4<f32>,
    /// `[B, 1, n_mels, mel_step]`
    pub mels: Array4<f32>,
    pub items: Vec<BatchItem>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Output indices covered by this batch, in order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.items.iter().map(|item| item.index)
    }
}

/// Lazy, order-preserving batch generator.
///
/// Yields contiguous index ranges `0..n` in steps of `batch_size`; the last
/// batch may be shorter. Not restartable.
pub struct BatchAssembler<'a> {
    frames: &'a FrameSequence,
    track: &'a FaceTrack,
    mels: &'a MelChunks,
    batch_size: usize,
    img_size: u32,
    total: usize,
    next: usize,
}

impl<'a> BatchAssembler<'a> {
    pub fn new(
        frames: &'a FrameSequence,
        track: &'a FaceTrack,
        mels: &'a MelChunks,
        batch_size: usize,
        img_size: u32,
    ) -> Self {
        Self {
            frames,
            track,
            mels,
            batch_size: batch_size.max(1),
            img_size,
            total: frames.output_len(mels.len()),
            next: 0,
        }
    }

    /// Number of output frames this assembler will produce.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of batches this assembler will yield in total.
    pub fn batch_count(&self) -> usize {
        self.total.div_ceil(self.batch_size)
    }

    fn item(&self, index: usize) -> MediaResult<BatchItem> {
        let frame_index = self.frames.frame_index_for_chunk(index);
        let frame = self
            .frames
            .frame_for_chunk(index)
            .ok_or_else(|| MediaError::internal(format!("no frame for output {index}")))?;
        let bbox = self
            .track
            .get(frame_index)
            .ok_or_else(|| MediaError::detection_failed(frame_index, "no face box for frame"))?;

        Ok(BatchItem {
            index,
            frame: frame.clone(),
            bbox,
        })
    }

    fn assemble(&self, range: std::ops::Range<usize>) -> MediaResult<Batch> {
        let items = range.map(|i| self.item(i)).collect::<MediaResult<Vec<_>>>()?;
        let size = self.img_size;

        let crops: Vec<RgbImage> = items
            .par_iter()
            .map(|item| crop_face(&item.frame.image, item.bbox, size))
            .collect();

        let s = size as usize;
        let half = s / 2;
        let mut faces = Array4::<f32>::zeros((items.len(), 6, s, s));
        for (b, crop) in crops.iter().enumerate() {
            for (x, y, pixel) in crop.enumerate_pixels() {
                let (x, y) = (x as usize, y as usize);
                for (c, &rgb) in BGR.iter().enumerate() {
                    let v = pixel[rgb] as f32 / 255.0;
                    if y < half {
                        faces[[b, c, y, x]] = v;
                    }
                    faces[[b, c + 3, y, x]] = v;
                }
            }
        }

        let (n_mels, step) = (self.mels.n_mels(), self.mels.step());
        let mut mels = Array4::<f32>::zeros((items.len(), 1, n_mels, step));
        for (b, item) in items.iter().enumerate() {
            let chunk = self
                .mels
                .get(item.index)
                .ok_or_else(|| MediaError::internal(format!("no mel chunk {}", item.index)))?;
            mels.slice_mut(s![b, 0, .., ..]).assign(&chunk.data);
        }

        Ok(Batch { faces, mels, items })
    }
}

impl Iterator for BatchAssembler<'_> {
    type Item = MediaResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let end = (self.next + self.batch_size).min(self.total);
        let range = self.next..end;
        self.next = end;

        let result = self.assemble(range);
        if result.is_err() {
            // Fail fast: nothing after a broken batch is yielded.
            self.next = self.total;
        }
        Some(result)
    }
}

/// Cut the box out of `frame` and resize it to `size` x `size`.
pub fn crop_face(frame: &RgbImage, bbox: BoundingBox, size: u32) -> RgbImage {
    let rect = bbox.rect();
    let region = imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();
    imageops::resize(&region, size, size, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use lipsync_models::PixelRect;
    use ndarray::Array2;

    fn mel_chunks(columns: usize) -> MelChunks {
        MelChunks::slice(Array2::from_elem((80, columns), 0.5), 25.0, 16).unwrap()
    }

    fn track(n: usize) -> FaceTrack {
        FaceTrack::new(vec![BoundingBox(PixelRect::new(8, 8, 16, 16)); n])
    }

    fn video(n: usize) -> FrameSequence {
        let frames = (0..n)
            .map(|i| Frame::new(i, RgbImage::from_pixel(32, 32, Rgb([255, 128, 0]))))
            .collect();
        FrameSequence::from_frames(frames, 25.0)
    }

    #[test]
    fn test_batches_cover_indices_in_order() {
        let (frames, mels) = (video(40), mel_chunks(100));
        let track = track(40);
        let assembler = BatchAssembler::new(&frames, &track, &mels, 8, 16);
        assert_eq!(assembler.total(), 28);
        assert_eq!(assembler.batch_count(), 4);

        let batches: Vec<Batch> = assembler.map(|b| b.unwrap()).collect();
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![8, 8, 8, 4]);

        let indices: Vec<usize> = batches.iter().flat_map(|b| b.indices().collect::<Vec<_>>()).collect();
        assert_eq!(indices, (0..28).collect::<Vec<_>>());
    }

    #[test]
    fn test_tensor_shapes_and_mask() {
        let (frames, mels) = (video(3), mel_chunks(100));
        let track = track(3);
        let batch = BatchAssembler::new(&frames, &track, &mels, 4, 16)
            .next()
            .unwrap()
            .unwrap();

        assert_eq!(batch.faces.dim(), (3, 6, 16, 16));
        assert_eq!(batch.mels.dim(), (3, 1, 80, 16));

        // BGR order: channel 0 is blue (0), channel 2 is red (255)
        assert_eq!(batch.faces[[0, 0, 0, 0]], 0.0);
        assert!((batch.faces[[0, 2, 0, 0]] - 1.0).abs() < 1e-6);
        // lower half of the masked copy is zero, unmasked copy is not
        assert_eq!(batch.faces[[0, 2, 8, 0]], 0.0);
        assert!((batch.faces[[0, 5, 8, 0]] - 1.0).abs() < 1e-6);
        assert!((batch.mels[[2, 0, 79, 15]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_static_input_reuses_frame_zero() {
        let still = FrameSequence::still(Frame::new(0, RgbImage::new(32, 32)), 25.0);
        let track = track(1);
        let mels = mel_chunks(100);
        let batches: Vec<Batch> = BatchAssembler::new(&still, &track, &mels, 10, 16)
            .map(|b| b.unwrap())
            .collect();

        let total: usize = batches.iter().map(Batch::len).sum();
        assert_eq!(total, mels.len());
        assert!(batches
            .iter()
            .flat_map(|b| b.items.iter())
            .all(|item| item.frame.index == 0));
    }

    #[test]
    fn test_missing_box_fails_fast() {
        let (frames, mels) = (video(10), mel_chunks(100));
        let short_track = track(5);
        let mut assembler = BatchAssembler::new(&frames, &short_track, &mels, 4, 16);

        assert!(assembler.next().unwrap().is_ok());
        assert!(assembler.next().unwrap().is_err());
        assert!(assembler.next().is_none());
    }

    #[test]
    fn test_crop_face_size() {
        let frame = RgbImage::new(64, 48);
        let crop = crop_face(&frame, BoundingBox(PixelRect::new(10, 5, 30, 20)), 96);
        assert_eq!(crop.dimensions(), (96, 96));
    }
}
