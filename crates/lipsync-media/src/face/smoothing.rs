//! Temporal smoothing of per-frame face boxes.

use super::models::BoxCoords;

/// Forward moving average over `window` frames.
///
/// `smoothed[i]` is the coordinate-wise mean of the boxes present in
/// `raw[i..min(i + window, n)]`. The window shrinks towards the tail instead
/// of wrapping, so the last `window - 1` frames are smoothed less. Frame
/// count and order never change. A frame whose whole window is empty stays
/// `None`.
pub fn smooth_boxes(raw: &[Option<BoxCoords>], window: usize) -> Vec<Option<BoxCoords>> {
    let window = window.max(1);
    let n = raw.len();
    let mut smoothed = Vec::with_capacity(n);

    for i in 0..n {
        let end = (i + window).min(n);
        let mut sum = [0.0f64; 4];
        let mut count = 0usize;

        for b in raw[i..end].iter().flatten() {
            sum[0] += b.top;
            sum[1] += b.bottom;
            sum[2] += b.left;
            sum[3] += b.right;
            count += 1;
        }

        smoothed.push((count > 0).then(|| {
            let c = count as f64;
            BoxCoords::new(sum[0] / c, sum[1] / c, sum[2] / c, sum[3] / c)
        }));
    }

    smoothed
}
