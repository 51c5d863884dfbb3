//! Progress updates emitted between pipeline stages.

use serde::{Deserialize, Serialize};

/// A `(percentage, message)` pair sent to a progress sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// 0-100
    pub percent: u8,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
        }
    }

    /// Map `done` of `total` units onto the `[start, end]` percentage band.
    pub fn within(start: u8, end: u8, done: usize, total: usize, message: impl Into<String>) -> Self {
        let span = end.saturating_sub(start) as f64;
        let ratio = if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).min(1.0)
        };
        Self::new(start + (span * ratio).round() as u8, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_capped() {
        assert_eq!(ProgressUpdate::new(140, "x").percent, 100);
    }

    #[test]
    fn test_within_band() {
        assert_eq!(ProgressUpdate::within(45, 90, 0, 10, "b").percent, 45);
        assert_eq!(ProgressUpdate::within(45, 90, 5, 10, "b").percent, 68);
        assert_eq!(ProgressUpdate::within(45, 90, 10, 10, "b").percent, 90);
        assert_eq!(ProgressUpdate::within(45, 90, 0, 0, "b").percent, 90);
    }
}
