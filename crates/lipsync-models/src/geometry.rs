//! Rectangles and paddings used to locate faces and crop frames.
//!
//! All user-facing rectangles are expressed in `(top, bottom, left, right)`
//! order, matching the command-line surface. A `-1` sentinel stands for
//! "full extent" (crop) or "use the detector" (box override).

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Sentinel value used by crop and box rectangles.
pub const SENTINEL: i32 = -1;

/// Pixel padding added around a detected face before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pads {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Default for Pads {
    /// Extra room below the box so the chin stays inside the crop.
    fn default() -> Self {
        Self {
            top: 0,
            bottom: 10,
            left: 0,
            right: 0,
        }
    }
}

impl Pads {
    /// Create paddings in `(top, bottom, left, right)` order.
    pub fn new(top: u32, bottom: u32, left: u32, right: u32) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    /// Parse a four-element `(top, bottom, left, right)` list.
    pub fn from_slice(values: &[i64]) -> Result<Self, ConfigError> {
        let [top, bottom, left, right] = four(values, "pads")?;
        let non_negative = |v: i64| {
            u32::try_from(v).map_err(|_| ConfigError::invalid("pads", format!("negative padding {v}")))
        };
        Ok(Self::new(
            non_negative(top)?,
            non_negative(bottom)?,
            non_negative(left)?,
            non_negative(right)?,
        ))
    }
}

/// Axis-aligned pixel rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    /// Left edge (inclusive)
    pub x: u32,
    /// Top edge (inclusive)
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from exclusive `(top, bottom, left, right)` edges.
    pub fn from_edges(top: u32, bottom: u32, left: u32, right: u32) -> Option<Self> {
        if bottom <= top || right <= left {
            return None;
        }
        Some(Self::new(left, top, right - left, bottom - top))
    }

    #[inline]
    pub fn top(&self) -> u32 {
        self.y
    }

    #[inline]
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    #[inline]
    pub fn left(&self) -> u32 {
        self.x
    }

    #[inline]
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Crop applied to every decoded frame after resizing and rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
}

impl Default for CropRect {
    fn default() -> Self {
        Self::FULL
    }
}

impl CropRect {
    /// Keep the whole frame.
    pub const FULL: CropRect = CropRect {
        top: 0,
        bottom: SENTINEL,
        left: 0,
        right: SENTINEL,
    };

    /// Parse a four-element `(top, bottom, left, right)` list.
    pub fn from_slice(values: &[i64]) -> Result<Self, ConfigError> {
        let [top, bottom, left, right] = four(values, "crop")?;
        Ok(Self {
            top: narrow(top, "crop")?,
            bottom: narrow(bottom, "crop")?,
            left: narrow(left, "crop")?,
            right: narrow(right, "crop")?,
        })
    }

    /// Whether this crop leaves frames untouched.
    pub fn is_full(&self) -> bool {
        self.top <= 0 && self.left <= 0 && self.bottom == SENTINEL && self.right == SENTINEL
    }

    /// Resolve against concrete frame dimensions.
    ///
    /// `-1` on `bottom`/`right` means the frame edge; everything else is
    /// clamped into the frame. An empty result is an error.
    pub fn resolve(&self, width: u32, height: u32) -> Result<PixelRect, ConfigError> {
        let edge = |v: i32, extent: u32| -> u32 {
            if v == SENTINEL {
                extent
            } else {
                (v.max(0) as u32).min(extent)
            }
        };
        let top = (self.top.max(0) as u32).min(height);
        let left = (self.left.max(0) as u32).min(width);
        let bottom = edge(self.bottom, height);
        let right = edge(self.right, width);

        PixelRect::from_edges(top, bottom, left, right).ok_or_else(|| {
            ConfigError::invalid(
                "crop",
                format!("crop {self:?} leaves nothing of a {width}x{height} frame"),
            )
        })
    }
}

/// Explicit face rectangle used instead of running the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxOverride {
    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
}

impl Default for BoxOverride {
    fn default() -> Self {
        Self::DETECT
    }
}

impl BoxOverride {
    /// Run the face detector.
    pub const DETECT: BoxOverride = BoxOverride {
        top: SENTINEL,
        bottom: SENTINEL,
        left: SENTINEL,
        right: SENTINEL,
    };

    pub fn new(top: i32, bottom: i32, left: i32, right: i32) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    /// Parse a four-element `(top, bottom, left, right)` list.
    pub fn from_slice(values: &[i64]) -> Result<Self, ConfigError> {
        let [top, bottom, left, right] = four(values, "box")?;
        Ok(Self::new(
            narrow(top, "box")?,
            narrow(bottom, "box")?,
            narrow(left, "box")?,
            narrow(right, "box")?,
        ))
    }

    /// The first coordinate carries the sentinel.
    pub fn uses_detector(&self) -> bool {
        self.top == SENTINEL
    }

    /// Resolve the fixed rectangle, clamped into a `width` x `height` frame.
    pub fn resolve(&self, width: u32, height: u32) -> Result<PixelRect, ConfigError> {
        let clamp = |v: i32, extent: u32| (v.max(0) as u32).min(extent);
        PixelRect::from_edges(
            clamp(self.top, height),
            clamp(self.bottom, height),
            clamp(self.left, width),
            clamp(self.right, width),
        )
        .ok_or_else(|| {
            ConfigError::invalid(
                "box",
                format!("box {self:?} is empty inside a {width}x{height} frame"),
            )
        })
    }
}

fn four(values: &[i64], field: &'static str) -> Result<[i64; 4], ConfigError> {
    <[i64; 4]>::try_from(values).map_err(|_| {
        ConfigError::invalid(
            field,
            format!("expected 4 values (top bottom left right), got {}", values.len()),
        )
    })
}

fn narrow(v: i64, field: &'static str) -> Result<i32, ConfigError> {
    i32::try_from(v).map_err(|_| ConfigError::invalid(field, format!("value {v} out of range")))
}
