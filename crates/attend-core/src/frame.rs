//! Frame type, downsampling, and the frame-source seam.

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// A captured RGB frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Shrink the frame by `factor` (0 < factor <= 1) before detection.
    ///
    /// A factor of 1.0 (or anything out of range) returns a clone. Output
    /// dimensions never drop below one pixel.
    pub fn downsample(&self, factor: f32) -> Frame {
        if !(factor > 0.0 && factor < 1.0) {
            return self.clone();
        }
        let w = ((self.width() as f32 * factor).round() as u32).max(1);
        let h = ((self.height() as f32 * factor).round() as u32).max(1);
        Frame {
            image: imageops::resize(&self.image, w, h, FilterType::Triangle),
            sequence: self.sequence,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("end of stream")]
    EndOfStream,
    #[error("device error: {0}")]
    Device(String),
}

/// A live sequence of frames, typically a camera.
///
/// Implementations release their device on drop; a session owns its source
/// and drops it on every exit path.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, FrameError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_quarter() {
        let frame = Frame::new(RgbImage::new(640, 480), 7);
        let small = frame.downsample(0.25);
        assert_eq!((small.width(), small.height()), (160, 120));
        assert_eq!(small.sequence, 7);
    }

    #[test]
    fn test_downsample_identity() {
        let frame = Frame::new(RgbImage::new(64, 48), 0);
        let same = frame.downsample(1.0);
        assert_eq!((same.width(), same.height()), (64, 48));
    }

    #[test]
    fn test_downsample_out_of_range_is_noop() {
        let frame = Frame::new(RgbImage::new(64, 48), 0);
        assert_eq!(frame.downsample(0.0).width(), 64);
        assert_eq!(frame.downsample(2.0).width(), 64);
        assert_eq!(frame.downsample(f32::NAN).width(), 64);
    }

    #[test]
    fn test_downsample_never_empty() {
        let frame = Frame::new(RgbImage::new(2, 2), 0);
        let tiny = frame.downsample(0.01);
        assert_eq!((tiny.width(), tiny.height()), (1, 1));
    }
}
