//! Face-analysis seam: detection plus one descriptor per detected face.

use crate::frame::Frame;
use crate::types::{BoundingBox, Descriptor};
use thiserror::Error;

/// A face found in a frame together with its descriptor.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
}

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("descriptor extraction failed: {0}")]
    Extraction(String),
}

/// Detects faces in a frame and computes their descriptors.
///
/// Box coordinates are relative to the frame passed in.
pub trait FaceAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError>;
}
