//! attend-vision: ONNX face analysis for the attendance session.
//!
//! SCRFD finds faces and ArcFace turns each one into a descriptor; together
//! they implement `attend_core::FaceAnalyzer`.

pub mod detector;
pub mod embedder;

pub use detector::FaceDetector;
pub use embedder::FaceEmbedder;

use attend_core::{AnalyzerError, DetectedFace, FaceAnalyzer, Frame};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const EMBEDDER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Faces analyzed per frame; further detections are ignored.
const DEFAULT_MAX_FACES: usize = 8;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct OnnxAnalyzer {
    detector: FaceDetector,
    embedder: FaceEmbedder,
    max_faces: usize,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, VisionError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let embedder = FaceEmbedder::load(&model_dir.join(EMBEDDER_MODEL_FILE))?;
        Ok(Self {
            detector,
            embedder,
            max_faces: DEFAULT_MAX_FACES,
        })
    }

    pub fn with_max_faces(mut self, max_faces: usize) -> Self {
        self.max_faces = max_faces;
        self
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self
            .detector
            .detect(&frame.image)
            .map_err(|e| AnalyzerError::Detection(e.to_string()))?;

        let mut faces = Vec::with_capacity(boxes.len().min(self.max_faces));
        for bbox in boxes.into_iter().take(self.max_faces) {
            match self.embedder.embed(&frame.image, &bbox) {
                Ok(descriptor) => faces.push(DetectedFace { bbox, descriptor }),
                Err(e) => {
                    tracing::warn!(seq = frame.sequence, error = %e, "skipping face without descriptor");
                }
            }
        }
        Ok(faces)
    }
}
