//! Detection + recognition for one frame.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// A detected face together with its embedding.
#[derive(Debug, Clone)]
pub struct AnalyzedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Owns both ONNX sessions.
pub struct FacePipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FacePipeline {
    pub fn load(scrfd_path: &Path, arcface_path: &Path) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self { detector, recognizer })
    }

    /// Detect every face in an RGB frame and embed the ones that carry landmarks.
    ///
    /// Faces are returned largest first.
    pub fn analyze(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<AnalyzedFace>, PipelineError> {
        let mut boxes = self.detector.detect(frame, width, height)?;
        sort_largest_first(&mut boxes);

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            if bbox.landmarks.is_none() {
                tracing::debug!(confidence = bbox.confidence, "skipping face without landmarks");
                continue;
            }
            let embedding = self.recognizer.extract(frame, width, height, &bbox)?;
            faces.push(AnalyzedFace { bbox, embedding });
        }
        Ok(faces)
    }

    /// Embed only the most confident face, as used for encoding reference photos.
    pub fn embed_primary(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<AnalyzedFace>, PipelineError> {
        let boxes = self.detector.detect(frame, width, height)?;
        let Some(bbox) = boxes.into_iter().find(|b| b.landmarks.is_some()) else {
            return Ok(None);
        };
        let embedding = self.recognizer.extract(frame, width, height, &bbox)?;
        Ok(Some(AnalyzedFace { bbox, embedding }))
    }
}

/// The face closest to the camera is the one being checked in.
pub fn sort_largest_first(boxes: &mut [BoundingBox]) {
    boxes.sort_by(|a, b| {
        b.area()
            .partial_cmp(&a.area())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x: 0.0, y: 0.0, width: w, height: h, confidence, landmarks: None }
    }

    #[test]
    fn test_sort_largest_first() {
        let mut boxes = vec![bbox(10.0, 10.0, 0.99), bbox(50.0, 40.0, 0.6), bbox(20.0, 20.0, 0.8)];
        sort_largest_first(&mut boxes);
        let areas: Vec<f32> = boxes.iter().map(BoundingBox::area).collect();
        assert_eq!(areas, vec![2000.0, 400.0, 100.0]);
    }

    #[test]
    fn test_load_missing_models() {
        let result = FacePipeline::load(Path::new("/nonexistent/det.onnx"), Path::new("/nonexistent/rec.onnx"));
        assert!(matches!(result, Err(PipelineError::Detector(DetectorError::ModelNotFound(_)))));
    }
}
