//! rollcall-core: face detection, recognition and matching for attendance.
//!
//! SCRFD finds faces and landmarks, ArcFace turns aligned crops into
//! embeddings, both through ONNX Runtime on the CPU. Embeddings are matched
//! against the known-face encodings file and gated by landmark liveness.

pub mod alignment;
pub mod config;
pub mod detector;
pub mod encodings;
pub mod liveness;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use config::Config;
pub use detector::FaceDetector;
pub use encodings::EncodingFile;
pub use pipeline::{AnalyzedFace, FacePipeline};
pub use recognizer::FaceRecognizer;
pub use types::{confidence_percent, BoundingBox, CosineMatcher, Embedding, KnownFace, MatchResult, Matcher};
