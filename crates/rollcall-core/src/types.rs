use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Box area in pixels; negative extents count as zero.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.width * self.height + other.width * other.height - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Always processes all dimensions. Embeddings of different length come
    /// from different models and score 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Map a cosine similarity onto the 0–100 confidence scale used for attendance.
pub fn confidence_percent(similarity: f32) -> u8 {
    if !similarity.is_finite() {
        return 0;
    }
    (similarity * 100.0).round().clamp(0.0, 100.0) as u8
}

/// A known person's face encoding, generated from a labelled photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownFace {
    pub id: String,
    /// Person label, taken from the photo file stem.
    pub label: String,
    pub embedding: Embedding,
    /// Photo the encoding was computed from.
    pub source: String,
    pub created_at: String,
}

impl KnownFace {
    pub fn new(label: impl Into<String>, embedding: Embedding, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            embedding,
            source: source.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Result of matching a probe embedding against the known faces.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best match [-1, 1].
    pub similarity: f32,
    /// `similarity` on the 0–100 scale.
    pub confidence: u8,
    pub face_id: Option<String>,
    /// Label of the best gallery entry, set only when `matched`.
    pub label: Option<String>,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            confidence: confidence_percent(similarity),
            face_id: None,
            label: None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of known faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[KnownFace], min_confidence: u8) -> MatchResult;
}

/// Cosine similarity matcher.
///
/// Always iterates every gallery entry; the best entry wins.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[KnownFace], min_confidence: u8) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            let sim = probe.similarity(&face.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if confidence_percent(best_sim) >= min_confidence => MatchResult {
                matched: true,
                similarity: best_sim,
                confidence: confidence_percent(best_sim),
                face_id: Some(gallery[idx].id.clone()),
                label: Some(gallery[idx].label.clone()),
            },
            _ => MatchResult::no_match(if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim }),
        }
    }
}
