//! Liveness and pose gates built on the detector's five landmarks.
//!
//! A printed photo held up to the webcam yields almost identical landmark
//! positions across consecutive frames, while a live face drifts by at least
//! a pixel or so. No extra model and no extra frames are needed: the check runs
//! on the landmark sequence of the frames captured for recognition.
//!
//! The pose gate rejects faces turned or tilted too far for a reliable match,
//! asking the student to look at the camera instead.

/// Minimum mean eye displacement (px) between consecutive frames for a live face.
pub const DEFAULT_MIN_EYE_DISPLACEMENT: f32 = 0.8;

/// Outcome of the landmark stability check.
#[derive(Debug, Clone)]
pub struct LivenessResult {
    pub is_live: bool,
    /// Mean Euclidean displacement of both eye centres across frame pairs.
    pub mean_eye_displacement: f32,
    pub frame_pairs_analysed: usize,
}

impl LivenessResult {
    /// Fewer than two frames: nothing to compare, so the check passes through.
    pub fn undetermined() -> Self {
        Self {
            is_live: true,
            mean_eye_displacement: 0.0,
            frame_pairs_analysed: 0,
        }
    }
}

/// Check that eye landmarks move across the sequence.
///
/// Landmark indices 0 and 1 are the left and right eye centres.
pub fn check_landmark_stability(
    landmark_sequence: &[[(f32, f32); 5]],
    min_displacement: Option<f32>,
) -> LivenessResult {
    let threshold = min_displacement.unwrap_or(DEFAULT_MIN_EYE_DISPLACEMENT);

    if landmark_sequence.len() < 2 {
        return LivenessResult::undetermined();
    }

    let (total, pairs) = landmark_sequence
        .windows(2)
        .map(|pair| (distance(pair[0][0], pair[1][0]) + distance(pair[0][1], pair[1][1])) / 2.0)
        .fold((0.0f32, 0usize), |(sum, n), d| (sum + d, n + 1));

    let mean = total / pairs as f32;

    LivenessResult {
        is_live: mean >= threshold,
        mean_eye_displacement: mean,
        frame_pairs_analysed: pairs,
    }
}

/// Outcome of the frontal pose check.
#[derive(Debug, Clone)]
pub struct PoseCheck {
    pub is_frontal: bool,
    /// Tilt of the eye line from horizontal, in degrees (absolute).
    pub roll_degrees: f32,
    /// Horizontal nose offset from the eye midpoint, relative to eye distance.
    pub yaw_ratio: f32,
}

/// Check that a face looks roughly straight at the camera.
pub fn check_frontal_pose(
    landmarks: &[(f32, f32); 5],
    max_roll_degrees: f32,
    max_yaw_ratio: f32,
) -> PoseCheck {
    let (left_eye, right_eye, nose) = (landmarks[0], landmarks[1], landmarks[2]);
    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let eye_distance = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();

    if eye_distance < 1.0 {
        return PoseCheck {
            is_frontal: false,
            roll_degrees: 90.0,
            yaw_ratio: f32::INFINITY,
        };
    }

    let roll_degrees = eye_dy.atan2(eye_dx).to_degrees().abs();

    // Project the nose offset onto the eye line so head tilt does not read as yaw.
    let mid = ((left_eye.0 + right_eye.0) / 2.0, (left_eye.1 + right_eye.1) / 2.0);
    let along = ((nose.0 - mid.0) * eye_dx + (nose.1 - mid.1) * eye_dy) / eye_distance;
    let yaw_ratio = (along / eye_distance).abs();

    PoseCheck {
        is_frontal: roll_degrees <= max_roll_degrees && yaw_ratio <= max_yaw_ratio,
        roll_degrees,
        yaw_ratio,
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}
