//! Marking attendance: the per-student retry loop and the unattended scanner.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use rollcall_core::liveness::check_frontal_pose;
use rollcall_core::{Config, KnownFace};
use rollcall_hw::{Frame, FrameError};
use rollcall_store::{AttendanceEvent, ClassSession, NewAttendance, SnapshotDir, Store, StoreError, Student};
use thiserror::Error;

use crate::engine::{EngineError, EngineHandle, FaceMatch, Identification};

/// Status indicator shown next to every console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ring {
    Idle,
    Scanning,
    Matched,
    Rejected,
}

impl Ring {
    pub fn colour(self) -> &'static str {
        match self {
            Ring::Idle | Ring::Scanning => "yellow",
            Ring::Matched => "green",
            Ring::Rejected => "red",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkOutcome {
    pub status: Ring,
    pub message: String,
    /// The stored event, present only when `status` is `Matched`.
    pub event: Option<AttendanceEvent>,
    pub attempts: u32,
}

impl MarkOutcome {
    fn rejected(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: Ring::Rejected,
            message: message.into(),
            event: None,
            attempts,
        }
    }
}

#[derive(Error, Debug)]
pub enum MarkError {
    #[error("snapshot: {0}")]
    Snapshot(#[from] FrameError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

/// Recognition settings taken from [`Config`].
#[derive(Debug, Clone)]
pub struct MarkPolicy {
    pub threshold: u8,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub frames_per_attempt: usize,
    pub liveness_enabled: bool,
    pub max_roll_degrees: f32,
    pub max_yaw_ratio: f32,
}

impl MarkPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.confidence_threshold,
            max_attempts: config.max_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            frames_per_attempt: config.frames_per_attempt,
            liveness_enabled: config.liveness_enabled,
            max_roll_degrees: config.max_roll_degrees,
            max_yaw_ratio: config.max_yaw_ratio,
        }
    }
}

/// What to do after one identification attempt.
#[derive(Debug, PartialEq)]
enum Verdict {
    Accept { confidence: u8 },
    Retry { message: String, wait: bool },
    Fail { message: String },
}

pub struct AttendanceManager {
    gallery: Arc<[KnownFace]>,
    snapshots: SnapshotDir,
    policy: MarkPolicy,
}

impl AttendanceManager {
    pub fn new(gallery: Arc<[KnownFace]>, snapshots: SnapshotDir, policy: MarkPolicy) -> Self {
        Self {
            gallery,
            snapshots,
            policy,
        }
    }

    pub fn known_faces(&self) -> usize {
        self.gallery.len()
    }

    /// Try to mark `student` present, retrying up to `max_attempts` times.
    ///
    /// `on_status` receives the intermediate messages (scanning, adjust
    /// position, low confidence) while the attempts run.
    pub async fn mark(
        &self,
        engine: &EngineHandle,
        store: &Store,
        student: &Student,
        session: Option<&ClassSession>,
        mut on_status: impl FnMut(Ring, &str),
    ) -> MarkOutcome {
        if self.gallery.is_empty() {
            return MarkOutcome::rejected("No face encodings loaded. Run `rollcall encode` first.", 0);
        }
        if let Some(session) = session {
            match store.has_attendance(&student.student_id, session.id) {
                Ok(true) => {
                    return MarkOutcome::rejected(
                        format!("{} is already marked present for {}.", student.name, session.name),
                        0,
                    )
                }
                Ok(false) => {}
                Err(e) => return MarkOutcome::rejected(format!("Database error: {e}"), 0),
            }
        }

        let max = self.policy.max_attempts;
        for attempt in 1..=max {
            on_status(Ring::Scanning, &format!("Scanning... (attempt {attempt}/{max})"));

            let identification = match engine
                .identify(self.gallery.clone(), self.policy.threshold, self.policy.frames_per_attempt)
                .await
            {
                Ok(identification) => identification,
                Err(EngineError::NoUsableFrames) => {
                    on_status(Ring::Scanning, "Image too dark. Check the lighting.");
                    continue;
                }
                Err(e) => return MarkOutcome::rejected(format!("Camera error: {e}"), attempt),
            };
            tracing::debug!(
                attempt,
                frames = identification.frames_captured,
                faces = identification.faces.len(),
                primary_confidence = ?identification.primary.as_ref().map(|p| p.candidate.confidence),
                "identification received"
            );

            match judge(&identification, student, &self.policy, attempt) {
                Verdict::Accept { confidence } => {
                    let Some(frame) = identification.snapshot else {
                        return MarkOutcome::rejected("No frame available for the snapshot.", attempt);
                    };
                    return match self.record(store, student, session, &frame, confidence) {
                        Ok(event) => {
                            let late = if event.is_late { " (late)" } else { "" };
                            MarkOutcome {
                                status: Ring::Matched,
                                message: format!(
                                    "Attendance marked for {} (Confidence: {confidence}% | Attempt {attempt}){late}",
                                    student.name
                                ),
                                event: Some(event),
                                attempts: attempt,
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, student_id = %student.student_id, "recording attendance failed");
                            MarkOutcome::rejected(format!("Could not record attendance: {e}"), attempt)
                        }
                    };
                }
                Verdict::Retry { message, wait } => {
                    on_status(Ring::Scanning, &message);
                    if wait {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
                Verdict::Fail { message } => return MarkOutcome::rejected(message, attempt),
            }
        }

        MarkOutcome::rejected("Face not recognised after maximum retries.", max)
    }

    /// Save the snapshot, then append the event. The snapshot is removed
    /// again if the database refuses the row.
    pub fn record(
        &self,
        store: &Store,
        student: &Student,
        session: Option<&ClassSession>,
        frame: &Frame,
        confidence: u8,
    ) -> Result<AttendanceEvent, MarkError> {
        let recorded_at = Utc::now();
        let photo_path = self
            .snapshots
            .path_for(&student.student_id, &recorded_at.with_timezone(&Local));
        frame.save_jpeg(&photo_path)?;

        let new = NewAttendance {
            student_id: student.student_id.clone(),
            student_name: student.name.clone(),
            session_id: session.map(|s| s.id),
            confidence,
            photo_path: photo_path.clone(),
            recorded_at,
        };
        store.record_attendance(new).map_err(|e| {
            if let Err(rm) = std::fs::remove_file(&photo_path) {
                tracing::warn!(path = %photo_path.display(), error = %rm, "could not remove orphaned snapshot");
            }
            MarkError::from(e)
        })
    }

    /// Unattended mode: keep identifying everyone in front of the camera
    /// and record each registered student once, until `shutdown` resolves.
    pub async fn scan_live(
        &self,
        engine: &EngineHandle,
        store: &Store,
        session: Option<&ClassSession>,
        shutdown: impl Future<Output = ()>,
        mut on_event: impl FnMut(&AttendanceEvent),
    ) -> Result<Vec<AttendanceEvent>, MarkError> {
        let students = store.list_students()?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut recorded = Vec::new();
        tokio::pin!(shutdown);

        tracing::info!(
            students = students.len(),
            known_faces = self.gallery.len(),
            session_id = ?session.map(|s| s.id),
            "live scan started"
        );

        loop {
            let identify = engine.identify(
                self.gallery.clone(),
                self.policy.threshold,
                self.policy.frames_per_attempt,
            );
            let result = tokio::select! {
                _ = &mut shutdown => break,
                result = identify => result,
            };

            match result {
                Ok(identification) => {
                    self.record_new_faces(store, session, &students, &identification, &mut seen, |event| {
                        on_event(&event);
                        recorded.push(event);
                    });
                }
                Err(EngineError::NoUsableFrames) => tracing::debug!("live scan: dark frames"),
                Err(e) => return Err(e.into()),
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.policy.retry_delay) => {}
            }
        }

        tracing::info!(recorded = recorded.len(), "live scan stopped");
        Ok(recorded)
    }

    fn record_new_faces(
        &self,
        store: &Store,
        session: Option<&ClassSession>,
        students: &[Student],
        identification: &Identification,
        seen: &mut HashSet<String>,
        mut on_recorded: impl FnMut(AttendanceEvent),
    ) {
        let Some(frame) = &identification.snapshot else {
            return;
        };
        for face in identification.faces.iter().filter(|f| f.accepted) {
            let Some(label) = face.candidate.label.as_deref() else {
                continue;
            };
            if self.policy.liveness_enabled && !face.liveness.is_live {
                tracing::debug!(
                    label,
                    eye_movement = face.liveness.mean_eye_displacement,
                    "live scan: static face ignored"
                );
                continue;
            }
            let Some(student) = resolve_student(students, label) else {
                if seen.insert(format!("label:{label}")) {
                    tracing::warn!(label, "recognised a face with no registered student");
                }
                continue;
            };
            if !seen.insert(student.student_id.clone()) {
                continue;
            }
            match self.record(store, student, session, frame, face.candidate.confidence) {
                Ok(event) => on_recorded(event),
                Err(MarkError::Store(StoreError::AlreadyMarked { .. })) => {
                    tracing::debug!(student_id = %student.student_id, "already marked for this session");
                }
                Err(e) => {
                    // Allow another try on the next scan.
                    seen.remove(&student.student_id);
                    tracing::warn!(error = %e, student_id = %student.student_id, "live scan: recording failed");
                }
            }
        }
    }
}

/// Decide the outcome of one attempt for `student`.
fn judge(identification: &Identification, student: &Student, policy: &MarkPolicy, attempt: u32) -> Verdict {
    let max = policy.max_attempts;
    let mine = identification.faces.iter().find(|f| {
        f.candidate
            .label
            .as_deref()
            .is_some_and(|label| label_matches(label, student))
    });

    let Some(face) = mine else {
        let message = if identification.faces.is_empty() {
            format!("No face detected (attempt {attempt}/{max}).")
        } else if identification.faces.iter().any(|f| f.accepted) {
            format!("Recognised someone other than {} (attempt {attempt}/{max}).", student.name)
        } else {
            format!("Face not recognised (attempt {attempt}/{max}).")
        };
        return Verdict::Retry { message, wait: false };
    };

    if !is_frontal(face, policy) {
        return Verdict::Retry {
            message: format!("Face not frontal enough (attempt {attempt}/{max}). Please adjust position."),
            wait: false,
        };
    }

    if policy.liveness_enabled && !face.liveness.is_live {
        return Verdict::Fail {
            message: "Liveness check failed: no natural movement between frames. Photos are not accepted."
                .to_string(),
        };
    }

    let confidence = face.candidate.confidence;
    if confidence >= policy.threshold {
        Verdict::Accept { confidence }
    } else if attempt < max {
        Verdict::Retry {
            message: format!("Confidence too low ({confidence}%). Retrying... ({}/{max})", attempt + 1),
            wait: true,
        }
    } else {
        Verdict::Fail {
            message: format!(
                "Face recognised but confidence too low ({confidence}%). Minimum required: {}%. No more retries.",
                policy.threshold
            ),
        }
    }
}

fn is_frontal(face: &FaceMatch, policy: &MarkPolicy) -> bool {
    face.bbox
        .landmarks
        .map(|lm| check_frontal_pose(&lm, policy.max_roll_degrees, policy.max_yaw_ratio).is_frontal)
        .unwrap_or(false)
}

/// Photo labels name a student by id, or by name with `_` for spaces.
pub fn label_matches(label: &str, student: &Student) -> bool {
    let label = label.trim();
    if label == student.student_id {
        return true;
    }
    let normalized = label.replace('_', " ").to_lowercase();
    normalized == student.name.trim().to_lowercase()
}

/// Student a photo label refers to. An exact id match wins over a name match.
pub fn resolve_student<'a>(students: &'a [Student], label: &str) -> Option<&'a Student> {
    students
        .iter()
        .find(|s| s.student_id == label.trim())
        .or_else(|| students.iter().find(|s| label_matches(label, s)))
}
