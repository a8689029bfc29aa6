use std::sync::Arc;

use rollcall_core::liveness::{check_landmark_stability, LivenessResult};
use rollcall_core::pipeline::PipelineError;
use rollcall_core::{AnalyzedFace, BoundingBox, Config, CosineMatcher, FacePipeline, KnownFace, MatchResult, Matcher};
use rollcall_hw::{Camera, Frame};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("face pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("every captured frame was too dark")]
    NoUsableFrames,
    #[error("failed to start engine thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Minimum box overlap for two detections in different frames to be the same face.
const TRACK_MIN_IOU: f32 = 0.3;

/// One detected face and the closest known face to it.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    pub bbox: BoundingBox,
    /// Best gallery entry regardless of threshold.
    pub candidate: MatchResult,
    /// `candidate.confidence` reached the requested threshold.
    pub accepted: bool,
    /// Landmark movement of this face, followed across the captured frames.
    pub liveness: LivenessResult,
}

/// Result of one identification request.
#[derive(Debug, Clone)]
pub struct Identification {
    /// Best-scoring primary (largest) face across the captured frames.
    pub primary: Option<FaceMatch>,
    /// Every face in the frame that produced `primary`, largest first.
    pub faces: Vec<FaceMatch>,
    /// Frame that produced `primary`, kept for the attendance snapshot.
    pub snapshot: Option<Frame>,
    pub frames_captured: usize,
}

/// Quick camera check shown when the camera is switched on.
#[derive(Debug, Clone)]
pub struct Preview {
    pub width: u32,
    pub height: u32,
    pub brightness: f32,
    pub faces: usize,
}

/// Messages sent from the console to the engine thread.
enum EngineRequest {
    Identify {
        gallery: Arc<[KnownFace]>,
        threshold: u8,
        frames_count: usize,
        reply: oneshot::Sender<Result<Identification, EngineError>>,
    },
    Preview {
        reply: oneshot::Sender<Result<Preview, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread. Dropping every handle stops the
/// thread and releases the camera.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture `frames_count` frames and match their faces against `gallery`.
    pub async fn identify(
        &self,
        gallery: Arc<[KnownFace]>,
        threshold: u8,
        frames_count: usize,
    ) -> Result<Identification, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify {
                gallery,
                threshold,
                frames_count,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn preview(&self) -> Result<Preview, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Preview { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera, loads both ONNX models and discards warmup frames
/// before returning, so a missing camera or model fails here rather than on
/// the first request. Blocks; call from `spawn_blocking` in async code.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(&config.camera_device)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let scrfd_path = config.scrfd_model_path();
    let arcface_path = config.arcface_model_path();
    let mut pipeline = FacePipeline::load(&scrfd_path, &arcface_path)?;
    tracing::info!(
        scrfd = %scrfd_path.display(),
        arcface = %arcface_path.display(),
        "face models loaded"
    );

    // Let auto-exposure settle.
    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        for _ in 0..config.warmup_frames {
            let _ = camera.capture_frame();
        }
    }

    let min_displacement = config.liveness_min_displacement;
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Identify {
                        gallery,
                        threshold,
                        frames_count,
                        reply,
                    } => {
                        let result = run_identify(
                            &camera,
                            &mut pipeline,
                            &gallery,
                            threshold,
                            frames_count,
                            min_displacement,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Preview { reply } => {
                        let _ = reply.send(run_preview(&camera, &mut pipeline));
                    }
                }
            }
            tracing::info!("engine thread exiting, camera released");
        })
        .map_err(EngineError::ThreadSpawn)?;

    Ok(EngineHandle { tx })
}

fn run_identify(
    camera: &Camera,
    pipeline: &mut FacePipeline,
    gallery: &[KnownFace],
    threshold: u8,
    frames_count: usize,
    min_displacement: f32,
) -> Result<Identification, EngineError> {
    let (frames, dark_skipped) = camera.capture_frames(frames_count)?;
    tracing::debug!(captured = frames.len(), dark_skipped, "identify: captured frames");

    if frames.is_empty() {
        return Err(EngineError::NoUsableFrames);
    }

    let mut per_frame = Vec::with_capacity(frames.len());
    for frame in &frames {
        per_frame.push(pipeline.analyze(&frame.data, frame.width, frame.height)?);
    }

    let summary = summarize(&per_frame, gallery, threshold, min_displacement);
    if let Some(primary) = &summary.primary {
        tracing::info!(
            label = primary.candidate.label.as_deref().unwrap_or("-"),
            confidence = primary.candidate.confidence,
            accepted = primary.accepted,
            faces = summary.faces.len(),
            live = primary.liveness.is_live,
            eye_movement = primary.liveness.mean_eye_displacement,
            "identify: best frame selected"
        );
    } else {
        tracing::debug!("identify: no face in any frame");
    }

    let frames_captured = frames.len();
    let snapshot = summary.best_frame.and_then(|i| frames.into_iter().nth(i));
    Ok(Identification {
        primary: summary.primary,
        faces: summary.faces,
        snapshot,
        frames_captured,
    })
}

fn run_preview(camera: &Camera, pipeline: &mut FacePipeline) -> Result<Preview, EngineError> {
    let frame = camera.capture_frame()?;
    let faces = pipeline.analyze(&frame.data, frame.width, frame.height)?;
    Ok(Preview {
        width: frame.width,
        height: frame.height,
        brightness: frame.avg_brightness(),
        faces: faces.len(),
    })
}

struct Summary {
    primary: Option<FaceMatch>,
    faces: Vec<FaceMatch>,
    best_frame: Option<usize>,
}

/// A face in one frame with its nearest gallery entry.
struct Detection {
    bbox: BoundingBox,
    candidate: MatchResult,
}

/// Pick the frame whose primary face scores highest and match all of its faces.
///
/// `per_frame[i]` holds the analysed faces of frame `i`, largest first. Each
/// face of the chosen frame carries its own liveness, so a still photo next
/// to a moving face is still reported as static.
fn summarize(
    per_frame: &[Vec<AnalyzedFace>],
    gallery: &[KnownFace],
    threshold: u8,
    min_displacement: f32,
) -> Summary {
    let frames: Vec<Vec<Detection>> = per_frame
        .iter()
        .map(|faces| {
            faces
                .iter()
                .map(|face| Detection {
                    bbox: face.bbox.clone(),
                    // Threshold 0 keeps the label of the nearest entry even on a weak match.
                    candidate: CosineMatcher.compare(&face.embedding, gallery, 0),
                })
                .collect()
        })
        .collect();

    let mut best: Option<(usize, f32)> = None;
    for (i, faces) in frames.iter().enumerate() {
        let Some(primary) = faces.first() else {
            continue;
        };
        if best.map_or(true, |(_, sim)| primary.candidate.similarity > sim) {
            best = Some((i, primary.candidate.similarity));
        }
    }

    let Some((idx, _)) = best else {
        return Summary {
            primary: None,
            faces: Vec::new(),
            best_frame: None,
        };
    };

    let faces: Vec<FaceMatch> = frames[idx]
        .iter()
        .map(|anchor| FaceMatch {
            bbox: anchor.bbox.clone(),
            candidate: anchor.candidate.clone(),
            accepted: !gallery.is_empty() && anchor.candidate.confidence >= threshold,
            liveness: face_liveness(&frames, anchor, min_displacement),
        })
        .collect();

    Summary {
        primary: faces.first().cloned(),
        faces,
        best_frame: Some(idx),
    }
}

/// Liveness of `anchor` from its landmarks in every frame it can be followed into.
///
/// A face missing from all but one of several frames cannot show movement
/// and counts as static.
fn face_liveness(frames: &[Vec<Detection>], anchor: &Detection, min_displacement: f32) -> LivenessResult {
    let track: Vec<[(f32, f32); 5]> = frames
        .iter()
        .filter_map(|faces| follow(faces, anchor))
        .filter_map(|d| d.bbox.landmarks)
        .collect();

    if frames.len() >= 2 && track.len() < 2 {
        return LivenessResult {
            is_live: false,
            mean_eye_displacement: 0.0,
            frame_pairs_analysed: 0,
        };
    }
    check_landmark_stability(&track, Some(min_displacement))
}

/// The detection in `faces` that continues `anchor`: it must overlap the
/// anchor box, and one with the same nearest label wins over a closer box.
fn follow<'a>(faces: &'a [Detection], anchor: &Detection) -> Option<&'a Detection> {
    faces
        .iter()
        .map(|d| (d, d.bbox.iou(&anchor.bbox)))
        .filter(|(_, overlap)| *overlap >= TRACK_MIN_IOU)
        .max_by(|(a, a_iou), (b, b_iou)| {
            let a_same = a.candidate.label == anchor.candidate.label;
            let b_same = b.candidate.label == anchor.candidate.label;
            a_same.cmp(&b_same).then(a_iou.total_cmp(b_iou))
        })
        .map(|(d, _)| d)
}

#[cfg(test)]
pub(crate) struct ScriptedEngine {
    pub handle: EngineHandle,
    /// Identify requests received so far.
    pub requests: Arc<std::sync::atomic::AtomicUsize>,
    /// Fires on the first identify request after the script ran out.
    pub exhausted: oneshot::Receiver<()>,
}

#[cfg(test)]
impl EngineHandle {
    /// Handle answered by a task that replays `script` for identify requests
    /// and then reports dark frames forever. Needs a tokio runtime.
    pub(crate) fn scripted(script: Vec<Result<Identification, EngineError>>) -> ScriptedEngine {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
        let (done_tx, done_rx) = oneshot::channel();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();

        tokio::spawn(async move {
            let mut script = script.into_iter();
            let mut done_tx = Some(done_tx);
            while let Some(req) = rx.recv().await {
                match req {
                    EngineRequest::Identify { reply, .. } => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let result = match script.next() {
                            Some(result) => result,
                            None => {
                                if let Some(done) = done_tx.take() {
                                    let _ = done.send(());
                                }
                                Err(EngineError::NoUsableFrames)
                            }
                        };
                        let _ = reply.send(result);
                    }
                    EngineRequest::Preview { reply } => {
                        let _ = reply.send(Ok(Preview {
                            width: 640,
                            height: 480,
                            brightness: 120.0,
                            faces: 0,
                        }));
                    }
                }
            }
        });

        ScriptedEngine {
            handle: EngineHandle { tx },
            requests,
            exhausted: done_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Embedding;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: None }
    }

    fn known(label: &str, values: Vec<f32>) -> KnownFace {
        KnownFace::new(label, emb(values), format!("{label}.jpg"))
    }

    fn face(size: f32, eye_x: f32, values: Vec<f32>) -> AnalyzedFace {
        AnalyzedFace {
            bbox: BoundingBox {
                x: eye_x - 10.0,
                y: 0.0,
                width: size,
                height: size,
                confidence: 0.9,
                landmarks: Some([
                    (eye_x, 40.0),
                    (eye_x + 30.0, 40.0),
                    (eye_x + 15.0, 55.0),
                    (eye_x + 3.0, 70.0),
                    (eye_x + 27.0, 70.0),
                ]),
            },
            embedding: emb(values),
        }
    }

    #[test]
    fn test_summarize_picks_best_primary_frame() {
        let gallery = vec![known("s1", vec![1.0, 0.0]), known("s2", vec![0.0, 1.0])];
        let per_frame = vec![
            vec![face(100.0, 30.0, vec![0.6, 0.8])],
            vec![face(100.0, 32.0, vec![0.95, 0.31]), face(40.0, 200.0, vec![0.0, 1.0])],
            vec![],
        ];

        let summary = summarize(&per_frame, &gallery, 65, 0.8);
        assert_eq!(summary.best_frame, Some(1));
        let primary = summary.primary.unwrap();
        assert_eq!(primary.candidate.label.as_deref(), Some("s1"));
        assert!(primary.accepted);

        assert_eq!(summary.faces.len(), 2);
        assert_eq!(summary.faces[1].candidate.label.as_deref(), Some("s2"));
        assert!(summary.faces[1].accepted);
    }

    #[test]
    fn test_summarize_keeps_label_below_threshold() {
        let gallery = vec![known("s1", vec![1.0, 0.0])];
        let per_frame = vec![vec![face(100.0, 30.0, vec![0.5, 0.866])]];

        let primary = summarize(&per_frame, &gallery, 65, 0.8).primary.unwrap();
        assert!(!primary.accepted);
        assert_eq!(primary.candidate.confidence, 50);
        assert_eq!(primary.candidate.label.as_deref(), Some("s1"));
    }

    #[test]
    fn test_summarize_no_faces() {
        let gallery = vec![known("s1", vec![1.0, 0.0])];
        let summary = summarize(&[vec![], vec![]], &gallery, 65, 0.8);
        assert!(summary.primary.is_none());
        assert!(summary.faces.is_empty());
        assert_eq!(summary.best_frame, None);
    }

    #[test]
    fn test_summarize_empty_gallery_never_accepts() {
        let per_frame = vec![vec![face(100.0, 30.0, vec![1.0, 0.0])]];
        let primary = summarize(&per_frame, &[], 0, 0.8).primary.unwrap();
        assert!(!primary.accepted);
    }

    #[test]
    fn test_summarize_liveness_follows_primary_face() {
        let gallery = vec![known("s1", vec![1.0, 0.0])];
        let still = vec![
            vec![face(100.0, 30.0, vec![1.0, 0.0])],
            vec![face(100.0, 30.0, vec![1.0, 0.0])],
            vec![face(100.0, 30.0, vec![1.0, 0.0])],
        ];
        let moving = vec![
            vec![face(100.0, 30.0, vec![1.0, 0.0])],
            vec![face(100.0, 32.0, vec![1.0, 0.0])],
            vec![face(100.0, 30.5, vec![1.0, 0.0])],
        ];

        let s = summarize(&still, &gallery, 65, 0.8).primary.unwrap();
        assert!(!s.liveness.is_live);
        assert_eq!(s.liveness.frame_pairs_analysed, 2);
        assert!(summarize(&moving, &gallery, 65, 0.8).primary.unwrap().liveness.is_live);
    }

    #[test]
    fn test_still_photo_beside_moving_face_is_not_live() {
        let gallery = vec![known("s1", vec![1.0, 0.0]), known("s2", vec![0.0, 1.0])];
        // A live stranger (s2) in front, a printed photo of s1 held beside them.
        let per_frame: Vec<Vec<AnalyzedFace>> = [30.0, 33.0, 30.0]
            .into_iter()
            .map(|eye_x| vec![face(200.0, eye_x, vec![0.0, 1.0]), face(80.0, 320.0, vec![1.0, 0.0])])
            .collect();

        let summary = summarize(&per_frame, &gallery, 65, 0.8);
        assert_eq!(summary.faces.len(), 2);

        let stranger = &summary.faces[0];
        assert_eq!(stranger.candidate.label.as_deref(), Some("s2"));
        assert!(stranger.liveness.is_live);

        let photo = &summary.faces[1];
        assert_eq!(photo.candidate.label.as_deref(), Some("s1"));
        assert!(photo.accepted);
        assert!(!photo.liveness.is_live);
        assert_eq!(photo.liveness.frame_pairs_analysed, 2);
    }

    #[test]
    fn test_face_seen_in_one_frame_is_not_live() {
        let gallery = vec![known("s1", vec![1.0, 0.0]), known("s2", vec![0.0, 1.0])];
        let per_frame = vec![
            vec![face(200.0, 30.0, vec![0.0, 1.0]), face(80.0, 320.0, vec![1.0, 0.0])],
            vec![face(200.0, 33.0, vec![0.0, 1.0])],
            vec![face(200.0, 30.0, vec![0.0, 1.0])],
        ];

        let summary = summarize(&per_frame, &gallery, 65, 0.8);
        assert!(summary.faces[0].liveness.is_live);
        assert!(!summary.faces[1].liveness.is_live);
    }

    #[test]
    fn test_single_frame_liveness_undetermined() {
        let gallery = vec![known("s1", vec![1.0, 0.0])];
        let per_frame = vec![vec![face(100.0, 30.0, vec![1.0, 0.0])]];
        let primary = summarize(&per_frame, &gallery, 65, 0.8).primary.unwrap();
        assert!(primary.liveness.is_live);
        assert_eq!(primary.liveness.frame_pairs_analysed, 0);
    }

    #[tokio::test]
    async fn test_scripted_engine_replays_then_reports_dark() {
        let scripted = EngineHandle::scripted(vec![Err(EngineError::ChannelClosed)]);
        let gallery: Arc<[KnownFace]> = Arc::from(Vec::new());

        assert!(matches!(
            scripted.handle.identify(gallery.clone(), 65, 3).await,
            Err(EngineError::ChannelClosed)
        ));
        assert!(matches!(
            scripted.handle.identify(gallery, 65, 3).await,
            Err(EngineError::NoUsableFrames)
        ));
        assert_eq!(scripted.handle.preview().await.unwrap().width, 640);
        assert_eq!(scripted.requests.load(std::sync::atomic::Ordering::SeqCst), 2);
        scripted.exhausted.await.unwrap();
    }
}
