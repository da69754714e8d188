//! Recording session lifecycle.
//!
//! A session spans one start event to the matching stop/quit. It owns the
//! output directory tree and every sink handle; the capture loop hands it
//! clean frames and never touches the sinks directly. Per-camera state is
//! one record per camera in a fixed, index-stable vector built at session
//! start, aligned with the configured camera order.

use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::sampler::{self, SamplingPlan};
use crate::sink::VideoSink;

/// Recording state of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecState {
    Idle,
    Recording,
}

#[derive(Debug)]
struct CameraSink {
    camera_id: u32,
    /// Monotonic save counter; file numbering starts at 1.
    images_saved: u64,
    image_dir: Option<PathBuf>,
    video: Option<VideoSink>,
}

#[derive(Debug)]
pub struct RecordingSession {
    id: String,
    root: PathBuf,
    cameras: Vec<CameraSink>,
    plan: Option<SamplingPlan>,
    cycle_count: u64,
}

impl RecordingSession {
    /// Create the session directory tree and open every sink.
    ///
    /// `source_fps` is the native rate of the first camera (the capture loop
    /// paces all cameras together); the sampling interval is fixed from it
    /// here and never recomputed.
    pub fn begin(config: &CaptureConfig, source_fps: u32) -> Result<Self> {
        let id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let root = unique_session_root(&config.output_root, &id);
        create_dir(&root)?;

        let mut cameras = Vec::with_capacity(config.cameras.len());
        for &camera_id in &config.cameras {
            let image_dir = if config.images.enabled {
                let dir = root.join("images").join(format!("cam_{}", camera_id));
                create_dir(&dir)?;
                Some(dir)
            } else {
                None
            };
            let video = if config.video.enabled {
                let path = root.join(format!("cam_{}.mp4", camera_id));
                Some(VideoSink::open(
                    &path,
                    config.width,
                    config.height,
                    config.video.target_fps,
                )?)
            } else {
                None
            };
            cameras.push(CameraSink {
                camera_id,
                images_saved: 0,
                image_dir,
                video,
            });
        }

        let plan = config
            .images
            .enabled
            .then(|| SamplingPlan::new(source_fps, config.images.target_fps));
        if let Some(plan) = &plan {
            log::info!(
                "session {}: image sampling every {} cycle(s)",
                id,
                plan.interval()
            );
        }
        log::info!("session {}: recording to {}", id, root.display());

        Ok(Self {
            id,
            root,
            cameras,
            plan,
            cycle_count: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Fan one cycle's clean frames out to the image sampler and the video
    /// sinks. Frames are index-aligned with the configured camera order and
    /// include black substitutes; a dead camera keeps its slot in every
    /// output.
    pub fn record_cycle(&mut self, clean: &[Frame]) -> Result<()> {
        ensure!(
            clean.len() == self.cameras.len(),
            "cycle has {} frames for {} cameras",
            clean.len(),
            self.cameras.len()
        );
        self.cycle_count += 1;

        if let Some(plan) = self.plan {
            if plan.should_sample(self.cycle_count) {
                for (sink, frame) in self.cameras.iter_mut().zip(clean) {
                    let Some(dir) = &sink.image_dir else {
                        continue;
                    };
                    sink.images_saved += 1;
                    let path = dir.join(format!("frame_{:06}.jpg", sink.images_saved));
                    sampler::write_jpeg(&path, frame)?;
                }
            }
        }

        for (sink, frame) in self.cameras.iter_mut().zip(clean) {
            if let Some(video) = &mut sink.video {
                video.write(frame)?;
            }
        }
        Ok(())
    }

    /// Flush and close every sink, then report what was saved. Closing is
    /// idempotent; a second call only rebuilds the summary.
    pub fn finish(&mut self) -> Result<SessionSummary> {
        let mut first_err = None;
        for sink in &mut self.cameras {
            if let Some(video) = &mut sink.video {
                if let Err(e) = video.close() {
                    log::error!("camera {}: video close failed: {}", sink.camera_id, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(self.summary()),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            root: self.root.clone(),
            cameras: self
                .cameras
                .iter()
                .map(|sink| CameraSummary {
                    camera_id: sink.camera_id,
                    images_saved: sink.images_saved,
                    image_dir: sink.image_dir.clone(),
                    video_path: sink.video.as_ref().map(|v| v.path().to_path_buf()),
                    video_frames_written: sink.video.as_ref().map(|v| v.frames_written()),
                })
                .collect(),
        }
    }

    /// Stub-backend frame retained by one camera's video sink (tests).
    pub fn last_video_frame(&self, index: usize) -> Option<&Frame> {
        self.cameras
            .get(index)
            .and_then(|sink| sink.video.as_ref())
            .and_then(|video| video.last_frame())
    }
}

/// What a finished session saved, for the process exit summary.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub root: PathBuf,
    pub cameras: Vec<CameraSummary>,
}

#[derive(Clone, Debug)]
pub struct CameraSummary {
    pub camera_id: u32,
    pub images_saved: u64,
    pub image_dir: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub video_frames_written: Option<u64>,
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| {
        CaptureError::DirectoryCreation {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

/// Two sessions inside the same second would share a timestamp id; suffix
/// the later one instead of mixing output trees.
fn unique_session_root(output_root: &Path, id: &str) -> PathBuf {
    let mut root = output_root.join(id);
    let mut n = 1;
    while root.exists() {
        n += 1;
        root = output_root.join(format!("{}_{}", id, n));
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraKind, CaptureConfig, SamplingSettings, StopPolicy};

    fn test_config(root: &Path) -> CaptureConfig {
        CaptureConfig {
            cameras: vec![0, 1],
            kind: CameraKind::Synthetic,
            width: 16,
            height: 16,
            images: SamplingSettings {
                enabled: true,
                target_fps: 10,
            },
            video: SamplingSettings {
                enabled: true,
                target_fps: 10,
            },
            output_root: root.to_path_buf(),
            stop_policy: StopPolicy::Terminate,
            max_consecutive_failures: 0,
        }
    }

    #[test]
    fn begin_creates_the_full_tree() {
        let dir = tempfile::tempdir().unwrap();
        let session = RecordingSession::begin(&test_config(dir.path()), 30).unwrap();
        let root = session.root();
        assert!(root.join("images").join("cam_0").is_dir());
        assert!(root.join("images").join("cam_1").is_dir());
        assert!(root.join("cam_0.mp4").is_file());
        assert!(root.join("cam_1.mp4").is_file());
    }

    #[test]
    fn sampled_cycles_write_numbered_jpegs() {
        let dir = tempfile::tempdir().unwrap();
        // source 30 fps, target 10 -> every 3rd cycle
        let mut session = RecordingSession::begin(&test_config(dir.path()), 30).unwrap();
        let clean = vec![Frame::black(16, 16), Frame::black(16, 16)];
        for _ in 0..9 {
            session.record_cycle(&clean).unwrap();
        }
        let summary = session.finish().unwrap();
        for cam in &summary.cameras {
            assert_eq!(cam.images_saved, 3);
            assert_eq!(cam.video_frames_written, Some(9));
            let dir = cam.image_dir.as_ref().unwrap();
            for n in 1..=3 {
                assert!(dir.join(format!("frame_{:06}.jpg", n)).is_file());
            }
            assert!(!dir.join("frame_000004.jpg").exists());
        }
    }

    #[test]
    fn video_only_session_skips_image_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.images.enabled = false;
        let mut session = RecordingSession::begin(&config, 30).unwrap();
        assert!(!session.root().join("images").exists());

        let clean = vec![Frame::black(16, 16), Frame::black(16, 16)];
        session.record_cycle(&clean).unwrap();
        let summary = session.finish().unwrap();
        assert_eq!(summary.cameras[0].images_saved, 0);
        assert_eq!(summary.cameras[0].video_frames_written, Some(1));
    }

    #[test]
    fn record_cycle_rejects_wrong_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RecordingSession::begin(&test_config(dir.path()), 30).unwrap();
        assert!(session.record_cycle(&[Frame::black(16, 16)]).is_err());
    }

    #[test]
    fn finish_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RecordingSession::begin(&test_config(dir.path()), 30).unwrap();
        session.finish().unwrap();
        let summary = session.finish().unwrap();
        assert_eq!(summary.cameras.len(), 2);
    }

    #[test]
    fn begin_fails_on_unwritable_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        // A file where the output root should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();
        config.output_root = blocker;
        let err = RecordingSession::begin(&config, 30).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CaptureError>(),
            Some(CaptureError::DirectoryCreation { .. })
        ));
    }

    #[test]
    fn same_second_sessions_get_distinct_roots() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let a = RecordingSession::begin(&config, 30).unwrap();
        let b = RecordingSession::begin(&config, 30).unwrap();
        assert_ne!(a.root(), b.root());
    }
}
