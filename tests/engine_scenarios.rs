//! End-to-end capture scenarios through the public engine API, using
//! synthetic cameras with a larger negotiated resolution than requested so
//! the center crop is exercised on every cycle.

use std::path::Path;

use camrig::{
    CameraKind, CameraSource, CaptureConfig, CaptureEngine, ControlSignal, InputEvent,
    SamplingSettings, SessionSummary, StopPolicy,
};

const REQ_W: u32 = 48;
const REQ_H: u32 = 48;
const SENSOR_W: u32 = 64;
const SENSOR_H: u32 = 48;
const SOURCE_FPS: u32 = 30;

fn rig_config(root: &Path) -> CaptureConfig {
    CaptureConfig {
        cameras: vec![0, 1],
        kind: CameraKind::Synthetic,
        width: REQ_W,
        height: REQ_H,
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

/// Two synthetic cameras whose sensors are wider than the requested size,
/// so the crop window sits at x = (64 - 48) / 2 = 8.
fn rig_engine(root: &Path) -> CaptureEngine {
    let config = rig_config(root);
    let cameras = config
        .cameras
        .iter()
        .map(|&id| {
            CameraSource::synthetic(id, REQ_W, REQ_H, SENSOR_W, SENSOR_H, SOURCE_FPS).unwrap()
        })
        .collect();
    CaptureEngine::from_sources(config, cameras).unwrap()
}

fn session_root(summary: &SessionSummary) -> &Path {
    &summary.root
}

#[test]
fn full_recording_run_produces_the_expected_tree() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = rig_engine(dir.path());

    // Start captures its own cycle; 29 ticks complete 30 recorded cycles.
    engine.step(InputEvent::Start).unwrap();
    let root = engine.session().unwrap().root().to_path_buf();
    assert!(root.join("images").join("cam_0").is_dir());
    assert!(root.join("images").join("cam_1").is_dir());
    assert!(root.join("cam_0.mp4").is_file());
    assert!(root.join("cam_1.mp4").is_file());

    for _ in 0..29 {
        let out = engine.step(InputEvent::Tick).unwrap();
        assert_eq!(out.signal, ControlSignal::Continue);
        let preview = out.preview.unwrap();
        assert_eq!(preview.width, REQ_W * 2);
        assert_eq!(preview.height, REQ_H);
    }

    let out = engine.step(InputEvent::Stop).unwrap();
    assert_eq!(out.signal, ControlSignal::Shutdown);

    let summaries = engine.shutdown().unwrap();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(session_root(summary), root);

    // source 30 fps, target 10: every 3rd of 30 cycles is sampled.
    for cam in &summary.cameras {
        assert_eq!(cam.images_saved, 10);
        assert_eq!(cam.video_frames_written, Some(30));
        let images = cam.image_dir.as_ref().unwrap();
        assert!(images.join("frame_000001.jpg").is_file());
        assert!(images.join("frame_000010.jpg").is_file());
        assert!(!images.join("frame_000011.jpg").exists());
    }
}

#[test]
fn failed_read_keeps_every_camera_slot() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = rig_engine(dir.path());

    engine.step(InputEvent::Start).unwrap();
    engine.inject_read_failures(1, 1);
    engine.step(InputEvent::Tick).unwrap();

    // The dead camera contributed a black frame; the cycle still wrote to
    // both sinks.
    let session = engine.session().unwrap();
    assert!(!session.last_video_frame(0).unwrap().is_black());
    assert!(session.last_video_frame(1).unwrap().is_black());

    engine.step(InputEvent::Tick).unwrap();
    let session = engine.session().unwrap();
    assert!(!session.last_video_frame(1).unwrap().is_black());

    engine.step(InputEvent::Stop).unwrap();
    let summaries = engine.shutdown().unwrap();
    let cams = &summaries[0].cameras;
    assert_eq!(cams[0].video_frames_written, cams[1].video_frames_written);
    assert_eq!(cams[0].images_saved, cams[1].images_saved);
}

#[test]
fn persisted_frames_are_clean_crops() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = rig_engine(dir.path());
    engine.step(InputEvent::Start).unwrap();

    // Synthetic pixels are 1..=255; overlay colors all carry a zero channel.
    let session = engine.session().unwrap();
    for cam in 0..2 {
        let frame = session.last_video_frame(cam).unwrap();
        assert_eq!((frame.width, frame.height), (REQ_W, REQ_H));
        assert!(frame.data().iter().all(|&b| b != 0));
    }
}

#[test]
fn quit_while_recording_still_closes_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = rig_engine(dir.path());
    engine.step(InputEvent::Start).unwrap();
    engine.step(InputEvent::Tick).unwrap();

    let out = engine.step(InputEvent::Quit).unwrap();
    assert_eq!(out.signal, ControlSignal::Shutdown);
    assert!(out.preview.is_none());

    let summaries = engine.shutdown().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].cameras[0].video_frames_written, Some(2));
    assert_eq!(engine.camera_count(), 0);
}

#[test]
fn quit_while_idle_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = rig_engine(dir.path());
    engine.step(InputEvent::Tick).unwrap();
    engine.step(InputEvent::Quit).unwrap();

    let summaries = engine.shutdown().unwrap();
    assert!(summaries.is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn return_to_idle_runs_back_to_back_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = rig_config(dir.path());
    config.stop_policy = StopPolicy::ReturnToIdle;
    let cameras = config
        .cameras
        .iter()
        .map(|&id| {
            CameraSource::synthetic(id, REQ_W, REQ_H, SENSOR_W, SENSOR_H, SOURCE_FPS).unwrap()
        })
        .collect();
    let mut engine = CaptureEngine::from_sources(config, cameras).unwrap();

    for _ in 0..2 {
        engine.step(InputEvent::Start).unwrap();
        for _ in 0..5 {
            engine.step(InputEvent::Tick).unwrap();
        }
        let out = engine.step(InputEvent::Stop).unwrap();
        assert_eq!(out.signal, ControlSignal::Continue);
    }

    let summaries = engine.shutdown().unwrap();
    assert_eq!(summaries.len(), 2);
    assert_ne!(session_root(&summaries[0]), session_root(&summaries[1]));
    for summary in &summaries {
        assert_eq!(summary.cameras[0].video_frames_written, Some(6));
    }
}

#[test]
fn escalation_aborts_but_sinks_still_close() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = rig_config(dir.path());
    config.max_consecutive_failures = 2;
    let cameras = config
        .cameras
        .iter()
        .map(|&id| {
            CameraSource::synthetic(id, REQ_W, REQ_H, SENSOR_W, SENSOR_H, SOURCE_FPS).unwrap()
        })
        .collect();
    let mut engine = CaptureEngine::from_sources(config, cameras).unwrap();

    engine.step(InputEvent::Start).unwrap();
    engine.inject_read_failures(0, 2);
    assert!(engine.step(InputEvent::Tick).is_ok());
    assert!(engine.step(InputEvent::Tick).is_err());

    // The driver's shutdown path still closes the open session.
    let summaries = engine.shutdown().unwrap();
    assert_eq!(summaries.len(), 1);
}

#[test]
fn video_only_rig_skips_image_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = rig_config(dir.path());
    config.images.enabled = false;
    let cameras = config
        .cameras
        .iter()
        .map(|&id| {
            CameraSource::synthetic(id, REQ_W, REQ_H, SENSOR_W, SENSOR_H, SOURCE_FPS).unwrap()
        })
        .collect();
    let mut engine = CaptureEngine::from_sources(config, cameras).unwrap();

    engine.step(InputEvent::Start).unwrap();
    let root = engine.session().unwrap().root().to_path_buf();
    assert!(!root.join("images").exists());

    engine.step(InputEvent::Stop).unwrap();
    let summaries = engine.shutdown().unwrap();
    assert_eq!(summaries[0].cameras[0].images_saved, 0);
    assert_eq!(summaries[0].cameras[0].video_frames_written, Some(1));
}
