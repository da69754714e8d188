//! Image sampling: persist a fraction of cycles' clean frames as JPEGs.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::CaptureError;
use crate::frame::Frame;
use crate::source::FALLBACK_SOURCE_FPS;

const JPEG_QUALITY: u8 = 90;

/// Cycle-count interval between image saves, fixed at session start.
#[derive(Clone, Copy, Debug)]
pub struct SamplingPlan {
    interval: u32,
}

impl SamplingPlan {
    /// `interval = floor(source_fps / target_fps)`. A source that reports 0
    /// falls back to the nominal rate. A zero interval (target faster than
    /// source) disables sampling.
    pub fn new(source_fps: u32, target_fps: u32) -> Self {
        let source = if source_fps == 0 {
            FALLBACK_SOURCE_FPS
        } else {
            source_fps
        };
        let interval = if target_fps == 0 { 0 } else { source / target_fps };
        Self { interval }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Sampled when the cycle counter hits a multiple of the interval.
    /// The counter starts at 1, so the first save lands on cycle `interval`.
    pub fn should_sample(&self, cycle: u64) -> bool {
        self.interval > 0 && cycle % self.interval as u64 == 0
    }
}

/// Encode one clean frame as a JPEG file.
pub fn write_jpeg(path: &Path, frame: &Frame) -> Result<()> {
    let sink_err = |reason: String| CaptureError::SinkWrite {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::create(path).map_err(|e| sink_err(e.to_string()))?;
    let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
    encoder
        .write_image(
            frame.data(),
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| sink_err(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_floor_of_rate_ratio() {
        assert_eq!(SamplingPlan::new(30, 10).interval(), 3);
        assert_eq!(SamplingPlan::new(25, 10).interval(), 2);
        assert_eq!(SamplingPlan::new(30, 30).interval(), 1);
    }

    #[test]
    fn zero_source_rate_falls_back_to_nominal() {
        assert_eq!(
            SamplingPlan::new(0, 10).interval(),
            FALLBACK_SOURCE_FPS / 10
        );
    }

    #[test]
    fn faster_target_than_source_disables_sampling() {
        let plan = SamplingPlan::new(10, 30);
        assert_eq!(plan.interval(), 0);
        assert!(!plan.should_sample(1));
        assert!(!plan.should_sample(30));
    }

    #[test]
    fn samples_every_interval_cycles() {
        let plan = SamplingPlan::new(30, 10);
        let sampled: Vec<u64> = (1..=9).filter(|&c| plan.should_sample(c)).collect();
        assert_eq!(sampled, vec![3, 6, 9]);
    }

    #[test]
    fn writes_a_decodable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_000001.jpg");
        let frame = Frame::black(32, 16);
        write_jpeg(&path, &frame).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // JPEG SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn write_failure_surfaces_as_sink_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("frame.jpg");
        let err = write_jpeg(&path, &Frame::black(8, 8)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CaptureError>(),
            Some(CaptureError::SinkWrite { .. })
        ));
    }
}
