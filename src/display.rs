//! Preview annotation and composition.
//!
//! Annotated frames exist only for the live preview; the engine derives them
//! from independent copies so persisted output never carries overlay pixels.
//! Proper glyph rendering belongs to whatever hosts the preview surface; the
//! default annotator draws solid markers in the same layout instead.

use anyhow::Result;

use crate::frame::{self, Frame};
use crate::session::RecState;

/// Camera label marker color.
pub const LABEL_COLOR: [u8; 3] = [0, 255, 255];
/// Idle prompt marker color.
pub const IDLE_COLOR: [u8; 3] = [0, 255, 0];
/// Recording indicator color.
pub const RECORDING_COLOR: [u8; 3] = [255, 0, 0];

/// Renders the per-camera overlay onto a copy of a clean frame.
pub trait Annotator {
    fn annotate(&self, clean: &Frame, label: &str, state: RecState) -> Frame;
}

/// Default overlay: a label chip top-left, plus either an idle prompt bar
/// (green) or a filled recording dot (red) near the bottom-left corner.
pub struct MarkerAnnotator;

impl Annotator for MarkerAnnotator {
    fn annotate(&self, clean: &Frame, label: &str, state: RecState) -> Frame {
        let mut frame = clean.clone();
        let h = frame.height as i64;

        // Label chip sized to the text it stands in for, never wider than
        // the frame itself.
        let chip_width = (10 * label.chars().count() as u32)
            .max(20)
            .min(frame.width);
        frame.fill_rect(10, 16, chip_width, 24, LABEL_COLOR);

        match state {
            RecState::Recording => {
                frame.fill_disc(30, h - 30, 10, RECORDING_COLOR);
            }
            RecState::Idle => {
                let bar_width = (frame.width / 2).max(20);
                frame.fill_rect(10, h - 36, bar_width, 16, IDLE_COLOR);
            }
        }
        frame
    }
}

/// Concatenate the annotated frames into one preview surface.
pub fn compose(annotated: &[Frame]) -> Result<Frame> {
    frame::hconcat(annotated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_frame() -> Frame {
        Frame::black(64, 64)
    }

    #[test]
    fn annotate_does_not_touch_the_clean_frame() {
        let clean = clean_frame();
        let before = clean.data().to_vec();
        let _ = MarkerAnnotator.annotate(&clean, "CAM 0", RecState::Recording);
        assert_eq!(clean.data(), before.as_slice());
    }

    #[test]
    fn annotated_copy_differs_from_clean() {
        let clean = clean_frame();
        let idle = MarkerAnnotator.annotate(&clean, "CAM 0", RecState::Idle);
        let recording = MarkerAnnotator.annotate(&clean, "CAM 0", RecState::Recording);
        assert_ne!(idle.data(), clean.data());
        assert_ne!(recording.data(), clean.data());
        assert_ne!(idle.data(), recording.data());
    }

    #[test]
    fn annotate_handles_frames_narrower_than_the_chip() {
        // 16 wide is below the minimum chip width; the overlay must clip
        // instead of panicking.
        let clean = Frame::black(16, 16);
        let idle = MarkerAnnotator.annotate(&clean, "CAM 0", RecState::Idle);
        let recording = MarkerAnnotator.annotate(&clean, "CAM 0", RecState::Recording);
        assert_eq!((idle.width, idle.height), (16, 16));
        assert_ne!(idle.data(), recording.data());
    }

    #[test]
    fn compose_widens_by_camera_count() {
        let frames = vec![clean_frame(), clean_frame(), clean_frame()];
        let preview = compose(&frames).unwrap();
        assert_eq!(preview.width, 64 * 3);
        assert_eq!(preview.height, 64);
    }
}
