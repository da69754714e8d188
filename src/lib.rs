//! camrig - synchronized multi-camera capture and recording
//!
//! This crate drives N cameras in lock-step: every loop cycle reads one frame
//! from each camera, center-crops it to the configured size, and fans it out
//! to the enabled sinks. The engine guarantees:
//!
//! 1. **Aligned batches**: every cycle yields exactly N frames in configured
//!    camera order; a failed read contributes a black frame, never a gap.
//! 2. **Clean persistence**: sinks receive pre-overlay frames; annotation
//!    exists only on independent copies for the preview.
//! 3. **Single release**: every camera handle and sink is closed exactly once
//!    across every exit path, normal or not.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames, center-crop geometry, concatenation
//! - `source`: camera backends (synthetic, V4L2, CSI) behind one handle
//! - `engine`: the capture cycle and Idle/Recording state machine
//! - `session`: output directory tree, per-camera sink records
//! - `sampler` / `sink`: JPEG image sampling and video encoding
//! - `display`: preview annotation and composition
//! - `config`: file, environment, and flag configuration

pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod frame;
pub mod sampler;
pub mod session;
pub mod sink;
pub mod source;

pub use config::{CameraKind, CaptureConfig, SamplingSettings, StopPolicy};
pub use engine::{CaptureEngine, ControlSignal, CycleOutput, InputEvent, StepOutput};
pub use error::CaptureError;
pub use frame::{CropRegion, Frame};
pub use session::{CameraSummary, RecState, RecordingSession, SessionSummary};
pub use source::CameraSource;
