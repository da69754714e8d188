//! Error kinds for the capture engine.
//!
//! Library code propagates `anyhow::Result`; the variants here exist so
//! callers can tell the fatal startup failures apart from recoverable
//! mid-run ones (a `FrameRead` degrades one channel to black frames, the
//! rest abort the run or the session).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// A camera handle could not be opened. Fatal at startup; already-opened
    /// sources are released before this propagates.
    #[error("camera {id}: failed to open: {reason}")]
    CameraOpen { id: u32, reason: String },

    /// The negotiated resolution is smaller than the requested one on at
    /// least one axis, so the center-crop would read out of bounds.
    #[error(
        "negotiated resolution {actual_width}x{actual_height} is smaller than \
         requested {requested_width}x{requested_height}"
    )]
    CameraResolution {
        requested_width: u32,
        requested_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// A frame read failed mid-run. Recoverable: the cycle substitutes a
    /// zero-filled frame for that camera and continues.
    #[error("camera {id}: frame read failed: {reason}")]
    FrameRead { id: u32, reason: String },

    /// The session output directory tree could not be created. Fatal to the
    /// session: no sinks open without a writable directory.
    #[error("failed to create output directory {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persistence write failed (disk full, encoder failure). Surfaced and
    /// aborts the session rather than silently dropping frames.
    #[error("sink write failed for {path}: {reason}")]
    SinkWrite { path: PathBuf, reason: String },
}
