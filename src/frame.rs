//! Pixel frames and the center-crop calculator.
//!
//! - `Frame`: owned RGB24 buffer with known dimensions. All clean frames in
//!   a cycle share identical dimensions (guaranteed by the crop invariant),
//!   which horizontal concatenation relies on.
//! - `CropRegion`: pure derivation of the centered crop window from the
//!   requested vs. negotiated resolution, shared by every source.

use anyhow::{anyhow, Result};

use crate::error::CaptureError;

/// Bytes per pixel. Frames are tightly packed RGB24, no row padding.
pub const CHANNELS: usize = 3;

/// Owned RGB24 pixel buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap a pixel buffer. The buffer length must match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Zero-filled frame, substituted when a camera read fails so the cycle
    /// never shrinks below N frames.
    pub fn black(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * CHANNELS],
            width,
            height,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_black(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Copy out the crop window. The region must lie inside the frame, which
    /// `CropRegion::centered` guarantees at startup.
    pub fn crop(&self, region: &CropRegion) -> Result<Frame> {
        if region.x + region.width > self.width || region.y + region.height > self.height {
            return Err(anyhow!(
                "crop {}x{}+{}+{} exceeds frame {}x{}",
                region.width,
                region.height,
                region.x,
                region.y,
                self.width,
                self.height
            ));
        }

        let x = region.x as usize;
        let w = region.width as usize;
        let h = region.height as usize;
        let src_stride = self.width as usize * CHANNELS;
        let row_bytes = w * CHANNELS;
        let mut data = Vec::with_capacity(row_bytes * h);
        for row in region.y as usize..region.y as usize + h {
            let start = row * src_stride + x * CHANNELS;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Frame::new(data, region.width, region.height)
    }

    /// Fill an axis-aligned rectangle, clamped to the frame bounds.
    pub fn fill_rect(&mut self, x: i64, y: i64, w: u32, h: u32, color: [u8; 3]) {
        let x0 = x.max(0) as u32;
        let y0 = y.max(0) as u32;
        let x1 = ((x + w as i64).max(0) as u32).min(self.width);
        let y1 = ((y + h as i64).max(0) as u32).min(self.height);
        for py in y0..y1 {
            for px in x0..x1 {
                self.put_pixel(px, py, color);
            }
        }
    }

    /// Fill a disc, clamped to the frame bounds.
    pub fn fill_disc(&mut self, cx: i64, cy: i64, radius: u32, color: [u8; 3]) {
        let r = radius as i64;
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let px = cx + dx;
                let py = cy + dy;
                if px >= 0 && py >= 0 && (px as u32) < self.width && (py as u32) < self.height {
                    self.put_pixel(px as u32, py as u32, color);
                }
            }
        }
    }

    fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[idx..idx + CHANNELS].copy_from_slice(&color);
    }
}

/// Fixed crop window inside a camera's negotiated frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Center the requested window inside the negotiated resolution.
    ///
    /// Origin is `floor((actual - requested) / 2)` per axis. Fails if the
    /// negotiated resolution is smaller than the requested one on either
    /// axis, which is fatal at startup.
    pub fn centered(
        requested_width: u32,
        requested_height: u32,
        actual_width: u32,
        actual_height: u32,
    ) -> Result<Self> {
        if actual_width < requested_width || actual_height < requested_height {
            return Err(CaptureError::CameraResolution {
                requested_width,
                requested_height,
                actual_width,
                actual_height,
            }
            .into());
        }
        Ok(Self {
            x: (actual_width - requested_width) / 2,
            y: (actual_height - requested_height) / 2,
            width: requested_width,
            height: requested_height,
        })
    }
}

/// Concatenate frames left to right into one preview surface.
///
/// All frames must share identical dimensions; the capture cycle guarantees
/// this for its outputs.
pub fn hconcat(frames: &[Frame]) -> Result<Frame> {
    let first = frames
        .first()
        .ok_or_else(|| anyhow!("no frames to concatenate"))?;
    let (w, h) = (first.width, first.height);
    for frame in frames {
        if frame.width != w || frame.height != h {
            return Err(anyhow!(
                "frame dimensions differ: {}x{} vs {}x{}",
                frame.width,
                frame.height,
                w,
                h
            ));
        }
    }

    let row_bytes = w as usize * CHANNELS;
    let mut data = Vec::with_capacity(row_bytes * frames.len() * h as usize);
    for row in 0..h as usize {
        for frame in frames {
            let start = row * row_bytes;
            data.extend_from_slice(&frame.data[start..start + row_bytes]);
        }
    }
    Frame::new(data, w * frames.len() as u32, h)
}
