//! Camera sources.
//!
//! One `CameraSource` per configured camera. Opening a source negotiates the
//! capture resolution and fixes the center-crop window for the rest of the
//! run. Backends:
//!
//! - Synthetic pattern generator (always built; tests and dry runs)
//! - V4L2 device node (feature: camera-v4l2)
//! - CSI sensor behind a GStreamer pipeline (feature: camera-gstreamer)
//!
//! Open failures are fatal at startup. Read failures are per-call errors;
//! the capture cycle substitutes a zero frame and keeps the other cameras
//! running.

use anyhow::Result;
#[cfg(feature = "camera-v4l2")]
use anyhow::Context;
#[cfg(feature = "camera-v4l2")]
use ouroboros::self_referencing;

use crate::config::CameraKind;
use crate::error::CaptureError;
use crate::frame::{CropRegion, Frame, CHANNELS};

/// Nominal rate assumed when a source cannot report one.
pub const FALLBACK_SOURCE_FPS: u32 = 30;

/// An opened camera stream with its fixed crop window.
#[derive(Debug)]
pub struct CameraSource {
    id: u32,
    actual_width: u32,
    actual_height: u32,
    native_fps: u32,
    crop: CropRegion,
    backend: Backend,
}

#[derive(Debug)]
enum Backend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    V4l2(V4l2Camera),
    #[cfg(feature = "camera-gstreamer")]
    Csi(CsiCamera),
}

impl CameraSource {
    /// Open one camera and compute its center-crop window.
    ///
    /// Fails with `CaptureError::CameraOpen` if the handle cannot be opened
    /// and `CaptureError::CameraResolution` if the negotiated resolution is
    /// smaller than the requested one. Both are fatal; there is no retry.
    pub fn open(
        id: u32,
        kind: CameraKind,
        requested_width: u32,
        requested_height: u32,
    ) -> Result<Self> {
        let (backend, actual_width, actual_height, native_fps) = match kind {
            CameraKind::Synthetic => {
                // The generator grants the requested size exactly.
                let cam = SyntheticCamera::new(id, requested_width, requested_height);
                (
                    Backend::Synthetic(cam),
                    requested_width,
                    requested_height,
                    FALLBACK_SOURCE_FPS,
                )
            }
            CameraKind::Usb => {
                #[cfg(feature = "camera-v4l2")]
                {
                    let cam = V4l2Camera::open(id, requested_width, requested_height)?;
                    let (w, h) = (cam.active_width, cam.active_height);
                    let fps = cam.native_fps;
                    (Backend::V4l2(cam), w, h, fps)
                }
                #[cfg(not(feature = "camera-v4l2"))]
                {
                    return Err(CaptureError::CameraOpen {
                        id,
                        reason: "USB cameras require the camera-v4l2 feature".to_string(),
                    }
                    .into());
                }
            }
            CameraKind::Csi => {
                #[cfg(feature = "camera-gstreamer")]
                {
                    let cam = CsiCamera::open(id, requested_width, requested_height)?;
                    (
                        Backend::Csi(cam),
                        requested_width,
                        requested_height,
                        CSI_SENSOR_FPS,
                    )
                }
                #[cfg(not(feature = "camera-gstreamer"))]
                {
                    return Err(CaptureError::CameraOpen {
                        id,
                        reason: "CSI cameras require the camera-gstreamer feature".to_string(),
                    }
                    .into());
                }
            }
        };

        let crop = CropRegion::centered(
            requested_width,
            requested_height,
            actual_width,
            actual_height,
        )?;
        log::info!(
            "camera {}: opened {}x{} (requested {}x{}), crop origin ({}, {})",
            id,
            actual_width,
            actual_height,
            requested_width,
            requested_height,
            crop.x,
            crop.y
        );
        Ok(Self {
            id,
            actual_width,
            actual_height,
            native_fps,
            crop,
            backend,
        })
    }

    /// Synthetic source with an explicit negotiated resolution, for tests
    /// that exercise a non-trivial crop without hardware.
    pub fn synthetic(
        id: u32,
        requested_width: u32,
        requested_height: u32,
        actual_width: u32,
        actual_height: u32,
        native_fps: u32,
    ) -> Result<Self> {
        let crop = CropRegion::centered(
            requested_width,
            requested_height,
            actual_width,
            actual_height,
        )?;
        Ok(Self {
            id,
            actual_width,
            actual_height,
            native_fps,
            crop,
            backend: Backend::Synthetic(SyntheticCamera::new(id, actual_width, actual_height)),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn crop(&self) -> CropRegion {
        self.crop
    }

    pub fn actual_resolution(&self) -> (u32, u32) {
        (self.actual_width, self.actual_height)
    }

    /// Native frame rate reported by the hardware; 0 if unknown.
    pub fn native_fps(&self) -> u32 {
        self.native_fps
    }

    /// Blocking read of the next full-size frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            Backend::Synthetic(cam) => cam.read_frame(),
            #[cfg(feature = "camera-v4l2")]
            Backend::V4l2(cam) => cam.read_frame(),
            #[cfg(feature = "camera-gstreamer")]
            Backend::Csi(cam) => cam.read_frame(),
        }
    }

    /// Make the next `count` reads fail. Synthetic backend only; hardware
    /// backends ignore this.
    pub fn inject_read_failures(&mut self, count: u32) {
        if let Backend::Synthetic(cam) = &mut self.backend {
            cam.fail_reads += count;
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct SyntheticCamera {
    id: u32,
    width: u32,
    height: u32,
    frame_count: u64,
    fail_reads: u32,
}

impl SyntheticCamera {
    fn new(id: u32, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            frame_count: 0,
            fail_reads: 0,
        }
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return Err(CaptureError::FrameRead {
                id: self.id,
                reason: "injected failure".to_string(),
            }
            .into());
        }
        self.frame_count += 1;

        // Deterministic non-zero pattern, varied per camera and per frame so
        // tests can tell frames (and black substitutes) apart.
        let pixel_count = self.width as usize * self.height as usize * CHANNELS;
        let mut data = vec![0u8; pixel_count];
        for (i, pixel) in data.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.id as u64 * 31) % 255) as u8 + 1;
        }
        Frame::new(data, self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// V4L2 camera (feature: camera-v4l2)
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
struct V4l2Camera {
    id: u32,
    active_width: u32,
    active_height: u32,
    native_fps: u32,
    state: V4l2State,
}

#[cfg(feature = "camera-v4l2")]
#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "camera-v4l2")]
impl V4l2Camera {
    fn open(id: u32, requested_width: u32, requested_height: u32) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let open_err = |reason: String| CaptureError::CameraOpen { id, reason };

        let device =
            v4l::Device::new(id as usize).map_err(|e| open_err(format!("open device: {}", e)))?;
        let mut format = device
            .format()
            .map_err(|e| open_err(format!("read format: {}", e)))?;
        format.width = requested_width;
        format.height = requested_height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = device
            .set_format(&format)
            .map_err(|e| open_err(format!("set format: {}", e)))?;

        let native_fps = device
            .params()
            .ok()
            .map(|params| {
                let interval = params.interval;
                if interval.numerator == 0 {
                    0
                } else {
                    interval.denominator / interval.numerator
                }
            })
            .unwrap_or(0);

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .context("create v4l2 buffer stream")
            },
        }
        .try_build()
        .map_err(|e| open_err(format!("{}", e)))?;

        Ok(Self {
            id,
            active_width: format.width,
            active_height: format.height,
            native_fps,
            state,
        })
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (buf, _meta) = self
            .state
            .with_mut(|fields| fields.stream.next())
            .map_err(|e| CaptureError::FrameRead {
                id: self.id,
                reason: e.to_string(),
            })?;
        let expected = self.active_width as usize * self.active_height as usize * CHANNELS;
        if buf.len() < expected {
            return Err(CaptureError::FrameRead {
                id: self.id,
                reason: format!("short buffer: {} bytes, expected {}", buf.len(), expected),
            }
            .into());
        }
        Frame::new(
            buf[..expected].to_vec(),
            self.active_width,
            self.active_height,
        )
    }
}

// ----------------------------------------------------------------------------
// CSI camera via GStreamer (feature: camera-gstreamer)
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-gstreamer")]
const CSI_SENSOR_FPS: u32 = 30;

/// Pipeline description for a CSI sensor (Jetson-style capture chain).
#[cfg(feature = "camera-gstreamer")]
fn csi_pipeline(sensor_id: u32, width: u32, height: u32, framerate: u32) -> String {
    format!(
        "nvarguscamerasrc sensor-id={sensor_id} ! \
         video/x-raw(memory:NVMM), width=(int){width}, height=(int){height}, \
         framerate=(fraction){framerate}/1 ! \
         nvvidconv flip-method=0 ! videoconvert ! video/x-raw, format=(string)RGB ! \
         appsink name=appsink sync=false max-buffers=1 drop=true"
    )
}

#[cfg(feature = "camera-gstreamer")]
struct CsiCamera {
    id: u32,
    width: u32,
    height: u32,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

#[cfg(feature = "camera-gstreamer")]
impl CsiCamera {
    fn open(id: u32, width: u32, height: u32) -> Result<Self> {
        use anyhow::Context as _;

        let open_err = |reason: String| CaptureError::CameraOpen { id, reason };

        gstreamer::init().map_err(|e| open_err(format!("initialize gstreamer: {}", e)))?;
        let description = csi_pipeline(id, width, height, CSI_SENSOR_FPS);
        let pipeline = gstreamer::parse_launch(&description)
            .map_err(|e| open_err(format!("build pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| open_err("capture pipeline is not a Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| open_err("appsink element has unexpected type".to_string()))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_err(format!("set pipeline to Playing: {}", e)))?;

        Ok(Self {
            id,
            width,
            height,
            pipeline,
            appsink,
        })
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let read_err = |reason: String| CaptureError::FrameRead {
            id: self.id,
            reason,
        };

        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(1_000))
            .ok_or_else(|| read_err("stream stalled".to_string()))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| read_err("sample missing buffer".to_string()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| read_err("sample missing caps".to_string()))?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|e| read_err(format!("parse caps: {}", e)))?;

        let width = info.width();
        let height = info.height();
        let row_bytes = width as usize * CHANNELS;
        let stride = info.stride()[0] as usize;

        let map = buffer
            .map_readable()
            .map_err(|e| read_err(format!("map buffer: {}", e)))?;
        let data = map.as_slice();

        if width != self.width || height != self.height {
            return Err(read_err(format!(
                "pipeline produced {}x{}, expected {}x{}",
                width, height, self.width, self.height
            ))
            .into());
        }

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .ok_or_else(|| read_err("buffer row out of bounds".to_string()))?,
            );
        }
        Frame::new(pixels, width, height)
    }
}

#[cfg(feature = "camera-gstreamer")]
impl Drop for CsiCamera {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}
