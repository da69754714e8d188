//! Per-camera video sinks.
//!
//! A sink receives every cycle's clean frame while recording and encodes at
//! the configured nominal frame rate, independent of the loop's wall-clock
//! cadence. Backends:
//!
//! - Stub (always built): creates the output file, counts writes, retains
//!   the last frame. Used by tests and by builds without an encoder.
//! - GStreamer (feature: video-gstreamer): appsrc ! videoconvert ! x264enc !
//!   mp4mux ! filesink, finalized with EOS on close.
//!
//! Close is idempotent; `Drop` is the backstop so an abandoned sink never
//! leaves an unfinalized container.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::CaptureError;
use crate::frame::Frame;

#[derive(Debug)]
pub struct VideoSink {
    path: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
    closed: bool,
    backend: SinkBackend,
}

#[derive(Debug)]
enum SinkBackend {
    Stub(StubSink),
    #[cfg(feature = "video-gstreamer")]
    Gstreamer(GstWriter),
}

impl VideoSink {
    /// Open a sink for one camera's video file.
    pub fn open(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        #[cfg(feature = "video-gstreamer")]
        let backend = SinkBackend::Gstreamer(GstWriter::open(path, width, height, fps)?);
        #[cfg(not(feature = "video-gstreamer"))]
        let backend = {
            let _ = fps;
            SinkBackend::Stub(StubSink::open(path)?)
        };

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            frames_written: 0,
            closed: false,
            backend,
        })
    }

    /// Append one clean frame. Fails with `CaptureError::SinkWrite` on a
    /// dimension mismatch, a closed sink, or an encoder error.
    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.closed {
            return Err(self.write_err("sink is closed".to_string()).into());
        }
        if frame.width != self.width || frame.height != self.height {
            return Err(self
                .write_err(format!(
                    "frame is {}x{}, sink expects {}x{}",
                    frame.width, frame.height, self.width, self.height
                ))
                .into());
        }

        match &mut self.backend {
            SinkBackend::Stub(stub) => stub.write(frame),
            #[cfg(feature = "video-gstreamer")]
            SinkBackend::Gstreamer(writer) => writer.write(frame, self.frames_written)?,
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Flush and finalize the file. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match &mut self.backend {
            SinkBackend::Stub(_) => Ok(()),
            #[cfg(feature = "video-gstreamer")]
            SinkBackend::Gstreamer(writer) => writer.finish().map_err(|e| {
                CaptureError::SinkWrite {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }
                .into()
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Last frame handed to the sink. Stub backend only; encoder backends
    /// return `None`.
    pub fn last_frame(&self) -> Option<&Frame> {
        match &self.backend {
            SinkBackend::Stub(stub) => stub.last.as_ref(),
            #[cfg(feature = "video-gstreamer")]
            SinkBackend::Gstreamer(_) => None,
        }
    }

    fn write_err(&self, reason: String) -> CaptureError {
        CaptureError::SinkWrite {
            path: self.path.clone(),
            reason,
        }
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                log::warn!("video sink {}: close on drop failed: {}", self.path.display(), e);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Stub backend
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct StubSink {
    last: Option<Frame>,
}

impl StubSink {
    fn open(path: &Path) -> Result<Self> {
        // Placeholder file so the session tree matches the encoder layout.
        std::fs::File::create(path).map_err(|e| CaptureError::SinkWrite {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { last: None })
    }

    fn write(&mut self, frame: &Frame) {
        self.last = Some(frame.clone());
    }
}

// ----------------------------------------------------------------------------
// GStreamer backend (feature: video-gstreamer)
// ----------------------------------------------------------------------------

#[cfg(feature = "video-gstreamer")]
struct GstWriter {
    pipeline: gstreamer::Pipeline,
    appsrc: gstreamer_app::AppSrc,
    fps: u32,
}

#[cfg(feature = "video-gstreamer")]
impl GstWriter {
    fn open(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        use anyhow::{anyhow, Context};
        use gstreamer::prelude::*;

        gstreamer::init().context("initialize gstreamer")?;

        let pipeline = gstreamer::Pipeline::new();
        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", gstreamer::Fraction::new(fps as i32, 1))
            .build();
        let appsrc = gstreamer_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gstreamer::Format::Time)
            .build();

        let convert = gstreamer::ElementFactory::make("videoconvert")
            .build()
            .context("create videoconvert")?;
        let encoder = gstreamer::ElementFactory::make("x264enc")
            .build()
            .context("create x264enc")?;
        let muxer = gstreamer::ElementFactory::make("mp4mux")
            .property("faststart", true)
            .build()
            .context("create mp4mux")?;
        let filesink = gstreamer::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .build()
            .context("create filesink")?;

        pipeline
            .add_many([appsrc.upcast_ref(), &convert, &encoder, &muxer, &filesink])
            .context("add writer elements")?;
        gstreamer::Element::link_many([appsrc.upcast_ref(), &convert, &encoder, &muxer, &filesink])
            .context("link writer elements")?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| anyhow!("start writer pipeline: {}", e))?;

        Ok(Self {
            pipeline,
            appsrc,
            fps,
        })
    }

    fn write(&mut self, frame: &Frame, index: u64) -> Result<()> {
        use anyhow::anyhow;

        // Nominal-rate timestamps from the frame index, not wall clock.
        let frame_nanos = 1_000_000_000u64 / self.fps.max(1) as u64;
        let mut buffer = gstreamer::Buffer::from_slice(frame.data().to_vec());
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| anyhow!("writer buffer is not writable"))?;
            buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(index * frame_nanos));
            buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(frame_nanos));
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| anyhow!("push frame to encoder: {:?}", e))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        use anyhow::anyhow;
        use gstreamer::prelude::*;

        self.appsrc
            .end_of_stream()
            .map_err(|e| anyhow!("send EOS: {:?}", e))?;

        let mut pipeline_error = None;
        if let Some(bus) = self.pipeline.bus() {
            for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(5)) {
                use gstreamer::MessageView;
                match msg.view() {
                    MessageView::Eos(..) => break,
                    MessageView::Error(err) => {
                        pipeline_error = Some(format!("{} ({:?})", err.error(), err.debug()));
                        break;
                    }
                    _ => {}
                }
            }
        }
        let _ = self.pipeline.set_state(gstreamer::State::Null);

        match pipeline_error {
            Some(err) => Err(anyhow!("finalize video file: {}", err)),
            None => Ok(()),
        }
    }
}

#[cfg(feature = "video-gstreamer")]
impl Drop for GstWriter {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}
