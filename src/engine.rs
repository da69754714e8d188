//! The synchronized capture engine.
//!
//! One `CaptureEngine` drives N camera sources through a lock-step cycle.
//! Each `step` handles one input event, captures one aligned batch of clean
//! and annotated frames, fans the clean frames out to the recording session
//! (when one is open) and returns the composite preview. The engine is
//! synchronous; the driver owns pacing and input polling, which keeps the
//! whole state machine testable without hardware or a display.

use anyhow::{anyhow, ensure, Context, Result};

use crate::config::{CaptureConfig, StopPolicy};
use crate::display::{self, Annotator, MarkerAnnotator};
use crate::frame::Frame;
use crate::session::{RecState, RecordingSession, SessionSummary};
use crate::source::CameraSource;

/// One abstract input event per cycle, however the host polls for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// No operator input this cycle.
    Tick,
    Start,
    Stop,
    Quit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    Continue,
    Shutdown,
}

/// One loop iteration's aligned frame batches. Both vectors always hold
/// exactly N frames, index-aligned with the configured camera order.
pub struct CycleOutput {
    pub clean: Vec<Frame>,
    pub annotated: Vec<Frame>,
}

pub struct StepOutput {
    pub signal: ControlSignal,
    /// Composite preview; absent when the step shut the engine down.
    pub preview: Option<Frame>,
}

pub struct CaptureEngine {
    config: CaptureConfig,
    cameras: Vec<CameraSource>,
    annotator: Box<dyn Annotator>,
    session: Option<RecordingSession>,
    consecutive_failures: Vec<u32>,
    summaries: Vec<SessionSummary>,
    shut_down: bool,
}

impl CaptureEngine {
    /// Open every configured camera, in order. The first failure aborts
    /// startup; sources opened before it are released on the way out.
    pub fn open(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let mut cameras = Vec::with_capacity(config.cameras.len());
        for &id in &config.cameras {
            let camera = CameraSource::open(id, config.kind, config.width, config.height)
                .with_context(|| format!("starting camera {}", id))?;
            cameras.push(camera);
        }
        Self::from_sources(config, cameras)
    }

    /// Build an engine from pre-opened sources. Used by tests to exercise
    /// negotiated resolutions and read failures without hardware.
    pub fn from_sources(config: CaptureConfig, cameras: Vec<CameraSource>) -> Result<Self> {
        config.validate()?;
        ensure!(
            cameras.len() == config.cameras.len(),
            "{} sources for {} configured cameras",
            cameras.len(),
            config.cameras.len()
        );
        let n = cameras.len();
        Ok(Self {
            config,
            cameras,
            annotator: Box::new(MarkerAnnotator),
            session: None,
            consecutive_failures: vec![0; n],
            summaries: Vec::new(),
            shut_down: false,
        })
    }

    pub fn set_annotator(&mut self, annotator: Box<dyn Annotator>) {
        self.annotator = annotator;
    }

    pub fn state(&self) -> RecState {
        if self.session.is_some() {
            RecState::Recording
        } else {
            RecState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Make the next `count` reads from one camera fail. Synthetic backend
    /// only; used to exercise degraded cycles.
    pub fn inject_read_failures(&mut self, index: usize, count: u32) {
        if let Some(camera) = self.cameras.get_mut(index) {
            camera.inject_read_failures(count);
        }
    }

    /// Run one cycle: dispatch the event, capture, persist, compose.
    ///
    /// A `Shutdown` signal means the driver must call [`shutdown`] and stop;
    /// the engine does not capture on the way out.
    ///
    /// [`shutdown`]: CaptureEngine::shutdown
    pub fn step(&mut self, event: InputEvent) -> Result<StepOutput> {
        ensure!(!self.shut_down, "step after shutdown");

        match event {
            InputEvent::Quit => {
                return Ok(StepOutput {
                    signal: ControlSignal::Shutdown,
                    preview: None,
                });
            }
            InputEvent::Start => self.start_session()?,
            InputEvent::Stop => {
                let stopped = self.stop_session()?;
                if stopped && self.config.stop_policy == StopPolicy::Terminate {
                    return Ok(StepOutput {
                        signal: ControlSignal::Shutdown,
                        preview: None,
                    });
                }
            }
            InputEvent::Tick => {}
        }

        let cycle = self.capture_cycle()?;
        if let Some(session) = &mut self.session {
            session.record_cycle(&cycle.clean)?;
        }
        let preview = display::compose(&cycle.annotated)?;
        Ok(StepOutput {
            signal: ControlSignal::Continue,
            preview: Some(preview),
        })
    }

    /// Read one frame from every camera, in the fixed configured order.
    ///
    /// A failed read degrades that camera to a zero-filled frame for this
    /// cycle only; the cycle never aborts for a single source unless the
    /// configured consecutive-failure threshold is crossed. Annotated frames
    /// are independent copies; clean frames never carry overlay pixels.
    pub fn capture_cycle(&mut self) -> Result<CycleOutput> {
        let state = self.state();
        let mut clean = Vec::with_capacity(self.cameras.len());
        let mut annotated = Vec::with_capacity(self.cameras.len());

        for (i, camera) in self.cameras.iter_mut().enumerate() {
            let frame = match camera.read_frame() {
                Ok(full) => {
                    self.consecutive_failures[i] = 0;
                    full.crop(&camera.crop())?
                }
                Err(e) => {
                    self.consecutive_failures[i] += 1;
                    log::warn!(
                        "camera {}: read failed ({} consecutive), substituting black frame: {}",
                        camera.id(),
                        self.consecutive_failures[i],
                        e
                    );
                    let threshold = self.config.max_consecutive_failures;
                    if threshold > 0 && self.consecutive_failures[i] >= threshold {
                        return Err(anyhow!(
                            "camera {}: {} consecutive read failures",
                            camera.id(),
                            self.consecutive_failures[i]
                        ));
                    }
                    Frame::black(self.config.width, self.config.height)
                }
            };
            let label = format!("CAM {}", camera.id());
            annotated.push(self.annotator.annotate(&frame, &label, state));
            clean.push(frame);
        }

        Ok(CycleOutput { clean, annotated })
    }

    fn start_session(&mut self) -> Result<()> {
        if self.session.is_some() {
            // Only one session at a time; a repeated start is a no-op.
            log::debug!("start ignored: already recording");
            return Ok(());
        }
        let source_fps = self.cameras.first().map(|c| c.native_fps()).unwrap_or(0);
        self.session = Some(RecordingSession::begin(&self.config, source_fps)?);
        Ok(())
    }

    /// Returns whether a session was actually open.
    fn stop_session(&mut self) -> Result<bool> {
        let Some(mut session) = self.session.take() else {
            return Ok(false);
        };
        let result = session.finish();
        log::info!(
            "session {}: closed after {} cycle(s)",
            session.id(),
            session.cycle_count()
        );
        match result {
            Ok(summary) => {
                self.summaries.push(summary);
                Ok(true)
            }
            Err(e) => {
                // The counters are still accurate when a sink failed to
                // finalize; keep the summary so the exit report can show it.
                self.summaries.push(session.summary());
                Err(e)
            }
        }
    }

    /// Release every sink and camera handle, exactly once, and hand back the
    /// summaries of all sessions this run produced. Safe to call again; a
    /// second call returns nothing.
    pub fn shutdown(&mut self) -> Result<Vec<SessionSummary>> {
        if self.shut_down {
            return Ok(std::mem::take(&mut self.summaries));
        }
        self.shut_down = true;
        let stop_result = self.stop_session();
        self.cameras.clear();
        stop_result?;
        Ok(std::mem::take(&mut self.summaries))
    }

    /// Drain the collected session summaries without closing anything.
    /// Lets the driver report what was saved when `shutdown` itself errors.
    pub fn take_summaries(&mut self) -> Vec<SessionSummary> {
        std::mem::take(&mut self.summaries)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        // Sinks and camera handles close through their own Drop impls; this
        // only flags the abnormal path.
        if !self.shut_down && self.session.is_some() {
            log::warn!("engine dropped while recording; sinks close on drop");
        }
    }
}
