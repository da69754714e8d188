//! Capture configuration.
//!
//! Built once at startup from three layers: an optional TOML file, `CAMRIG_*`
//! environment overrides, then CLI flags applied by the driver. `validate()`
//! runs after the last layer; the engine only ever sees a valid config.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CAMERA: u32 = 0;
const DEFAULT_WIDTH: u32 = 480;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_IMAGE_FPS: u32 = 10;
const DEFAULT_VIDEO_FPS: u32 = 10;
const DEFAULT_OUTPUT_ROOT: &str = "data_recordings";

/// How camera handles are addressed.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CameraKind {
    /// Index-addressed local device (V4L2), requires feature `camera-v4l2`.
    #[default]
    Usb,
    /// Hardware CSI sensor behind a GStreamer pipeline, requires feature
    /// `camera-gstreamer`.
    Csi,
    /// In-process pattern generator. No hardware; used for tests and dry runs.
    Synthetic,
}

/// What a stop event does while recording.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StopPolicy {
    /// Stop ends the whole run.
    #[default]
    Terminate,
    /// Stop closes the session and returns to Idle, ready for another start.
    ReturnToIdle,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SamplingSettings {
    pub enabled: bool,
    pub target_fps: u32,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    cameras: Option<Vec<u32>>,
    kind: Option<CameraKind>,
    width: Option<u32>,
    height: Option<u32>,
    output_root: Option<PathBuf>,
    stop_policy: Option<StopPolicy>,
    max_consecutive_failures: Option<u32>,
    images: Option<SamplingFile>,
    video: Option<SamplingFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplingFile {
    enabled: Option<bool>,
    target_fps: Option<u32>,
}

/// Validated, immutable capture configuration. Built once (file + env + CLI
/// overrides), then handed to the engine; nothing mutates it afterwards.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Camera identifiers, fixed order. The cycle reads them in this order
    /// and all per-camera state is indexed by position in this list.
    pub cameras: Vec<u32>,
    pub kind: CameraKind,
    /// Requested capture size; also the uniform clean-frame size.
    pub width: u32,
    pub height: u32,
    pub images: SamplingSettings,
    pub video: SamplingSettings,
    pub output_root: PathBuf,
    pub stop_policy: StopPolicy,
    /// Consecutive read failures per camera before the run aborts.
    /// 0 disables escalation; the camera degrades to black frames for good.
    pub max_consecutive_failures: u32,
}

impl CaptureConfig {
    /// Load from an optional TOML file (argument, or `CAMRIG_CONFIG`), then
    /// apply `CAMRIG_*` env overrides. Call `validate` after any further
    /// CLI-level mutation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("CAMRIG_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.or(env_path.as_deref()) {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Self {
        let images = file.images.unwrap_or_default();
        let video = file.video.unwrap_or_default();
        Self {
            cameras: file.cameras.unwrap_or_else(|| vec![DEFAULT_CAMERA]),
            kind: file.kind.unwrap_or_default(),
            width: file.width.unwrap_or(DEFAULT_WIDTH),
            height: file.height.unwrap_or(DEFAULT_HEIGHT),
            images: SamplingSettings {
                enabled: images.enabled.unwrap_or(true),
                target_fps: images.target_fps.unwrap_or(DEFAULT_IMAGE_FPS),
            },
            video: SamplingSettings {
                enabled: video.enabled.unwrap_or(true),
                target_fps: video.target_fps.unwrap_or(DEFAULT_VIDEO_FPS),
            },
            output_root: file
                .output_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT)),
            stop_policy: file.stop_policy.unwrap_or_default(),
            max_consecutive_failures: file.max_consecutive_failures.unwrap_or(0),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(cameras) = std::env::var("CAMRIG_CAMERAS") {
            let parsed = parse_camera_list(&cameras)?;
            if !parsed.is_empty() {
                self.cameras = parsed;
            }
        }
        if let Ok(root) = std::env::var("CAMRIG_OUTPUT_ROOT") {
            if !root.trim().is_empty() {
                self.output_root = PathBuf::from(root);
            }
        }
        if let Ok(width) = std::env::var("CAMRIG_WIDTH") {
            self.width = width
                .parse()
                .map_err(|_| anyhow!("CAMRIG_WIDTH must be an integer pixel count"))?;
        }
        if let Ok(height) = std::env::var("CAMRIG_HEIGHT") {
            self.height = height
                .parse()
                .map_err(|_| anyhow!("CAMRIG_HEIGHT must be an integer pixel count"))?;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with. Fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut seen = self.cameras.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.cameras.len() {
            return Err(anyhow!("camera list contains duplicate identifiers"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("capture size must be non-zero"));
        }
        if !self.images.enabled && !self.video.enabled {
            return Err(anyhow!(
                "nothing to record: enable image sampling, video, or both"
            ));
        }
        if self.images.enabled && self.images.target_fps == 0 {
            return Err(anyhow!("image sampling is enabled with a zero target rate"));
        }
        if self.video.enabled && self.video.target_fps == 0 {
            return Err(anyhow!("video is enabled with a zero frame rate"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Parse a comma-separated camera id list, e.g. "0,2,4".
pub fn parse_camera_list(value: &str) -> Result<Vec<u32>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse()
                .map_err(|_| anyhow!("invalid camera id '{}'", entry))
        })
        .collect()
}
