//! camrig - synchronized multi-camera recorder
//!
//! Headless driver around the capture engine:
//! 1. Builds the configuration (file, CAMRIG_* env, CLI flags).
//! 2. Opens every configured camera.
//! 3. Runs the capture loop, polling stdin and Ctrl-C between cycles.
//! 4. Shuts the engine down on every exit path and prints what was saved.
//!
//! Controls: Enter toggles recording, `q` + Enter or Ctrl-C quits.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use camrig::{
    config, CameraKind, CaptureConfig, CaptureEngine, ControlSignal, InputEvent, SessionSummary,
    StopPolicy,
};

/// Poll interval between cycles when no input is pending.
const INPUT_POLL: Duration = Duration::from_millis(33);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "CAMRIG_CONFIG")]
    config: Option<PathBuf>,
    /// Comma-separated camera ids, e.g. "0,2".
    #[arg(long)]
    cameras: Option<String>,
    /// Camera backend (usb|csi|synthetic).
    #[arg(long)]
    kind: Option<String>,
    /// Requested capture width in pixels.
    #[arg(long)]
    width: Option<u32>,
    /// Requested capture height in pixels.
    #[arg(long)]
    height: Option<u32>,
    /// Root directory for session output trees.
    #[arg(long)]
    output_root: Option<PathBuf>,
    /// Disable JPEG image sampling.
    #[arg(long)]
    no_images: bool,
    /// Disable video recording.
    #[arg(long)]
    no_video: bool,
    /// Target image sampling rate in frames per second.
    #[arg(long)]
    images_fps: Option<u32>,
    /// Nominal video frame rate in frames per second.
    #[arg(long)]
    video_fps: Option<u32>,
    /// What stop does while recording (terminate|return-to-idle).
    #[arg(long)]
    stop_policy: Option<String>,
    /// Abort after this many consecutive read failures on one camera
    /// (0 = never, degrade to black frames).
    #[arg(long)]
    max_consecutive_failures: Option<u32>,
}

enum Key {
    Enter,
    Quit,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = build_config(&args)?;

    log::info!(
        "opening {} camera(s) at {}x{}",
        cfg.cameras.len(),
        cfg.width,
        cfg.height
    );
    let mut engine = CaptureEngine::open(cfg)?;

    let keys = spawn_input_channel()?;
    eprintln!("camrig ready: Enter toggles recording, q or Ctrl-C quits");

    let result = run_loop(&mut engine, &keys);
    // Shutdown runs on the error path too; handles are released exactly once.
    // The exit summary prints on every path, even when teardown itself fails.
    let (summaries, shutdown_err) = match engine.shutdown() {
        Ok(summaries) => (summaries, None),
        Err(e) => (engine.take_summaries(), Some(e)),
    };
    print_summaries(&summaries);

    result?;
    match shutdown_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn run_loop(engine: &mut CaptureEngine, keys: &mpsc::Receiver<Key>) -> Result<()> {
    let mut logged_preview = false;
    loop {
        let event = match keys.recv_timeout(INPUT_POLL) {
            Ok(Key::Enter) => {
                if engine.is_recording() {
                    InputEvent::Stop
                } else {
                    InputEvent::Start
                }
            }
            Ok(Key::Quit) => InputEvent::Quit,
            Err(mpsc::RecvTimeoutError::Timeout) => InputEvent::Tick,
            // Both input sources hung up; nothing can stop us later.
            Err(mpsc::RecvTimeoutError::Disconnected) => InputEvent::Quit,
        };

        let out = engine.step(event).context("capture cycle failed")?;
        if out.signal == ControlSignal::Shutdown {
            return Ok(());
        }
        if !logged_preview {
            if let Some(preview) = &out.preview {
                log::info!("preview surface is {}x{}", preview.width, preview.height);
                logged_preview = true;
            }
        }
    }
}

/// Stdin lines and Ctrl-C, merged into one channel so the capture loop has a
/// single blocking point.
fn spawn_input_channel() -> Result<mpsc::Receiver<Key>> {
    let (tx, rx) = mpsc::channel();

    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Key::Quit);
    })
    .context("install Ctrl-C handler")?;

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let key = match line.trim() {
                "q" | "quit" => Key::Quit,
                _ => Key::Enter,
            };
            if tx.send(key).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

fn build_config(args: &Args) -> Result<CaptureConfig> {
    let mut cfg = CaptureConfig::load(args.config.as_deref())?;

    if let Some(cameras) = &args.cameras {
        cfg.cameras = config::parse_camera_list(cameras)?;
    }
    if let Some(kind) = &args.kind {
        cfg.kind = match kind.as_str() {
            "usb" => CameraKind::Usb,
            "csi" => CameraKind::Csi,
            "synthetic" => CameraKind::Synthetic,
            other => return Err(anyhow!("unknown camera kind '{}'", other)),
        };
    }
    if let Some(width) = args.width {
        cfg.width = width;
    }
    if let Some(height) = args.height {
        cfg.height = height;
    }
    if let Some(root) = &args.output_root {
        cfg.output_root = root.clone();
    }
    if args.no_images {
        cfg.images.enabled = false;
    }
    if args.no_video {
        cfg.video.enabled = false;
    }
    if let Some(fps) = args.images_fps {
        cfg.images.target_fps = fps;
    }
    if let Some(fps) = args.video_fps {
        cfg.video.target_fps = fps;
    }
    if let Some(policy) = &args.stop_policy {
        cfg.stop_policy = match policy.as_str() {
            "terminate" => StopPolicy::Terminate,
            "return-to-idle" => StopPolicy::ReturnToIdle,
            other => return Err(anyhow!("unknown stop policy '{}'", other)),
        };
    }
    if let Some(n) = args.max_consecutive_failures {
        cfg.max_consecutive_failures = n;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn print_summaries(summaries: &[SessionSummary]) {
    if summaries.is_empty() {
        eprintln!("no sessions recorded");
        return;
    }
    for summary in summaries {
        eprintln!("session {}:", summary.root.display());
        for cam in &summary.cameras {
            let video = match (&cam.video_path, cam.video_frames_written) {
                (Some(path), Some(frames)) => {
                    format!("{} ({} frames)", path.display(), frames)
                }
                _ => "no video".to_string(),
            };
            eprintln!(
                "  camera {}: {} image(s), {}",
                cam.camera_id, cam.images_saved, video
            );
        }
    }
}
