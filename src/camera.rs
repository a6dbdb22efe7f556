use std::fmt;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow, bail};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{CameraConfig, CameraDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    Preview,
    Still,
}

/// Minimal camera capability: one mode at a time, one frame per call.
pub trait Camera: Send {
    fn configure(&mut self, mode: CameraMode) -> Result<()>;
    fn capture_frame(&mut self) -> Result<RgbaImage>;
}

/// The kiosk's single camera, shared between the preview refresh and still
/// captures. Every access goes through one lock.
#[derive(Clone)]
pub struct SharedCamera {
    inner: Arc<Mutex<Box<dyn Camera>>>,
}

impl fmt::Debug for SharedCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCamera")
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

impl SharedCamera {
    pub fn new(camera: impl Camera + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(camera))),
        }
    }

    /// Switch to still mode, grab one frame and switch back, all under one
    /// lock acquisition. The camera is returned to preview mode even when the
    /// capture fails.
    pub fn capture_still(&self) -> Result<RgbaImage> {
        let mut camera = self.inner.lock();
        let frame = camera
            .configure(CameraMode::Still)
            .context("failed to switch camera to still mode")
            .and_then(|()| camera.capture_frame().context("still capture failed"));
        let restored = camera.configure(CameraMode::Preview);
        drop(camera);

        if let Err(err) = restored {
            warn!(error = %format!("{err:#}"), "failed to restore preview mode");
        }
        frame
    }

    /// Read a single preview frame.
    pub fn preview_frame(&self) -> Result<RgbaImage> {
        self.inner.lock().capture_frame()
    }
}

pub fn build_camera(cfg: &CameraConfig) -> SharedCamera {
    match cfg.driver {
        CameraDriver::Pattern => {
            debug!("using synthetic pattern camera");
            SharedCamera::new(PatternCamera::new(cfg.preview_size, cfg.still_size))
        }
        CameraDriver::Command => {
            debug!(still = %cfg.still_command, "using command camera");
            SharedCamera::new(CommandCamera::new(
                cfg.preview_command.clone(),
                cfg.still_command.clone(),
            ))
        }
    }
}

/// Synthetic camera producing a gradient that shifts per frame.
#[derive(Debug, Clone)]
pub struct PatternCamera {
    mode: CameraMode,
    preview_size: [u32; 2],
    still_size: [u32; 2],
    frame_index: u32,
    modes: Arc<Mutex<Vec<CameraMode>>>,
    fail_stills: Arc<AtomicBool>,
}

impl PatternCamera {
    pub fn new(preview_size: [u32; 2], still_size: [u32; 2]) -> Self {
        Self {
            mode: CameraMode::Preview,
            preview_size,
            still_size,
            frame_index: 0,
            modes: Arc::new(Mutex::new(Vec::new())),
            fail_stills: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every mode change applied so far, in order.
    pub fn mode_log(&self) -> Arc<Mutex<Vec<CameraMode>>> {
        Arc::clone(&self.modes)
    }

    /// While set, still captures fail as if the sensor stopped responding.
    pub fn still_failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_stills)
    }
}

impl Camera for PatternCamera {
    fn configure(&mut self, mode: CameraMode) -> Result<()> {
        self.mode = mode;
        self.modes.lock().push(mode);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RgbaImage> {
        if self.mode == CameraMode::Still && self.fail_stills.load(Ordering::SeqCst) {
            bail!("pattern camera: simulated still failure");
        }
        let [w, h] = match self.mode {
            CameraMode::Preview => self.preview_size,
            CameraMode::Still => self.still_size,
        };
        let (w, h) = (w.max(1), h.max(1));
        // Reduce first; the frame counter wraps and must never overflow here.
        let shift = self.frame_index % w;
        self.frame_index = self.frame_index.wrapping_add(7);
        Ok(RgbaImage::from_fn(w, h, |x, y| {
            let r = ((x + shift) % w * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            Rgba([r, g, 160, 255])
        }))
    }
}

type CommandRunner = Arc<dyn Fn(&str) -> Result<Vec<u8>> + Send + Sync>;

/// Camera backed by shell commands that print one encoded image on stdout,
/// e.g. `rpicam-still -e jpg -o -`.
pub struct CommandCamera {
    mode: CameraMode,
    preview_command: String,
    still_command: String,
    runner: CommandRunner,
}

impl fmt::Debug for CommandCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandCamera")
            .field("mode", &self.mode)
            .field("preview_command", &self.preview_command)
            .field("still_command", &self.still_command)
            .finish()
    }
}

impl CommandCamera {
    pub fn new(preview_command: String, still_command: String) -> Self {
        Self::with_runner(preview_command, still_command, Arc::new(|c| run_shell(c)))
    }

    fn with_runner(preview_command: String, still_command: String, runner: CommandRunner) -> Self {
        Self {
            mode: CameraMode::Preview,
            preview_command,
            still_command,
            runner,
        }
    }
}

impl Camera for CommandCamera {
    fn configure(&mut self, mode: CameraMode) -> Result<()> {
        self.mode = mode;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RgbaImage> {
        let command = match self.mode {
            CameraMode::Preview => &self.preview_command,
            CameraMode::Still => &self.still_command,
        };
        let bytes = (self.runner)(command)?;
        let decoded = image::load_from_memory(&bytes)
            .with_context(|| format!("failed to decode output of `{command}`"))?;
        Ok(decoded.to_rgba8())
    }
}

fn run_shell(command: &str) -> Result<Vec<u8>> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .with_context(|| format!("failed to spawn shell for command: {command}"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "`{command}` exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn still_capture_switches_mode_and_back() {
        let pattern = PatternCamera::new([8, 6], [40, 30]);
        let log = pattern.mode_log();
        let camera = SharedCamera::new(pattern);

        let still = camera.capture_still().expect("still");
        assert_eq!(still.dimensions(), (40, 30));
        assert_eq!(*log.lock(), vec![CameraMode::Still, CameraMode::Preview]);

        let preview = camera.preview_frame().expect("preview");
        assert_eq!(preview.dimensions(), (8, 6));
    }

    #[test]
    fn preview_mode_is_restored_after_failed_capture() {
        let pattern = PatternCamera::new([8, 6], [40, 30]);
        let log = pattern.mode_log();
        pattern.still_failure_switch().store(true, Ordering::SeqCst);
        let camera = SharedCamera::new(pattern);

        assert!(camera.capture_still().is_err());
        assert_eq!(log.lock().last(), Some(&CameraMode::Preview));
        assert_eq!(camera.preview_frame().expect("preview").dimensions(), (8, 6));
    }

    #[test]
    fn pattern_survives_long_uptime() {
        let mut fresh = PatternCamera::new([40, 30], [40, 30]);
        let first = fresh.capture_frame().expect("frame");

        let mut pattern = PatternCamera::new([40, 30], [40, 30]);
        // 16_843_000 is a multiple of the width, so the gradient lines up.
        pattern.frame_index = 16_843_000;
        assert_eq!(pattern.capture_frame().expect("frame"), first);

        pattern.frame_index = u32::MAX - 3;
        pattern.capture_frame().expect("frame before wrap");
        pattern.capture_frame().expect("frame after wrap");
        assert_eq!(pattern.frame_index, 10);
    }

    struct OverlapProbe {
        active: Arc<AtomicUsize>,
        overlaps: Arc<AtomicUsize>,
    }

    impl OverlapProbe {
        fn enter(&self) {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn exit(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Camera for OverlapProbe {
        fn configure(&mut self, _mode: CameraMode) -> Result<()> {
            self.enter();
            thread::sleep(Duration::from_millis(2));
            self.exit();
            Ok(())
        }

        fn capture_frame(&mut self) -> Result<RgbaImage> {
            self.enter();
            thread::sleep(Duration::from_millis(2));
            self.exit();
            Ok(RgbaImage::new(2, 2))
        }
    }

    #[test]
    fn preview_reads_never_interleave_with_still_capture() {
        let overlaps = Arc::new(AtomicUsize::new(0));
        let camera = SharedCamera::new(OverlapProbe {
            active: Arc::new(AtomicUsize::new(0)),
            overlaps: Arc::clone(&overlaps),
        });

        let preview = {
            let camera = camera.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    camera.preview_frame().expect("preview");
                }
            })
        };
        for _ in 0..5 {
            camera.capture_still().expect("still");
        }
        preview.join().expect("join");

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn command_camera_decodes_stdout_per_mode() {
        let mut png = Vec::new();
        RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]))
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .expect("encode");
        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let recorded = Arc::clone(&calls);
        let runner: CommandRunner = Arc::new(move |command| {
            recorded.lock().push(command.to_string());
            Ok(png.clone())
        });
        let camera = SharedCamera::new(CommandCamera::with_runner(
            "preview-cmd".into(),
            "still-cmd".into(),
            runner,
        ));

        assert_eq!(camera.capture_still().expect("still").dimensions(), (3, 2));
        camera.preview_frame().expect("preview");
        assert_eq!(*calls.lock(), vec!["still-cmd", "preview-cmd"]);
    }

    #[test]
    fn command_camera_reports_garbage_output() {
        let runner: CommandRunner = Arc::new(|_| Ok(b"not an image".to_vec()));
        let mut camera = CommandCamera::with_runner("p".into(), "s".into(), runner);
        let err = camera.capture_frame().unwrap_err();
        assert!(format!("{err:#}").contains("failed to decode output of `p`"));
    }
}
