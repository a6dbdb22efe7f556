use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageError, imageops};
use tracing::{debug, error, info};

use crate::camera::SharedCamera;
use crate::config::Configuration;
use crate::error::CaptureError;
use crate::events::{Action, ConfirmKind, ConfirmPrompt, LabelTarget, Screen, Timer, UiUpdate};
use crate::i18n::Translate;
use crate::processing::overlay::OverlayCompositor;
use crate::session::CaptureSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Starting,
    Countdown { remaining: u32 },
    Capturing,
    Finishing,
}

#[derive(Debug, Clone)]
pub struct SequencerSettings {
    pub target_count: u32,
    pub file_prefix: String,
    pub start_delay: Duration,
    pub first_countdown: u32,
    pub next_countdown: u32,
    pub countdown_tick: Duration,
    pub pause_between_shots: Duration,
    pub completion_dwell: Duration,
    pub inactivity_timeout: Duration,
    pub preview_enabled: bool,
    pub overlay: Option<PathBuf>,
}

impl SequencerSettings {
    pub fn from_config(cfg: &Configuration) -> Self {
        Self {
            target_count: cfg.images.max_image_count,
            file_prefix: cfg.images.file_prefix.clone(),
            start_delay: cfg.sequence.start_delay,
            first_countdown: cfg.sequence.first_countdown,
            next_countdown: cfg.sequence.next_countdown,
            countdown_tick: cfg.sequence.countdown_tick,
            pause_between_shots: cfg.sequence.pause_between_shots,
            completion_dwell: cfg.sequence.completion_dwell,
            inactivity_timeout: cfg.sequence.inactivity_timeout,
            preview_enabled: cfg.images.preview_enabled,
            overlay: cfg.images.final_overlay.clone(),
        }
    }
}

/// Live-view stage: countdown, capture and hand-off of one session.
///
/// Pure state machine; side effects come back as [`Action`]s for the kiosk
/// loop to execute.
pub struct CaptureSequencer {
    state: SequencerState,
    settings: SequencerSettings,
    session: Option<CaptureSession>,
    idle_since: Instant,
    confirming_abort: bool,
    translator: Arc<dyn Translate>,
}

impl CaptureSequencer {
    pub fn new(
        settings: SequencerSettings,
        translator: Arc<dyn Translate>,
        now: Instant,
    ) -> Self {
        Self {
            state: SequencerState::Idle,
            settings,
            session: None,
            idle_since: now,
            confirming_abort: false,
            translator,
        }
    }

    pub fn current(&self) -> SequencerState {
        self.state
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    pub fn on_enter(&mut self, now: Instant) -> Vec<Action> {
        self.state = SequencerState::Idle;
        self.session = None;
        self.confirming_abort = false;
        self.idle_since = now;
        vec![
            Action::Ui(UiUpdate::label(LabelTarget::Countdown, "")),
            Action::Ui(UiUpdate::label(LabelTarget::Progress, "")),
            Action::Ui(UiUpdate::label(LabelTarget::Status, "")),
            Action::Ui(UiUpdate::CaptureButton { visible: true }),
            Action::Schedule {
                after: self.settings.inactivity_timeout,
                timer: Timer::InactivityCheck,
            },
        ]
    }

    /// Request a session directory. Only valid while idle; the countdown
    /// starts once [`Self::on_session_allocated`] reports the directory.
    pub fn start_sequence(&mut self) -> Result<Vec<Action>, CaptureError> {
        if self.state != SequencerState::Idle {
            return Err(CaptureError::SequenceActive);
        }
        self.state = SequencerState::Starting;
        debug!("allocating session directory");
        Ok(vec![
            Action::Ui(UiUpdate::CaptureButton { visible: false }),
            Action::AllocateSession {
                target_count: self.settings.target_count,
                overlay: self.settings.overlay.clone(),
            },
        ])
    }

    pub fn on_session_allocated(
        &mut self,
        result: Result<CaptureSession, CaptureError>,
    ) -> Vec<Action> {
        if self.state != SequencerState::Starting || self.session.is_some() {
            // Aborted while the directory was being created.
            return match result {
                Ok(orphan) => {
                    debug!(session = %orphan.directory.display(), "discarding session allocated after abort");
                    vec![Action::DiscardSession(orphan.directory)]
                }
                Err(_) => Vec::new(),
            };
        }
        let session = match result {
            Ok(session) => session,
            Err(err) => return self.fail(err),
        };
        info!(session = %session.directory.display(), target = session.target_count, "capture sequence started");
        self.session = Some(session);
        vec![
            Action::Ui(UiUpdate::label(LabelTarget::Progress, self.progress_text(0))),
            Action::Schedule {
                after: self.settings.start_delay,
                timer: Timer::BeginCountdown,
            },
        ]
    }

    pub fn on_timer(&mut self, timer: Timer, now: Instant) -> Vec<Action> {
        match timer {
            Timer::BeginCountdown => self.begin_countdown(),
            Timer::CountdownTick => self.tick(),
            Timer::FinishDwellElapsed => self.finish(),
            Timer::InactivityCheck => self.check_inactivity(now),
            Timer::PreviewRefresh | Timer::ReturnHome => Vec::new(),
        }
    }

    fn begin_countdown(&mut self) -> Vec<Action> {
        let remaining = match self.state {
            SequencerState::Starting => self.settings.first_countdown,
            SequencerState::Countdown { remaining } => remaining,
            _ => return Vec::new(),
        };
        self.state = SequencerState::Countdown { remaining };
        vec![
            Action::Ui(UiUpdate::label(LabelTarget::Countdown, remaining.to_string())),
            Action::Schedule {
                after: self.settings.countdown_tick,
                timer: Timer::CountdownTick,
            },
        ]
    }

    fn tick(&mut self) -> Vec<Action> {
        let SequencerState::Countdown { remaining } = self.state else {
            return Vec::new();
        };
        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.state = SequencerState::Countdown { remaining };
            debug!(remaining, "countdown");
            return vec![
                Action::Ui(UiUpdate::label(LabelTarget::Countdown, remaining.to_string())),
                Action::Schedule {
                    after: self.settings.countdown_tick,
                    timer: Timer::CountdownTick,
                },
            ];
        }

        let Some(session) = &self.session else {
            return Vec::new();
        };
        self.state = SequencerState::Capturing;
        let file_name = format!(
            "{}-{}_{}.jpg",
            self.settings.file_prefix,
            Local::now().format("%Y-%m-%d_%H-%M-%S"),
            session.captured_count + 1
        );
        vec![
            Action::Ui(UiUpdate::label(
                LabelTarget::Countdown,
                self.translator.translate("countdown_smile"),
            )),
            Action::CaptureFrame {
                session: session.directory.clone(),
                file_name,
            },
        ]
    }

    /// Result of the capture requested by the last `CaptureFrame` action.
    pub fn on_frame_saved(
        &mut self,
        session_dir: &Path,
        result: Result<PathBuf, CaptureError>,
    ) -> Vec<Action> {
        if self.state != SequencerState::Capturing
            || self.session.as_ref().map(|s| s.directory.as_path()) != Some(session_dir)
        {
            debug!(session = %session_dir.display(), "ignoring frame for inactive session");
            return Vec::new();
        }
        let saved = match result {
            Ok(path) => path,
            Err(err) => return self.fail(err),
        };
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let complete = session.record_capture();
        let captured = session.captured_count;
        info!(file = %saved.display(), captured, target = session.target_count, "frame saved");

        let mut actions = vec![Action::Ui(UiUpdate::label(
            LabelTarget::Progress,
            self.progress_text(captured),
        ))];
        if complete {
            self.state = SequencerState::Finishing;
            actions.push(Action::Ui(UiUpdate::label(
                LabelTarget::Countdown,
                self.translator.translate("capture_complete"),
            )));
            actions.push(Action::Schedule {
                after: self.settings.completion_dwell,
                timer: Timer::FinishDwellElapsed,
            });
        } else {
            self.state = SequencerState::Countdown {
                remaining: self.settings.next_countdown,
            };
            actions.push(Action::Ui(UiUpdate::label(LabelTarget::Countdown, "")));
            actions.push(Action::Schedule {
                after: self.settings.pause_between_shots,
                timer: Timer::BeginCountdown,
            });
        }
        actions
    }

    fn finish(&mut self) -> Vec<Action> {
        if self.state != SequencerState::Finishing {
            return Vec::new();
        }
        self.state = SequencerState::Idle;
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        info!(session = %session.directory.display(), "capture sequence complete");
        let mut actions = Vec::new();
        if std::mem::take(&mut self.confirming_abort) {
            actions.push(Action::Ui(UiUpdate::DismissConfirm));
        }
        let next = if self.settings.preview_enabled {
            Screen::Preview {
                session: session.directory,
            }
        } else {
            Screen::Share {
                session: session.directory,
            }
        };
        actions.push(Action::Navigate(next));
        actions
    }

    fn check_inactivity(&mut self, now: Instant) -> Vec<Action> {
        if self.state != SequencerState::Idle || self.confirming_abort {
            return Vec::new();
        }
        let idle = now.saturating_duration_since(self.idle_since);
        if idle >= self.settings.inactivity_timeout {
            info!(idle = ?idle, "live view inactive, returning to welcome");
            return vec![Action::Navigate(Screen::Welcome)];
        }
        vec![Action::Schedule {
            after: self.settings.inactivity_timeout - idle,
            timer: Timer::InactivityCheck,
        }]
    }

    /// Abort the session after a camera or storage failure.
    pub fn fail(&mut self, err: CaptureError) -> Vec<Action> {
        error!(error = %err, "capture sequence aborted");
        self.state = SequencerState::Idle;
        self.session = None;
        self.confirming_abort = false;
        vec![
            Action::Ui(UiUpdate::Error(self.translator.translate(err.message_key()))),
            Action::Navigate(Screen::Welcome),
        ]
    }

    pub fn request_abort(&mut self) -> Vec<Action> {
        if self.state == SequencerState::Idle {
            return vec![Action::Navigate(Screen::Welcome)];
        }
        self.confirming_abort = true;
        vec![Action::Ui(UiUpdate::Confirm(ConfirmPrompt {
            kind: ConfirmKind::AbortCapture,
            title: self.translator.translate("abort_dialog_title"),
            text: self.translator.translate("abort_dialog_text"),
            confirm: self.translator.translate("abort_dialog_confirm"),
            back: self.translator.translate("abort_dialog_back"),
        }))]
    }

    pub fn confirm(&mut self) -> Vec<Action> {
        if !self.confirming_abort {
            return Vec::new();
        }
        self.confirming_abort = false;
        self.state = SequencerState::Idle;
        let mut actions = vec![Action::CancelTimers, Action::Ui(UiUpdate::DismissConfirm)];
        if let Some(session) = self.session.take() {
            info!(session = %session.directory.display(), captured = session.captured_count, "capture aborted by user");
            actions.push(Action::DiscardSession(session.directory));
        }
        actions.push(Action::Navigate(Screen::Welcome));
        actions
    }

    pub fn cancel(&mut self) -> Vec<Action> {
        if !self.confirming_abort {
            return Vec::new();
        }
        self.confirming_abort = false;
        vec![Action::Ui(UiUpdate::DismissConfirm)]
    }

    fn progress_text(&self, captured: u32) -> String {
        self.translator.translate_with(
            "capture_progress",
            &[
                ("current", captured.to_string().as_str()),
                ("total", self.settings.target_count.to_string().as_str()),
            ],
        )
    }
}

/// Take one still, correct the sensor orientation, apply the overlay and
/// write it as JPEG. Runs on the blocking pool.
pub fn capture_and_save(
    camera: &SharedCamera,
    overlay: &OverlayCompositor,
    session_dir: &Path,
    file_name: &str,
    quality: u8,
) -> Result<PathBuf, CaptureError> {
    let frame = camera.capture_still().map_err(CaptureError::Camera)?;
    let frame = imageops::flip_vertical(&frame);
    let frame = overlay.apply(frame);
    let rgb = DynamicImage::ImageRgba8(frame).to_rgb8();

    let path = session_dir.join(file_name);
    let file = File::create(&path).map_err(|e| CaptureError::from_io("write", &path, e))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality)
        .encode_image(&rgb)
        .map_err(|e| CaptureError::from_io("encode", &path, image_io_error(e)))?;
    writer
        .flush()
        .map_err(|e| CaptureError::from_io("write", &path, e))?;
    Ok(path)
}

fn image_io_error(err: ImageError) -> io::Error {
    match err {
        ImageError::IoError(io) => io,
        other => io::Error::other(other),
    }
}
