use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use crate::delivery::CloudShareResult;
use crate::delivery::log::AttemptRecord;
use crate::error::{CaptureError, DeliveryError};
use crate::session::CaptureSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Welcome,
    LiveView,
    Preview { session: PathBuf },
    Share { session: PathBuf },
}

impl Screen {
    pub fn name(&self) -> &'static str {
        match self {
            Screen::Welcome => "welcome",
            Screen::LiveView => "live-view",
            Screen::Preview { .. } => "preview",
            Screen::Share { .. } => "share",
        }
    }
}

/// User input forwarded by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Begin,
    StartSequence,
    Abort,
    Discard,
    Keep,
    Send { recipient: String },
    Finish,
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelTarget {
    Countdown,
    Progress,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Normal,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmKind {
    AbortCapture,
    DiscardSession,
    FinishSharing,
}

/// A two-step confirmation shown in place of a modal dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub kind: ConfirmKind,
    pub title: String,
    pub text: String,
    pub confirm: String,
    pub back: String,
}

/// Observable state the front end renders.
#[derive(Debug, Clone)]
pub enum UiUpdate {
    Screen(Screen),
    Welcome { message: String },
    Label {
        target: LabelTarget,
        text: String,
        tone: Tone,
    },
    CaptureButton { visible: bool },
    Busy { sending: bool, input_enabled: bool },
    PreviewFrame(Arc<RgbaImage>),
    PreviewImages(Vec<PathBuf>),
    EmailAvailable(bool),
    CloudAvailable(bool),
    CloudLink { url: String, qr_code: Option<PathBuf> },
    Confirm(ConfirmPrompt),
    DismissConfirm,
    Error(String),
}

impl UiUpdate {
    pub fn label(target: LabelTarget, text: impl Into<String>) -> Self {
        UiUpdate::Label {
            target,
            text: text.into(),
            tone: Tone::Normal,
        }
    }

    pub fn error_label(target: LabelTarget, text: impl Into<String>) -> Self {
        UiUpdate::Label {
            target,
            text: text.into(),
            tone: Tone::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    BeginCountdown,
    CountdownTick,
    FinishDwellElapsed,
    InactivityCheck,
    PreviewRefresh,
    ReturnHome,
}

/// Side effects requested by a stage; executed by the kiosk loop.
#[derive(Debug)]
pub enum Action {
    Ui(UiUpdate),
    Schedule { after: Duration, timer: Timer },
    /// Drop every timer registered so far without leaving the screen.
    CancelTimers,
    /// Change screens; timers of the old screen are cancelled first.
    Navigate(Screen),
    /// Create the directory for a new session off the loop.
    AllocateSession { target_count: u32, overlay: Option<PathBuf> },
    ListImages(PathBuf),
    CaptureFrame { session: PathBuf, file_name: String },
    DiscardSession(PathBuf),
    StartCloudUpload(PathBuf),
    StartEmailSend { session: PathBuf, recipient: String },
    LogAttempt { session: PathBuf, record: AttemptRecord },
}

/// Everything that wakes the kiosk loop besides user intents.
#[derive(Debug)]
pub enum LoopEvent {
    Timer { epoch: u64, timer: Timer },
    SessionAllocated(Result<CaptureSession, CaptureError>),
    ImagesListed {
        session: PathBuf,
        result: std::io::Result<Vec<PathBuf>>,
    },
    FrameSaved {
        session: PathBuf,
        result: Result<PathBuf, CaptureError>,
    },
    PreviewFrame(anyhow::Result<RgbaImage>),
    CloudResult {
        session: PathBuf,
        result: Result<Option<CloudShareResult>, DeliveryError>,
    },
    EmailResult {
        session: PathBuf,
        recipient: String,
        result: Result<(), DeliveryError>,
    },
}
