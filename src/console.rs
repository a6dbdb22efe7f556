//! Line-oriented stand-in for the touchscreen front end.
//!
//! Each input line maps to one [`Intent`]; each [`UiUpdate`] is printed as a
//! single line. Preview frames are not rendered.

use crate::events::{Intent, LabelTarget, Screen, Tone, UiUpdate};

pub const HELP: &str = "commands: begin | start | abort | discard | keep | send <email> | finish | yes | no";

pub fn parse_intent(line: &str) -> Option<Intent> {
    let line = line.trim();
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((line, ""));
    let intent = match command.to_ascii_lowercase().as_str() {
        "begin" | "touch" => Intent::Begin,
        "start" | "capture" => Intent::StartSequence,
        "abort" => Intent::Abort,
        "discard" => Intent::Discard,
        "keep" => Intent::Keep,
        "send" => Intent::Send {
            recipient: rest.to_string(),
        },
        "finish" | "done" => Intent::Finish,
        "yes" | "y" | "confirm" => Intent::Confirm,
        "no" | "n" | "back" | "cancel" => Intent::Cancel,
        _ => return None,
    };
    Some(intent)
}

pub fn render(update: &UiUpdate) -> Option<String> {
    let line = match update {
        UiUpdate::Screen(screen) => match screen {
            Screen::Preview { session } | Screen::Share { session } => {
                format!("== {} ({})", screen.name(), session.display())
            }
            _ => format!("== {}", screen.name()),
        },
        UiUpdate::Welcome { message } => message.clone(),
        UiUpdate::Label { text, .. } if text.is_empty() => return None,
        UiUpdate::Label { target, text, tone } => {
            let target = match target {
                LabelTarget::Countdown => "countdown",
                LabelTarget::Progress => "progress",
                LabelTarget::Status => "status",
            };
            match tone {
                Tone::Normal => format!("[{target}] {text}"),
                Tone::Error => format!("[{target}] !! {text}"),
            }
        }
        UiUpdate::CaptureButton { visible: true } => "(type `start` to capture)".to_string(),
        UiUpdate::CaptureButton { visible: false } => return None,
        UiUpdate::Busy { .. } | UiUpdate::PreviewFrame(_) => return None,
        UiUpdate::PreviewImages(images) => {
            let mut out = format!("{} image(s):", images.len());
            for image in images {
                out.push_str("\n  ");
                out.push_str(&image.display().to_string());
            }
            out.push_str("\n(type `keep` or `discard`)");
            out
        }
        UiUpdate::EmailAvailable(true) => "(type `send <email>` to receive the photos)".to_string(),
        UiUpdate::CloudAvailable(false) | UiUpdate::EmailAvailable(false) => return None,
        UiUpdate::CloudAvailable(true) => "cloud sharing available".to_string(),
        UiUpdate::CloudLink { url, qr_code } => match qr_code {
            Some(path) => format!("share link: {url} (QR code: {})", path.display()),
            None => format!("share link: {url}"),
        },
        UiUpdate::Confirm(prompt) => format!(
            "{}: {} [yes = {}, no = {}]",
            prompt.title, prompt.text, prompt.confirm, prompt.back
        ),
        UiUpdate::DismissConfirm => return None,
        UiUpdate::Error(message) => format!("!! {message}"),
    };
    Some(line)
}
