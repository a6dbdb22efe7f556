use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::events::{Action, ConfirmKind, ConfirmPrompt, Screen, UiUpdate};
use crate::i18n::Translate;

/// Keep-or-discard review of a finished session.
pub struct PreviewStage {
    session: Option<PathBuf>,
    confirming_discard: bool,
    translator: Arc<dyn Translate>,
}

impl PreviewStage {
    pub fn new(translator: Arc<dyn Translate>) -> Self {
        Self {
            session: None,
            confirming_discard: false,
            translator,
        }
    }

    pub fn on_enter(&mut self, session: PathBuf) -> Vec<Action> {
        self.session = Some(session.clone());
        self.confirming_discard = false;
        vec![Action::ListImages(session)]
    }

    /// Directory listing requested by `on_enter`, in file-name order.
    pub fn on_images_listed(
        &mut self,
        session: &Path,
        result: io::Result<Vec<PathBuf>>,
    ) -> Vec<Action> {
        if self.session.as_deref() != Some(session) {
            debug!(session = %session.display(), "image list for inactive session dropped");
            return Vec::new();
        }
        let images = result.unwrap_or_else(|err| {
            warn!(session = %session.display(), error = %err, "failed to list session images");
            Vec::new()
        });
        vec![Action::Ui(UiUpdate::PreviewImages(images))]
    }

    pub fn request_discard(&mut self) -> Vec<Action> {
        if self.session.is_none() {
            return Vec::new();
        }
        self.confirming_discard = true;
        vec![Action::Ui(UiUpdate::Confirm(ConfirmPrompt {
            kind: ConfirmKind::DiscardSession,
            title: self.translator.translate("preview_dialog_title"),
            text: self.translator.translate("preview_dialog_text"),
            confirm: self.translator.translate("preview_dialog_confirm"),
            back: self.translator.translate("preview_dialog_back"),
        }))]
    }

    pub fn confirm(&mut self) -> Vec<Action> {
        if !self.confirming_discard {
            return Vec::new();
        }
        self.confirming_discard = false;
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        info!(session = %session.display(), "session discarded from preview");
        vec![
            Action::Ui(UiUpdate::DismissConfirm),
            Action::DiscardSession(session),
            Action::Navigate(Screen::Welcome),
        ]
    }

    pub fn cancel(&mut self) -> Vec<Action> {
        if !std::mem::take(&mut self.confirming_discard) {
            return Vec::new();
        }
        vec![Action::Ui(UiUpdate::DismissConfirm)]
    }

    pub fn keep(&mut self) -> Vec<Action> {
        if self.confirming_discard {
            return Vec::new();
        }
        match self.session.take() {
            Some(session) => vec![Action::Navigate(Screen::Share { session })],
            None => Vec::new(),
        }
    }
}
