use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::delivery::email::validate_recipient;
use crate::delivery::log::AttemptRecord;
use crate::delivery::{BackendKind, CloudShareResult};
use crate::error::{DeliveryError, ErrorClass};
use crate::events::{Action, ConfirmKind, ConfirmPrompt, LabelTarget, Screen, Timer, UiUpdate};
use crate::i18n::Translate;

#[derive(Debug, Clone)]
pub struct ShareSettings {
    pub email_enabled: bool,
    pub cloud_enabled: bool,
    pub max_attempts: u32,
    pub success_dwell: Duration,
    pub escalation_cooldown: Duration,
    pub sharing_disabled_dwell: Duration,
    pub admin_email: String,
}

impl ShareSettings {
    pub fn new(cfg: &Configuration, email_enabled: bool, cloud_enabled: bool) -> Self {
        Self {
            email_enabled,
            cloud_enabled,
            max_attempts: cfg.delivery.max_attempts,
            success_dwell: cfg.delivery.success_dwell,
            escalation_cooldown: cfg.delivery.escalation_cooldown,
            sharing_disabled_dwell: cfg.delivery.sharing_disabled_dwell,
            admin_email: cfg.email.admin_email.clone(),
        }
    }
}

/// How the share stage ended for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Delivered,
    /// Attempt budget spent; the admin contact was shown.
    Escalated,
    /// No backend left for this session.
    Unavailable,
}

/// Share stage: automatic cloud upload on entry, email with a bounded
/// attempt budget, escalation once the budget is spent.
pub struct DeliveryOrchestrator {
    settings: ShareSettings,
    session: Option<PathBuf>,
    attempts: u32,
    is_sending: bool,
    input_enabled: bool,
    email_available: bool,
    cloud_available: bool,
    cloud_link: Option<CloudShareResult>,
    outcome: Option<ShareOutcome>,
    confirming_finish: bool,
    translator: Arc<dyn Translate>,
}

impl DeliveryOrchestrator {
    pub fn new(settings: ShareSettings, translator: Arc<dyn Translate>) -> Self {
        Self {
            settings,
            session: None,
            attempts: 0,
            is_sending: false,
            input_enabled: false,
            email_available: false,
            cloud_available: false,
            cloud_link: None,
            outcome: None,
            confirming_finish: false,
            translator,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_sending(&self) -> bool {
        self.is_sending
    }

    pub fn outcome(&self) -> Option<ShareOutcome> {
        self.outcome
    }

    pub fn cloud_link(&self) -> Option<&CloudShareResult> {
        self.cloud_link.as_ref()
    }

    pub fn on_enter(&mut self, session: PathBuf) -> Vec<Action> {
        self.attempts = 0;
        self.is_sending = false;
        self.outcome = None;
        self.cloud_link = None;
        self.confirming_finish = false;
        self.email_available = self.settings.email_enabled;
        self.cloud_available = self.settings.cloud_enabled;
        self.input_enabled = self.email_available;
        info!(
            session = %session.display(),
            email = self.email_available,
            cloud = self.cloud_available,
            "share stage entered"
        );
        self.session = Some(session.clone());

        let mut actions = vec![
            Action::Ui(UiUpdate::EmailAvailable(self.email_available)),
            Action::Ui(UiUpdate::CloudAvailable(self.cloud_available)),
        ];
        if self.cloud_available {
            self.is_sending = true;
            self.input_enabled = false;
            actions.push(self.busy());
            actions.push(Action::Ui(UiUpdate::label(
                LabelTarget::Status,
                self.translator.translate("share_cloud_uploading"),
            )));
            actions.push(Action::StartCloudUpload(session));
        } else if self.email_available {
            actions.push(self.busy());
            actions.push(self.email_prompt());
        } else {
            actions.extend(self.sharing_unavailable());
        }
        actions
    }

    pub fn on_send_pressed(&mut self, recipient: &str) -> Vec<Action> {
        if self.is_sending {
            debug!("send ignored while another send is in flight");
            return Vec::new();
        }
        if self.outcome.is_some() || !self.email_available || !self.input_enabled {
            return Vec::new();
        }
        let Some(session) = self.session.clone() else {
            return Vec::new();
        };
        let recipient = match validate_recipient(recipient) {
            Ok(recipient) => recipient,
            Err(err) => {
                debug!(error = %err, "recipient rejected");
                return vec![Action::Ui(UiUpdate::error_label(
                    LabelTarget::Status,
                    self.translator.translate("share_email_invalid"),
                ))];
            }
        };

        self.is_sending = true;
        self.input_enabled = false;
        vec![
            self.busy(),
            Action::Ui(UiUpdate::label(
                LabelTarget::Status,
                self.translator.translate("share_email_sending"),
            )),
            Action::StartEmailSend { session, recipient },
        ]
    }

    pub fn on_email_result(
        &mut self,
        session: &Path,
        recipient: &str,
        result: Result<(), DeliveryError>,
    ) -> Vec<Action> {
        if !self.is_current(session) {
            debug!(session = %session.display(), "email result for inactive session dropped");
            return Vec::new();
        }
        self.is_sending = false;

        match result {
            Ok(()) => {
                self.outcome = Some(ShareOutcome::Delivered);
                info!(session = %session.display(), attempt = self.attempts + 1, "email delivered");
                vec![
                    Action::LogAttempt {
                        session: session.to_path_buf(),
                        record: AttemptRecord::success(
                            BackendKind::Email,
                            self.attempts + 1,
                            Some(recipient.to_string()),
                        ),
                    },
                    self.busy(),
                    Action::Ui(UiUpdate::label(
                        LabelTarget::Status,
                        self.translator
                            .translate_with("share_email_success", &[("recipient", recipient)]),
                    )),
                    Action::Schedule {
                        after: self.settings.success_dwell,
                        timer: Timer::ReturnHome,
                    },
                ]
            }
            Err(err) if err.class == ErrorClass::InvalidRecipient => {
                self.input_enabled = true;
                vec![
                    self.busy(),
                    Action::Ui(UiUpdate::error_label(
                        LabelTarget::Status,
                        self.translator.translate("share_email_invalid"),
                    )),
                ]
            }
            Err(err) => {
                self.attempts += 1;
                warn!(
                    session = %session.display(),
                    attempt = self.attempts,
                    max = self.settings.max_attempts,
                    class = %err.class,
                    error = %err.message,
                    "email delivery failed"
                );
                let mut actions = vec![Action::LogAttempt {
                    session: session.to_path_buf(),
                    record: AttemptRecord::failure(
                        BackendKind::Email,
                        self.attempts,
                        Some(self.settings.max_attempts),
                        Some(recipient.to_string()),
                        err,
                    ),
                }];
                if self.attempts < self.settings.max_attempts {
                    self.input_enabled = true;
                    actions.push(self.busy());
                    actions.push(Action::Ui(UiUpdate::error_label(
                        LabelTarget::Status,
                        self.translator.translate_with(
                            "share_email_error",
                            &[
                                ("attempt", self.attempts.to_string().as_str()),
                                ("max", self.settings.max_attempts.to_string().as_str()),
                            ],
                        ),
                    )));
                } else {
                    self.outcome = Some(ShareOutcome::Escalated);
                    warn!(session = %session.display(), "attempt budget spent, escalating");
                    actions.push(self.busy());
                    actions.push(Action::Ui(UiUpdate::error_label(
                        LabelTarget::Status,
                        self.translator.translate_with(
                            "share_email_limit",
                            &[("admin", self.settings.admin_email.as_str())],
                        ),
                    )));
                    actions.push(Action::Schedule {
                        after: self.settings.escalation_cooldown,
                        timer: Timer::ReturnHome,
                    });
                }
                actions
            }
        }
    }

    pub fn on_cloud_result(
        &mut self,
        session: &Path,
        result: Result<Option<CloudShareResult>, DeliveryError>,
    ) -> Vec<Action> {
        if !self.is_current(session) {
            debug!(session = %session.display(), "cloud result for inactive session dropped");
            return Vec::new();
        }
        self.is_sending = false;

        let error = match result {
            Ok(Some(share)) => {
                let record = AttemptRecord::success(BackendKind::Cloud, 1, None)
                    .with_detail(share.share_url.clone());
                let mut actions = vec![
                    Action::LogAttempt {
                        session: session.to_path_buf(),
                        record,
                    },
                    Action::Ui(UiUpdate::CloudLink {
                        url: share.share_url.clone(),
                        qr_code: share.qr_code_path.clone(),
                    }),
                ];
                self.cloud_link = Some(share);
                self.input_enabled = self.email_available;
                actions.push(self.busy());
                actions.push(if self.email_available {
                    self.email_prompt()
                } else {
                    Action::Ui(UiUpdate::label(
                        LabelTarget::Status,
                        self.translator.translate("share_cloud_prompt"),
                    ))
                });
                return actions;
            }
            Ok(None) => DeliveryError::new(ErrorClass::Remote, "provider returned no share link"),
            Err(err) => err,
        };

        warn!(session = %session.display(), class = %error.class, error = %error.message, "cloud sharing disabled for this session");
        self.cloud_available = false;
        let mut actions = vec![
            Action::LogAttempt {
                session: session.to_path_buf(),
                record: AttemptRecord::failure(BackendKind::Cloud, 1, None, None, error),
            },
            Action::Ui(UiUpdate::CloudAvailable(false)),
        ];
        if self.email_available {
            self.input_enabled = true;
            actions.push(self.busy());
            actions.push(self.email_prompt());
        } else {
            actions.extend(self.sharing_unavailable());
        }
        actions
    }

    pub fn on_timer(&mut self, timer: Timer) -> Vec<Action> {
        match timer {
            Timer::ReturnHome => vec![Action::Navigate(Screen::Welcome)],
            _ => Vec::new(),
        }
    }

    pub fn request_finish(&mut self) -> Vec<Action> {
        self.confirming_finish = true;
        vec![Action::Ui(UiUpdate::Confirm(ConfirmPrompt {
            kind: ConfirmKind::FinishSharing,
            title: self.translator.translate("share_finish_dialog_title"),
            text: self.translator.translate("share_finish_dialog_text"),
            confirm: self.translator.translate("share_finish_dialog_confirm"),
            back: self.translator.translate("share_finish_dialog_back"),
        }))]
    }

    pub fn confirm(&mut self) -> Vec<Action> {
        if !std::mem::take(&mut self.confirming_finish) {
            return Vec::new();
        }
        vec![
            Action::Ui(UiUpdate::DismissConfirm),
            Action::Navigate(Screen::Welcome),
        ]
    }

    pub fn cancel(&mut self) -> Vec<Action> {
        if !std::mem::take(&mut self.confirming_finish) {
            return Vec::new();
        }
        vec![Action::Ui(UiUpdate::DismissConfirm)]
    }

    fn is_current(&self, session: &Path) -> bool {
        self.session.as_deref() == Some(session)
    }

    fn busy(&self) -> Action {
        Action::Ui(UiUpdate::Busy {
            sending: self.is_sending,
            input_enabled: self.input_enabled,
        })
    }

    fn email_prompt(&self) -> Action {
        Action::Ui(UiUpdate::label(
            LabelTarget::Status,
            self.translator.translate("share_email_prompt"),
        ))
    }

    fn sharing_unavailable(&mut self) -> Vec<Action> {
        self.outcome = Some(ShareOutcome::Unavailable);
        self.input_enabled = false;
        info!("no sharing backend available for this session");
        vec![
            self.busy(),
            Action::Ui(UiUpdate::label(
                LabelTarget::Status,
                self.translator.translate("share_disabled"),
            )),
            Action::Schedule {
                after: self.settings.sharing_disabled_dwell,
                timer: Timer::ReturnHome,
            },
        ]
    }
}
