use crate::config::GeneralConfig;
use crate::events::{Action, Screen, UiUpdate};

/// Entry screen: shows the greeting and waits for a touch.
#[derive(Debug, Clone)]
pub struct WelcomeStage {
    message: String,
}

impl WelcomeStage {
    pub fn new(general: &GeneralConfig) -> Self {
        Self {
            message: general.welcome_message_or_default().into_owned(),
        }
    }

    pub fn on_enter(&self) -> Vec<Action> {
        vec![Action::Ui(UiUpdate::Welcome {
            message: self.message.clone(),
        })]
    }

    pub fn begin(&self) -> Vec<Action> {
        vec![Action::Navigate(Screen::LiveView)]
    }
}
