pub mod camera;
pub mod config;
pub mod console;
pub mod delivery;
pub mod error;
pub mod events;
pub mod i18n;
pub mod session;
pub mod timers;
pub mod processing {
    pub mod overlay;
}
pub mod tasks {
    pub mod kiosk;
    pub mod preview;
    pub mod sequencer;
    pub mod share;
    pub mod welcome;
}
