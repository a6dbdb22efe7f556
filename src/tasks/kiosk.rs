use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tokio::select;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedSender, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::SharedCamera;
use crate::config::Configuration;
use crate::delivery::{self, Backends, log};
use crate::error::{CaptureError, DeliveryError, ErrorClass};
use crate::events::{Action, Intent, LoopEvent, Screen, Timer, UiUpdate};
use crate::i18n::Translate;
use crate::processing::overlay::OverlayCompositor;
use crate::session::SessionDirectoryManager;
use crate::tasks::preview::PreviewStage;
use crate::tasks::sequencer::{CaptureSequencer, SequencerSettings, capture_and_save};
use crate::tasks::share::{DeliveryOrchestrator, ShareSettings};
use crate::tasks::welcome::WelcomeStage;
use crate::timers::ScreenTimers;

/// Drive the kiosk until `cancel` fires or the front end hangs up.
///
/// Rules:
/// - Exactly one screen is active; intents and timers are routed to its stage.
/// - Leaving a screen cancels its timers; late timer events carry an old epoch
///   and are dropped.
/// - Camera, disk and network work runs off the loop and reports back as a
///   [`LoopEvent`].
pub async fn run(
    cfg: Configuration,
    camera: SharedCamera,
    backends: Backends,
    translator: Arc<dyn Translate>,
    mut intents: Receiver<Intent>,
    ui: Sender<UiUpdate>,
    cancel: CancellationToken,
) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<LoopEvent>();
    let mut kiosk = Kiosk::new(&cfg, camera, backends, translator, ui, events_tx, &cancel);
    info!(
        base = %kiosk.sessions.base().display(),
        screen = "welcome",
        "kiosk started"
    );
    kiosk.dispatch(vec![Action::Navigate(Screen::Welcome)]).await?;

    loop {
        let step = select! {
            _ = cancel.cancelled() => break,

            maybe_intent = intents.recv() => match maybe_intent {
                Some(intent) => {
                    let actions = kiosk.on_intent(intent);
                    kiosk.dispatch(actions).await
                }
                None => {
                    info!("intent channel closed; stopping kiosk");
                    break;
                }
            },

            Some(event) = events_rx.recv() => {
                let actions = kiosk.on_event(event);
                kiosk.dispatch(actions).await
            }
        };
        if let Err(err) = step {
            warn!(error = %err, "stopping kiosk");
            break;
        }
    }

    kiosk.timers.reset();
    Ok(())
}

struct Kiosk {
    screen: Screen,
    welcome: WelcomeStage,
    sequencer: CaptureSequencer,
    preview: PreviewStage,
    share: DeliveryOrchestrator,
    timers: ScreenTimers,
    camera: SharedCamera,
    sessions: SessionDirectoryManager,
    final_overlay: Arc<OverlayCompositor>,
    preview_overlay: Arc<OverlayCompositor>,
    backends: Backends,
    jpeg_quality: u8,
    preview_refresh: Duration,
    preview_in_flight: bool,
    ui: Sender<UiUpdate>,
    events: UnboundedSender<LoopEvent>,
}

impl Kiosk {
    fn new(
        cfg: &Configuration,
        camera: SharedCamera,
        backends: Backends,
        translator: Arc<dyn Translate>,
        ui: Sender<UiUpdate>,
        events: UnboundedSender<LoopEvent>,
        cancel: &CancellationToken,
    ) -> Self {
        let sessions = SessionDirectoryManager::new(&cfg.images);
        let share_settings =
            ShareSettings::new(cfg, backends.email.is_some(), backends.cloud.is_some());
        Self {
            screen: Screen::Welcome,
            welcome: WelcomeStage::new(&cfg.general),
            sequencer: CaptureSequencer::new(
                SequencerSettings::from_config(cfg),
                Arc::clone(&translator),
                Instant::now(),
            ),
            preview: PreviewStage::new(Arc::clone(&translator)),
            share: DeliveryOrchestrator::new(share_settings, translator),
            timers: ScreenTimers::new(cancel.clone(), events.clone()),
            camera,
            sessions,
            final_overlay: Arc::new(OverlayCompositor::new(cfg.images.final_overlay.clone())),
            preview_overlay: Arc::new(OverlayCompositor::new(cfg.images.preview_overlay.clone())),
            backends,
            jpeg_quality: cfg.images.jpeg_quality,
            preview_refresh: cfg.camera.preview_refresh,
            preview_in_flight: false,
            ui,
            events,
        }
    }

    fn on_intent(&mut self, intent: Intent) -> Vec<Action> {
        debug!(screen = self.screen.name(), ?intent, "intent");
        match (&self.screen, intent) {
            (Screen::Welcome, Intent::Begin) => self.welcome.begin(),

            (Screen::LiveView, Intent::StartSequence) => match self.sequencer.start_sequence() {
                Ok(actions) => actions,
                Err(CaptureError::SequenceActive) => {
                    debug!("sequence already running; start ignored");
                    Vec::new()
                }
                Err(err) => self.sequencer.fail(err),
            },
            (Screen::LiveView, Intent::Abort) => self.sequencer.request_abort(),
            (Screen::LiveView, Intent::Confirm) => self.sequencer.confirm(),
            (Screen::LiveView, Intent::Cancel) => self.sequencer.cancel(),

            (Screen::Preview { .. }, Intent::Discard) => self.preview.request_discard(),
            (Screen::Preview { .. }, Intent::Keep) => self.preview.keep(),
            (Screen::Preview { .. }, Intent::Confirm) => self.preview.confirm(),
            (Screen::Preview { .. }, Intent::Cancel) => self.preview.cancel(),

            (Screen::Share { .. }, Intent::Send { recipient }) => {
                self.share.on_send_pressed(&recipient)
            }
            (Screen::Share { .. }, Intent::Finish) => self.share.request_finish(),
            (Screen::Share { .. }, Intent::Confirm) => self.share.confirm(),
            (Screen::Share { .. }, Intent::Cancel) => self.share.cancel(),

            (screen, intent) => {
                debug!(screen = screen.name(), ?intent, "intent not valid on this screen");
                Vec::new()
            }
        }
    }

    fn on_event(&mut self, event: LoopEvent) -> Vec<Action> {
        match event {
            LoopEvent::Timer { epoch, timer } => {
                if !self.timers.is_current(epoch) {
                    debug!(?timer, epoch, "stale timer dropped");
                    return Vec::new();
                }
                self.on_timer(timer)
            }
            LoopEvent::SessionAllocated(result) => match (&self.screen, result) {
                (Screen::LiveView, result) => self.sequencer.on_session_allocated(result),
                (_, Ok(orphan)) => {
                    debug!(session = %orphan.directory.display(), "session allocated after leaving live view");
                    vec![Action::DiscardSession(orphan.directory)]
                }
                (_, Err(err)) => {
                    debug!(error = %err, "allocation failed after leaving live view");
                    Vec::new()
                }
            },
            LoopEvent::ImagesListed { session, result } => match &self.screen {
                Screen::Preview { session: active } if *active == session => {
                    self.preview.on_images_listed(&session, result)
                }
                _ => Vec::new(),
            },
            LoopEvent::FrameSaved { session, result } => match self.screen {
                Screen::LiveView => self.sequencer.on_frame_saved(&session, result),
                _ => {
                    debug!(session = %session.display(), "frame saved after leaving live view");
                    Vec::new()
                }
            },
            LoopEvent::PreviewFrame(result) => {
                self.preview_in_flight = false;
                match result {
                    Ok(frame) if self.screen == Screen::LiveView => {
                        self.push_preview_frame(frame);
                    }
                    Ok(_) => {}
                    Err(err) => debug!(error = %format!("{err:#}"), "preview frame unavailable"),
                }
                Vec::new()
            }
            LoopEvent::CloudResult { session, result } => {
                if !self.is_sharing(&session) {
                    debug!(session = %session.display(), "cloud result after leaving share screen");
                    return Vec::new();
                }
                self.share.on_cloud_result(&session, result)
            }
            LoopEvent::EmailResult {
                session,
                recipient,
                result,
            } => {
                if !self.is_sharing(&session) {
                    debug!(session = %session.display(), "email result after leaving share screen");
                    return Vec::new();
                }
                self.share.on_email_result(&session, &recipient, result)
            }
        }
    }

    fn on_timer(&mut self, timer: Timer) -> Vec<Action> {
        match self.screen {
            Screen::LiveView if timer == Timer::PreviewRefresh => {
                self.request_preview_frame();
                vec![Action::Schedule {
                    after: self.preview_refresh,
                    timer: Timer::PreviewRefresh,
                }]
            }
            Screen::LiveView => self.sequencer.on_timer(timer, Instant::now()),
            Screen::Share { .. } => self.share.on_timer(timer),
            _ => {
                debug!(screen = self.screen.name(), ?timer, "timer ignored");
                Vec::new()
            }
        }
    }

    fn is_sharing(&self, session: &Path) -> bool {
        matches!(&self.screen, Screen::Share { session: active } if active == session)
    }

    /// Execute actions in order. Screen changes append the new stage's entry
    /// actions behind whatever is still queued.
    async fn dispatch(&mut self, actions: Vec<Action>) -> Result<()> {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Ui(update) => self.emit(update).await?,
                Action::Schedule { after, timer } => self.timers.schedule(after, timer),
                Action::CancelTimers => self.timers.reset(),
                Action::Navigate(screen) => {
                    let entered = self.enter(screen.clone());
                    self.emit(UiUpdate::Screen(screen)).await?;
                    queue.extend(entered);
                }
                Action::AllocateSession {
                    target_count,
                    overlay,
                } => self.spawn_allocate(target_count, overlay),
                Action::ListImages(session) => self.spawn_list_images(session),
                Action::CaptureFrame { session, file_name } => self.spawn_capture(session, file_name),
                Action::DiscardSession(session) => self.spawn_discard(session),
                Action::StartCloudUpload(session) => self.spawn_cloud_upload(session),
                Action::StartEmailSend { session, recipient } => {
                    self.spawn_email_send(session, recipient)
                }
                Action::LogAttempt { session, record } => {
                    tokio::task::spawn_blocking(move || {
                        if let Err(err) = log::append(&session, &record) {
                            warn!(error = %format!("{err:#}"), "failed to write delivery log");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    fn enter(&mut self, screen: Screen) -> Vec<Action> {
        self.timers.reset();
        info!(from = self.screen.name(), to = screen.name(), "screen change");
        self.screen = screen.clone();
        match screen {
            Screen::Welcome => self.welcome.on_enter(),
            Screen::LiveView => {
                let mut actions = self.sequencer.on_enter(Instant::now());
                actions.push(Action::Schedule {
                    after: Duration::ZERO,
                    timer: Timer::PreviewRefresh,
                });
                actions
            }
            Screen::Preview { session } => self.preview.on_enter(session),
            Screen::Share { session } => self.share.on_enter(session),
        }
    }

    async fn emit(&self, update: UiUpdate) -> Result<()> {
        self.ui
            .send(update)
            .await
            .map_err(|_| anyhow!("ui channel closed"))
    }

    fn push_preview_frame(&self, frame: image::RgbaImage) {
        match self.ui.try_send(UiUpdate::PreviewFrame(Arc::new(frame))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("front end busy; preview frame dropped"),
            Err(TrySendError::Closed(_)) => debug!("ui channel closed; preview frame dropped"),
        }
    }

    fn request_preview_frame(&mut self) {
        if self.preview_in_flight {
            return;
        }
        self.preview_in_flight = true;
        let camera = self.camera.clone();
        let overlay = Arc::clone(&self.preview_overlay);
        let events = self.events.clone();
        tokio::spawn(async move {
            let frame = tokio::task::spawn_blocking(move || {
                camera.preview_frame().map(|frame| overlay.apply(frame))
            })
            .await
            .unwrap_or_else(|err| Err(anyhow!("preview task failed: {err}")));
            let _ = events.send(LoopEvent::PreviewFrame(frame));
        });
    }

    fn spawn_capture(&self, session: PathBuf, file_name: String) {
        let camera = self.camera.clone();
        let overlay = Arc::clone(&self.final_overlay);
        let events = self.events.clone();
        let quality = self.jpeg_quality;
        tokio::spawn(async move {
            let dir = session.clone();
            let result = tokio::task::spawn_blocking(move || {
                capture_and_save(&camera, &overlay, &dir, &file_name, quality)
            })
            .await
            .unwrap_or_else(|err| Err(CaptureError::Camera(anyhow!("capture task failed: {err}"))));
            let _ = events.send(LoopEvent::FrameSaved { session, result });
        });
    }

    fn spawn_allocate(&self, target_count: u32, overlay: Option<PathBuf>) {
        let sessions = self.sessions.clone();
        let base = self.sessions.base().to_path_buf();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                sessions.start_session(target_count, overlay)
            })
            .await
            .unwrap_or_else(|err| Err(CaptureError::from_io("create", &base, std::io::Error::other(err))));
            let _ = events.send(LoopEvent::SessionAllocated(result));
        });
    }

    fn spawn_list_images(&self, session: PathBuf) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let dir = session.clone();
            let result = tokio::task::spawn_blocking(move || delivery::list_session_images(&dir))
                .await
                .unwrap_or_else(|err| Err(std::io::Error::other(err)));
            let _ = events.send(LoopEvent::ImagesListed { session, result });
        });
    }

    fn spawn_discard(&self, session: PathBuf) {
        let sessions = self.sessions.clone();
        tokio::task::spawn_blocking(move || match sessions.discard(&session) {
            Ok(target) => info!(from = %session.display(), to = %target.display(), "session moved to trash"),
            Err(err) => warn!(session = %session.display(), error = %err, "failed to discard session"),
        });
    }

    fn spawn_cloud_upload(&self, session: PathBuf) {
        let events = self.events.clone();
        let Some(backend) = self.backends.cloud.clone() else {
            let _ = events.send(LoopEvent::CloudResult {
                session,
                result: Err(DeliveryError::new(
                    ErrorClass::Configuration,
                    "no cloud backend configured",
                )),
            });
            return;
        };
        tokio::spawn(async move {
            let result = delivery::share_to_cloud(backend.as_ref(), &session).await;
            let _ = events.send(LoopEvent::CloudResult { session, result });
        });
    }

    fn spawn_email_send(&self, session: PathBuf, recipient: String) {
        let events = self.events.clone();
        let Some(backend) = self.backends.email.clone() else {
            let _ = events.send(LoopEvent::EmailResult {
                session,
                recipient,
                result: Err(DeliveryError::new(
                    ErrorClass::Configuration,
                    "no email backend configured",
                )),
            });
            return;
        };
        tokio::spawn(async move {
            let result = backend
                .send(&session, Some(&recipient))
                .await
                .map(|delivery| debug!(?delivery, "email backend finished"));
            let _ = events.send(LoopEvent::EmailResult {
                session,
                recipient,
                result,
            });
        });
    }
}
