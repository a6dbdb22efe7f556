use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use photobooth::camera::{PatternCamera, SharedCamera};
use photobooth::config::{Configuration, Language};
use photobooth::delivery::log::LOG_FILE_NAME;
use photobooth::delivery::{BackendKind, Backends, Delivery, DeliveryBackend};
use photobooth::error::{DeliveryError, ErrorClass};
use photobooth::events::{Intent, Screen, Tone, UiUpdate};
use photobooth::i18n::{Catalog, Translate};
use photobooth::tasks::kiosk;
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

fn fast_config(base: &Path, image_count: u32, preview_enabled: bool) -> Configuration {
    let mut cfg = Configuration::default();
    cfg.images.base_image_dir = base.to_path_buf();
    cfg.images.max_image_count = image_count;
    cfg.images.preview_enabled = preview_enabled;
    cfg.camera.preview_size = [32, 24];
    cfg.camera.still_size = [64, 48];
    cfg.camera.preview_refresh = Duration::from_millis(20);
    cfg.sequence.start_delay = Duration::from_millis(10);
    cfg.sequence.first_countdown = 2;
    cfg.sequence.next_countdown = 1;
    cfg.sequence.countdown_tick = Duration::from_millis(10);
    cfg.sequence.pause_between_shots = Duration::from_millis(10);
    cfg.sequence.completion_dwell = Duration::from_millis(10);
    cfg.delivery.max_attempts = 3;
    cfg.delivery.success_dwell = Duration::from_millis(50);
    cfg.delivery.escalation_cooldown = Duration::from_millis(50);
    cfg.delivery.sharing_disabled_dwell = Duration::from_millis(50);
    cfg.email.admin_email = "admin@example.com".into();
    cfg
}

#[derive(Default)]
struct FakeEmail {
    fail_with: Option<ErrorClass>,
    sent_to: Mutex<Vec<String>>,
}

#[async_trait]
impl DeliveryBackend for FakeEmail {
    fn kind(&self) -> BackendKind {
        BackendKind::Email
    }

    async fn send(
        &self,
        _session_dir: &Path,
        recipient: Option<&str>,
    ) -> Result<Delivery, DeliveryError> {
        self.sent_to.lock().push(recipient.unwrap_or_default().to_string());
        match self.fail_with {
            Some(class) => Err(DeliveryError::new(class, "relay said no")),
            None => Ok(Delivery::Sent),
        }
    }
}

struct FakeCloud(Delivery);

#[async_trait]
impl DeliveryBackend for FakeCloud {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn send(
        &self,
        _session_dir: &Path,
        _recipient: Option<&str>,
    ) -> Result<Delivery, DeliveryError> {
        Ok(self.0.clone())
    }
}

struct Harness {
    intents: mpsc::Sender<Intent>,
    ui: mpsc::Receiver<UiUpdate>,
    cancel: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
    translator: Catalog,
}

impl Harness {
    fn start(cfg: Configuration, backends: Backends) -> Self {
        let camera = SharedCamera::new(PatternCamera::new(
            cfg.camera.preview_size,
            cfg.camera.still_size,
        ));
        let translator: Arc<dyn Translate> =
            Arc::new(Catalog::new(Language::En).expect("catalog"));
        let (intent_tx, intent_rx) = mpsc::channel(16);
        let (ui_tx, ui_rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(kiosk::run(
            cfg,
            camera,
            backends,
            translator,
            intent_rx,
            ui_tx,
            cancel.clone(),
        ));
        Self {
            intents: intent_tx,
            ui: ui_rx,
            cancel,
            handle,
            translator: Catalog::new(Language::En).expect("catalog"),
        }
    }

    async fn send(&self, intent: Intent) {
        self.intents.send(intent).await.expect("kiosk alive");
    }

    async fn wait_for(&mut self, what: &str, pred: impl Fn(&UiUpdate) -> bool) -> UiUpdate {
        timeout(WAIT, async {
            loop {
                let update = self.ui.recv().await.expect("ui channel open");
                if pred(&update) {
                    return update;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    async fn wait_for_screen(&mut self, name: &str) -> Screen {
        match self
            .wait_for(name, |u| matches!(u, UiUpdate::Screen(s) if s.name() == name))
            .await
        {
            UiUpdate::Screen(screen) => screen,
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn wait_for_status(&mut self, text: &str, tone: Tone) {
        let expected = text.to_string();
        self.wait_for(text, move |u| {
            matches!(u, UiUpdate::Label { text, tone: t, .. } if *text == expected && *t == tone)
        })
        .await;
    }

    /// Welcome -> live view -> full sequence; returns the session directory.
    async fn capture_session(&mut self) -> PathBuf {
        self.wait_for_screen("welcome").await;
        self.send(Intent::Begin).await;
        self.wait_for_screen("live-view").await;
        self.send(Intent::StartSequence).await;
        match timeout(WAIT, async {
            loop {
                let update = self.ui.recv().await.expect("ui channel open");
                if let UiUpdate::Screen(Screen::Preview { session } | Screen::Share { session }) =
                    update
                {
                    return session;
                }
            }
        })
        .await
        {
            Ok(session) => session,
            Err(_) => panic!("sequence never finished"),
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        let result = timeout(WAIT, self.handle)
            .await
            .expect("kiosk did not stop")
            .expect("kiosk panicked");
        assert!(result.is_ok());
    }
}

fn jpegs(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read session")
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".jpg"))
        .collect();
    names.sort();
    names
}

async fn read_log_eventually(session: &Path, needle: &str) -> String {
    let path = session.join(LOG_FILE_NAME);
    timeout(WAIT, async {
        loop {
            if let Ok(text) = std::fs::read_to_string(&path) {
                if text.contains(needle) {
                    return text;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{needle:?} never appeared in {}", path.display()))
}

fn email_only(email: Arc<FakeEmail>) -> Backends {
    Backends {
        email: Some(email),
        cloud: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_shot_session_is_kept_and_emailed() {
    let tmp: TempDir = tempdir().expect("tempdir");
    let email = Arc::new(FakeEmail::default());
    let mut h = Harness::start(fast_config(tmp.path(), 2, true), email_only(email.clone()));

    let session = h.capture_session().await;
    assert_eq!(session.parent(), Some(tmp.path()));
    assert_eq!(session.file_name().and_then(|n| n.to_str()), Some("0000"));
    assert_eq!(jpegs(&session).len(), 2);
    assert!(jpegs(&session).iter().all(|n| n.starts_with("Photobooth-")));

    let listed = h
        .wait_for("preview images", |u| matches!(u, UiUpdate::PreviewImages(_)))
        .await;
    assert!(matches!(listed, UiUpdate::PreviewImages(list) if list.len() == 2));

    h.send(Intent::Keep).await;
    h.wait_for_screen("share").await;
    h.send(Intent::Send {
        recipient: "guest@example.com".into(),
    })
    .await;
    let sent = h
        .translator
        .translate_with("share_email_success", &[("recipient", "guest@example.com")]);
    h.wait_for_status(&sent, Tone::Normal).await;
    h.wait_for_screen("welcome").await;

    assert_eq!(email.sent_to.lock().as_slice(), ["guest@example.com"]);
    let log = read_log_eventually(&session, "Success on attempt 1").await;
    assert!(log.contains("BACKEND: email"));
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_address_never_reaches_the_backend() {
    let tmp = tempdir().expect("tempdir");
    let email = Arc::new(FakeEmail::default());
    let mut h = Harness::start(fast_config(tmp.path(), 1, false), email_only(email.clone()));

    let session = h.capture_session().await;
    assert_eq!(jpegs(&session).len(), 1);

    h.send(Intent::Send {
        recipient: "not-an-email".into(),
    })
    .await;
    let invalid = h.translator.translate("share_email_invalid");
    h.wait_for_status(&invalid, Tone::Error).await;
    assert!(email.sent_to.lock().is_empty());
    assert!(!session.join(LOG_FILE_NAME).exists());

    h.send(Intent::Finish).await;
    h.wait_for("finish prompt", |u| matches!(u, UiUpdate::Confirm(_)))
        .await;
    h.send(Intent::Confirm).await;
    h.wait_for_screen("welcome").await;
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_relay_escalates_after_budget() {
    let tmp = tempdir().expect("tempdir");
    let email = Arc::new(FakeEmail {
        fail_with: Some(ErrorClass::Connection),
        ..FakeEmail::default()
    });
    let mut h = Harness::start(fast_config(tmp.path(), 1, false), email_only(email.clone()));
    let session = h.capture_session().await;

    for attempt in 1..=2 {
        h.send(Intent::Send {
            recipient: "guest@example.com".into(),
        })
        .await;
        let error = h.translator.translate_with(
            "share_email_error",
            &[("attempt", attempt.to_string().as_str()), ("max", "3")],
        );
        h.wait_for_status(&error, Tone::Error).await;
    }
    h.send(Intent::Send {
        recipient: "guest@example.com".into(),
    })
    .await;
    let limit = h
        .translator
        .translate_with("share_email_limit", &[("admin", "admin@example.com")]);
    h.wait_for_status(&limit, Tone::Error).await;
    h.wait_for_screen("welcome").await;

    assert_eq!(email.sent_to.lock().len(), 3);
    let log = read_log_eventually(&session, "Failure during attempt 3/3").await;
    assert!(log.contains("ERROR TYPE: connection"));
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn declined_cloud_share_falls_back_to_email() {
    let tmp = tempdir().expect("tempdir");
    let email = Arc::new(FakeEmail::default());
    let backends = Backends {
        email: Some(email.clone()),
        cloud: Some(Arc::new(FakeCloud(Delivery::Declined {
            reason: "ocs failure 404".into(),
        }))),
    };
    let mut h = Harness::start(fast_config(tmp.path(), 1, false), backends);
    let session = h.capture_session().await;

    h.wait_for("cloud disabled", |u| {
        matches!(u, UiUpdate::CloudAvailable(false))
    })
    .await;
    let prompt = h.translator.translate("share_email_prompt");
    h.wait_for_status(&prompt, Tone::Normal).await;

    h.send(Intent::Send {
        recipient: "guest@example.com".into(),
    })
    .await;
    h.wait_for_screen("welcome").await;
    assert_eq!(email.sent_to.lock().len(), 1);

    let log = read_log_eventually(&session, "BACKEND: email").await;
    assert!(log.contains("BACKEND: cloud"));
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shared_cloud_link_is_shown_with_qr_code() {
    let tmp = tempdir().expect("tempdir");
    let backends = Backends {
        email: None,
        cloud: Some(Arc::new(FakeCloud(Delivery::Shared {
            url: "https://cloud.example.com/s/AbC".into(),
        }))),
    };
    let mut h = Harness::start(fast_config(tmp.path(), 1, false), backends);
    let session = h.capture_session().await;

    let link = h
        .wait_for("cloud link", |u| matches!(u, UiUpdate::CloudLink { .. }))
        .await;
    match link {
        UiUpdate::CloudLink { url, qr_code } => {
            assert_eq!(url, "https://cloud.example.com/s/AbC");
            assert_eq!(qr_code, Some(session.join("qr_code.png")));
            assert!(session.join("qr_code.png").is_file());
        }
        other => panic!("unexpected {other:?}"),
    }
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_backends_returns_home_after_dwell() {
    let tmp = tempdir().expect("tempdir");
    let mut h = Harness::start(fast_config(tmp.path(), 1, false), Backends::default());
    h.capture_session().await;
    let disabled = h.translator.translate("share_disabled");
    h.wait_for_status(&disabled, Tone::Normal).await;
    h.wait_for_screen("welcome").await;
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn confirmed_abort_moves_partial_session_to_trash() {
    let tmp = tempdir().expect("tempdir");
    let mut cfg = fast_config(tmp.path(), 3, true);
    cfg.sequence.first_countdown = 50;
    cfg.sequence.countdown_tick = Duration::from_millis(100);
    let mut h = Harness::start(cfg, Backends::default());

    h.wait_for_screen("welcome").await;
    h.send(Intent::Begin).await;
    h.wait_for_screen("live-view").await;
    h.send(Intent::StartSequence).await;
    h.wait_for("countdown", |u| {
        matches!(u, UiUpdate::Label { text, .. } if text == "50")
    })
    .await;
    assert!(tmp.path().join("0000").is_dir());

    h.send(Intent::Abort).await;
    h.wait_for("abort prompt", |u| matches!(u, UiUpdate::Confirm(_)))
        .await;
    h.send(Intent::Confirm).await;
    h.wait_for_screen("welcome").await;

    let trashed = tmp.path().join("Trash").join("0000");
    timeout(WAIT, async {
        while !trashed.is_dir() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session never reached the trash");
    assert!(!tmp.path().join("0000").exists());
    h.stop().await;
}
