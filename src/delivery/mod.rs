//! Delivery backends: email with attachments and cloud upload with a share
//! link. Backends never raise; every failure comes back as a
//! [`DeliveryError`] the share stage can count and log.

pub mod cloud;
pub mod email;
pub mod log;
pub mod qr;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{CloudProvider, Configuration};
use crate::error::{DeliveryError, ErrorClass};
use crate::i18n::Translate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Email,
    Cloud,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Email => "email",
            BackendKind::Cloud => "cloud",
        }
    }
}

/// What a backend reports after a send that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Email accepted by the relay.
    Sent,
    /// Uploaded and shared publicly.
    Shared { url: String },
    /// The remote side answered but refused to produce a result.
    Declined { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudShareResult {
    pub share_url: String,
    pub qr_code_path: Option<PathBuf>,
}

#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Deliver every image of `session_dir`. `recipient` is required by email
    /// and ignored by cloud backends.
    async fn send(
        &self,
        session_dir: &Path,
        recipient: Option<&str>,
    ) -> Result<Delivery, DeliveryError>;
}

/// Backends enabled for this kiosk.
#[derive(Clone, Default)]
pub struct Backends {
    pub email: Option<Arc<dyn DeliveryBackend>>,
    pub cloud: Option<Arc<dyn DeliveryBackend>>,
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("email", &self.email.is_some())
            .field("cloud", &self.cloud.is_some())
            .finish()
    }
}

impl Backends {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.cloud.is_none()
    }
}

/// Build the backends selected by the configuration. A cloud backend that
/// cannot be constructed is disabled with a warning instead of failing
/// startup.
pub fn build_backends(cfg: &Configuration, translator: Arc<dyn Translate>) -> Backends {
    let email = cfg.email.enabled.then(|| {
        info!(server = %cfg.email.smtp_server, port = cfg.email.smtp_port, "email delivery enabled");
        Arc::new(email::EmailBackend::new(
            cfg.email.clone(),
            cfg.general.name.clone(),
            cfg.general.language,
            translator,
        )) as Arc<dyn DeliveryBackend>
    });

    let cloud = match cfg.general.cloud_provider {
        Some(CloudProvider::Nextcloud) => {
            match cloud::NextcloudBackend::new(&cfg.nextcloud, &cfg.images.file_prefix) {
                Ok(backend) => {
                    info!(url = %cfg.nextcloud.url, "nextcloud delivery enabled");
                    Some(Arc::new(backend) as Arc<dyn DeliveryBackend>)
                }
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "nextcloud backend disabled");
                    None
                }
            }
        }
        None => None,
    };

    Backends { email, cloud }
}

/// The `.jpg`/`.jpeg` files directly inside `session_dir`, in name order.
pub fn list_session_images(session_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(session_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_jpeg = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false);
        if is_jpeg {
            images.push(entry.into_path());
        }
    }
    images.sort();
    Ok(images)
}

/// Upload a session and, on success, render the share link as a QR code in
/// the session directory. `Ok(None)` means the provider declined.
pub async fn share_to_cloud(
    backend: &dyn DeliveryBackend,
    session_dir: &Path,
) -> Result<Option<CloudShareResult>, DeliveryError> {
    let url = match backend.send(session_dir, None).await? {
        Delivery::Shared { url } => url,
        Delivery::Declined { reason } => {
            warn!(session = %session_dir.display(), %reason, "cloud share declined");
            return Ok(None);
        }
        Delivery::Sent => {
            warn!(session = %session_dir.display(), "cloud backend returned no share link");
            return Ok(None);
        }
    };

    let dir = session_dir.to_path_buf();
    let link = url.clone();
    let qr_code_path = match tokio::task::spawn_blocking(move || qr::generate(&dir, &link)).await {
        Ok(Ok(path)) => Some(path),
        Ok(Err(err)) => {
            warn!(error = %format!("{err:#}"), "failed to render share QR code");
            None
        }
        Err(err) => {
            warn!(error = %err, "QR rendering task failed");
            None
        }
    };
    Ok(Some(CloudShareResult {
        share_url: url,
        qr_code_path,
    }))
}

pub(crate) fn images_or_error(session_dir: &Path) -> Result<Vec<PathBuf>, DeliveryError> {
    let images = list_session_images(session_dir)
        .map_err(|err| DeliveryError::io("failed to list session images", &err))?;
    if images.is_empty() {
        return Err(DeliveryError::new(
            ErrorClass::Io,
            format!("no images in {}", session_dir.display()),
        ));
    }
    Ok(images)
}
