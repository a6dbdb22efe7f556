use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

pub use config_model::{
    CloudProvider, DirectoryNaming, GalleryConfig, GeneralConfig, ImagesConfig, Language,
};

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("\"***\"")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraDriver {
    /// Synthetic frames; no hardware required.
    #[default]
    Pattern,
    /// Shell commands that write one encoded frame to stdout.
    Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CameraConfig {
    pub driver: CameraDriver,
    /// Command producing a preview frame on stdout (command driver).
    pub preview_command: String,
    /// Command producing a full-resolution still on stdout (command driver).
    pub still_command: String,
    pub preview_size: [u32; 2],
    pub still_size: [u32; 2],
    /// Interval between live preview refreshes.
    #[serde(with = "humantime_serde")]
    pub preview_refresh: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            driver: CameraDriver::Pattern,
            preview_command: "rpicam-still --nopreview --immediate -e jpg --width 800 --height 480 -o -"
                .to_string(),
            still_command: "rpicam-still --nopreview --immediate -e jpg -q 95 -o -".to_string(),
            preview_size: [800, 480],
            still_size: [4000, 2400],
            preview_refresh: Duration::from_millis(33),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SequenceConfig {
    /// Delay between pressing start and the first countdown.
    #[serde(with = "humantime_serde")]
    pub start_delay: Duration,
    /// Countdown ticks before the first shot.
    pub first_countdown: u32,
    /// Countdown ticks before every following shot.
    pub next_countdown: u32,
    #[serde(with = "humantime_serde")]
    pub countdown_tick: Duration,
    #[serde(with = "humantime_serde")]
    pub pause_between_shots: Duration,
    /// How long "capture complete" stays visible before moving on.
    #[serde(with = "humantime_serde")]
    pub completion_dwell: Duration,
    /// Idle time on the live view before returning to the welcome screen.
    #[serde(with = "humantime_serde")]
    pub inactivity_timeout: Duration,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(1),
            first_countdown: 10,
            next_countdown: 5,
            countdown_tick: Duration::from_secs(1),
            pause_between_shots: Duration::from_secs(5),
            completion_dwell: Duration::from_secs(4),
            inactivity_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DeliveryConfig {
    /// Email attempts per session before escalating to the admin contact.
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub success_dwell: Duration,
    #[serde(with = "humantime_serde")]
    pub escalation_cooldown: Duration,
    /// Dwell before returning home when no sharing backend is usable.
    #[serde(with = "humantime_serde")]
    pub sharing_disabled_dwell: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            success_dwell: Duration::from_secs(10),
            escalation_cooldown: Duration::from_secs(60),
            sharing_disabled_dwell: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmtpEncryption {
    /// TLS from the first byte (SMTPS, usually port 465).
    #[default]
    Tls,
    /// Plain connect upgraded via STARTTLS (usually port 587).
    Starttls,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub encryption: SmtpEncryption,
    pub smtp_user: String,
    pub smtp_password: Secret,
    pub sender_email: String,
    /// Shown to the guest once the attempt budget is exhausted.
    pub admin_email: String,
    pub subject: String,
    pub headline: String,
    pub body: String,
    pub footer: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: String::new(),
            smtp_port: 465,
            encryption: SmtpEncryption::Tls,
            smtp_user: String::new(),
            smtp_password: Secret::default(),
            sender_email: String::new(),
            admin_email: String::new(),
            subject: String::new(),
            headline: String::new(),
            body: String::new(),
            footer: String::new(),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NextcloudConfig {
    pub url: String,
    pub username: String,
    pub password: Secret,
    /// Root folder on the remote side; sessions land below it.
    pub folder: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub upload_timeout: Duration,
}

impl Default for NextcloudConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: Secret::default(),
            folder: String::new(),
            request_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    pub general: GeneralConfig,
    pub images: ImagesConfig,
    pub camera: CameraConfig,
    pub sequence: SequenceConfig,
    pub delivery: DeliveryConfig,
    pub email: EmailConfig,
    pub nextcloud: NextcloudConfig,
    /// Read by the gallery binary; kept here so both can share one file
    /// despite `deny_unknown_fields`.
    pub gallery: GalleryConfig,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_yaml::from_str(&s).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Validate runtime invariants and fill in discovered overlays.
    pub fn validated(mut self) -> Result<Self> {
        self.images.validate()?;
        self.gallery.validate()?;

        ensure!(
            self.camera.preview_size.iter().all(|v| *v > 0),
            "camera.preview-size must be positive"
        );
        ensure!(
            self.camera.still_size.iter().all(|v| *v > 0),
            "camera.still-size must be positive"
        );
        ensure!(
            !self.camera.preview_refresh.is_zero(),
            "camera.preview-refresh must be greater than zero"
        );
        if self.camera.driver == CameraDriver::Command {
            ensure!(
                !self.camera.still_command.trim().is_empty(),
                "camera.still-command is required for the command driver"
            );
            ensure!(
                !self.camera.preview_command.trim().is_empty(),
                "camera.preview-command is required for the command driver"
            );
        }

        ensure!(
            self.sequence.first_countdown > 0 && self.sequence.next_countdown > 0,
            "sequence countdowns must be greater than zero"
        );
        ensure!(
            !self.sequence.countdown_tick.is_zero(),
            "sequence.countdown-tick must be greater than zero"
        );
        ensure!(
            !self.sequence.inactivity_timeout.is_zero(),
            "sequence.inactivity-timeout must be greater than zero"
        );

        ensure!(
            self.delivery.max_attempts >= 1,
            "delivery.max-attempts must be at least 1"
        );

        if self.email.enabled {
            ensure!(
                !self.email.smtp_server.trim().is_empty(),
                "email.smtp-server is required when email is enabled"
            );
            ensure!(self.email.smtp_port > 0, "email.smtp-port must be non-zero");
            ensure!(
                !self.email.sender_email.trim().is_empty(),
                "email.sender-email is required when email is enabled"
            );
            ensure!(
                !self.email.timeout.is_zero(),
                "email.timeout must be greater than zero"
            );
        }

        if self.general.cloud_provider == Some(CloudProvider::Nextcloud) {
            ensure!(
                self.nextcloud.url.starts_with("http://")
                    || self.nextcloud.url.starts_with("https://"),
                "nextcloud.url must be an http(s) URL"
            );
            ensure!(
                !self.nextcloud.username.trim().is_empty(),
                "nextcloud.username is required for the nextcloud provider"
            );
        }

        discover_overlays(&mut self.images, &overlay_search_dirs());
        Ok(self)
    }
}

fn overlay_search_dirs() -> Vec<PathBuf> {
    let mut dirs_to_search = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs_to_search.push(cwd.join("overlays"));
    }
    if let Some(config_dir) = dirs::config_dir() {
        dirs_to_search.push(config_dir.join("photobooth").join("overlays"));
    }
    dirs_to_search
}

/// Fill unset overlays from files named `*preview*` / `*final*` in the search
/// directories. Explicit settings always win.
pub fn discover_overlays(images: &mut ImagesConfig, search_dirs: &[PathBuf]) {
    if images.preview_overlay.is_some() && images.final_overlay.is_some() {
        return;
    }
    for dir in search_dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if images.preview_overlay.is_none() && name.contains("preview") {
                tracing::debug!(path = %path.display(), "discovered preview overlay");
                images.preview_overlay = Some(path.clone());
            }
            if images.final_overlay.is_none() && name.contains("final") {
                tracing::debug!(path = %path.display(), "discovered final overlay");
                images.final_overlay = Some(path);
            }
        }
    }
}
