use std::borrow::Cow;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::de::{self, Deserializer};
use serde::Deserialize;

pub use gallery::GalleryConfig;
pub use general::{CloudProvider, GeneralConfig, Language};
pub use images::{DirectoryNaming, ImagesConfig};

pub const TRASH_DIR_NAME: &str = "Trash";

mod general {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum Language {
        #[default]
        En,
        De,
    }

    impl Language {
        pub fn code(self) -> &'static str {
            match self {
                Language::En => "en",
                Language::De => "de",
            }
        }
    }

    impl<'de> Deserialize<'de> for Language {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = String::deserialize(deserializer)?;
            match raw.trim().to_ascii_lowercase().as_str() {
                "en" => Ok(Language::En),
                "de" => Ok(Language::De),
                other => Err(de::Error::unknown_variant(other, &["en", "de"])),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum CloudProvider {
        Nextcloud,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    pub struct GeneralConfig {
        pub name: String,
        pub language: Language,
        /// Cloud backend used on the share screen; omitted or `null` disables it.
        pub cloud_provider: Option<CloudProvider>,
        pub welcome_message: String,
    }

    impl Default for GeneralConfig {
        fn default() -> Self {
            Self {
                name: "Photobooth".to_string(),
                language: Language::En,
                cloud_provider: None,
                welcome_message: String::new(),
            }
        }
    }

    impl GeneralConfig {
        pub fn welcome_message_or_default(&self) -> Cow<'_, str> {
            match self.welcome_message.trim() {
                "" => Cow::Owned(format!("Welcome to {}", self.name)),
                _ => Cow::Borrowed(self.welcome_message.as_str()),
            }
        }
    }
}

mod images {
    use super::*;

    /// How a new session directory name is chosen.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum DirectoryNaming {
        /// Zero-padded index (`0000`, `0001`, ...), first free slot wins.
        #[default]
        Index,
        /// `<file-prefix>-<local timestamp>` with a numeric suffix on collision.
        Timestamp,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    pub struct ImagesConfig {
        #[serde(deserialize_with = "deserialize_expanded_path")]
        pub base_image_dir: PathBuf,
        pub max_image_count: u32,
        pub file_prefix: String,
        pub preview_overlay: Option<PathBuf>,
        pub final_overlay: Option<PathBuf>,
        pub directory_naming: DirectoryNaming,
        /// Show the keep/discard preview between capture and sharing.
        pub preview_enabled: bool,
        pub jpeg_quality: u8,
    }

    impl Default for ImagesConfig {
        fn default() -> Self {
            Self {
                base_image_dir: default_base_image_dir(),
                max_image_count: 4,
                file_prefix: "Photobooth".to_string(),
                preview_overlay: None,
                final_overlay: None,
                directory_naming: DirectoryNaming::Index,
                preview_enabled: true,
                jpeg_quality: 95,
            }
        }
    }

    impl ImagesConfig {
        pub fn trash_dir(&self) -> PathBuf {
            self.base_image_dir.join(TRASH_DIR_NAME)
        }

        pub fn validate(&self) -> Result<()> {
            ensure!(
                !self.base_image_dir.as_os_str().is_empty(),
                "images.base-image-dir must not be empty"
            );
            ensure!(
                self.max_image_count > 0,
                "images.max-image-count must be greater than zero"
            );
            ensure!(
                !self.file_prefix.trim().is_empty(),
                "images.file-prefix must not be blank"
            );
            ensure!(
                !self.file_prefix.contains(['/', '\\']),
                "images.file-prefix must not contain path separators"
            );
            ensure!(
                (1..=100).contains(&self.jpeg_quality),
                "images.jpeg-quality must be between 1 and 100"
            );
            Ok(())
        }
    }

    fn default_base_image_dir() -> PathBuf {
        expand_tilde("~/.local/share/photobooth/images")
    }

    fn deserialize_expanded_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => expand_tilde(value),
            _ => default_base_image_dir(),
        })
    }
}

mod gallery {
    use super::*;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    pub struct GalleryConfig {
        pub bind_address: String,
        pub port: u16,
        /// Static key expected in the `x-api-key` header of uploads. Uploads are
        /// refused while unset.
        pub api_key: Option<String>,
    }

    impl Default for GalleryConfig {
        fn default() -> Self {
            Self {
                bind_address: "0.0.0.0".to_string(),
                port: 5000,
                api_key: None,
            }
        }
    }

    impl GalleryConfig {
        pub fn validate(&self) -> Result<()> {
            ensure!(
                !self.bind_address.trim().is_empty(),
                "gallery.bind-address must not be blank"
            );
            if let Some(key) = &self.api_key {
                ensure!(
                    !key.trim().is_empty(),
                    "gallery.api-key must not be blank when provided"
                );
            }
            Ok(())
        }
    }
}

/// Sections shared by every binary reading the photobooth YAML file.
///
/// Unknown sections are ignored so the gallery can read the same document the
/// kiosk uses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SharedConfig {
    pub general: GeneralConfig,
    pub images: ImagesConfig,
    pub gallery: GalleryConfig,
}

impl SharedConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let cfg: SharedConfig = serde_yaml::from_slice(&data)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        cfg.images.validate()?;
        cfg.gallery.validate()?;
        Ok(cfg)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
