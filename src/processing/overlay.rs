use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::{ImageReader, RgbaImage, imageops};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Pastes a transparent overlay (a branded frame or border) onto frames.
///
/// The overlay is decoded on first use and kept resized for the most recent
/// frame size, so a session of same-sized stills touches the disk once.
#[derive(Debug, Default)]
pub struct OverlayCompositor {
    path: Option<PathBuf>,
    source: OnceLock<Option<RgbaImage>>,
    cache: Mutex<Option<CachedOverlay>>,
}

#[derive(Debug)]
struct CachedOverlay {
    width: u32,
    height: u32,
    image: Arc<RgbaImage>,
}

impl OverlayCompositor {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            source: OnceLock::new(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Composite the overlay at (0, 0). Frames pass through untouched when no
    /// overlay is configured or it cannot be read.
    pub fn apply(&self, mut frame: RgbaImage) -> RgbaImage {
        let Some(overlay) = self.overlay_for(frame.width(), frame.height()) else {
            return frame;
        };
        imageops::overlay(&mut frame, overlay.as_ref(), 0, 0);
        frame
    }

    fn overlay_for(&self, width: u32, height: u32) -> Option<Arc<RgbaImage>> {
        let mut cache = self.cache.lock();
        if let Some(hit) = cache
            .as_ref()
            .filter(|cached| cached.width == width && cached.height == height)
        {
            return Some(Arc::clone(&hit.image));
        }

        let source = self.source()?;
        let resized = match resize_rgba(source, width, height) {
            Ok(resized) => Arc::new(resized),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "overlay resize failed; skipping overlay");
                return None;
            }
        };
        debug!(width, height, "cached resized overlay");
        *cache = Some(CachedOverlay {
            width,
            height,
            image: Arc::clone(&resized),
        });
        Some(resized)
    }

    fn source(&self) -> Option<&RgbaImage> {
        let path = self.path.as_deref()?;
        self.source
            .get_or_init(|| match load_overlay(path) {
                Ok(image) => Some(image),
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %format!("{err:#}"),
                        "overlay unreadable; frames will be saved without it"
                    );
                    None
                }
            })
            .as_ref()
    }
}

fn load_overlay(path: &Path) -> Result<RgbaImage> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("failed to open overlay at {}", path.display()))?
        .with_guessed_format()
        .context("failed to guess overlay format")?;
    let image = reader
        .decode()
        .with_context(|| format!("failed to decode overlay at {}", path.display()))?;
    Ok(image.to_rgba8())
}

fn resize_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage> {
    anyhow::ensure!(target_w > 0 && target_h > 0, "resize dimensions must be positive");
    if source.dimensions() == (target_w, target_h) {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for overlay resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("overlay resize failed")?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| anyhow::anyhow!("failed to construct resized overlay"))
}
