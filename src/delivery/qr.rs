use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::Luma;
use qrcode::QrCode;

pub const QR_FILE_NAME: &str = "qr_code.png";

pub fn qr_path(session_dir: &Path) -> PathBuf {
    session_dir.join(QR_FILE_NAME)
}

/// Render `url` as a QR code next to the session's images.
pub fn generate(session_dir: &Path, url: &str) -> Result<PathBuf> {
    let code = QrCode::new(url.as_bytes()).context("failed to generate QR code")?;
    let image = code.render::<Luma<u8>>().min_dimensions(256, 256).build();
    let path = qr_path(session_dir);
    image
        .save(&path)
        .with_context(|| format!("failed to write QR code to {}", path.display()))?;
    Ok(path)
}
