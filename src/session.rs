use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info};

use crate::config::{DirectoryNaming, ImagesConfig};
use crate::error::CaptureError;

/// One run of N captures sharing a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSession {
    pub id: String,
    pub directory: PathBuf,
    pub target_count: u32,
    pub captured_count: u32,
    pub overlay: Option<PathBuf>,
}

impl CaptureSession {
    /// Count one more saved frame. Returns `true` once the target is reached.
    pub fn record_capture(&mut self) -> bool {
        debug_assert!(self.captured_count < self.target_count);
        self.captured_count = (self.captured_count + 1).min(self.target_count);
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.captured_count >= self.target_count
    }
}

#[derive(Debug, Clone)]
pub struct SessionDirectoryManager {
    base: PathBuf,
    trash: PathBuf,
    naming: DirectoryNaming,
    prefix: String,
}

impl SessionDirectoryManager {
    pub fn new(images: &ImagesConfig) -> Self {
        Self {
            base: images.base_image_dir.clone(),
            trash: images.trash_dir(),
            naming: images.directory_naming,
            prefix: images.file_prefix.clone(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn trash(&self) -> &Path {
        &self.trash
    }

    /// Create the directory for a new session.
    pub fn allocate(&self) -> Result<(String, PathBuf), CaptureError> {
        fs::create_dir_all(&self.base)
            .map_err(|e| CaptureError::from_io("create", &self.base, e))?;

        match self.naming {
            DirectoryNaming::Index => {
                let mut index = 0u32;
                loop {
                    let id = format!("{index:04}");
                    let candidate = self.base.join(&id);
                    if !candidate.exists() {
                        if let Some(found) = self.claim(&id, candidate)? {
                            return Ok(found);
                        }
                    }
                    index += 1;
                }
            }
            DirectoryNaming::Timestamp => {
                let stem = format!("{}-{}", self.prefix, Local::now().format("%Y-%m-%d_%H-%M-%S"));
                let mut suffix = 0u32;
                loop {
                    let id = match suffix {
                        0 => stem.clone(),
                        n => format!("{stem}-{n}"),
                    };
                    let candidate = self.base.join(&id);
                    if !candidate.exists() {
                        if let Some(found) = self.claim(&id, candidate)? {
                            return Ok(found);
                        }
                    }
                    suffix += 1;
                }
            }
        }
    }

    /// Create `candidate`; `None` means another process won the race.
    fn claim(&self, id: &str, candidate: PathBuf) -> Result<Option<(String, PathBuf)>, CaptureError> {
        match fs::create_dir(&candidate) {
            Ok(()) => {
                info!(session = %candidate.display(), "allocated session directory");
                Ok(Some((id.to_string(), candidate)))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %candidate.display(), "session slot taken, probing further");
                Ok(None)
            }
            Err(err) => Err(CaptureError::from_io("create", &candidate, err)),
        }
    }

    /// Allocate a directory and wrap it in a fresh session.
    pub fn start_session(
        &self,
        target_count: u32,
        overlay: Option<PathBuf>,
    ) -> Result<CaptureSession, CaptureError> {
        let (id, directory) = self.allocate()?;
        Ok(CaptureSession {
            id,
            directory,
            target_count,
            captured_count: 0,
            overlay,
        })
    }

    /// Move a session directory into the trash. A same-named entry already in
    /// the trash is replaced.
    pub fn discard(&self, session_dir: &Path) -> Result<PathBuf, CaptureError> {
        let name = session_dir.file_name().ok_or_else(|| {
            CaptureError::from_io(
                "discard",
                session_dir,
                io::Error::new(io::ErrorKind::InvalidInput, "session path has no name"),
            )
        })?;
        fs::create_dir_all(&self.trash)
            .map_err(|e| CaptureError::from_io("create", &self.trash, e))?;

        let target = self.trash.join(name);
        if target.exists() {
            fs::remove_dir_all(&target)
                .map_err(|e| CaptureError::from_io("replace", &target, e))?;
        }
        fs::rename(session_dir, &target)
            .map_err(|e| CaptureError::from_io("move", session_dir, e))?;
        info!(session = %session_dir.display(), trash = %target.display(), "discarded session");
        Ok(target)
    }
}
