//! Session workflow.
//!
//! `App` handles signup and login; a successful login yields a `Session`,
//! which owns the authenticated username, a cached view of the user's
//! catalog, and the live camera (when open). The session drives the three
//! stateful operations: open/close the camera, capture the current frame,
//! and delete a captured image.
//!
//! A capture commits two writes that must live and die together: the JPEG
//! file on disk and the catalog row. There is no transaction spanning the
//! two, so the pairing is kept best-effort: the file is written first and
//! removed again if the row insert fails; deletion removes the file first
//! (a missing file is a no-op) and the row second.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};

use crate::catalog::{CatalogEntry, ImageCatalog};
use crate::credentials::CredentialStore;
use crate::frame::Frame;
use crate::ingest::{CameraConfig, CameraSource, CameraStats, Delivery};
use crate::{FramekeeperConfig, SessionError};

pub struct App {
    credentials: CredentialStore,
    config: FramekeeperConfig,
}

impl App {
    /// Open the stores and make sure the capture directory exists.
    pub fn open(config: FramekeeperConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.capture_dir).with_context(|| {
            format!(
                "create capture directory {}",
                config.capture_dir.display()
            )
        })?;
        let credentials = CredentialStore::open(&config.db_path)?;
        Ok(Self {
            credentials,
            config,
        })
    }

    pub fn sign_up(&self, username: &str, password: &str) -> Result<(), SessionError> {
        self.credentials.register(username, password)?;
        log::info!("account created for '{}'", username.trim().to_lowercase());
        Ok(())
    }

    /// Authenticate and start a session, populating its cached image list
    /// from the catalog.
    pub fn login(&self, username: &str, password: &str) -> Result<Session, SessionError> {
        let user = self.credentials.authenticate(username, password)?;
        let catalog = ImageCatalog::open(&self.config.db_path).map_err(SessionError::Storage)?;
        let session = Session::start(
            user.username,
            catalog,
            self.config.capture_dir.clone(),
            self.config.camera.clone(),
        )?;
        log::info!("session started for '{}'", session.username());
        Ok(session)
    }
}

/// One authenticated user's interaction state. Created on login, destroyed
/// on logout or drop.
pub struct Session {
    username: String,
    catalog: ImageCatalog,
    capture_dir: PathBuf,
    camera_config: CameraConfig,
    entries: Vec<CatalogEntry>,
    source: Option<CameraSource>,
}

impl Session {
    fn start(
        username: String,
        catalog: ImageCatalog,
        capture_dir: PathBuf,
        camera_config: CameraConfig,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            username,
            catalog,
            capture_dir,
            camera_config,
            entries: Vec::new(),
            source: None,
        };
        session.refresh()?;
        Ok(session)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Cached catalog view, newest first.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Reload the cached list from the catalog. The store is authoritative;
    /// the cache is never trimmed incrementally.
    pub fn refresh(&mut self) -> Result<(), SessionError> {
        self.entries = self
            .catalog
            .list(&self.username)
            .map_err(SessionError::Storage)?;
        Ok(())
    }

    pub fn camera_open(&self) -> bool {
        self.source.is_some()
    }

    pub fn delivery(&self) -> Option<Delivery> {
        self.source.as_ref().map(CameraSource::delivery)
    }

    pub fn camera_stats(&self) -> Option<CameraStats> {
        self.source.as_ref().map(CameraSource::stats)
    }

    /// Instantiate and connect the configured camera. A second call while
    /// the camera is open is a no-op.
    pub fn open_camera(&mut self) -> Result<(), SessionError> {
        if self.source.is_some() {
            return Ok(());
        }
        let mut source = CameraSource::new(self.camera_config.clone())
            .map_err(|e| SessionError::Stream(e.to_string()))?;
        source
            .connect()
            .map_err(|e| SessionError::Stream(e.to_string()))?;
        self.source = Some(source);
        Ok(())
    }

    /// Stop the camera and return to idle.
    pub fn close_camera(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
            log::info!("camera closed for '{}'", self.username);
        }
    }

    /// Pull the next live frame. Blocks on the pull variant; a failure ends
    /// the caller's feed loop but leaves the camera marked open.
    pub fn read_live_frame(&mut self) -> Result<Frame, SessionError> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| SessionError::Stream("camera is not open".to_string()))?;
        source
            .read_next_frame()
            .map_err(|e| SessionError::Stream(e.to_string()))
    }

    /// Most recently delivered frame, regardless of variant.
    pub fn current_frame(&self) -> Option<Frame> {
        self.source.as_ref().and_then(CameraSource::latest)
    }

    /// Persist the current frame: encode a JPEG under the capture
    /// directory, then record the catalog row. Fails with
    /// `CaptureUnavailable` (no state change) when no frame has been
    /// delivered yet.
    pub fn capture(&mut self) -> Result<PathBuf, SessionError> {
        let frame = self.current_frame().ok_or(SessionError::CaptureUnavailable)?;

        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let path = self
            .capture_dir
            .join(format!("{}_{}.jpg", self.username, stamp));
        frame.encode_jpeg(&path).map_err(SessionError::Storage)?;

        let file_path = path.to_string_lossy().into_owned();
        match self.catalog.add(&self.username, &file_path) {
            Ok(id) => {
                self.entries.insert(0, CatalogEntry { id, file_path });
                log::info!("captured {}", path.display());
                Ok(path)
            }
            Err(e) => {
                // Keep the file/row pairing: no row, no file.
                let _ = std::fs::remove_file(&path);
                Err(SessionError::Storage(e))
            }
        }
    }

    /// Delete a captured image: backing file first (a file already missing
    /// on disk is a no-op), catalog row second, then an authoritative
    /// reload of the cached list. Returns whether an entry was removed.
    pub fn delete(&mut self, id: i64) -> Result<bool, SessionError> {
        let Some(file_path) = self
            .catalog
            .find(&self.username, id)
            .map_err(SessionError::Storage)?
        else {
            self.refresh()?;
            return Ok(false);
        };

        let path = Path::new(&file_path);
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("remove capture file {}", file_path))
                .map_err(SessionError::Storage)?;
        }
        self.catalog
            .remove(&self.username, id)
            .map_err(SessionError::Storage)?;
        log::info!("deleted {}", file_path);
        self.refresh()?;
        Ok(true)
    }

    /// End the session, releasing the camera if it is still open.
    pub fn logout(mut self) {
        self.close_camera();
        log::info!("session ended for '{}'", self.username);
    }
}
