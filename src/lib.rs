//! Framekeeper
//!
//! Authenticated camera capture with a local image catalog.
//!
//! A user signs up or logs in, opens a live camera feed, captures still
//! frames to disk, and browses/deletes previous captures. Captured files
//! live in a dedicated directory; the association between a user and their
//! files is a row in a local SQLite database.
//!
//! # Module Structure
//!
//! - `credentials`: username/password records (SQLite)
//! - `catalog`: per-user captured-image records (SQLite)
//! - `frame`: RGB frame container and channel-order normalization
//! - `ingest`: frame sources (HTTP pull, peer push, stub)
//! - `session`: signup/login and the capture/browse/delete workflow
//! - `config`: file + environment configuration

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::sync::OnceLock;

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod frame;
pub mod ingest;
pub mod session;

pub use catalog::{CatalogEntry, ImageCatalog};
pub use config::FramekeeperConfig;
pub use credentials::{CredentialStore, User};
pub use frame::{ChannelOrder, Frame, LatestFrame};
pub use ingest::{CameraConfig, CameraSource, CameraStats, Delivery};
pub use session::{App, Session};

// -------------------- Errors --------------------

/// User-facing failures of the session workflow.
///
/// Auth failures are non-fatal (re-prompt); `CaptureUnavailable` is a
/// warning with no state change; `Stream` ends the active feed loop;
/// `Storage` aborts the operation that hit it. There are no retries
/// anywhere in the system.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("username is already taken")]
    UsernameTaken,
    #[error("incorrect username or password")]
    InvalidCredentials,
    #[error("username must be 1-32 characters of [a-z0-9_-]")]
    InvalidUsername,
    #[error("no frame available to capture; the camera has not produced one yet")]
    CaptureUnavailable,
    #[error("camera stream failed: {0}")]
    Stream(String),
    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for SessionError {
    fn from(e: rusqlite::Error) -> Self {
        SessionError::Storage(anyhow::Error::new(e))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Storage(anyhow::Error::new(e))
    }
}

impl From<image::ImageError> for SessionError {
    fn from(e: image::ImageError) -> Self {
        SessionError::Storage(anyhow::Error::new(e))
    }
}

// -------------------- Username Discipline --------------------

/// Usernames are embedded verbatim in capture filenames, so they must stay
/// filesystem-safe. We enforce a positive allowlist pattern rather than
/// escaping on the way out.
///
/// Allowed: "alice", "cam_42", "front-door"
/// Disallowed: anything with whitespace, slashes, dots, or other punctuation.
pub fn normalize_username(username: &str) -> Result<String, SessionError> {
    // Compile once for hot paths.
    static USERNAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = USERNAME_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,32}$").unwrap());

    let name = username.trim().to_lowercase();
    if !re.is_match(&name) {
        return Err(SessionError::InvalidUsername);
    }
    Ok(name)
}

// -------------------- Database Plumbing --------------------

/// URI for a shared in-memory database. Separate connections opened with
/// this URI see the same tables, which is what store-level tests need.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:framekeeper_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_lowercased_and_validated() {
        assert_eq!(normalize_username("Alice").unwrap(), "alice");
        assert_eq!(normalize_username("  cam_42 ").unwrap(), "cam_42");
        assert!(matches!(
            normalize_username("no spaces"),
            Err(SessionError::InvalidUsername)
        ));
        assert!(matches!(
            normalize_username("../escape"),
            Err(SessionError::InvalidUsername)
        ));
        assert!(matches!(
            normalize_username(""),
            Err(SessionError::InvalidUsername)
        ));
    }

    #[test]
    fn shared_memory_uris_are_distinct() {
        assert_ne!(shared_memory_uri(), shared_memory_uri());
    }
}
