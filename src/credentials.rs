//! Credential store.
//!
//! Persists `username -> password_hash` pairs in SQLite. Passwords are
//! stored as an unsalted SHA-256 hex digest; authentication compares the
//! digest of the supplied password against the stored value. There is no
//! password reset, rate limiting, or account lockout.
//!
//! Accounts are never mutated or deleted once created.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::{normalize_username, open_db_connection, SessionError};

/// An authenticated user. The password hash never leaves the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub username: String,
}

pub struct CredentialStore {
    conn: Connection,
}

impl CredentialStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("open credential store at {}", db_path))?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS users (
              username TEXT PRIMARY KEY,
              password_hash TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Create an account. Fails with `UsernameTaken` if the username exists,
    /// regardless of password.
    pub fn register(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let username = normalize_username(username)?;
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(SessionError::UsernameTaken);
        }

        let hash = hash_password(password);
        match self.conn.execute(
            "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
            params![username, hash],
        ) {
            Ok(_) => Ok(()),
            // Lost the race between the existence check and the insert.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(SessionError::UsernameTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Succeeds only if a stored record matches both the username and the
    /// hash of the supplied password.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User, SessionError> {
        let username = normalize_username(username).map_err(|_| SessionError::InvalidCredentials)?;
        let hash = hash_password(password);
        let matched: Option<String> = self
            .conn
            .query_row(
                "SELECT username FROM users WHERE username = ?1 AND password_hash = ?2",
                params![username, hash],
                |row| row.get(0),
            )
            .optional()?;

        match matched {
            Some(username) => Ok(User { username }),
            None => Err(SessionError::InvalidCredentials),
        }
    }
}

fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_memory_uri;

    #[test]
    fn register_then_authenticate_round_trips() -> Result<()> {
        let store = CredentialStore::open(&shared_memory_uri())?;
        store.register("alice", "pw1").unwrap();

        let user = store.authenticate("alice", "pw1").unwrap();
        assert_eq!(user.username, "alice");

        // Input case is normalized on both paths.
        let user = store.authenticate("Alice", "pw1").unwrap();
        assert_eq!(user.username, "alice");
        Ok(())
    }

    #[test]
    fn wrong_password_is_rejected() -> Result<()> {
        let store = CredentialStore::open(&shared_memory_uri())?;
        store.register("alice", "pw1").unwrap();

        assert!(matches!(
            store.authenticate("alice", "pw2"),
            Err(SessionError::InvalidCredentials)
        ));
        assert!(matches!(
            store.authenticate("bob", "pw1"),
            Err(SessionError::InvalidCredentials)
        ));
        Ok(())
    }

    #[test]
    fn duplicate_username_is_rejected_regardless_of_password() -> Result<()> {
        let store = CredentialStore::open(&shared_memory_uri())?;
        store.register("alice", "pw1").unwrap();

        assert!(matches!(
            store.register("alice", "pw1"),
            Err(SessionError::UsernameTaken)
        ));
        assert!(matches!(
            store.register("alice", "completely-different"),
            Err(SessionError::UsernameTaken)
        ));
        Ok(())
    }

    #[test]
    fn malformed_usernames_cannot_register() -> Result<()> {
        let store = CredentialStore::open(&shared_memory_uri())?;
        assert!(matches!(
            store.register("../etc/passwd", "pw"),
            Err(SessionError::InvalidUsername)
        ));
        Ok(())
    }

    #[test]
    fn stored_hash_is_a_sha256_hex_digest() {
        // Stored format matches a plain sha256 hexdigest of the password.
        assert_eq!(
            hash_password("pw1"),
            "c592df4a86933b92addc9842402ddf198c638ea9be58916ee6e3734e1e3152f8"
        );
    }
}
