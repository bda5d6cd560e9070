//! Image catalog store.
//!
//! Persists `username -> file_path` associations for captured images in
//! SQLite. Rows are keyed by a generated row id so that deletion removes
//! exactly one row even when the same path was recorded twice; listing is
//! newest-first (descending id, i.e. reverse insertion order).
//!
//! The catalog holds paths only. File lifecycle (create/delete together
//! with the row) is the session workflow's responsibility.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::open_db_connection;

/// One captured image belonging to a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: i64,
    pub file_path: String,
}

pub struct ImageCatalog {
    conn: Connection,
}

impl ImageCatalog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("open image catalog at {}", db_path))?;
        let catalog = Self { conn };
        catalog.ensure_schema()?;
        Ok(catalog)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS images (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              username TEXT NOT NULL,
              file_path TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_images_username ON images(username);
            "#,
        )?;
        Ok(())
    }

    /// All entries for `username`, most recently added first.
    pub fn list(&self, username: &str) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_path FROM images WHERE username = ?1 ORDER BY id DESC",
        )?;
        let mut rows = stmt.query(params![username])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(CatalogEntry {
                id: row.get(0)?,
                file_path: row.get(1)?,
            });
        }
        Ok(entries)
    }

    /// Record a new association and return its row id. No dedup check:
    /// the same path may be recorded more than once.
    pub fn add(&self, username: &str, file_path: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO images (username, file_path) VALUES (?1, ?2)",
            params![username, file_path],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Path of the entry `id`, if it exists and belongs to `username`.
    pub fn find(&self, username: &str, id: i64) -> Result<Option<String>> {
        let path = self
            .conn
            .query_row(
                "SELECT file_path FROM images WHERE id = ?1 AND username = ?2",
                params![id, username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(path)
    }

    /// Delete the entry `id` if it belongs to `username`. Returns whether a
    /// row was removed. Removes at most one row.
    pub fn remove(&self, username: &str, id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM images WHERE id = ?1 AND username = ?2",
            params![id, username],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_memory_uri;

    #[test]
    fn list_is_newest_first() -> Result<()> {
        let catalog = ImageCatalog::open(&shared_memory_uri())?;
        catalog.add("alice", "a/first.jpg")?;
        catalog.add("alice", "a/second.jpg")?;
        catalog.add("alice", "a/third.jpg")?;

        let paths: Vec<_> = catalog
            .list("alice")?
            .into_iter()
            .map(|e| e.file_path)
            .collect();
        assert_eq!(paths, vec!["a/third.jpg", "a/second.jpg", "a/first.jpg"]);
        Ok(())
    }

    #[test]
    fn listing_never_crosses_users() -> Result<()> {
        let catalog = ImageCatalog::open(&shared_memory_uri())?;
        catalog.add("alice", "a/one.jpg")?;
        catalog.add("bob", "b/one.jpg")?;

        let alice = catalog.list("alice")?;
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].file_path, "a/one.jpg");

        let bob = catalog.list("bob")?;
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].file_path, "b/one.jpg");
        Ok(())
    }

    #[test]
    fn remove_deletes_exactly_one_row() -> Result<()> {
        let catalog = ImageCatalog::open(&shared_memory_uri())?;
        // Same path recorded twice; removing one id leaves the other row.
        let first = catalog.add("alice", "a/dup.jpg")?;
        let second = catalog.add("alice", "a/dup.jpg")?;

        assert!(catalog.remove("alice", first)?);
        let remaining = catalog.list("alice")?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second);
        Ok(())
    }

    #[test]
    fn remove_is_scoped_to_the_owner() -> Result<()> {
        let catalog = ImageCatalog::open(&shared_memory_uri())?;
        let id = catalog.add("alice", "a/one.jpg")?;

        assert!(!catalog.remove("bob", id)?);
        assert_eq!(catalog.list("alice")?.len(), 1);

        assert!(catalog.remove("alice", id)?);
        assert!(catalog.list("alice")?.is_empty());
        Ok(())
    }

    #[test]
    fn find_returns_the_owners_path_only() -> Result<()> {
        let catalog = ImageCatalog::open(&shared_memory_uri())?;
        let id = catalog.add("alice", "a/one.jpg")?;

        assert_eq!(catalog.find("alice", id)?, Some("a/one.jpg".to_string()));
        assert_eq!(catalog.find("bob", id)?, None);
        assert_eq!(catalog.find("alice", id + 1)?, None);
        Ok(())
    }
}
