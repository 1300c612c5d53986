//! Database repository layer
//!
//! Provides the queue and identity operations backing [`crate::queue::DurableQueue`]
//! and [`crate::identity::IdentityStore`].

use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection()?;
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Persistence("database lock poisoned".to_string()))
    }

    // ============================================
    // Queue operations
    // ============================================

    /// Append one encoded message to the tail of the queue
    pub fn append_queued(&self, payload: &[u8]) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO queue (payload, enqueued_at) VALUES (?1, ?2)",
            params![payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Read up to `limit` entries from the head of the queue without removing them
    pub fn peek_queued(&self, limit: usize) -> Result<Vec<Vec<u8>>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT payload FROM queue ORDER BY id ASC LIMIT ?1")?;
        let payloads = stmt
            .query_map([limit as i64], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(payloads)
    }

    /// Remove the `count` oldest entries
    pub fn remove_queued_prefix(&self, count: usize) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM queue WHERE id IN (SELECT id FROM queue ORDER BY id ASC LIMIT ?1)",
            [count as i64],
        )?;
        Ok(())
    }

    /// Remove every queued entry
    pub fn clear_queued(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM queue", [])?;
        Ok(())
    }

    /// Number of queued entries
    pub fn count_queued(&self) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ============================================
    // Identity operations
    // ============================================

    pub fn get_identity(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection()?;
        let value = conn
            .query_row("SELECT value FROM identity WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_identity(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO identity (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove_identity(&self, key: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM identity WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_queue_is_fifo() {
        let db = test_db();
        for payload in [b"one".as_slice(), b"two", b"three"] {
            db.append_queued(payload).unwrap();
        }

        assert_eq!(db.count_queued().unwrap(), 3);
        assert_eq!(
            db.peek_queued(2).unwrap(),
            vec![b"one".to_vec(), b"two".to_vec()]
        );
        // Peeking does not consume
        assert_eq!(db.count_queued().unwrap(), 3);
    }

    #[test]
    fn test_remove_prefix_keeps_tail_order() {
        let db = test_db();
        for i in 0..5 {
            db.append_queued(format!("m{}", i).as_bytes()).unwrap();
        }

        db.remove_queued_prefix(3).unwrap();

        assert_eq!(
            db.peek_queued(10).unwrap(),
            vec![b"m3".to_vec(), b"m4".to_vec()]
        );

        db.clear_queued().unwrap();
        assert_eq!(db.count_queued().unwrap(), 0);
    }

    #[test]
    fn test_queue_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.db");

        {
            let db = Database::open(&path).unwrap();
            db.migrate().unwrap();
            db.append_queued(b"persisted").unwrap();
        }

        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert_eq!(db.peek_queued(1).unwrap(), vec![b"persisted".to_vec()]);
    }

    #[test]
    fn test_identity_crud() {
        let db = test_db();
        assert_eq!(db.get_identity("userId").unwrap(), None);

        db.set_identity("userId", "u1").unwrap();
        db.set_identity("userId", "u2").unwrap();
        assert_eq!(db.get_identity("userId").unwrap().as_deref(), Some("u2"));

        db.remove_identity("userId").unwrap();
        assert_eq!(db.get_identity("userId").unwrap(), None);
    }
}
