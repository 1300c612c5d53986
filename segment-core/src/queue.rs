//! Durable message queue
//!
//! The transporter only sees an ordered log of encoded messages through
//! [`DurableQueue`]. [`Database`] is the persistent implementation;
//! [`MemoryQueue`] is for tests and throwaway clients.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::db::Database;
use crate::error::{Error, Result};

/// Ordered, append-only log of encoded messages
///
/// Implementations must preserve append order and must make `append`
/// atomic: an entry is either fully stored or not stored at all.
pub trait DurableQueue: Send + Sync {
    /// Add one entry at the tail.
    fn append(&self, payload: &[u8]) -> Result<()>;

    /// Read up to `limit` entries from the head, oldest first, without removing them.
    fn peek(&self, limit: usize) -> Result<Vec<Vec<u8>>>;

    /// Remove the `count` oldest entries.
    fn remove_prefix(&self, count: usize) -> Result<()>;

    /// Remove every entry.
    fn clear(&self) -> Result<()>;

    /// Number of stored entries.
    fn size(&self) -> Result<usize>;
}

impl DurableQueue for Database {
    fn append(&self, payload: &[u8]) -> Result<()> {
        self.append_queued(payload)
    }

    fn peek(&self, limit: usize) -> Result<Vec<Vec<u8>>> {
        self.peek_queued(limit)
    }

    fn remove_prefix(&self, count: usize) -> Result<()> {
        self.remove_queued_prefix(count)
    }

    fn clear(&self) -> Result<()> {
        self.clear_queued()
    }

    fn size(&self) -> Result<usize> {
        self.count_queued()
    }
}

/// In-memory queue; contents are lost when dropped
#[derive(Debug, Default)]
pub struct MemoryQueue {
    entries: Mutex<VecDeque<Vec<u8>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Persistence("queue lock poisoned".to_string()))
    }
}

impl DurableQueue for MemoryQueue {
    fn append(&self, payload: &[u8]) -> Result<()> {
        self.entries()?.push_back(payload.to_vec());
        Ok(())
    }

    fn peek(&self, limit: usize) -> Result<Vec<Vec<u8>>> {
        Ok(self.entries()?.iter().take(limit).cloned().collect())
    }

    fn remove_prefix(&self, count: usize) -> Result<()> {
        let mut entries = self.entries()?;
        let count = count.min(entries.len());
        entries.drain(..count);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries()?.clear();
        Ok(())
    }

    fn size(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }
}
