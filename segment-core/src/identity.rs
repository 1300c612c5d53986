//! Identity store for the current userId and anonymousId

use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::Database;
use crate::error::{Error, Result};

/// Key under which the current user id is stored
pub const USER_ID_KEY: &str = "userId";

/// Key under which the anonymous id is stored
pub const ANONYMOUS_ID_KEY: &str = "anonymousId";

/// Small persistent key-value store
pub trait IdentityStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

impl IdentityStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_identity(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_identity(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.remove_identity(key)
    }
}

/// In-memory identity store
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| Error::Persistence("identity lock poisoned".to_string()))
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values()?.remove(key);
        Ok(())
    }
}
