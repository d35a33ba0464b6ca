// Durable key/value namespace for one profile, the server-side stand-in
// for browser localStorage. Values are always JSON documents.
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::state::DbPool;

pub const USERS_KEY: &str = "khyati_users";
pub const SESSION_KEY: &str = "khyati_session";
pub const PROFILES_KEY: &str = "khyati_profiles";
pub const COMMENTS_KEY: &str = "khyati_comments";
pub const PENDING_PROFILE_KEY: &str = "pending_profile";
pub const REMOTE_SESSION_KEY: &str = "remote_session";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct KvStore {
    pool: DbPool,
}

impl KvStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_raw(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, raw],
        )?;
        Ok(())
    }

    /// Returns true when a value was present.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    /// Read-modify-write of one key, starting from `T::default()` when the
    /// key is absent. Not atomic across processes sharing the profile.
    pub fn update_json<T, R, F>(&self, key: &str, f: F) -> Result<R, StoreError>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        let mut value: T = self.get_json(key)?.unwrap_or_default();
        let out = f(&mut value);
        self.set_json(key, &value)?;
        Ok(out)
    }
}
