use chrono::Utc;
use rusqlite::OptionalExtension;

use beacon_core::storage::KeyValueStore;

use crate::database::{db_err, Database};
use crate::StoreError;

/// Durable [`KeyValueStore`] backed by the `kv` table.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key FROM kv ORDER BY key")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(db_err)?
                .collect::<Result<Vec<String>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, now],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", [key])
                .map_err(db_err)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::new(Database::in_memory().unwrap())
    }

    #[test]
    fn missing_key_is_none() {
        let store = store();
        assert_eq!(store.get("consentStatus").unwrap(), None);
    }

    #[test]
    fn set_then_get() {
        let store = store();
        store.set("consentStatus", "granted").unwrap();
        assert_eq!(store.get("consentStatus").unwrap().as_deref(), Some("granted"));
    }

    #[test]
    fn set_overwrites() {
        let store = store();
        store.set("consentStatus", "granted").unwrap();
        store.set("consentStatus", "denied").unwrap();
        assert_eq!(store.get("consentStatus").unwrap().as_deref(), Some("denied"));
        assert_eq!(store.keys().unwrap(), vec!["consentStatus".to_string()]);
    }

    #[test]
    fn remove_deletes_and_is_idempotent() {
        let store = store();
        store.set("consentDate", "2026-01-01T00:00:00Z").unwrap();
        store.remove("consentDate").unwrap();
        store.remove("consentDate").unwrap();
        assert_eq!(store.get("consentDate").unwrap(), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = std::env::temp_dir().join(format!("beacon-kv-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("kv.db");

        {
            let store = SqliteStore::new(Database::open(&path).unwrap());
            store.set("userProperties", r#"{"tier":"gold"}"#).unwrap();
        }

        let store = SqliteStore::new(Database::open(&path).unwrap());
        assert_eq!(
            store.get("userProperties").unwrap().as_deref(),
            Some(r#"{"tier":"gold"}"#)
        );

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn usable_as_trait_object() {
        let store: std::sync::Arc<dyn KeyValueStore> = std::sync::Arc::new(store());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
