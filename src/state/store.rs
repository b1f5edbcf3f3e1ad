//! Per-user, namespaced key/value storage backed by the `state_entries`
//! table. Backs the `save_state`/`retrieve_state`/`update_state`/
//! `delete_state` tools and the state-context block the agent engine
//! injects into the system prompt (see [`StateStore::list_namespace`]).

use chrono::Utc;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::database::{
    models::state_entry::{NewStateEntry, StateEntryRow},
    schema::state_entries::dsl,
    DbPool,
};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Database(String),
    #[error("stored value for {namespace}/{key} is not valid JSON: {source}")]
    Corrupt {
        namespace: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Thin wrapper over `state_entries`; every call runs the blocking Diesel
/// work on a dedicated thread since callers are async tool-dispatch paths,
/// not one-shot command handlers.
#[derive(Clone)]
pub struct StateStore {
    db: DbPool,
}

impl StateStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Fetch one value, or `None` if unset.
    pub async fn get(
        &self,
        user_id: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Value>, StateError> {
        let db = self.db.clone();
        let (user_id, namespace, key) = (user_id.to_string(), namespace.to_string(), key.to_string());

        let row = tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            dsl::state_entries
                .filter(dsl::user_id.eq(&user_id))
                .filter(dsl::namespace.eq(&namespace))
                .filter(dsl::key.eq(&key))
                .first::<StateEntryRow>(&mut conn)
                .optional()
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| StateError::Database(e.to_string()))?
        .map_err(StateError::Database)?;

        row.map(|r| {
            serde_json::from_str(&r.value_json).map_err(|source| StateError::Corrupt {
                namespace: r.namespace.clone(),
                key: r.key.clone(),
                source,
            })
        })
        .transpose()
    }

    /// List every key/value pair in a namespace, newest first — used to
    /// render the state-context block in the agent's system prompt.
    pub async fn list_namespace(
        &self,
        user_id: &str,
        namespace: &str,
    ) -> Result<Vec<(String, Value)>, StateError> {
        let db = self.db.clone();
        let (user_id, namespace) = (user_id.to_string(), namespace.to_string());

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            dsl::state_entries
                .filter(dsl::user_id.eq(&user_id))
                .filter(dsl::namespace.eq(&namespace))
                .order(dsl::updated_at.desc())
                .load::<StateEntryRow>(&mut conn)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| StateError::Database(e.to_string()))?
        .map_err(StateError::Database)?;

        rows.into_iter()
            .map(|r| {
                let value = serde_json::from_str(&r.value_json).map_err(|source| StateError::Corrupt {
                    namespace: r.namespace.clone(),
                    key: r.key.clone(),
                    source,
                })?;
                Ok((r.key, value))
            })
            .collect()
    }

    /// Create or overwrite a value. Last writer wins: concurrent `set`s to
    /// the same `(user_id, namespace, key)` simply replace one another,
    /// there is no optimistic-concurrency check.
    pub async fn set(
        &self,
        user_id: &str,
        namespace: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StateError> {
        let db = self.db.clone();
        let new_row = NewStateEntry {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            namespace: namespace.to_string(),
            key: key.to_string(),
            value_json: value.to_string(),
            updated_at: Utc::now().to_rfc3339(),
        };

        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            diesel::insert_into(dsl::state_entries)
                .values(&new_row)
                .on_conflict((dsl::user_id, dsl::namespace, dsl::key))
                .do_update()
                .set(&new_row)
                .execute(&mut conn)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| StateError::Database(e.to_string()))?
        .map_err(StateError::Database)?;

        Ok(())
    }

    /// Alias for [`Self::set`] — `update_state` and `save_state` share the
    /// same last-writer-wins upsert semantics, they differ only in the
    /// tool-calling convention exposed to agents.
    pub async fn update(
        &self,
        user_id: &str,
        namespace: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StateError> {
        self.set(user_id, namespace, key, value).await
    }

    /// Delete one entry. Returns `true` if a row was actually removed.
    pub async fn delete(&self, user_id: &str, namespace: &str, key: &str) -> Result<bool, StateError> {
        let db = self.db.clone();
        let (user_id, namespace, key) = (user_id.to_string(), namespace.to_string(), key.to_string());

        let affected = tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            diesel::delete(
                dsl::state_entries
                    .filter(dsl::user_id.eq(&user_id))
                    .filter(dsl::namespace.eq(&namespace))
                    .filter(dsl::key.eq(&key)),
            )
            .execute(&mut conn)
            .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| StateError::Database(e.to_string()))?
        .map_err(StateError::Database)?;

        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> StateStore {
        StateStore::new(crate::database::init_in_memory().expect("in-memory db"))
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = store();
        store
            .set("u1", "agent-scratch", "plan", json!({"step": 1}))
            .await
            .unwrap();

        let got = store.get("u1", "agent-scratch", "plan").await.unwrap();
        assert_eq!(got, Some(json!({"step": 1})));
    }

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let store = store();
        assert_eq!(store.get("u1", "ns", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_last_writer_wins() {
        let store = store();
        store.set("u1", "ns", "k", json!(1)).await.unwrap();
        store.update("u1", "ns", "k", json!(2)).await.unwrap();

        assert_eq!(store.get("u1", "ns", "k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn namespaces_and_users_are_isolated() {
        let store = store();
        store.set("u1", "ns-a", "k", json!("a")).await.unwrap();
        store.set("u1", "ns-b", "k", json!("b")).await.unwrap();
        store.set("u2", "ns-a", "k", json!("c")).await.unwrap();

        assert_eq!(store.get("u1", "ns-a", "k").await.unwrap(), Some(json!("a")));
        assert_eq!(store.get("u1", "ns-b", "k").await.unwrap(), Some(json!("b")));
        assert_eq!(store.get("u2", "ns-a", "k").await.unwrap(), Some(json!("c")));
    }

    #[tokio::test]
    async fn delete_removes_entry_and_reports_whether_it_existed() {
        let store = store();
        store.set("u1", "ns", "k", json!(1)).await.unwrap();

        assert!(store.delete("u1", "ns", "k").await.unwrap());
        assert!(!store.delete("u1", "ns", "k").await.unwrap());
        assert_eq!(store.get("u1", "ns", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_namespace_returns_all_keys_newest_first() {
        let store = store();
        store.set("u1", "ns", "a", json!(1)).await.unwrap();
        store.set("u1", "ns", "b", json!(2)).await.unwrap();

        let entries = store.list_namespace("u1", "ns").await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"a"));
        assert!(keys.contains(&"b"));
        assert_eq!(entries.len(), 2);
    }
}
