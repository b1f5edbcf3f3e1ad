//! Database model for one key/value record in an agent's state namespace.
//!
//! Rows are unique on `(user_id, namespace, key)`; concurrent writers to the
//! same key are last-writer-wins (see `state::StateStore::update`).

use diesel::prelude::*;

use crate::database::schema::state_entries;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = state_entries)]
pub struct StateEntryRow {
    pub id: String,
    pub user_id: String,
    pub namespace: String,
    pub key: String,
    pub value_json: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = state_entries)]
pub struct NewStateEntry {
    pub id: String,
    pub user_id: String,
    pub namespace: String,
    pub key: String,
    pub value_json: String,
    pub updated_at: String,
}
