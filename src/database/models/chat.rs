//! Database model for a [`Chat`](crate::agent::Chat) thread bound to one agent.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::chats;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = chats)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub agent_namespace: String,
    pub agent_name: String,
    pub agent_input_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = chats)]
pub struct NewChat {
    pub id: String,
    pub user_id: String,
    pub agent_namespace: String,
    pub agent_name: String,
    pub agent_input_json: String,
    pub created_at: String,
}
