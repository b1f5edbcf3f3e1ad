//! Database model for a parked [`PendingApproval`](crate::agent::PendingApproval).
//!
//! One row per tool call awaiting human consent; `decision` is `NULL` until
//! the approval is resolved, and is written exactly once.

use diesel::prelude::*;

use crate::database::schema::pending_approvals;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = pending_approvals)]
pub struct PendingApprovalRow {
    pub id: String,
    pub chat_id: String,
    pub assistant_message_id: Option<String>,
    pub user_id: String,
    pub tool_call_id: String,
    pub function_ref: String,
    pub arguments_json: String,
    pub all_tool_calls_json: String,
    pub conversation_snapshot_json: String,
    pub created_at: String,
    pub decision: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = pending_approvals)]
pub struct NewPendingApproval {
    pub id: String,
    pub chat_id: String,
    pub assistant_message_id: Option<String>,
    pub user_id: String,
    pub tool_call_id: String,
    pub function_ref: String,
    pub arguments_json: String,
    pub all_tool_calls_json: String,
    pub conversation_snapshot_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = pending_approvals)]
pub struct PendingApprovalDecision {
    pub decision: Option<String>,
}
