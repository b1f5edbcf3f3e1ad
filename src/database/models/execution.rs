//! Database model for [`ExecutionRecord`](crate::executor::ExecutionRecord) rows.
//!
//! One row per function invocation. Status transitions follow
//! `pending -> running -> {completed, failed, awaiting_input}`, with
//! `awaiting_input -> running -> ...` for paused generators.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::execution_records;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    AwaitingInput,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::AwaitingInput => "awaiting_input",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "awaiting_input" => Some(Self::AwaitingInput),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = execution_records)]
pub struct ExecutionRecordRow {
    pub id: String,
    pub function_namespace: String,
    pub function_name: String,
    pub trigger_type: String,
    pub trigger_id: String,
    pub user_id: String,
    pub chat_id: Option<String>,
    pub status: String,
    pub input_json: String,
    pub output_json: Option<String>,
    pub error: Option<String>,
    pub traceback: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i32>,
    pub generator_state: Option<Vec<u8>>,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = execution_records)]
pub struct NewExecutionRecord {
    pub id: String,
    pub function_namespace: String,
    pub function_name: String,
    pub trigger_type: String,
    pub trigger_id: String,
    pub user_id: String,
    pub chat_id: Option<String>,
    pub status: String,
    pub input_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = execution_records)]
pub struct ExecutionRecordUpdate {
    pub status: Option<String>,
    pub output_json: Option<String>,
    pub error: Option<String>,
    pub traceback: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i32>,
    pub generator_state: Option<Vec<u8>>,
}
