//! Database model for durable [`Job`](crate::queue::Job) rows.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::jobs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = jobs)]
pub struct JobRow {
    pub id: String,
    pub queue_name: String,
    pub kind: String,
    pub payload_json: String,
    pub attempt: i32,
    pub status: String,
    pub channel_id: Option<String>,
    pub enqueued_at: String,
    pub defer_until: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: String,
    pub queue_name: String,
    pub kind: String,
    pub payload_json: String,
    pub attempt: i32,
    pub status: String,
    pub channel_id: Option<String>,
    pub enqueued_at: String,
    pub defer_until: Option<String>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = jobs)]
pub struct JobUpdate {
    pub attempt: Option<i32>,
    pub status: Option<String>,
    pub defer_until: Option<Option<String>>,
}
