//! Wire shapes for queued jobs and their status/result records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two durable queues jobs are dispatched to; each has independent
/// worker concurrency (`queue_function_concurrency` / `queue_agent_concurrency`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    Functions,
    Agents,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Functions => "functions",
            QueueName::Agents => "agents",
        }
    }
}

/// Payload carried by one job, tagged by `kind` in the `jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Function {
        function_namespace: String,
        function_name: String,
        input_data: Value,
        execution_id: String,
        trigger_type: String,
        trigger_id: String,
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chat_id: Option<String>,
    },
    AgentMessage {
        chat_id: String,
        user_id: String,
        user_token: String,
        content: String,
        channel_id: String,
    },
    AgentResume {
        approval_id: String,
        approved: bool,
        channel_id: String,
    },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Function { .. } => "function",
            JobPayload::AgentMessage { .. } => "agent_message",
            JobPayload::AgentResume { .. } => "agent_resume",
        }
    }

    pub fn queue_name(&self) -> QueueName {
        match self {
            JobPayload::Function { .. } => QueueName::Functions,
            JobPayload::AgentMessage { .. } | JobPayload::AgentResume { .. } => QueueName::Agents,
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        match self {
            JobPayload::Function { execution_id, .. } => Some(execution_id),
            _ => None,
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            JobPayload::Function { .. } => None,
            JobPayload::AgentMessage { channel_id, .. } => Some(channel_id),
            JobPayload::AgentResume { channel_id, .. } => Some(channel_id),
        }
    }
}

/// A fully materialised job, as handed to a [`super::service::JobHandler`].
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub payload: JobPayload,
    pub attempt: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub queue: String,
    pub kind: String,
    pub enqueued_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome published to the per-execution completion channel
/// (`job:done:<execution_id>`), delivered exactly once per execution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { result: Value },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job_id: String,
    pub payload: JobPayload,
    pub error: String,
    pub attempts: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_payload_routes_to_functions_queue() {
        let p = JobPayload::Function {
            function_namespace: "demo".into(),
            function_name: "hello".into(),
            input_data: serde_json::json!({}),
            execution_id: "ex-1".into(),
            trigger_type: "manual".into(),
            trigger_id: "t1".into(),
            user_id: "u1".into(),
            chat_id: None,
        };
        assert_eq!(p.queue_name(), QueueName::Functions);
        assert_eq!(p.kind(), "function");
        assert_eq!(p.execution_id(), Some("ex-1"));
    }

    #[test]
    fn agent_message_routes_to_agents_queue() {
        let p = JobPayload::AgentMessage {
            chat_id: "c1".into(),
            user_id: "u1".into(),
            user_token: "tok".into(),
            content: "hi".into(),
            channel_id: "ch1".into(),
        };
        assert_eq!(p.queue_name(), QueueName::Agents);
        assert_eq!(p.channel_id(), Some("ch1"));
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let p = JobPayload::AgentResume {
            approval_id: "a1".into(),
            approved: true,
            channel_id: "ch1".into(),
        };
        let s = serde_json::to_string(&p).unwrap();
        assert!(s.contains("\"kind\":\"agent_resume\""));
    }
}
