//! Durable at-least-once job dispatch with status tracking, completion
//! notifications, timed synchronous waits, and a dead-letter sink.
//!
//! The durable part is the `jobs` table (survives a daemon restart); status
//! and result records are ephemeral, TTL'd entries mirroring the Redis
//! `SET ... EX` keys the system this was distilled from used — see
//! [`super::ttl_store::TtlStore`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use diesel::prelude::*;
use thiserror::Error;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, Notify};

use crate::database::{models::job::{JobRow, JobStatus, JobUpdate, NewJob}, schema::jobs::dsl, DbPool};
use crate::event_bus::{AppEvent, EventBus};

use super::envelope::{DeadLetter, Job, JobOutcome, JobPayload, JobStatusRecord, QueueName};
use super::ttl_store::TtlStore;

const STATUS_RESULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// Capped exponential backoff: `base * 2^(attempt - 1)`, capped at 20x the
/// base delay so a low `retry_delay` doesn't grow unbounded across retries.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(20);
    (base * factor).min(base * 20)
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} timed out waiting for completion")]
    Timeout(String),
    #[error("job {0} failed: {1}")]
    JobFailed(String, String),
    #[error("database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub function_concurrency: usize,
    pub agent_concurrency: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub default_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            function_concurrency: 4,
            agent_concurrency: 4,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Implemented by whatever subsystem actually performs work for a queue —
/// the executor for `functions`, the agent engine for `agents`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<Value, String>;
}

struct Shared {
    db: DbPool,
    bus: Arc<dyn EventBus>,
    status: TtlStore<JobStatusRecord>,
    result: TtlStore<Value>,
    dlq: Mutex<Vec<DeadLetter>>,
    completion: Mutex<HashMap<String, broadcast::Sender<JobOutcome>>>,
    wake: HashMap<&'static str, Arc<Notify>>,
    dequeue_lock: Mutex<()>,
    config: QueueConfig,
}

#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    pub fn new(db: DbPool, bus: Arc<dyn EventBus>, config: QueueConfig) -> Self {
        let mut wake = HashMap::new();
        wake.insert("functions", Arc::new(Notify::new()));
        wake.insert("agents", Arc::new(Notify::new()));

        Self {
            shared: Arc::new(Shared {
                db,
                bus,
                status: TtlStore::new(),
                result: TtlStore::new(),
                dlq: Mutex::new(Vec::new()),
                completion: Mutex::new(HashMap::new()),
                wake,
                dequeue_lock: Mutex::new(()),
                config,
            }),
        }
    }

    // ── Enqueue API ────────────────────────────────────────────────────

    pub async fn enqueue_function(
        &self,
        function_namespace: impl Into<String>,
        function_name: impl Into<String>,
        input_data: Value,
        execution_id: impl Into<String>,
        trigger_type: impl Into<String>,
        trigger_id: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: Option<String>,
        delay: Option<Duration>,
    ) -> Result<String, QueueError> {
        let payload = JobPayload::Function {
            function_namespace: function_namespace.into(),
            function_name: function_name.into(),
            input_data,
            execution_id: execution_id.into(),
            trigger_type: trigger_type.into(),
            trigger_id: trigger_id.into(),
            user_id: user_id.into(),
            chat_id,
        };
        self.enqueue(payload, None, delay).await
    }

    pub async fn enqueue_agent_message(
        &self,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        user_token: impl Into<String>,
        content: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Result<String, QueueError> {
        let channel_id = channel_id.into();
        let payload = JobPayload::AgentMessage {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            user_token: user_token.into(),
            content: content.into(),
            channel_id: channel_id.clone(),
        };
        self.enqueue(payload, Some(channel_id), None).await
    }

    pub async fn enqueue_agent_resume(
        &self,
        approval_id: impl Into<String>,
        approved: bool,
        channel_id: impl Into<String>,
    ) -> Result<String, QueueError> {
        let channel_id = channel_id.into();
        let payload = JobPayload::AgentResume {
            approval_id: approval_id.into(),
            approved,
            channel_id: channel_id.clone(),
        };
        self.enqueue(payload, Some(channel_id), None).await
    }

    async fn enqueue(
        &self,
        payload: JobPayload,
        channel_id: Option<String>,
        delay: Option<Duration>,
    ) -> Result<String, QueueError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let queue_name = payload.queue_name();
        let now = chrono::Utc::now();
        let defer_until = delay.map(|d| (now + chrono::Duration::from_std(d).unwrap_or_default()).to_rfc3339());

        let row = NewJob {
            id: job_id.clone(),
            queue_name: queue_name.as_str().to_string(),
            kind: payload.kind().to_string(),
            payload_json: serde_json::to_string(&payload).map_err(|e| QueueError::Database(e.to_string()))?,
            attempt: 0,
            status: JobStatus::Queued.as_str().to_string(),
            channel_id: channel_id.clone(),
            enqueued_at: now.to_rfc3339(),
            defer_until,
        };

        let shared = self.shared.clone();
        let row_clone = row.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = shared.db.get().map_err(|e| e.to_string())?;
            diesel::insert_into(dsl::jobs)
                .values(&row_clone)
                .execute(&mut conn)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?
        .map_err(QueueError::Database)?;

        self.shared
            .status
            .set(
                job_id.clone(),
                JobStatusRecord {
                    status: JobStatus::Queued.as_str().to_string(),
                    execution_id: payload.execution_id().map(str::to_string),
                    channel_id,
                    queue: queue_name.as_str().to_string(),
                    kind: payload.kind().to_string(),
                    enqueued_at: row.enqueued_at.clone(),
                    error: None,
                },
                STATUS_RESULT_TTL,
            )
            .await;

        let _ = self.shared.bus.publish(AppEvent::JobQueued {
            job_id: job_id.clone(),
            queue_name: queue_name.as_str().to_string(),
        });

        if let Some(notify) = self.shared.wake.get(queue_name.as_str()) {
            notify.notify_waiters();
        }

        Ok(job_id)
    }

    // ── Status / result lookups ─────────────────────────────────────────

    pub async fn get_status(&self, job_id: &str) -> Option<JobStatusRecord> {
        self.shared.status.get(job_id).await
    }

    pub async fn get_result(&self, job_id: &str) -> Option<Value> {
        self.shared.result.get(job_id).await
    }

    /// Enqueue a function job and block until it completes or `timeout` elapses.
    pub async fn enqueue_and_wait(
        &self,
        function_namespace: impl Into<String>,
        function_name: impl Into<String>,
        input_data: Value,
        execution_id: impl Into<String>,
        trigger_type: impl Into<String>,
        trigger_id: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Value, QueueError> {
        let execution_id = execution_id.into();
        let timeout = timeout.unwrap_or(self.shared.config.default_timeout);

        let mut rx = self.subscribe_completion(&execution_id).await;

        let job_id = self
            .enqueue_function(
                function_namespace,
                function_name,
                input_data,
                execution_id.clone(),
                trigger_type,
                trigger_id,
                user_id,
                chat_id,
                None,
            )
            .await?;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Ok(JobOutcome::Completed { result })) => Ok(result),
            Ok(Ok(JobOutcome::Failed { error })) => Err(QueueError::JobFailed(job_id, error)),
            Ok(Err(_)) => {
                // Channel closed without a message; fall back to polling
                // stored status in case the publish raced the subscribe.
                match self.get_status(&job_id).await {
                    Some(s) if s.status == "completed" => {
                        Ok(self.get_result(&job_id).await.unwrap_or(Value::Null))
                    }
                    Some(s) if s.status == "failed" => {
                        Err(QueueError::JobFailed(job_id, s.error.unwrap_or_default()))
                    }
                    _ => Err(QueueError::Timeout(job_id)),
                }
            }
            Err(_) => Err(QueueError::Timeout(job_id)),
        }
    }

    async fn subscribe_completion(&self, execution_id: &str) -> broadcast::Receiver<JobOutcome> {
        let mut map = self.shared.completion.lock().await;
        map.entry(execution_id.to_string())
            .or_insert_with(|| broadcast::channel(8).0)
            .subscribe()
    }

    pub async fn dlq_snapshot(&self) -> Vec<DeadLetter> {
        self.shared.dlq.lock().await.clone()
    }

    // ── Worker loop ──────────────────────────────────────────────────────

    /// Spawn `concurrency` worker tasks draining `queue_name` and dispatching
    /// to `handler`. Returns immediately; workers run until the process exits.
    pub fn spawn_workers(&self, queue_name: QueueName, concurrency: usize, handler: Arc<dyn JobHandler>) {
        for _ in 0..concurrency {
            let queue = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move { queue.worker_loop(queue_name, handler).await });
        }
    }

    async fn worker_loop(&self, queue_name: QueueName, handler: Arc<dyn JobHandler>) {
        let notify = self
            .shared
            .wake
            .get(queue_name.as_str())
            .expect("wake notify registered for every queue")
            .clone();

        loop {
            match self.dequeue_one(queue_name).await {
                Ok(Some(row)) => {
                    self.run_job(row, &handler).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = notify.notified() => {}
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(queue = queue_name.as_str(), error = %e, "queue: dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn dequeue_one(&self, queue_name: QueueName) -> Result<Option<JobRow>, QueueError> {
        let _guard = self.shared.dequeue_lock.lock().await;
        let shared = self.shared.clone();
        let queue = queue_name.as_str().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let mut conn = shared.db.get().map_err(|e| e.to_string())?;
            conn.transaction::<Option<JobRow>, diesel::result::Error, _>(|conn| {
                let candidate = dsl::jobs
                    .filter(dsl::queue_name.eq(&queue))
                    .filter(dsl::status.eq(JobStatus::Queued.as_str()))
                    .filter(dsl::defer_until.is_null().or(dsl::defer_until.le(&now)))
                    .order(dsl::enqueued_at.asc())
                    .first::<JobRow>(conn)
                    .optional()?;

                let Some(row) = candidate else { return Ok(None) };

                diesel::update(dsl::jobs.filter(dsl::id.eq(&row.id)))
                    .set(JobUpdate {
                        attempt: None,
                        status: Some(JobStatus::Running.as_str().to_string()),
                        defer_until: None,
                    })
                    .execute(conn)?;

                Ok(Some(row))
            })
            .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?
        .map_err(QueueError::Database)
    }

    async fn run_job(&self, row: JobRow, handler: &Arc<dyn JobHandler>) {
        let payload: JobPayload = match serde_json::from_str(&row.payload_json) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(job_id = %row.id, error = %e, "queue: malformed payload, dropping");
                return;
            }
        };

        let job = Job {
            job_id: row.id.clone(),
            payload: payload.clone(),
            attempt: row.attempt,
        };

        match handler.handle(&job).await {
            Ok(result) => self.complete_job(&row, &payload, result).await,
            Err(error) => self.fail_or_retry(&row, &payload, error).await,
        }
    }

    async fn complete_job(&self, row: &JobRow, payload: &JobPayload, result: Value) {
        self.update_row_status(&row.id, JobStatus::Completed, None)
            .await;

        self.shared
            .status
            .set(
                row.id.clone(),
                JobStatusRecord {
                    status: "completed".to_string(),
                    execution_id: payload.execution_id().map(str::to_string),
                    channel_id: row.channel_id.clone(),
                    queue: row.queue_name.clone(),
                    kind: row.kind.clone(),
                    enqueued_at: row.enqueued_at.clone(),
                    error: None,
                },
                STATUS_RESULT_TTL,
            )
            .await;
        self.shared.result.set(row.id.clone(), result.clone(), STATUS_RESULT_TTL).await;

        let _ = self.shared.bus.publish(AppEvent::JobCompleted {
            job_id: row.id.clone(),
            execution_id: payload.execution_id().map(str::to_string),
        });

        if let Some(execution_id) = payload.execution_id() {
            self.publish_completion(execution_id, JobOutcome::Completed { result })
                .await;
        }
    }

    async fn fail_or_retry(&self, row: &JobRow, payload: &JobPayload, error: String) {
        let next_attempt = row.attempt + 1;

        if (next_attempt as u32) <= self.shared.config.max_retries {
            let defer_until = chrono::Utc::now()
                + chrono::Duration::from_std(backoff_delay(self.shared.config.retry_delay, next_attempt as u32))
                    .unwrap_or_default();

            let shared = self.shared.clone();
            let job_id = row.id.clone();
            let defer_str = defer_until.to_rfc3339();
            let _ = tokio::task::spawn_blocking(move || {
                let mut conn = shared.db.get().map_err(|e| e.to_string())?;
                diesel::update(dsl::jobs.filter(dsl::id.eq(&job_id)))
                    .set(JobUpdate {
                        attempt: Some(next_attempt),
                        status: Some(JobStatus::Queued.as_str().to_string()),
                        defer_until: Some(Some(defer_str)),
                    })
                    .execute(&mut conn)
                    .map_err(|e| e.to_string())
            })
            .await;

            tracing::warn!(job_id = %row.id, attempt = next_attempt, "queue: job failed, retry scheduled");
            return;
        }

        self.update_row_status(&row.id, JobStatus::Failed, None).await;

        self.shared.dlq.lock().await.push(DeadLetter {
            job_id: row.id.clone(),
            payload: payload.clone(),
            error: error.clone(),
            attempts: next_attempt,
        });

        self.shared
            .status
            .set(
                row.id.clone(),
                JobStatusRecord {
                    status: "failed".to_string(),
                    execution_id: payload.execution_id().map(str::to_string),
                    channel_id: row.channel_id.clone(),
                    queue: row.queue_name.clone(),
                    kind: row.kind.clone(),
                    enqueued_at: row.enqueued_at.clone(),
                    error: Some(error.clone()),
                },
                STATUS_RESULT_TTL,
            )
            .await;

        let _ = self.shared.bus.publish(AppEvent::JobFailed {
            job_id: row.id.clone(),
            error: error.clone(),
            dead_lettered: true,
        });

        if let Some(execution_id) = payload.execution_id() {
            self.publish_completion(execution_id, JobOutcome::Failed { error })
                .await;
        }
    }

    async fn update_row_status(&self, job_id: &str, status: JobStatus, defer_until: Option<Option<String>>) {
        let shared = self.shared.clone();
        let job_id = job_id.to_string();
        let _ = tokio::task::spawn_blocking(move || {
            let mut conn = shared.db.get().map_err(|e| e.to_string())?;
            diesel::update(dsl::jobs.filter(dsl::id.eq(&job_id)))
                .set(JobUpdate {
                    attempt: None,
                    status: Some(status.as_str().to_string()),
                    defer_until,
                })
                .execute(&mut conn)
                .map_err(|e| e.to_string())
        })
        .await;
    }

    async fn publish_completion(&self, execution_id: &str, outcome: JobOutcome) {
        let map = self.shared.completion.lock().await;
        if let Some(tx) = map.get(execution_id) {
            let _ = tx.send(outcome);
        }
    }
}
