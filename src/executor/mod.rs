//! Unified entry point for running one function: resolves the function spec,
//! validates input/output against JSON Schema, routes to the shared worker
//! pool or the sandbox container pool, and keeps the `ExecutionRecord` row
//! in sync. Implements [`JobHandler`] for the `functions` queue.

mod schema_check;

use std::sync::Arc;
use std::time::Instant;

use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;

use crate::database::{
    models::execution::{ExecutionRecordRow, ExecutionRecordUpdate, ExecutionStatus, NewExecutionRecord},
    schema::execution_records::dsl,
    DbPool,
};
use crate::queue::{Job, JobHandler, JobPayload};
use crate::registry::FunctionRegistry;
use crate::sandbox::{ContainerPool, SharedWorkerPool};

pub use schema_check::{coerce_to_schema, SchemaCheckError};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("function {0} not found or inactive")]
    NotFound(String),
    #[error("input validation failed: {0}")]
    Validation(String),
    #[error("output validation failed: {0}")]
    OutputValidation(String),
    #[error("sandbox execution failed: {0}")]
    Infrastructure(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("execution {0} is not awaiting input")]
    NotAwaitingInput(String),
}

pub struct Executor {
    db: DbPool,
    functions: Arc<dyn FunctionRegistry>,
    container_pool: Arc<ContainerPool>,
    worker_pool: Arc<SharedWorkerPool>,
}

impl Executor {
    pub fn new(
        db: DbPool,
        functions: Arc<dyn FunctionRegistry>,
        container_pool: Arc<ContainerPool>,
        worker_pool: Arc<SharedWorkerPool>,
    ) -> Self {
        Self { db, functions, container_pool, worker_pool }
    }

    /// Resolve the `namespace/name` a previously created execution targets,
    /// for callers (the continuation tool) that only hold an `execution_id`.
    pub async fn function_ref_for_execution(&self, execution_id: &str) -> Result<String, ExecutorError> {
        let record = self
            .load_record(execution_id)
            .await?
            .ok_or_else(|| ExecutorError::NotFound(execution_id.to_string()))?;
        Ok(format!("{}/{}", record.function_namespace, record.function_name))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn execute_function(
        &self,
        function_ref: &str,
        input: Value,
        execution_id: &str,
        trigger_type: &str,
        trigger_id: &str,
        user_id: &str,
        chat_id: Option<&str>,
        resume_data: Option<Value>,
    ) -> Result<Value, ExecutorError> {
        let (namespace, name) = crate::registry::parse_ref(function_ref)
            .map_err(ExecutorError::Validation)?;

        let is_resume = resume_data.is_some();
        let existing = self.load_record(execution_id).await?;

        if is_resume {
            let record = existing
                .as_ref()
                .ok_or_else(|| ExecutorError::NotAwaitingInput(execution_id.to_string()))?;
            if record.status != ExecutionStatus::AwaitingInput.as_str() {
                return Err(ExecutorError::NotAwaitingInput(execution_id.to_string()));
            }
        } else if let Some(record) = &existing {
            // At-least-once redelivery of the same `execution_id`: a prior
            // attempt already ran this to completion, so return its stored
            // result rather than re-running the function.
            if record.status == ExecutionStatus::Completed.as_str() {
                let output = record
                    .output_json
                    .as_deref()
                    .map(serde_json::from_str::<Value>)
                    .transpose()
                    .map_err(|e| ExecutorError::Database(e.to_string()))?
                    .unwrap_or(Value::Null);
                return Ok(output);
            }
        } else {
            self.insert_record(NewExecutionRecord {
                id: execution_id.to_string(),
                function_namespace: namespace.to_string(),
                function_name: name.to_string(),
                trigger_type: trigger_type.to_string(),
                trigger_id: trigger_id.to_string(),
                user_id: user_id.to_string(),
                chat_id: chat_id.map(str::to_string),
                status: ExecutionStatus::Pending.as_str().to_string(),
                input_json: input.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            })
            .await?;
        }

        self.mark_running(execution_id).await?;

        let spec = self
            .functions
            .get(namespace, name)
            .filter(|f| f.active)
            .ok_or_else(|| ExecutorError::NotFound(function_ref.to_string()))?;

        let effective_input = if is_resume {
            resume_data.unwrap_or(Value::Null)
        } else {
            coerce_to_schema(&input, &spec.input_schema).map_err(|e| ExecutorError::Validation(e.to_string()))?
        };

        let started = Instant::now();
        let context = serde_json::json!({"user_id": user_id, "execution_id": execution_id});

        let outcome = if spec.shared_pool {
            self.worker_pool
                .execute(namespace, name, effective_input, context, execution_id)
                .await
                .map_err(|e| ExecutorError::Infrastructure(e.to_string()))?
        } else {
            self.container_pool
                .execute(namespace, name, effective_input, context, execution_id)
                .await
                .map_err(|e| ExecutorError::Infrastructure(e.to_string()))?
        };

        let duration_ms = started.elapsed().as_millis() as i32;

        match outcome.status.as_str() {
            "completed" => {
                let result = outcome.result.unwrap_or(Value::Null);
                if let Some(schema) = &spec.output_schema {
                    coerce_to_schema(&result, schema).map_err(|e| ExecutorError::OutputValidation(e.to_string()))?;
                }
                self.mark_completed(execution_id, &result, duration_ms).await?;
                Ok(result)
            }
            "timeout" => {
                let err = outcome.error.unwrap_or_else(|| "timed out".to_string());
                self.mark_failed(execution_id, &err, duration_ms).await?;
                Err(ExecutorError::Infrastructure(err))
            }
            _ => {
                let err = outcome.error.unwrap_or_else(|| "execution failed".to_string());
                self.mark_failed(execution_id, &err, duration_ms).await?;
                Err(ExecutorError::Infrastructure(err))
            }
        }
    }

    // ── record persistence ────────────────────────────────────────────

    async fn load_record(&self, execution_id: &str) -> Result<Option<ExecutionRecordRow>, ExecutorError> {
        let db = self.db.clone();
        let id = execution_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            dsl::execution_records
                .filter(dsl::id.eq(&id))
                .first::<ExecutionRecordRow>(&mut conn)
                .optional()
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| ExecutorError::Database(e.to_string()))?
        .map_err(ExecutorError::Database)
    }

    async fn insert_record(&self, row: NewExecutionRecord) -> Result<(), ExecutorError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            diesel::insert_into(dsl::execution_records)
                .values(&row)
                .execute(&mut conn)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| ExecutorError::Database(e.to_string()))?
        .map_err(ExecutorError::Database)?;
        Ok(())
    }

    async fn update_record(&self, execution_id: &str, update: ExecutionRecordUpdate) -> Result<(), ExecutorError> {
        let db = self.db.clone();
        let id = execution_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            diesel::update(dsl::execution_records.filter(dsl::id.eq(&id)))
                .set(update)
                .execute(&mut conn)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| ExecutorError::Database(e.to_string()))?
        .map_err(ExecutorError::Database)?;
        Ok(())
    }

    async fn mark_running(&self, execution_id: &str) -> Result<(), ExecutorError> {
        self.update_record(
            execution_id,
            ExecutionRecordUpdate {
                status: Some(ExecutionStatus::Running.as_str().to_string()),
                output_json: None,
                error: None,
                traceback: None,
                started_at: Some(chrono::Utc::now().to_rfc3339()),
                completed_at: None,
                duration_ms: None,
                generator_state: None,
            },
        )
        .await
    }

    async fn mark_completed(&self, execution_id: &str, result: &Value, duration_ms: i32) -> Result<(), ExecutorError> {
        self.update_record(
            execution_id,
            ExecutionRecordUpdate {
                status: Some(ExecutionStatus::Completed.as_str().to_string()),
                output_json: Some(result.to_string()),
                error: None,
                traceback: None,
                started_at: None,
                completed_at: Some(chrono::Utc::now().to_rfc3339()),
                duration_ms: Some(duration_ms),
                generator_state: None,
            },
        )
        .await
    }

    async fn mark_failed(&self, execution_id: &str, error: &str, duration_ms: i32) -> Result<(), ExecutorError> {
        self.update_record(
            execution_id,
            ExecutionRecordUpdate {
                status: Some(ExecutionStatus::Failed.as_str().to_string()),
                output_json: None,
                error: Some(error.to_string()),
                traceback: None,
                started_at: None,
                completed_at: Some(chrono::Utc::now().to_rfc3339()),
                duration_ms: Some(duration_ms),
                generator_state: None,
            },
        )
        .await
    }
}

#[async_trait::async_trait]
impl JobHandler for Executor {
    async fn handle(&self, job: &Job) -> Result<Value, String> {
        match &job.payload {
            JobPayload::Function {
                function_namespace,
                function_name,
                input_data,
                execution_id,
                trigger_type,
                trigger_id,
                user_id,
                chat_id,
            } => {
                let function_ref = format!("{function_namespace}/{function_name}");
                self.execute_function(
                    &function_ref,
                    input_data.clone(),
                    execution_id,
                    trigger_type,
                    trigger_id,
                    user_id,
                    chat_id.as_deref(),
                    None,
                )
                .await
                .map_err(|e| e.to_string())
            }
            _ => Err("Executor only handles Function jobs".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryFunctionRegistry;
    use crate::sandbox::{ContainerPool, ContainerRuntime, ExecOutput, PoolConfig, SharedWorkerPool, WorkerPoolConfig};
    use async_trait::async_trait;

    struct DeadRuntime;

    #[async_trait]
    impl ContainerRuntime for DeadRuntime {
        fn binary_name(&self) -> &str {
            "none"
        }
        fn is_available(&self) -> bool {
            false
        }
        async fn pull_image(&self, _image: &str) -> Result<(), String> {
            Err("no runtime in tests".to_string())
        }
        async fn run_detached(&self, _spec: &crate::sandbox::ContainerSpec) -> Result<String, String> {
            Err("no runtime in tests".to_string())
        }
        async fn exec(
            &self,
            _container_id: &str,
            _cmd: &[String],
            _stdin: Option<&[u8]>,
            _timeout_secs: u64,
        ) -> Result<ExecOutput, String> {
            Err("no runtime in tests".to_string())
        }
        async fn inspect_running(&self, _container_id: &str) -> Result<bool, String> {
            Ok(false)
        }
        async fn stop(&self, _container_id: &str) -> Result<(), String> {
            Ok(())
        }
        async fn remove(&self, _container_id: &str) -> Result<(), String> {
            Ok(())
        }
        async fn list_by_prefix(&self, _prefix: &str) -> Result<Vec<String>, String> {
            Ok(Vec::new())
        }
    }

    fn build_executor() -> Executor {
        let db = crate::database::init_in_memory().expect("in-memory db");
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DeadRuntime);
        let container_pool = Arc::new(ContainerPool::new(runtime.clone(), PoolConfig::default()));
        let worker_pool = Arc::new(SharedWorkerPool::new(runtime, WorkerPoolConfig::default()));
        let functions: Arc<dyn FunctionRegistry> = Arc::new(InMemoryFunctionRegistry::empty());
        Executor::new(db, functions, container_pool, worker_pool)
    }

    #[tokio::test]
    async fn redelivery_of_a_completed_execution_returns_the_stored_result_without_rerunning() {
        let executor = build_executor();
        let execution_id = "exec-redelivered";

        executor
            .insert_record(NewExecutionRecord {
                id: execution_id.to_string(),
                function_namespace: "ops".to_string(),
                function_name: "send_email".to_string(),
                trigger_type: "agent_tool_call".to_string(),
                trigger_id: "chat-1".to_string(),
                user_id: "user-1".to_string(),
                chat_id: Some("chat-1".to_string()),
                status: ExecutionStatus::Pending.as_str().to_string(),
                input_json: "{}".to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            })
            .await
            .expect("insert");
        executor
            .mark_completed(execution_id, &serde_json::json!({"ok": true}), 12)
            .await
            .expect("mark completed");

        // `ops/send_email` isn't in the (empty) function registry, so if the
        // idempotency guard didn't short-circuit before the registry lookup,
        // this would fail with `ExecutorError::NotFound` instead.
        let result = executor
            .execute_function(
                "ops/send_email",
                Value::Null,
                execution_id,
                "agent_tool_call",
                "chat-1",
                "user-1",
                Some("chat-1"),
                None,
            )
            .await
            .expect("idempotent redelivery returns the stored result");

        assert_eq!(result, serde_json::json!({"ok": true}));

        let record = executor.load_record(execution_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed.as_str());
    }
}
