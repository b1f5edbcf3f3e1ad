//! Small pool of long-lived, trusted worker containers for functions marked
//! `shared_pool = true`. Unlike [`super::pool::ContainerPool`], workers are
//! never scrubbed or recycled between calls — only by admin operation or
//! process restart.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use super::ipc::{self, ExecAction, ExecRequest, ExecStatus};
use super::pool::{FunctionResult, PoolError};
use super::runtime::{ContainerRuntime, ContainerSpec};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub image: String,
    pub worker_count: usize,
    pub name_prefix: String,
    pub function_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            image: "kiln-sandbox:latest".to_string(),
            worker_count: 2,
            name_prefix: "worker".to_string(),
            function_timeout_secs: 30,
        }
    }
}

struct Worker {
    name: String,
    container_id: String,
}

pub struct SharedWorkerPool {
    runtime: Arc<dyn ContainerRuntime>,
    config: WorkerPoolConfig,
    workers: Mutex<Vec<Worker>>,
    next_worker: AtomicUsize,
}

impl SharedWorkerPool {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: WorkerPoolConfig) -> Self {
        Self {
            runtime,
            config,
            workers: Mutex::new(Vec::new()),
            next_worker: AtomicUsize::new(0),
        }
    }

    /// Pull the image and start `worker_count` containers. Idempotent: does
    /// not create additional workers if already initialised.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return Ok(());
        }
        self.runtime
            .pull_image(&self.config.image)
            .await
            .map_err(PoolError::Runtime)?;
        for i in 0..self.config.worker_count {
            let name = format!("{}-{i}", self.config.name_prefix);
            let spec = ContainerSpec {
                image: self.config.image.clone(),
                name: name.clone(),
                ..Default::default()
            };
            let container_id = self
                .runtime
                .run_detached(&spec)
                .await
                .map_err(PoolError::Runtime)?;
            workers.push(Worker { name, container_id });
        }
        Ok(())
    }

    pub async fn list_workers(&self) -> Vec<String> {
        self.workers.lock().await.iter().map(|w| w.name.clone()).collect()
    }

    /// Scale to exactly `n` workers, starting or stopping containers as needed.
    pub async fn scale(&self, n: usize) -> Result<(), PoolError> {
        let mut workers = self.workers.lock().await;
        while workers.len() < n {
            let i = workers.len();
            let name = format!("{}-{i}", self.config.name_prefix);
            let spec = ContainerSpec {
                image: self.config.image.clone(),
                name: name.clone(),
                ..Default::default()
            };
            let container_id = self
                .runtime
                .run_detached(&spec)
                .await
                .map_err(PoolError::Runtime)?;
            workers.push(Worker { name, container_id });
        }
        while workers.len() > n {
            if let Some(w) = workers.pop() {
                let _ = self.runtime.stop(&w.container_id).await;
                let _ = self.runtime.remove(&w.container_id).await;
            }
        }
        Ok(())
    }

    /// Install the full approved package set into every worker. The protocol
    /// itself is left to the in-container executor (`LoadFunctions` action);
    /// this just fans the request out to every worker.
    pub async fn reload_packages(&self) -> Result<(), PoolError> {
        let workers = self.workers.lock().await;
        for w in workers.iter() {
            let request = ExecRequest {
                action: ExecAction::LoadFunctions,
                execution_id: format!("reload-{}", w.name),
                function_code: None,
                function_namespace: String::new(),
                function_name: String::new(),
                input_data: serde_json::Value::Null,
                context: serde_json::Value::Null,
            };
            ipc::run_exec_protocol(self.runtime.as_ref(), &w.container_id, &request, 30)
                .await
                .map_err(PoolError::Runtime)?;
        }
        Ok(())
    }

    /// Round-robin dispatch to the next worker. The worker is not released
    /// or recycled — it stays `in_use` only for the duration of this call.
    pub async fn execute(
        &self,
        function_namespace: &str,
        function_name: &str,
        input_data: serde_json::Value,
        context: serde_json::Value,
        execution_id: &str,
    ) -> Result<FunctionResult, PoolError> {
        let container_id = {
            let workers = self.workers.lock().await;
            if workers.is_empty() {
                return Err(PoolError::Runtime("shared worker pool has no workers".to_string()));
            }
            let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % workers.len();
            workers[idx].container_id.clone()
        };

        let request = ExecRequest {
            action: ExecAction::Execute,
            execution_id: execution_id.to_string(),
            function_code: None,
            function_namespace: function_namespace.to_string(),
            function_name: function_name.to_string(),
            input_data,
            context,
        };

        let started = Instant::now();
        let outcome = ipc::run_exec_protocol(
            self.runtime.as_ref(),
            &container_id,
            &request,
            self.config.function_timeout_secs,
        )
        .await;

        match outcome {
            Ok(result) => Ok(FunctionResult {
                execution_id: execution_id.to_string(),
                status: match result.status {
                    ExecStatus::Ok => "completed".to_string(),
                    ExecStatus::Error => "failed".to_string(),
                    ExecStatus::Timeout => "timeout".to_string(),
                },
                result: result.result,
                error: result.error,
                duration_ms: result.duration_ms,
            }),
            Err(e) => Ok(FunctionResult {
                execution_id: execution_id.to_string(),
                status: "failed".to_string(),
                result: None,
                error: Some(e),
                duration_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for w in workers.drain(..) {
            let _ = self.runtime.stop(&w.container_id).await;
            let _ = self.runtime.remove(&w.container_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    struct FakeRuntime {
        next_id: AtomicU64,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        fn binary_name(&self) -> &str {
            "fake"
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn pull_image(&self, _image: &str) -> Result<(), String> {
            Ok(())
        }
        async fn run_detached(&self, _spec: &ContainerSpec) -> Result<String, String> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Ok(format!("fake-container-{id}"))
        }
        async fn exec(
            &self,
            _container_id: &str,
            cmd: &[String],
            _stdin: Option<&[u8]>,
            _timeout_secs: u64,
        ) -> Result<super::super::runtime::ExecOutput, String> {
            // Simulate a successful result file read on first poll.
            let joined = cmd.join(" ");
            if joined.contains("exec_result.json") && joined.contains("cat") {
                let result = super::super::ipc::ExecResult {
                    status: ExecStatus::Ok,
                    result: Some(serde_json::json!({"ok": true})),
                    error: None,
                    traceback: None,
                    duration_ms: 1,
                    execution_id: "e1".to_string(),
                };
                return Ok(super::super::runtime::ExecOutput {
                    stdout: serde_json::to_string(&result).unwrap(),
                    stderr: String::new(),
                    exit_code: 0,
                });
            }
            Ok(super::super::runtime::ExecOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
        async fn inspect_running(&self, _container_id: &str) -> Result<bool, String> {
            Ok(true)
        }
        async fn stop(&self, _container_id: &str) -> Result<(), String> {
            Ok(())
        }
        async fn remove(&self, _container_id: &str) -> Result<(), String> {
            Ok(())
        }
        async fn list_by_prefix(&self, _prefix: &str) -> Result<Vec<String>, String> {
            Ok(vec![])
        }
    }

    fn fake_pool(count: usize) -> SharedWorkerPool {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeRuntime { next_id: AtomicU64::new(0) });
        SharedWorkerPool::new(
            runtime,
            WorkerPoolConfig {
                worker_count: count,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn initialize_creates_configured_worker_count() {
        let pool = fake_pool(3);
        pool.initialize().await.unwrap();
        assert_eq!(pool.list_workers().await.len(), 3);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let pool = fake_pool(2);
        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();
        assert_eq!(pool.list_workers().await.len(), 2);
    }

    #[tokio::test]
    async fn execute_round_robins_across_workers() {
        let pool = fake_pool(2);
        pool.initialize().await.unwrap();
        let r1 = pool.execute("ns", "fn", serde_json::json!({}), serde_json::json!({}), "e1").await.unwrap();
        assert_eq!(r1.status, "completed");
    }

    #[tokio::test]
    async fn execute_without_workers_errors() {
        let pool = fake_pool(0);
        let err = pool.execute("ns", "fn", serde_json::json!({}), serde_json::json!({}), "e1").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn scale_up_and_down() {
        let pool = fake_pool(1);
        pool.initialize().await.unwrap();
        pool.scale(3).await.unwrap();
        assert_eq!(pool.list_workers().await.len(), 3);
        pool.scale(1).await.unwrap();
        assert_eq!(pool.list_workers().await.len(), 1);
    }
}
