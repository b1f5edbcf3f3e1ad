//! Warm pool of generic sandbox containers for executing untrusted functions.
//!
//! Containers are created once (`pool-<n>`) and reused across many
//! executions, scrubbed via [`super::ipc`] between uses rather than torn
//! down. A container is destroyed, not recycled, once it is tainted by a
//! failed execution or has served `pool_max_executions` calls.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use super::ipc::{self, ExecAction, ExecRequest, ExecStatus};
use super::runtime::{ContainerRuntime, ContainerSpec};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out waiting for an available sandbox container")]
    Timeout,
    #[error("container runtime error: {0}")]
    Runtime(String),
    #[error("execution {execution_id} failed: {message}")]
    ExecutionFailed {
        execution_id: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Idle,
    InUse,
    Destroying,
}

/// One managed sandbox container.
#[derive(Debug, Clone)]
pub struct PooledContainer {
    pub name: String,
    pub container_id: String,
    pub executions: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub state: ContainerState,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub image: String,
    pub pool_min_size: usize,
    pub pool_min_idle: usize,
    pub pool_max_size: usize,
    pub pool_max_executions: u64,
    pub function_timeout_secs: u64,
    pub name_prefix: String,
    pub network_disabled: bool,
    pub docker_network: Option<String>,
    pub memory_limit_mb: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            image: "kiln-sandbox:latest".to_string(),
            pool_min_size: 2,
            pool_min_idle: 1,
            pool_max_size: 8,
            pool_max_executions: 200,
            function_timeout_secs: 30,
            name_prefix: "pool".to_string(),
            network_disabled: true,
            docker_network: None,
            memory_limit_mb: Some(512),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResult {
    pub execution_id: String,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub max_size: usize,
}

struct Inner {
    idle: VecDeque<PooledContainer>,
    in_use: std::collections::HashMap<String, PooledContainer>,
}

/// Container pool for sandboxed function execution.
///
/// Cloning is cheap — all shared state is behind `Arc`, mirroring the
/// teacher's pattern for long-lived service handles (e.g. `EventBus`).
#[derive(Clone)]
pub struct ContainerPool {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<PoolConfig>,
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    next_id: Arc<AtomicU64>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl ContainerPool {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: PoolConfig) -> Self {
        Self {
            runtime,
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                idle: VecDeque::new(),
                in_use: std::collections::HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Discover pre-existing containers, restart stopped ones, seed the
    /// idle queue, then scale up to `pool_min_size`. Idempotent: safe to
    /// call again after a leader restart without recreating live containers.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        self.discover_existing_containers().await?;

        let current = {
            let inner = self.inner.lock().await;
            inner.idle.len() + inner.in_use.len()
        };
        if current < self.config.pool_min_size {
            self.scale_up(self.config.pool_min_size - current).await?;
        }

        self.spawn_background_loops();
        Ok(())
    }

    async fn discover_existing_containers(&self) -> Result<(), PoolError> {
        let prefix = format!("{}-", self.config.name_prefix);
        let names = self
            .runtime
            .list_by_prefix(&prefix)
            .await
            .map_err(PoolError::Runtime)?;

        let mut max_id = 0u64;
        let mut inner = self.inner.lock().await;
        for name in names {
            let Some(suffix) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(n) = suffix.parse::<u64>() else {
                continue;
            };
            max_id = max_id.max(n + 1);

            let running = self
                .runtime
                .inspect_running(&name)
                .await
                .unwrap_or(false);
            if !running {
                // Best-effort restart is not universally supported by the
                // CLI `run -d` model; treat as unrecoverable and skip.
                continue;
            }

            inner.idle.push_back(PooledContainer {
                container_id: name.clone(),
                name,
                executions: 0,
                created_at: chrono::Utc::now(),
                state: ContainerState::Idle,
            });
        }
        self.next_id.store(max_id, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_background_loops(&self) {
        let replenish_self = self.clone();
        tokio::spawn(async move { replenish_self.replenish_loop().await });

        let health_self = self.clone();
        tokio::spawn(async move { health_self.health_loop().await });
    }

    async fn replenish_loop(&self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(30)) => {}
            }

            loop {
                let (idle_len, total) = {
                    let inner = self.inner.lock().await;
                    (inner.idle.len(), inner.idle.len() + inner.in_use.len())
                };
                if idle_len >= self.config.pool_min_idle || total >= self.config.pool_max_size {
                    break;
                }
                if self.create_one().await.is_err() {
                    break;
                }
            }
        }
    }

    async fn health_loop(&self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(60)).await;

            let idle_snapshot: Vec<PooledContainer> = {
                let inner = self.inner.lock().await;
                inner.idle.iter().cloned().collect()
            };

            for c in idle_snapshot {
                let healthy = self
                    .runtime
                    .inspect_running(&c.container_id)
                    .await
                    .unwrap_or(false);
                if !healthy {
                    let mut inner = self.inner.lock().await;
                    inner.idle.retain(|x| x.name != c.name);
                    drop(inner);
                    let _ = self.runtime.remove(&c.container_id).await;
                    tracing::warn!(container = %c.name, "sandbox pool: idle container failed health check, destroyed");
                    self.notify.notify_waiters();
                }
            }
        }
    }

    async fn create_one(&self) -> Result<(), PoolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}-{id}", self.config.name_prefix);

        let spec = ContainerSpec {
            image: self.config.image.clone(),
            name: name.clone(),
            network_disabled: self.config.network_disabled,
            network: self.config.docker_network.clone(),
            memory_limit_mb: self.config.memory_limit_mb,
            ..ContainerSpec::default()
        };

        let container_id = self
            .runtime
            .run_detached(&spec)
            .await
            .map_err(PoolError::Runtime)?;

        let mut inner = self.inner.lock().await;
        inner.idle.push_back(PooledContainer {
            name,
            container_id,
            executions: 0,
            created_at: chrono::Utc::now(),
            state: ContainerState::Idle,
        });
        self.notify.notify_waiters();
        Ok(())
    }

    async fn scale_up(&self, count: usize) -> Result<(), PoolError> {
        for _ in 0..count {
            self.create_one().await?;
        }
        Ok(())
    }

    /// Remove one container from the idle queue, blocking up to `timeout`
    /// while signalling the replenisher if idle is empty.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledContainer, PoolError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(mut c) = inner.idle.pop_front() {
                    c.state = ContainerState::InUse;
                    inner.in_use.insert(c.name.clone(), c.clone());
                    if inner.idle.len() < self.config.pool_min_idle {
                        self.notify.notify_waiters();
                    }
                    return Ok(c);
                }
            }
            self.notify.notify_waiters();

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::Timeout);
            }
            let _ = tokio::time::timeout(remaining.min(Duration::from_millis(200)), self.notify.notified()).await;
        }
    }

    /// Return a container to the idle queue, or destroy it if tainted / past
    /// its execution budget.
    pub async fn release(&self, name: &str, tainted: bool) {
        let container = {
            let mut inner = self.inner.lock().await;
            inner.in_use.remove(name)
        };
        let Some(mut container) = container else {
            return;
        };

        if tainted || container.executions >= self.config.pool_max_executions {
            let _ = self.runtime.stop(&container.container_id).await;
            let _ = self.runtime.remove(&container.container_id).await;
            self.notify.notify_waiters();
            return;
        }

        match ipc::scrub(self.runtime.as_ref(), &container.container_id).await {
            Ok(()) => {
                container.state = ContainerState::Idle;
                let mut inner = self.inner.lock().await;
                inner.idle.push_back(container);
                self.notify.notify_waiters();
            }
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "sandbox pool: scrub failed, destroying container");
                let _ = self.runtime.stop(&container.container_id).await;
                let _ = self.runtime.remove(&container.container_id).await;
                self.notify.notify_waiters();
            }
        }
    }

    /// Acquire a container, run the function via the file-based IPC
    /// protocol, and release it (tainted on any error path).
    pub async fn execute(
        &self,
        function_namespace: &str,
        function_name: &str,
        input_data: serde_json::Value,
        context: serde_json::Value,
        execution_id: &str,
    ) -> Result<FunctionResult, PoolError> {
        let mut container = self
            .acquire(Duration::from_secs(self.config.function_timeout_secs))
            .await?;

        let request = ExecRequest {
            action: ExecAction::Execute,
            execution_id: execution_id.to_string(),
            function_code: None,
            function_namespace: function_namespace.to_string(),
            function_name: function_name.to_string(),
            input_data,
            context,
        };

        let outcome = ipc::run_exec_protocol(
            self.runtime.as_ref(),
            &container.container_id,
            &request,
            self.config.function_timeout_secs,
        )
        .await;

        container.executions += 1;
        {
            let mut inner = self.inner.lock().await;
            if let Some(c) = inner.in_use.get_mut(&container.name) {
                c.executions = container.executions;
            }
        }

        match outcome {
            Ok(result) => {
                self.release(&container.name, false).await;
                Ok(FunctionResult {
                    execution_id: result.execution_id,
                    status: match result.status {
                        ExecStatus::Ok => "completed".to_string(),
                        ExecStatus::Error => "failed".to_string(),
                        ExecStatus::Timeout => "timeout".to_string(),
                    },
                    result: result.result,
                    error: result.error,
                    duration_ms: result.duration_ms,
                })
            }
            Err(e) => {
                self.release(&container.name, true).await;
                Err(PoolError::ExecutionFailed {
                    execution_id: execution_id.to_string(),
                    message: e,
                })
            }
        }
    }

    /// Add or remove containers to bring the pool to exactly `target`
    /// idle+in_use containers. Returns `(added, removed)`.
    pub async fn scale(&self, target: usize) -> Result<(usize, usize), PoolError> {
        let current = {
            let inner = self.inner.lock().await;
            inner.idle.len() + inner.in_use.len()
        };

        if target > current {
            let added = target - current;
            self.scale_up(added).await?;
            Ok((added, 0))
        } else if target < current {
            let to_remove = current - target;
            let mut removed = 0;
            for _ in 0..to_remove {
                let victim = {
                    let mut inner = self.inner.lock().await;
                    inner.idle.pop_front()
                };
                let Some(c) = victim else { break };
                let _ = self.runtime.stop(&c.container_id).await;
                let _ = self.runtime.remove(&c.container_id).await;
                removed += 1;
            }
            Ok((0, removed))
        } else {
            Ok((0, 0))
        }
    }

    /// Pull the latest sandbox image and mark all idle containers tainted
    /// so the next replenish cycle rebuilds them with fresh packages.
    pub async fn reload_packages(&self) -> Result<(), PoolError> {
        self.runtime
            .pull_image(&self.config.image)
            .await
            .map_err(PoolError::Runtime)?;

        let victims: Vec<PooledContainer> = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.idle).into()
        };
        for c in victims {
            let _ = self.runtime.stop(&c.container_id).await;
            let _ = self.runtime.remove(&c.container_id).await;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            idle: inner.idle.len(),
            in_use: inner.in_use.len(),
            max_size: self.config.pool_max_size,
        }
    }

    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        let all: Vec<PooledContainer> = inner
            .idle
            .drain(..)
            .chain(inner.in_use.drain().map(|(_, c)| c))
            .collect();
        drop(inner);
        for c in all {
            let _ = self.runtime.stop(&c.container_id).await;
            let _ = self.runtime.remove(&c.container_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering as AOrd};

    struct FakeRuntime {
        next: AtomicU64,
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
        async fn run_detached(&self, spec: &ContainerSpec) -> Result<String, String> {
            let id = self.next.fetch_add(1, AOrd::SeqCst);
            Ok(format!("{}-cid-{id}", spec.name))
        }
        async fn exec(
            &self,
            _container_id: &str,
            cmd: &[String],
            _stdin: Option<&[u8]>,
            _timeout_secs: u64,
        ) -> Result<super::super::runtime::ExecOutput, String> {
            // Pretend every write/read/rm succeeds with empty output, which
            // makes `scrub` succeed and `read_file` report "not present yet".
            let _ = cmd;
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

    fn pool() -> ContainerPool {
        let runtime = Arc::new(FakeRuntime {
            next: AtomicU64::new(0),
        });
        ContainerPool::new(
            runtime,
            PoolConfig {
                pool_min_size: 2,
                pool_min_idle: 1,
                pool_max_size: 4,
                ..PoolConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn initialize_scales_to_min_size() {
        let p = pool();
        p.initialize().await.unwrap();
        let stats = p.stats().await;
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn acquire_and_release_roundtrip() {
        let p = pool();
        p.initialize().await.unwrap();

        let c = p.acquire(Duration::from_secs(1)).await.unwrap();
        let mid = p.stats().await;
        assert_eq!(mid.in_use, 1);
        assert_eq!(mid.idle, 1);

        p.release(&c.name, false).await;
        let after = p.stats().await;
        assert_eq!(after.in_use, 0);
        assert_eq!(after.idle, 2);
    }

    #[tokio::test]
    async fn release_tainted_destroys_container() {
        let p = pool();
        p.initialize().await.unwrap();
        let c = p.acquire(Duration::from_secs(1)).await.unwrap();
        p.release(&c.name, true).await;
        let stats = p.stats().await;
        assert_eq!(stats.in_use, 0);
        // Destroyed, not returned to idle; original 2 minus the 1 acquired.
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn acquire_times_out_when_pool_exhausted() {
        let p = ContainerPool::new(
            Arc::new(FakeRuntime {
                next: AtomicU64::new(0),
            }),
            PoolConfig {
                pool_min_size: 1,
                pool_min_idle: 0,
                pool_max_size: 1,
                ..PoolConfig::default()
            },
        );
        p.initialize().await.unwrap();
        let _c = p.acquire(Duration::from_millis(50)).await.unwrap();
        let err = p.acquire(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout));
    }

    #[tokio::test]
    async fn scale_up_adds_containers() {
        let p = pool();
        p.initialize().await.unwrap();
        let (added, removed) = p.scale(4).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(removed, 0);
        assert_eq!(p.stats().await.idle, 4);
    }
}
