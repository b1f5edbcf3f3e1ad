//! Container runtime abstraction for the sandbox pool.
//!
//! A pooled container is started once with `run_detached` and then reused
//! across many executions via `exec`, instead of the one-shot `docker run`
//! model used for ad-hoc sidecars. This lets [`super::pool::ContainerPool`]
//! amortise container start-up cost across many function calls.
//!
//! # Auto-detection order
//! 1. Podman — preferred (rootless by default, no daemon required)
//! 2. Docker — fallback
//! 3. `None` if neither is found in `$PATH`

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

pub mod docker;
pub mod podman;

pub use docker::DockerRuntime;
pub use podman::PodmanRuntime;

// ─── ContainerSpec ─────────────────────────────────────────────────────────

/// Configuration for launching one pooled, long-lived sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container image name (e.g. `"kiln-sandbox:py311"`).
    pub image: String,
    /// Name assigned to the container (`kiln-sbx-<n>`), used for discovery
    /// and `list_by_prefix` on daemon restart.
    pub name: String,
    /// Extra environment variables injected into the container.
    pub env: HashMap<String, String>,
    /// Volume mounts in `"host_path:container_path"` format.
    pub volumes: Vec<String>,
    /// Memory limit in megabytes. `None` means no limit imposed by us.
    pub memory_limit_mb: Option<u64>,
    /// When `true` the container starts with `--network=none`.
    pub network_disabled: bool,
    /// Explicit docker/podman network to join. Ignored when `network_disabled`.
    pub network: Option<String>,
    /// Entrypoint command that keeps the container alive (e.g. `"sleep"` +
    /// `["infinity"]`), since pooled containers are not one-shot.
    pub command: String,
    pub args: Vec<String>,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            image: String::new(),
            name: String::new(),
            env: HashMap::new(),
            volumes: vec![],
            memory_limit_mb: None,
            network_disabled: false,
            network: None,
            command: "sleep".to_string(),
            args: vec!["infinity".to_string()],
        }
    }
}

/// Output of a single `exec` call inside a running container.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ─── ContainerRuntime trait ───────────────────────────────────────────────

/// Abstraction over container runtimes (Docker, Podman, …) for the pooled
/// sandbox. Unlike a one-shot sidecar, every method here operates on a
/// named, already-running container rather than piping stdin/stdout of a
/// freshly spawned `Child`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Return the CLI binary name used by this runtime (e.g. `"docker"`).
    fn binary_name(&self) -> &str;

    /// Return `true` if the runtime binary is reachable on the current system.
    fn is_available(&self) -> bool;

    /// Pull `image` if it is not already present locally.
    async fn pull_image(&self, image: &str) -> Result<(), String>;

    /// Start a detached, long-lived container from `spec`. Returns the
    /// runtime-assigned container ID.
    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String, String>;

    /// Run `cmd` inside the already-running container `container_id` and
    /// collect its stdout/stderr/exit code. `stdin` is written before
    /// closing the pipe, if provided.
    async fn exec(
        &self,
        container_id: &str,
        cmd: &[String],
        stdin: Option<&[u8]>,
        timeout_secs: u64,
    ) -> Result<ExecOutput, String>;

    /// Return `true` if `container_id` is still running.
    async fn inspect_running(&self, container_id: &str) -> Result<bool, String>;

    /// Stop a running container by ID (SIGTERM, grace period, SIGKILL).
    async fn stop(&self, container_id: &str) -> Result<(), String>;

    /// Remove a stopped container by ID.
    async fn remove(&self, container_id: &str) -> Result<(), String>;

    /// List container IDs whose name starts with `prefix`.
    ///
    /// Used on daemon startup to recover pooled containers left running
    /// from a previous process (e.g. after a crash).
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, String>;
}

// ─── Auto-detection ────────────────────────────────────────────────────────

/// Detect the best available container runtime.
///
/// Checks Podman first (rootless = smaller attack surface), then Docker.
/// Returns `None` if neither binary is found in `$PATH`.
pub fn detect_runtime() -> Option<Arc<dyn ContainerRuntime>> {
    if let Ok(path) = which::which("podman") {
        let binary = path.to_string_lossy().into_owned();
        return Some(Arc::new(PodmanRuntime::new(binary)));
    }
    if let Ok(path) = which::which("docker") {
        let binary = path.to_string_lossy().into_owned();
        return Some(Arc::new(DockerRuntime::new(binary)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_spec_defaults_to_sleep_infinity() {
        let spec = ContainerSpec::default();
        assert_eq!(spec.command, "sleep");
        assert_eq!(spec.args, vec!["infinity".to_string()]);
        assert!(spec.image.is_empty());
        assert!(!spec.network_disabled);
    }

    #[test]
    fn exec_output_success_checks_exit_code() {
        let out = ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(out.success());
        let out = ExecOutput {
            exit_code: 1,
            ..out
        };
        assert!(!out.success());
    }

    #[test]
    fn detect_runtime_does_not_panic() {
        let _ = detect_runtime();
    }
}
