//! Podman runtime backing pooled sandbox containers.
//!
//! Podman is API-compatible with Docker but runs rootless by default — no
//! daemon is required, and containers run as the current user. The key
//! difference from Docker is `--userns=keep-id`, which maps the container
//! UID/GID to the host user and avoids permission issues on mounted volumes.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{ContainerRuntime, ContainerSpec, ExecOutput};

pub struct PodmanRuntime {
    binary: String,
}

impl PodmanRuntime {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }

    pub fn build_run_args(&self, spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--userns=keep-id".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];

        if spec.network_disabled {
            args.push("--network=none".to_string());
        } else if let Some(net) = &spec.network {
            args.push(format!("--network={net}"));
        }

        if let Some(mem) = spec.memory_limit_mb {
            args.push(format!("--memory={mem}m"));
        }

        for vol in &spec.volumes {
            args.push("-v".to_string());
            args.push(vol.clone());
        }

        for (k, v) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }

        args.push(spec.image.clone());

        if !spec.command.is_empty() {
            args.push(spec.command.clone());
        }
        args.extend(spec.args.iter().cloned());

        args
    }

    fn build_exec_args(&self, container_id: &str, cmd: &[String]) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "-i".to_string(), container_id.to_string()];
        args.extend(cmd.iter().cloned());
        args
    }
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    fn binary_name(&self) -> &str {
        &self.binary
    }

    fn is_available(&self) -> bool {
        std::path::Path::new(&self.binary).is_file() || which::which(&self.binary).is_ok()
    }

    async fn pull_image(&self, image: &str) -> Result<(), String> {
        let status = tokio::process::Command::new(&self.binary)
            .args(["pull", image])
            .status()
            .await
            .map_err(|e| format!("podman pull failed to start: {e}"))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("podman pull '{image}' exited with status {status}"))
        }
    }

    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String, String> {
        let args = self.build_run_args(spec);
        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| format!("failed to start podman container: {e}"))?;

        if !output.status.success() {
            return Err(format!(
                "podman run failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn exec(
        &self,
        container_id: &str,
        cmd: &[String],
        stdin: Option<&[u8]>,
        timeout_secs: u64,
    ) -> Result<ExecOutput, String> {
        let args = self.build_exec_args(container_id, cmd);

        let mut child = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn podman exec: {e}"))?;

        if let Some(bytes) = stdin {
            if let Some(pipe) = child.stdin.as_mut() {
                pipe.write_all(bytes)
                    .await
                    .map_err(|e| format!("failed to write exec stdin: {e}"))?;
            }
        }
        child.stdin.take();

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| format!("podman exec timed out after {timeout_secs}s"))?
        .map_err(|e| format!("podman exec failed: {e}"))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn inspect_running(&self, container_id: &str) -> Result<bool, String> {
        let output = tokio::process::Command::new(&self.binary)
            .args(["inspect", "-f", "{{.State.Running}}", container_id])
            .output()
            .await
            .map_err(|e| format!("podman inspect failed to start: {e}"))?;

        if !output.status.success() {
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn stop(&self, container_id: &str) -> Result<(), String> {
        let status = tokio::process::Command::new(&self.binary)
            .args(["stop", "-t", "5", container_id])
            .status()
            .await
            .map_err(|e| format!("podman stop failed to start: {e}"))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("podman stop '{container_id}' exited with status {status}"))
        }
    }

    async fn remove(&self, container_id: &str) -> Result<(), String> {
        let status = tokio::process::Command::new(&self.binary)
            .args(["rm", "-f", container_id])
            .status()
            .await
            .map_err(|e| format!("podman rm failed to start: {e}"))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("podman rm '{container_id}' exited with status {status}"))
        }
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, String> {
        let output = tokio::process::Command::new(&self.binary)
            .args([
                "ps",
                "-a",
                "--filter",
                &format!("name=^{prefix}"),
                "--format",
                "{{.Names}}",
            ])
            .output()
            .await
            .map_err(|e| format!("podman ps failed to start: {e}"))?;

        if !output.status.success() {
            return Err(format!(
                "podman ps failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn podman_includes_userns_flag() {
        let rt = PodmanRuntime::new("podman".to_string());
        let spec = ContainerSpec {
            image: "alpine:3".to_string(),
            name: "kiln-sbx-0".to_string(),
            ..ContainerSpec::default()
        };
        let args = rt.build_run_args(&spec);
        assert!(args.iter().any(|a| a.starts_with("--userns=")));
    }

    #[test]
    fn podman_builds_exec_args() {
        let rt = PodmanRuntime::new("podman".to_string());
        let args = rt.build_exec_args("abc", &["ls".to_string()]);
        assert_eq!(args, vec!["exec", "-i", "abc", "ls"]);
    }

    #[test]
    fn podman_unavailable_for_fake_binary() {
        let rt = PodmanRuntime::new("/nonexistent/podman-xyzzy-fake".to_string());
        assert!(!rt.is_available());
    }

    #[test]
    fn docker_and_podman_use_different_binary_names() {
        let docker = super::super::docker::DockerRuntime::new("docker".to_string());
        let podman = PodmanRuntime::new("podman".to_string());
        assert_ne!(docker.binary_name(), podman.binary_name());
    }
}
