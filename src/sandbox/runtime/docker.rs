//! Docker runtime backing pooled sandbox containers.
//!
//! Uses the Docker CLI (`docker run`/`exec`) rather than the daemon socket,
//! which avoids a bollard dependency and works in restricted environments
//! where the socket may not be accessible.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{ContainerRuntime, ContainerSpec, ExecOutput};

pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }

    /// Build the complete argument list for `docker run -d` from `spec`.
    ///
    /// Exposed as `pub` so unit tests can inspect the arguments without a
    /// live Docker daemon.
    pub fn build_run_args(&self, spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
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
impl ContainerRuntime for DockerRuntime {
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
            .map_err(|e| format!("docker pull failed to start: {e}"))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("docker pull '{image}' exited with status {status}"))
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
            .map_err(|e| format!("failed to start docker container: {e}"))?;

        if !output.status.success() {
            return Err(format!(
                "docker run failed: {}",
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
            .map_err(|e| format!("failed to spawn docker exec: {e}"))?;

        if let Some(bytes) = stdin {
            if let Some(pipe) = child.stdin.as_mut() {
                pipe.write_all(bytes)
                    .await
                    .map_err(|e| format!("failed to write exec stdin: {e}"))?;
            }
        }
        // Close stdin so the exec'd process sees EOF.
        child.stdin.take();

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| format!("docker exec timed out after {timeout_secs}s"))?
        .map_err(|e| format!("docker exec failed: {e}"))?;

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
            .map_err(|e| format!("docker inspect failed to start: {e}"))?;

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
            .map_err(|e| format!("docker stop failed to start: {e}"))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("docker stop '{container_id}' exited with status {status}"))
        }
    }

    async fn remove(&self, container_id: &str) -> Result<(), String> {
        let status = tokio::process::Command::new(&self.binary)
            .args(["rm", "-f", container_id])
            .status()
            .await
            .map_err(|e| format!("docker rm failed to start: {e}"))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("docker rm '{container_id}' exited with status {status}"))
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
            .map_err(|e| format!("docker ps failed to start: {e}"))?;

        if !output.status.success() {
            return Err(format!(
                "docker ps failed: {}",
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
    use std::collections::HashMap;

    #[test]
    fn docker_builds_minimal_run_args() {
        let rt = DockerRuntime::new("docker".to_string());
        let spec = ContainerSpec {
            image: "alpine:3".to_string(),
            name: "kiln-sbx-0".to_string(),
            ..ContainerSpec::default()
        };
        let args = rt.build_run_args(&spec);

        assert!(args.contains(&"-d".to_string()));
        assert!(args.contains(&"--name".to_string()));
        assert!(args.contains(&"kiln-sbx-0".to_string()));
        assert!(args.contains(&"alpine:3".to_string()));
        assert!(args.contains(&"sleep".to_string()));
        assert!(args.contains(&"infinity".to_string()));
    }

    #[test]
    fn docker_builds_memory_and_network_flags() {
        let rt = DockerRuntime::new("docker".to_string());
        let spec = ContainerSpec {
            image: "alpine:3".to_string(),
            name: "kiln-sbx-1".to_string(),
            memory_limit_mb: Some(128),
            network_disabled: true,
            ..ContainerSpec::default()
        };
        let args = rt.build_run_args(&spec);

        assert!(args.iter().any(|a| a == "--memory=128m"));
        assert!(args.iter().any(|a| a == "--network=none"));
    }

    #[test]
    fn docker_prefers_explicit_network_over_default() {
        let rt = DockerRuntime::new("docker".to_string());
        let spec = ContainerSpec {
            image: "alpine:3".to_string(),
            name: "kiln-sbx-2".to_string(),
            network: Some("kiln-net".to_string()),
            ..ContainerSpec::default()
        };
        let args = rt.build_run_args(&spec);
        assert!(args.iter().any(|a| a == "--network=kiln-net"));
    }

    #[test]
    fn docker_builds_exec_args() {
        let rt = DockerRuntime::new("docker".to_string());
        let args = rt.build_exec_args("abc123", &["cat".to_string()]);
        assert_eq!(args, vec!["exec", "-i", "abc123", "cat"]);
    }

    #[test]
    fn docker_env_flags_present() {
        let rt = DockerRuntime::new("docker".to_string());
        let mut env = HashMap::new();
        env.insert("FOO".to_string(), "bar".to_string());
        let spec = ContainerSpec {
            image: "alpine:3".to_string(),
            name: "kiln-sbx-3".to_string(),
            env,
            ..ContainerSpec::default()
        };
        let args = rt.build_run_args(&spec);
        let pos = args.iter().position(|a| a == "-e").unwrap();
        assert_eq!(args[pos + 1], "FOO=bar");
    }

    #[test]
    fn docker_unavailable_for_fake_binary() {
        let rt = DockerRuntime::new("/nonexistent/docker-xyzzy-fake".to_string());
        assert!(!rt.is_available());
    }
}
