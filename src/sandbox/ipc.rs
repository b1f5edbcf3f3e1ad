//! Host-side half of the file-based execution IPC protocol.
//!
//! The in-container executor polls `/tmp/exec_trigger` every 100 ms and,
//! once it appears, reads `/tmp/exec_request.json`, runs the requested
//! function, and writes `/tmp/exec_result.json`. The host writes the
//! request, drops the trigger, and polls for the result — see
//! [`ExecRequest`]/[`ExecResult`] for the wire shapes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::runtime::ContainerRuntime;

pub const REQUEST_PATH: &str = "/tmp/exec_request.json";
pub const TRIGGER_PATH: &str = "/tmp/exec_trigger";
pub const RESULT_PATH: &str = "/tmp/exec_result.json";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecAction {
    ExecuteInline,
    Execute,
    LoadFunctions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub action: ExecAction,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_code: Option<String>,
    pub function_namespace: String,
    pub function_name: String,
    pub input_data: Value,
    pub context: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Ok,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub status: ExecStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
    pub duration_ms: u64,
    pub execution_id: String,
}

/// Write the request, drop the trigger, and poll for a result up to
/// `timeout_secs`. Leaves no files behind on success or failure — the
/// caller (the pool) is responsible for taint decisions, not this helper.
pub async fn run_exec_protocol(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    request: &ExecRequest,
    timeout_secs: u64,
) -> Result<ExecResult, String> {
    write_file(runtime, container_id, REQUEST_PATH, &serde_json::to_vec(request).map_err(|e| e.to_string())?).await?;
    write_file(runtime, container_id, TRIGGER_PATH, b"1").await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    let result = loop {
        if tokio::time::Instant::now() >= deadline {
            clear_files(runtime, container_id).await;
            return Err(format!(
                "execution {} timed out after {timeout_secs}s",
                request.execution_id
            ));
        }

        match read_file(runtime, container_id, RESULT_PATH).await {
            Ok(Some(bytes)) => {
                let parsed: ExecResult = serde_json::from_slice(&bytes)
                    .map_err(|e| format!("malformed exec_result.json: {e}"))?;
                break parsed;
            }
            Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) => return Err(e),
        }
    };

    clear_files(runtime, container_id).await;
    Ok(result)
}

async fn write_file(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    path: &str,
    bytes: &[u8],
) -> Result<(), String> {
    let out = runtime
        .exec(
            container_id,
            &["sh".to_string(), "-c".to_string(), format!("cat > {path}")],
            Some(bytes),
            10,
        )
        .await?;
    if !out.success() {
        return Err(format!("failed to write {path}: {}", out.stderr));
    }
    Ok(())
}

/// Returns `Ok(None)` when the file does not yet exist (the normal poll case).
async fn read_file(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    path: &str,
) -> Result<Option<Vec<u8>>, String> {
    let out = runtime
        .exec(
            container_id,
            &[
                "sh".to_string(),
                "-c".to_string(),
                format!("[ -f {path} ] && cat {path} || true"),
            ],
            None,
            10,
        )
        .await?;
    if !out.success() {
        return Err(format!("failed to read {path}: {}", out.stderr));
    }
    if out.stdout.is_empty() {
        Ok(None)
    } else {
        Ok(Some(out.stdout.into_bytes()))
    }
}

/// Best-effort cleanup of all three IPC files. Errors are swallowed — the
/// caller treats a dirty container as tainted regardless.
async fn clear_files(runtime: &dyn ContainerRuntime, container_id: &str) {
    let _ = runtime
        .exec(
            container_id,
            &[
                "sh".to_string(),
                "-c".to_string(),
                format!("rm -f {REQUEST_PATH} {TRIGGER_PATH} {RESULT_PATH}"),
            ],
            None,
            10,
        )
        .await;
}

/// Scrub the IPC files between reuses without running a full request cycle.
/// Returns `Err` if the scrub itself fails, signalling the container should
/// be treated as tainted.
pub async fn scrub(runtime: &dyn ContainerRuntime, container_id: &str) -> Result<(), String> {
    let out = runtime
        .exec(
            container_id,
            &[
                "sh".to_string(),
                "-c".to_string(),
                format!("rm -f {REQUEST_PATH} {TRIGGER_PATH} {RESULT_PATH}"),
            ],
            None,
            10,
        )
        .await?;
    if out.success() {
        Ok(())
    } else {
        Err(format!("scrub failed: {}", out.stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_request_serializes_with_expected_fields() {
        let req = ExecRequest {
            action: ExecAction::Execute,
            execution_id: "ex-1".to_string(),
            function_code: None,
            function_namespace: "demo".to_string(),
            function_name: "hello".to_string(),
            input_data: serde_json::json!({"name": "world"}),
            context: serde_json::json!({}),
        };
        let s = serde_json::to_string(&req).unwrap();
        assert!(s.contains("\"execute\""));
        assert!(!s.contains("function_code"));
    }

    #[test]
    fn exec_result_roundtrips() {
        let raw = r#"{"status":"ok","result":{"x":1},"duration_ms":12,"execution_id":"e1"}"#;
        let parsed: ExecResult = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed.status, ExecStatus::Ok));
        assert_eq!(parsed.duration_ms, 12);
    }
}
