use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::outcome::ToolOutcome;

use super::{Tool, ToolContext};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its stdout/stderr and exit code."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command to run via sh -c" },
                "cwd": { "type": "string", "description": "Working directory (default: project cwd)" },
                "timeoutMs": { "type": "integer", "description": "Kill the command after this many milliseconds" }
            },
            "required": ["command"]
        })
    }

    fn writes(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let cwd = args
            .get("cwd")
            .and_then(|v| v.as_str())
            .map(|c| ctx.resolve(c))
            .unwrap_or_else(|| ctx.cwd.clone());
        let timeout_ms = args
            .get("timeoutMs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_millis(timeout_ms), child).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(ToolOutcome::fail(format!(
                    "command timed out after {timeout_ms}ms: {command}"
                )));
            }
        };

        let mut text = String::new();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]\n");
            text.push_str(&stderr);
        }
        if text.len() > MAX_OUTPUT_BYTES {
            let mut end = MAX_OUTPUT_BYTES;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            text.push_str("\n… (truncated)");
        }

        let code = output.status.code().unwrap_or(-1);
        if output.status.success() {
            Ok(ToolOutcome::ok_with(text, json!({ "exitCode": code })))
        } else {
            Ok(ToolOutcome {
                success: false,
                output: Some(text),
                error: Some(format!("command exited with code {code}")),
                metadata: json!({ "exitCode": code }),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let outcome = BashTool
            .execute(json!({"command": "echo hello"}), &ctx)
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.output.unwrap().contains("hello"));
        assert_eq!(outcome.metadata["exitCode"], json!(0));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let outcome = BashTool
            .execute(json!({"command": "echo oops >&2; exit 3"}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.metadata["exitCode"], json!(3));
        assert!(outcome.output.unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let outcome = BashTool
            .execute(json!({"command": "sleep 5", "timeoutMs": 100}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn respects_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/marker.txt"), "here").unwrap();
        let ctx = test_context(dir.path());
        let outcome = BashTool
            .execute(json!({"command": "ls", "cwd": "sub"}), &ctx)
            .await
            .unwrap();
        assert!(outcome.output.unwrap().contains("marker.txt"));
    }
}
