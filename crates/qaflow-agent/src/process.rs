use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::types::{AgentMessage, AgentTask, InvokeOptions, DEFAULT_EXECUTABLE};
use crate::{AgentError, Result};

// ─── AgentProcess ─────────────────────────────────────────────────────────

/// A running agent subprocess speaking the JSONL protocol.
///
/// The task request is sent as a single JSON object on stdin, responses are
/// read as JSONL from stdout. Stderr is drained by a background task and
/// surfaced on process exit errors.
pub(crate) struct AgentProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stdin: Option<ChildStdin>,
    stderr_buf: Arc<Mutex<String>>,
}

impl AgentProcess {
    /// Spawn the agent binary for `task` with `payload` as the request body.
    pub(crate) async fn spawn(
        task: AgentTask,
        payload: &serde_json::Value,
        opts: &InvokeOptions,
    ) -> Result<Self> {
        let cmd = build_command(task, opts)?;
        let mut process = Self::from_command(cmd)?;

        let request = serde_json::json!({
            "task": task,
            "payload": payload,
        });
        process.send_request(&request).await?;
        process.close_stdin();

        Ok(process)
    }

    /// Spawn an arbitrary command as a mock agent process.
    /// Used in unit tests to inject a command that emits fixed JSON lines.
    #[cfg(test)]
    pub(crate) fn spawn_command(cmd: Command) -> Result<Self> {
        Self::from_command(cmd)
    }

    fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(AgentError::Io)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("stdout not captured".into()))?;

        let stdin = child.stdin.take();

        // Drain stderr into a buffer so exit errors can include it.
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            });
        }

        let lines = BufReader::new(stdout).lines();
        Ok(Self {
            child,
            lines,
            stdin,
            stderr_buf,
        })
    }

    async fn send_request(&mut self, request: &serde_json::Value) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AgentError::Process("stdin already closed".into()))?;

        let mut buf = serde_json::to_vec(request)
            .map_err(|e| AgentError::Process(format!("failed to serialize request: {e}")))?;
        buf.push(b'\n');

        stdin.write_all(&buf).await.map_err(AgentError::Io)?;
        stdin.flush().await.map_err(AgentError::Io)?;
        Ok(())
    }

    fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Read the next non-empty JSONL line and deserialize it.
    ///
    /// Lines that are valid JSON with an unrecognized `"type"` are skipped
    /// so protocol additions don't break older runners. Returns `Ok(None)`
    /// on EOF.
    pub(crate) async fn next_message(&mut self) -> Result<Option<AgentMessage>> {
        loop {
            match self.lines.next_line().await {
                Err(e) => return Err(AgentError::Io(e)),
                Ok(None) => return Ok(None),
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<AgentMessage>(trimmed) {
                        Ok(msg) => return Ok(Some(msg)),
                        Err(e) => {
                            if is_unknown_message_type(trimmed) {
                                continue;
                            }
                            return Err(AgentError::Parse {
                                line: trimmed.to_owned(),
                                source: e,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Wait for the child to exit; non-zero codes and signal deaths become
    /// `Process` errors carrying captured stderr.
    pub(crate) async fn wait_exit_error(&mut self) -> Option<AgentError> {
        let status = match self.child.wait().await {
            Ok(s) => s,
            Err(e) => return Some(AgentError::Io(e)),
        };

        if status.success() {
            return None;
        }

        let stderr = self
            .stderr_buf
            .lock()
            .ok()
            .map(|b| b.clone())
            .unwrap_or_default();

        let msg = if let Some(code) = status.code() {
            if stderr.is_empty() {
                format!("agent process exited with code {code}")
            } else {
                format!("agent process exited with code {code}\nstderr: {stderr}")
            }
        } else if stderr.is_empty() {
            "agent process terminated by signal".to_string()
        } else {
            format!("agent process terminated by signal\nstderr: {stderr}")
        };

        Some(AgentError::Process(msg))
    }

    /// Kill the subprocess (best-effort; errors are silently ignored).
    pub(crate) async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Valid JSON with a `"type"` field we don't recognize → skip; anything
/// else is a genuine parse error.
fn is_unknown_message_type(line: &str) -> bool {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(line) {
        v.get("type").is_some()
    } else {
        false
    }
}

// ─── Command builder ──────────────────────────────────────────────────────

fn build_command(task: AgentTask, opts: &InvokeOptions) -> Result<Command> {
    let exe = opts.executable.as_deref().unwrap_or(DEFAULT_EXECUTABLE);

    // Explicit paths are used as-is; bare names are resolved on PATH so a
    // missing install fails before the spawn instead of as a vague I/O error.
    let resolved = if exe.contains(std::path::MAIN_SEPARATOR) {
        std::path::PathBuf::from(exe)
    } else {
        which::which(exe).map_err(|_| AgentError::MissingBinary(exe.to_string()))?
    };

    let mut cmd = Command::new(resolved);
    cmd.arg("run")
        .arg("--task")
        .arg(task.as_str())
        .arg("--output-format")
        .arg("jsonl");

    if let Some(model) = &opts.model {
        cmd.arg("--model").arg(model);
    }

    for arg in &opts.extra_args {
        cmd.arg(arg);
    }

    for (k, v) in &opts.env {
        cmd.env(k, v);
    }

    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }

    // NOTE: the request body is NOT a positional arg — it's sent via stdin.

    Ok(cmd)
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_process_yields_messages() {
        let mut cmd = Command::new("printf");
        cmd.arg(concat!(
            r#"{"type":"progress","stage":"loading"}"#,
            "\n",
            r#"{"type":"result","ok":true,"data":{}}"#,
            "\n",
        ));
        let mut process = AgentProcess::spawn_command(cmd).unwrap();

        let first = process.next_message().await.unwrap().unwrap();
        assert!(matches!(first, AgentMessage::Progress(_)));
        let second = process.next_message().await.unwrap().unwrap();
        assert!(second.as_result().is_some());
        assert!(process.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_message_types_are_skipped() {
        let mut cmd = Command::new("printf");
        cmd.arg(concat!(
            r#"{"type":"telemetry","cpu":0.3}"#,
            "\n",
            r#"{"type":"result","ok":true}"#,
            "\n",
        ));
        let mut process = AgentProcess::spawn_command(cmd).unwrap();
        let msg = process.next_message().await.unwrap().unwrap();
        assert!(msg.as_result().is_some());
    }

    #[tokio::test]
    async fn garbage_line_is_a_parse_error() {
        let mut cmd = Command::new("printf");
        cmd.arg("not json at all\n");
        let mut process = AgentProcess::spawn_command(cmd).unwrap();
        let err = process.next_message().await.unwrap_err();
        assert!(matches!(err, AgentError::Parse { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_error() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo boom >&2; exit 3");
        let mut process = AgentProcess::spawn_command(cmd).unwrap();
        while process.next_message().await.unwrap().is_some() {}
        let err = process.wait_exit_error().await.unwrap();
        let text = err.to_string();
        assert!(text.contains("code 3"), "got: {text}");
        assert!(text.contains("boom"), "got: {text}");
    }

    #[test]
    fn missing_binary_is_reported() {
        let opts = InvokeOptions {
            executable: Some("definitely-not-a-real-binary-qaflow".to_string()),
            ..Default::default()
        };
        let err = build_command(AgentTask::ParseDocument, &opts).unwrap_err();
        assert!(matches!(err, AgentError::MissingBinary(_)));
    }
}
