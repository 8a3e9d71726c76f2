//! Bridge to the interpreter that executes cell source.
//!
//! [`SubprocessKernel`] speaks newline-delimited JSON with a child
//! process: one request line on stdin, one reply line on stdout.
//!
//! ```text
//! {"op":"execute","source":"x = 1"}            -> {"status":"ok","outputs":[...],"execution_count":1}
//! {"op":"set_widget","code_uid":"w1","value":3} -> {"status":"ok"}
//! ```

use std::process::Stdio;

use async_trait::async_trait;
use livenb_core::notebook::Output;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{WorkerError, WorkerResult};

/// How a cell finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Ok,
    /// The cell raised; the error is among its outputs.
    Error,
    /// The cell asked for execution to stop here.
    Stop,
}

/// Result of executing one cell.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CellExecution {
    pub status: CellStatus,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub execution_count: Option<u32>,
}

impl CellExecution {
    pub fn ok(outputs: Vec<Output>) -> Self {
        Self {
            status: CellStatus::Ok,
            outputs,
            execution_count: None,
        }
    }
}

/// A live interpreter holding the notebook's variables.
#[async_trait]
pub trait Kernel: Send + Sync {
    async fn execute(&mut self, source: &str) -> WorkerResult<CellExecution>;

    /// Bind a widget's variable to `value` before re-execution.
    async fn set_widget(&mut self, code_uid: &str, value: &Value) -> WorkerResult<()>;
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Execute { source: &'a str },
    SetWidget { code_uid: &'a str, value: &'a Value },
}

#[derive(Deserialize)]
struct Ack {
    status: CellStatus,
    #[serde(default)]
    message: Option<String>,
}

/// A kernel running as a child process.
#[derive(Debug)]
pub struct SubprocessKernel {
    // Held so the child is killed when the kernel is dropped.
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl SubprocessKernel {
    /// Start the kernel from a whitespace-separated command line.
    pub fn start(command: &str) -> WorkerResult<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| WorkerError::Kernel("KERNEL_COMMAND is empty".into()))?;
        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Kernel(format!("Failed to start '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Kernel("kernel stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Kernel("kernel stdout unavailable".into()))?;

        tracing::info!(command, pid = child.id(), "Kernel started");
        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn call(&mut self, request: &Request<'_>) -> WorkerResult<String> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| WorkerError::Kernel(format!("Unencodable request: {e}")))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        self.stdout
            .next_line()
            .await?
            .ok_or_else(|| WorkerError::Kernel("kernel exited".into()))
    }
}

#[async_trait]
impl Kernel for SubprocessKernel {
    async fn execute(&mut self, source: &str) -> WorkerResult<CellExecution> {
        let reply = self.call(&Request::Execute { source }).await?;
        serde_json::from_str(&reply)
            .map_err(|e| WorkerError::Kernel(format!("Malformed execute reply: {e}")))
    }

    async fn set_widget(&mut self, code_uid: &str, value: &Value) -> WorkerResult<()> {
        let reply = self.call(&Request::SetWidget { code_uid, value }).await?;
        let ack: Ack = serde_json::from_str(&reply)
            .map_err(|e| WorkerError::Kernel(format!("Malformed set_widget reply: {e}")))?;
        match ack.status {
            CellStatus::Ok => Ok(()),
            _ => Err(WorkerError::Kernel(format!(
                "set_widget {code_uid} failed: {}",
                ack.message.unwrap_or_default()
            ))),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    /// A kernel that answers every execute with the request echoed to stdout.
    const ECHO_KERNEL: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"op":"execute"'*)
      printf '{"status":"ok","execution_count":1,"outputs":[{"output_type":"stream","name":"stdout","text":"ran"}]}\n' ;;
    *'"code_uid":"bad"'*)
      printf '{"status":"error","message":"no such widget"}\n' ;;
    *)
      printf '{"status":"ok"}\n' ;;
  esac
done
"#;

    fn start(dir: &tempfile::TempDir, script: &str) -> SubprocessKernel {
        let path = dir.path().join("kernel.sh");
        std::fs::write(&path, script).unwrap();
        SubprocessKernel::start(&format!("sh {}", path.display())).unwrap()
    }

    #[tokio::test]
    async fn execute_round_trips_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut kernel = start(&dir, ECHO_KERNEL);

        let exec = kernel.execute("print('ran')").await.unwrap();
        assert_eq!(exec.status, CellStatus::Ok);
        assert_eq!(exec.execution_count, Some(1));
        assert_matches!(&exec.outputs[0], Output::Stream { text, .. } if text == "ran");
    }

    #[tokio::test]
    async fn set_widget_reports_kernel_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut kernel = start(&dir, ECHO_KERNEL);

        kernel.set_widget("w1", &json!(3)).await.unwrap();
        assert_matches!(
            kernel.set_widget("bad", &json!(3)).await,
            Err(WorkerError::Kernel(msg)) if msg.contains("no such widget")
        );
    }

    #[tokio::test]
    async fn exited_kernel_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut kernel = start(&dir, "exit 0\n");
        assert_matches!(kernel.execute("1").await, Err(WorkerError::Kernel(_) | WorkerError::Io(_)));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert_matches!(SubprocessKernel::start(" "), Err(WorkerError::Kernel(_)));
    }
}
