use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::process::AgentProcess;
use crate::types::{AgentMessage, AgentTask, InvokeOptions};
use crate::Result;

// ─── InvocationStream ─────────────────────────────────────────────────────

/// An async stream of [`AgentMessage`]s from one agent invocation.
///
/// Backed by a Tokio mpsc channel. A background task owns the subprocess
/// and forwards messages until the terminal `result` message or process
/// exit. Dropping the stream closes the receiver, which stops the forwarder
/// on its next send attempt.
pub struct InvocationStream {
    rx: mpsc::Receiver<Result<AgentMessage>>,
}

impl InvocationStream {
    pub(crate) fn new(task: AgentTask, payload: serde_json::Value, opts: InvokeOptions) -> Self {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut process = match AgentProcess::spawn(task, &payload, &opts).await {
                Ok(p) => p,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let mut got_result = false;
            loop {
                match process.next_message().await {
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    Ok(None) => break, // EOF — process exited
                    Ok(Some(msg)) => {
                        let is_terminal = msg.as_result().is_some();
                        if is_terminal {
                            got_result = true;
                        }
                        if tx.send(Ok(msg)).await.is_err() {
                            break; // Receiver dropped
                        }
                        if is_terminal {
                            break;
                        }
                    }
                }
            }

            // A process that died without a result message still gets its
            // exit code and stderr surfaced.
            if !got_result {
                if let Some(exit_err) = process.wait_exit_error().await {
                    let _ = tx.send(Err(exit_err)).await;
                }
            }

            process.kill().await;
        });

        InvocationStream { rx }
    }

    /// Test-only constructor: wrap a raw mpsc receiver.
    #[cfg(test)]
    pub(crate) fn from_channel(rx: mpsc::Receiver<Result<AgentMessage>>) -> Self {
        Self { rx }
    }
}

impl Stream for InvocationStream {
    type Item = Result<AgentMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
