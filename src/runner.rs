//! Command runner: one external-tool invocation.
//!
//! Spawns the process with stdout and stderr captured, registers it with the
//! process registry, and streams every line of output to the log sink as it
//! arrives, decoding invalid bytes with replacement rather than failing the
//! run. Non-zero exit, timeout and spawn failure all come back as `false`;
//! cancellation is the only condition that unwinds.

use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::WorkflowError;
use crate::operation::Operation;
use crate::process::{ChildHandle, ProcessRegistry};
use crate::progress::EventSinks;

/// Run one invocation under the operation's cancellation scope.
///
/// Returns `Ok(true)` iff the exit code is zero. Timeout and spawn failure
/// are logged and reported as `Ok(false)`. Cancellation kills the process,
/// waits for its exit and returns `Err(Cancelled)`.
pub async fn run_cmd(
    op: &Operation,
    registry: &ProcessRegistry,
    argv: &[String],
    timeout: Option<Duration>,
    sinks: &EventSinks,
) -> Result<bool, WorkflowError> {
    run_cmd_inner(Some(op), op, registry, argv, timeout, sinks).await
}

/// Like [`run_cmd`] but ignores the cancellation signal, running to
/// completion (or timeout). Used for the deactivation step, which must be
/// attempted even after a cancelled main run.
pub async fn run_cmd_shielded(
    op: &Operation,
    registry: &ProcessRegistry,
    argv: &[String],
    timeout: Option<Duration>,
    sinks: &EventSinks,
) -> Result<bool, WorkflowError> {
    run_cmd_inner(None, op, registry, argv, timeout, sinks).await
}

async fn run_cmd_inner(
    cancel_scope: Option<&Operation>,
    op: &Operation,
    registry: &ProcessRegistry,
    argv: &[String],
    timeout: Option<Duration>,
    sinks: &EventSinks,
) -> Result<bool, WorkflowError> {
    debug!("run_cmd {:?} (timeout={:?})", argv, timeout);

    let (program, args) = argv
        .split_first()
        .ok_or_else(|| WorkflowError::Validation("empty command line".to_string()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            sinks.error(format!("Cannot execute command {:?}: {}", argv, e));
            return Ok(false);
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let handle = ChildHandle::new(child);
    registry.register(op.id(), handle.clone());
    debug!("spawned pid {:?}", handle.pid());

    let stream_sinks = sinks.clone();
    let run = async {
        // Both pipes are drained concurrently so neither can fill and stall
        // the child. EOF on both precedes the exit wait.
        tokio::join!(
            stream_lines(stdout, &stream_sinks),
            stream_lines(stderr, &stream_sinks),
        );
        handle.wait().await
    };
    tokio::pin!(run);

    let timeout_wait = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    let cancel_wait = async {
        match cancel_scope {
            Some(op) => op.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = &mut run => {
            let status = result.map_err(|e| anyhow!("waiting for {:?}: {}", argv, e))?;
            debug!("pid {:?} exited with {}", handle.pid(), status);
            Ok(status.success())
        }
        _ = timeout_wait => {
            sinks.error(format!(
                "Command timed out after {}s: {:?}",
                timeout.unwrap_or_default().as_secs(),
                argv
            ));
            handle.force_kill();
            let _ = handle.wait().await;
            Ok(false)
        }
        _ = cancel_wait => {
            debug!("killing pid {:?} after cancellation", handle.pid());
            handle.force_kill();
            let _ = handle.wait().await;
            Err(WorkflowError::Cancelled)
        }
    }
}

/// Forward complete lines from a child pipe to the log sink, replacing
/// invalid byte sequences instead of erroring out.
async fn stream_lines<R: AsyncRead + Unpin>(pipe: Option<R>, sinks: &EventSinks) {
    let Some(pipe) = pipe else { return };
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sinks.info(line.trim_end_matches(['\r', '\n']));
            }
            Err(e) => {
                debug!("output stream error: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::progress::test_support::collecting;
    use crate::progress::LogLevel;
    use std::time::Instant;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn scoped_registry(op: &Operation) -> ProcessRegistry {
        let registry = ProcessRegistry::new();
        registry.begin(op.id());
        registry
    }

    #[tokio::test]
    async fn zero_exit_returns_true_and_streams_lines() {
        let op = Operation::new();
        let registry = scoped_registry(&op);
        let (sinks, lines, _) = collecting();

        let ok = run_cmd(&op, &registry, &sh("echo one; echo two >&2"), None, &sinks)
            .await
            .unwrap();
        assert!(ok);

        let lines = lines.lock().unwrap();
        let texts: Vec<&str> = lines.iter().map(|(_, m)| m.as_str()).collect();
        assert!(texts.contains(&"one"));
        assert!(texts.contains(&"two"));
    }

    #[tokio::test]
    async fn nonzero_exit_returns_false() {
        let op = Operation::new();
        let registry = scoped_registry(&op);
        let sinks = EventSinks::disabled();

        let ok = run_cmd(&op, &registry, &sh("exit 7"), None, &sinks)
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn spawn_failure_returns_false_with_error_log() {
        let op = Operation::new();
        let registry = scoped_registry(&op);
        let (sinks, lines, _) = collecting();

        let argv = vec!["/definitely/not/a/binary".to_string()];
        let ok = run_cmd(&op, &registry, &argv, None, &sinks).await.unwrap();
        assert!(!ok);
        assert!(lines
            .lock()
            .unwrap()
            .iter()
            .any(|(level, _)| *level == LogLevel::Error));
    }

    #[tokio::test]
    async fn timeout_kills_process_and_returns_false() {
        let op = Operation::new();
        let registry = scoped_registry(&op);
        let sinks = EventSinks::disabled();

        let started = Instant::now();
        let ok = run_cmd(
            &op,
            &registry,
            &sh("sleep 30"),
            Some(Duration::from_millis(200)),
            &sinks,
        )
        .await
        .unwrap();
        assert!(!ok);
        assert!(started.elapsed() < Duration::from_secs(10));
        // the killed child has been reaped
        assert_eq!(registry.live_count(op.id()), 0);
    }

    #[tokio::test]
    async fn cancellation_unwinds_and_kills_process() {
        let op = Operation::new();
        let registry = scoped_registry(&op);
        let sinks = EventSinks::disabled();
        let handle = op.handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        let started = Instant::now();
        let result = run_cmd(&op, &registry, &sh("sleep 30"), None, &sinks).await;
        assert!(matches!(result, Err(WorkflowError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(registry.live_count(op.id()), 0);
    }

    #[tokio::test]
    async fn shielded_run_ignores_cancellation() {
        let op = Operation::new();
        let registry = scoped_registry(&op);
        let sinks = EventSinks::disabled();

        op.handle().cancel();
        let ok = run_cmd_shielded(&op, &registry, &sh("exit 0"), None, &sinks)
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_fatal() {
        let op = Operation::new();
        let registry = scoped_registry(&op);
        let (sinks, lines, _) = collecting();

        let ok = run_cmd(
            &op,
            &registry,
            &sh("printf 'ok\\377bad\\n'"),
            None,
            &sinks,
        )
        .await
        .unwrap();
        assert!(ok);
        assert!(lines
            .lock()
            .unwrap()
            .iter()
            .any(|(_, m)| m.starts_with("ok") && m.contains('\u{FFFD}')));
    }
}
