//! Live subprocess handles and the per-operation process registry.
//!
//! The registry maps an operation id to the subprocesses it spawned so that
//! cancelling the operation can tear every one of them down: graceful
//! terminate, short grace period, force-kill, then reap. Cleanup is
//! best-effort and never fails; the registry entry is always removed.
//!
//! The registry is an explicit instance owned by the orchestrator and passed
//! to the command runner - there is no ambient global table.

use std::collections::HashMap;
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

use crate::operation::OperationId;

/// Grace period between terminate and force-kill during cleanup.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Interval for polling a child's exit status.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared handle to a spawned child process.
///
/// The lock is only ever held for non-blocking calls (`try_wait`, kill,
/// signal); waiting is a poll loop, so no lock is held across an await.
#[derive(Clone)]
pub struct ChildHandle {
    inner: Arc<Mutex<Child>>,
    pid: Option<u32>,
}

impl ChildHandle {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            inner: Arc::new(Mutex::new(child)),
            pid,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the process to exit gracefully (SIGTERM on Unix). Falls back to a
    /// hard kill on other platforms.
    pub fn terminate(&self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                // Best effort; the process may already be gone.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
                return;
            }
        }
        self.force_kill();
    }

    /// Hard-kill the process (SIGKILL). Best effort.
    pub fn force_kill(&self) {
        let mut child = self.inner.lock().unwrap();
        if let Err(e) = child.start_kill() {
            debug!("kill failed for pid {:?}: {}", self.pid, e);
        }
    }

    /// Non-blocking exit check. `Ok(None)` while still running.
    pub fn try_status(&self) -> io::Result<Option<ExitStatus>> {
        self.inner.lock().unwrap().try_wait()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.try_status(), Ok(None))
    }

    /// Wait for the process to exit, polling so the handle stays shareable.
    pub async fn wait(&self) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = self.try_status()? {
                return Ok(status);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

impl std::fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildHandle").field("pid", &self.pid).finish()
    }
}

/// Table of live subprocesses per operation.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<OperationId, Vec<ChildHandle>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a registration for an operation. Entries are created when the
    /// operation begins and removed when it completes - never left dangling.
    pub fn begin(&self, id: OperationId) {
        self.entries.lock().unwrap().entry(id).or_default();
    }

    /// Record a spawned subprocess under its operation. No-op when the
    /// operation has no active registration.
    pub fn register(&self, id: OperationId, handle: ChildHandle) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(list) = entries.get_mut(&id) {
            list.push(handle);
        }
    }

    /// Close a registration without touching its processes.
    pub fn finish(&self, id: OperationId) {
        self.entries.lock().unwrap().remove(&id);
    }

    /// Number of registered processes still alive under an operation.
    pub fn live_count(&self, id: OperationId) -> usize {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&id)
            .map(|list| list.iter().filter(|h| h.is_running()).count())
            .unwrap_or(0)
    }

    /// Tear down every subprocess registered under an operation: terminate,
    /// wait a short grace period, force-kill survivors, then reap each exit.
    /// Best effort - individual failures are logged, never raised - and the
    /// registration is removed regardless.
    pub async fn cleanup(&self, id: OperationId) {
        let handles = self
            .entries
            .lock()
            .unwrap()
            .remove(&id)
            .unwrap_or_default();

        let live: Vec<&ChildHandle> = handles.iter().filter(|h| h.is_running()).collect();
        if live.is_empty() {
            return;
        }

        warn!("Cleaning up {} subprocess(es)", live.len());
        for handle in &live {
            handle.terminate();
        }

        tokio::time::sleep(TERMINATE_GRACE).await;

        for handle in &handles {
            if handle.is_running() {
                handle.force_kill();
            }
        }

        for handle in &handles {
            if let Err(e) = handle.wait().await {
                debug!("wait failed for pid {:?}: {}", handle.pid(), e);
            }
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use tokio::process::Command;

    fn spawn_sleep(secs: u32) -> ChildHandle {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("sleep {}", secs))
            .stdout(std::process::Stdio::null())
            .spawn()
            .expect("spawn sleep");
        ChildHandle::new(child)
    }

    #[tokio::test]
    async fn cleanup_kills_registered_processes() {
        let registry = ProcessRegistry::new();
        registry.begin(42);

        let handle = spawn_sleep(30);
        registry.register(42, handle.clone());
        assert!(handle.is_running());
        assert_eq!(registry.live_count(42), 1);

        registry.cleanup(42).await;
        assert!(!handle.is_running());
        // entry removed afterwards
        assert_eq!(registry.live_count(42), 0);
    }

    #[tokio::test]
    async fn register_without_begin_is_noop() {
        let registry = ProcessRegistry::new();
        let handle = spawn_sleep(1);
        registry.register(7, handle.clone());
        assert_eq!(registry.live_count(7), 0);

        handle.force_kill();
        let _ = handle.wait().await;
    }

    #[tokio::test]
    async fn cleanup_of_finished_operation_is_safe() {
        let registry = ProcessRegistry::new();
        registry.begin(9);
        registry.finish(9);
        registry.cleanup(9).await;
        registry.cleanup(9).await;
    }

    #[tokio::test]
    async fn wait_reports_exit_status() {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 3")
            .spawn()
            .expect("spawn");
        let handle = ChildHandle::new(child);
        let status = handle.wait().await.expect("wait");
        assert_eq!(status.code(), Some(3));
        assert!(!handle.is_running());
    }
}
