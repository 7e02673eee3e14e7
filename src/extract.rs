//! Parallel extraction of zipped Bruker .d folders.
//!
//! Bruker D folders are validated synchronously (the marker file must already
//! be there); zipped ones are unpacked by a small pool of blocking workers
//! that stream progress over a channel drained by a dedicated reader. The
//! coordinator polls for completion so the cancellation signal is observed
//! promptly, and on every exit path it lets in-flight workers finish, drains
//! their final messages, and only then tears the channel down.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::datafiles::{file_stem, DataFileEntry, FileType};
use crate::error::{ExtractFailure, WorkflowError};
use crate::operation::Operation;
use crate::progress::EventSinks;

/// File whose presence confirms a valid unpacked Bruker .d dataset.
pub const MARKER_FILE: &str = "analysis.tdf";

/// Cap on parallel extraction workers.
const MAX_WORKERS: usize = 8;

/// How often the coordinator re-checks completion and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Bound on waiting for submitted tasks to settle during teardown.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on joining the progress reader during teardown.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Message from an extraction worker to the coordinator's reader.
#[derive(Debug)]
pub enum ProgressEvent {
    /// Free-text progress notice, forwarded to the log sink
    Progress(String),
    /// Final per-task result; emitted exactly once per task, on every path
    Done {
        index: usize,
        outcome: Result<PathBuf, String>,
    },
}

/// One archive to unpack. `index` ties back to the filetable position.
#[derive(Debug, Clone)]
struct ExtractionTask {
    index: usize,
    archive_path: PathBuf,
    dest_dir: PathBuf,
}

/// Unpack one archive and verify the marker file. Communicates purely via
/// the channel and its `Done` message; never touches shared state. The final
/// `Done` is sent on every path, including errors, so the coordinator's
/// per-task count always resolves.
fn extract_worker(task: &ExtractionTask, tx: &Sender<ProgressEvent>) {
    let _ = tx.send(ProgressEvent::Progress(format!(
        "Extracting {}",
        task.archive_path.display()
    )));

    let outcome = unpack_and_verify(&task.archive_path, &task.dest_dir);

    if let Ok(dir) = &outcome {
        let count = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        let _ = tx.send(ProgressEvent::Progress(format!(
            "Extracted {} file(s) from {}",
            count,
            task.archive_path.display()
        )));
    }

    let _ = tx.send(ProgressEvent::Done {
        index: task.index,
        outcome: outcome.map_err(|e| format!("{:#}", e)),
    });
}

fn unpack_and_verify(archive_path: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read {}", archive_path.display()))?;
    archive
        .extract(dest_dir)
        .with_context(|| format!("Failed to extract {}", archive_path.display()))?;

    let marker = dest_dir.join(MARKER_FILE);
    if !marker.exists() {
        bail!(
            "Missing {} after extraction for {}",
            MARKER_FILE,
            archive_path.display()
        );
    }
    Ok(dest_dir.to_path_buf())
}

/// Prepare the filetable for processing.
///
/// Bruker D folders are checked for their marker file up front; zipped
/// entries are unpacked in parallel under `data_dir`, with entry `path` and
/// `name` rewritten on success. A single corrupt archive fails only that
/// entry; the batch still drains before the aggregate failure is reported.
pub async fn prepare_datafiles(
    entries: &mut [DataFileEntry],
    data_dir: &Path,
    op: &Operation,
    sinks: &EventSinks,
) -> Result<(), WorkflowError> {
    let mut tasks: VecDeque<ExtractionTask> = VecDeque::new();

    for (index, entry) in entries.iter_mut().enumerate() {
        match entry.file_type {
            FileType::BrukerD => {
                let marker = entry.path.join(MARKER_FILE);
                if !marker.exists() {
                    return Err(WorkflowError::Validation(format!(
                        "Corrupted Bruker D folder: {} (missing {})",
                        entry.path.display(),
                        MARKER_FILE
                    )));
                }
                // normalize to the directory that contains the marker
                if let Some(parent) = marker.parent() {
                    entry.path = parent.to_path_buf();
                }
            }
            FileType::BrukerDZip => {
                tasks.push_back(ExtractionTask {
                    index,
                    archive_path: entry.path.clone(),
                    dest_dir: data_dir.join(file_stem(&entry.name)),
                });
            }
            _ => {}
        }
    }

    if tasks.is_empty() {
        return Ok(());
    }

    let total = tasks.len();
    let workers = total.min(MAX_WORKERS);
    sinks.info(format!("Extracting {} zipped Bruker D folder(s)", total));
    debug!("using {} extraction workers", workers);
    sinks.progress(Some(0.0));

    let (event_tx, event_rx) = mpsc::channel::<ProgressEvent>();
    let queue = Arc::new(Mutex::new(tasks));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicUsize::new(0));

    // Dedicated reader: logs progress, counts completions, collects results.
    // Entry mutation stays with the coordinator below.
    let reader = {
        let sinks = sinks.clone();
        let completed = completed.clone();
        tokio::task::spawn_blocking(move || drain_events(event_rx, total, &completed, &sinks))
    };

    let mut worker_handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = queue.clone();
        let stop_flag = stop_flag.clone();
        let tx = event_tx.clone();
        worker_handles.push(tokio::task::spawn_blocking(move || {
            loop {
                // Tasks not yet started are skipped once cancellation is
                // flagged; the one currently running finishes naturally.
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                let task = queue.lock().unwrap().pop_front();
                let Some(task) = task else { break };
                extract_worker(&task, &tx);
            }
        }));
    }
    // Workers hold the remaining senders; once they finish, the reader sees
    // the channel disconnect after draining every buffered message.
    drop(event_tx);

    let mut cancelled = false;
    loop {
        if op.is_cancelled() {
            debug!("cancellation signal received, terminating extraction tasks");
            stop_flag.store(true, Ordering::Relaxed);
            cancelled = true;
            break;
        }
        if completed.load(Ordering::Relaxed) >= total {
            break;
        }
        if worker_handles.iter().all(|h| h.is_finished()) {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    // Teardown order matters: the channel must outlive every worker that
    // might still write to it. Wait (bounded) for submitted tasks to settle,
    // then join the reader, then hide the progress indicator.
    let settle = async {
        for handle in worker_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SETTLE_TIMEOUT, settle).await.is_err() {
        warn!("extraction workers did not settle within {:?}", SETTLE_TIMEOUT);
    }

    let results = match tokio::time::timeout(READER_JOIN_TIMEOUT, reader).await {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            warn!("progress reader panicked: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!("progress reader did not stop within {:?}", READER_JOIN_TIMEOUT);
            Vec::new()
        }
    };

    sinks.progress(None);

    // Apply mutations on the coordinator thread only.
    let mut failures: Vec<ExtractFailure> = Vec::new();
    for (index, outcome) in results {
        let entry = &mut entries[index];
        match outcome {
            Ok(dir) => {
                sinks.info(format!("Extracted {} -> {}", entry.name, dir.display()));
                entry.path = dir;
                entry.name = file_stem(&entry.name);
            }
            Err(message) => {
                sinks.error(format!(
                    "Failed extracting {}: {}",
                    entry.path.display(),
                    message
                ));
                failures.push(ExtractFailure {
                    path: entry.path.clone(),
                    message,
                });
            }
        }
    }

    if cancelled {
        sinks.warn("Data file extraction cancelled");
        return Err(WorkflowError::Cancelled);
    }
    if !failures.is_empty() {
        return Err(WorkflowError::Extraction(failures));
    }
    Ok(())
}

/// Drain the progress channel until every task has reported or all writers
/// are gone. Returns the collected per-task outcomes.
fn drain_events(
    rx: Receiver<ProgressEvent>,
    total: usize,
    completed: &AtomicUsize,
    sinks: &EventSinks,
) -> Vec<(usize, Result<PathBuf, String>)> {
    let mut results = Vec::with_capacity(total);
    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(ProgressEvent::Progress(message)) => sinks.info(message),
            Ok(ProgressEvent::Done { index, outcome }) => {
                results.push((index, outcome));
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                sinks.progress(Some(done as f64 / total as f64));
                if done >= total {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    results
}
