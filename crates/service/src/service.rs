use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::thread;

use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use path_batch_core::{
    build_report, progress_fn, write_report, DiscoverOptions, EngineState, ErrorItem, FsHooks,
    FsOperation, ProcessEngine, ProcessState, ProgressEvent, RunSummary, WalkSource,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_operation")]
    pub operation: FsOperation,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub include_directories: bool,
    #[serde(default)]
    pub follow_links: bool,
    #[serde(default = "default_retry_passes")]
    pub retry_passes: usize,
    #[serde(default)]
    pub report_output: Option<PathBuf>,
    #[serde(default = "default_emit_progress_events")]
    pub emit_progress_events: bool,
}

fn default_operation() -> FsOperation {
    FsOperation::List
}

fn default_retry_passes() -> usize {
    3
}

fn default_emit_progress_events() -> bool {
    true
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self {
            batch_id: None,
            paths: Vec::new(),
            operation: default_operation(),
            max_depth: None,
            excludes: Vec::new(),
            include_directories: false,
            follow_links: false,
            retry_passes: default_retry_passes(),
            report_output: None,
            emit_progress_events: default_emit_progress_events(),
        }
    }
}

impl BatchRequest {
    fn discover_options(&self) -> DiscoverOptions {
        DiscoverOptions {
            roots: self.paths.clone(),
            max_depth: self.max_depth,
            excludes: self.excludes.clone(),
            include_directories: self.include_directories,
            follow_links: self.follow_links,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchSessionStatus {
    Running,
    Completed,
    /// The engine stopped on a global error; the error list and pending
    /// queue are preserved in the snapshot.
    Faulted,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSessionSnapshot {
    pub batch_id: String,
    pub status: BatchSessionStatus,
    pub operation: String,
    pub report_path: Option<PathBuf>,
    pub error: Option<String>,
    pub state: Option<ProcessState>,
    pub runs: Vec<RunSummary>,
    pub errors: Vec<ErrorItem>,
    pub pending: u64,
    pub total_events: u64,
}

#[derive(Debug, Clone)]
struct BatchSession {
    status: BatchSessionStatus,
    operation: String,
    report_path: Option<PathBuf>,
    error: Option<String>,
    state: Option<ProcessState>,
    runs: Vec<RunSummary>,
    errors: Vec<ErrorItem>,
    pending: u64,
    events: Vec<ProgressEvent>,
}

struct BatchOutcome {
    faulted: bool,
    error: Option<String>,
    state: ProcessState,
    runs: Vec<RunSummary>,
    errors: Vec<ErrorItem>,
    pending: u64,
}

static SESSIONS: Lazy<Mutex<HashMap<String, BatchSession>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Validates the request, registers a session and runs the batch on a worker
/// thread. Returns the batch id to poll.
pub fn start_batch(request: BatchRequest) -> Result<String> {
    let source = WalkSource::new(request.discover_options())?;
    let batch_id = request
        .batch_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    {
        let mut sessions = lock_sessions()?;
        if sessions
            .get(&batch_id)
            .is_some_and(|session| session.status == BatchSessionStatus::Running)
        {
            bail!("batch session already running: {batch_id}");
        }
        sessions.insert(
            batch_id.clone(),
            BatchSession {
                status: BatchSessionStatus::Running,
                operation: request.operation.name().to_string(),
                report_path: request.report_output.clone(),
                error: None,
                state: None,
                runs: Vec::new(),
                errors: Vec::new(),
                pending: 0,
                events: Vec::new(),
            },
        );
    }

    let thread_batch_id = batch_id.clone();
    thread::spawn(move || {
        let result = run_batch(&thread_batch_id, source, &request);
        update_session(&thread_batch_id, |session| match result {
            Ok(outcome) => {
                session.status = if outcome.faulted {
                    BatchSessionStatus::Faulted
                } else {
                    BatchSessionStatus::Completed
                };
                session.error = outcome.error;
                session.state = Some(outcome.state);
                session.runs = outcome.runs;
                session.errors = outcome.errors;
                session.pending = outcome.pending;
            }
            Err(err) => {
                session.status = BatchSessionStatus::Failed;
                session.error = Some(format!("{err:#}"));
            }
        });
    });

    Ok(batch_id)
}

fn run_batch(batch_id: &str, source: WalkSource, request: &BatchRequest) -> Result<BatchOutcome> {
    let operation = request.operation.clone();
    let op_name = operation.name();
    let mut engine = ProcessEngine::new(source, FsHooks::new(operation));
    if request.emit_progress_events {
        let sink_id = batch_id.to_string();
        engine = engine.with_observer(progress_fn(move |event: &ProgressEvent| {
            update_session(&sink_id, |session| session.events.push(event.clone()));
        }));
    }

    let load = engine.load_paths()?;
    if !load.loaded {
        bail!("path discovery failed: {}", load.error);
    }
    info!("batch {batch_id}: {op_name} {} path(s)", load.item_count);

    let mut runs = vec![engine.start()?];
    for _ in 0..request.retry_passes {
        if engine.state() == EngineState::Faulted || engine.error_list()?.is_empty() {
            break;
        }
        runs.push(engine.start()?);
    }

    if let Some(path) = &request.report_output {
        let report = build_report(&engine, Some(op_name), &runs)?;
        write_report(&report, path)?;
    }

    let faulted = engine.state() == EngineState::Faulted;
    let error = if faulted {
        let error = engine.error()?.to_string();
        warn!("batch {batch_id} stopped: {error}");
        Some(error)
    } else {
        None
    };
    let outcome = BatchOutcome {
        faulted,
        error,
        state: engine.process_state()?,
        runs,
        errors: engine.error_list()?.to_vec(),
        pending: engine.queue()?.len() as u64,
    };
    engine.dispose();
    Ok(outcome)
}

pub fn poll_batch_events(batch_id: &str, from_seq: u64) -> Result<Vec<ProgressEvent>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(batch_id)
        .ok_or_else(|| anyhow!("batch session not found: {batch_id}"))?;

    Ok(session
        .events
        .iter()
        .filter(|event| event.seq > from_seq)
        .cloned()
        .collect())
}

pub fn get_batch_session(batch_id: &str) -> Result<BatchSessionSnapshot> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(batch_id)
        .ok_or_else(|| anyhow!("batch session not found: {batch_id}"))?;
    Ok(snapshot(batch_id, session))
}

/// Drops a finished session and returns its final snapshot.
pub fn forget_batch(batch_id: &str) -> Result<BatchSessionSnapshot> {
    let mut sessions = lock_sessions()?;
    match sessions.get(batch_id) {
        None => bail!("batch session not found: {batch_id}"),
        Some(session) if session.status == BatchSessionStatus::Running => {
            bail!("batch session still running: {batch_id}")
        }
        Some(_) => {}
    }
    let session = sessions
        .remove(batch_id)
        .ok_or_else(|| anyhow!("batch session not found: {batch_id}"))?;
    Ok(snapshot(batch_id, &session))
}

fn snapshot(batch_id: &str, session: &BatchSession) -> BatchSessionSnapshot {
    BatchSessionSnapshot {
        batch_id: batch_id.to_string(),
        status: session.status.clone(),
        operation: session.operation.clone(),
        report_path: session.report_path.clone(),
        error: session.error.clone(),
        state: session.state.clone(),
        runs: session.runs.clone(),
        errors: session.errors.clone(),
        pending: session.pending,
        total_events: session.events.len() as u64,
    }
}

fn update_session<F>(batch_id: &str, update: F)
where
    F: FnOnce(&mut BatchSession),
{
    if let Ok(mut sessions) = lock_sessions() {
        if let Some(session) = sessions.get_mut(batch_id) {
            update(session);
        }
    }
}

fn lock_sessions() -> Result<MutexGuard<'static, HashMap<String, BatchSession>>> {
    SESSIONS
        .lock()
        .map_err(|_| anyhow!("batch session registry lock poisoned"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use path_batch_core::{load_report, FsOperation, RunPhase};

    use super::{
        forget_batch, get_batch_session, poll_batch_events, start_batch, BatchRequest,
        BatchSessionSnapshot, BatchSessionStatus,
    };

    fn wait_for(batch_id: &str) -> BatchSessionSnapshot {
        let started = Instant::now();
        loop {
            let snapshot = get_batch_session(batch_id).expect("session exists");
            if snapshot.status != BatchSessionStatus::Running {
                return snapshot;
            }
            assert!(started.elapsed() < Duration::from_secs(30));
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    #[test]
    fn list_batch_completes_with_events_and_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), b"alpha").expect("write a");
        fs::write(dir.path().join("b.txt"), b"beta").expect("write b");
        let out = tempfile::tempdir().expect("report dir");
        let report_path = out.path().join("report.json");

        let batch_id = start_batch(BatchRequest {
            paths: vec![dir.path().to_path_buf()],
            report_output: Some(report_path.clone()),
            ..BatchRequest::default()
        })
        .expect("batch starts");

        let snapshot = wait_for(&batch_id);
        assert_eq!(snapshot.status, BatchSessionStatus::Completed);
        assert_eq!(snapshot.operation, "list");
        assert_eq!(snapshot.total_events, 2);
        assert_eq!(snapshot.pending, 0);
        assert!(snapshot.errors.is_empty());
        assert_eq!(snapshot.runs.len(), 1);
        assert_eq!(snapshot.runs[0].phase, RunPhase::Fresh);
        let state = snapshot.state.expect("final state");
        assert_eq!(state.initial_total_size, 9);
        assert_eq!(state.actual_remaining_size, 0);

        let events = poll_batch_events(&batch_id, 0).expect("events");
        assert_eq!(events.len(), 2);
        let tail = poll_batch_events(&batch_id, events[0].seq).expect("tail events");
        assert_eq!(tail.len(), 1);

        let report = load_report(&report_path).expect("report written");
        assert_eq!(report.operation.as_deref(), Some("list"));
        assert_eq!(report.runs.len(), 1);

        let forgotten = forget_batch(&batch_id).expect("forget");
        assert_eq!(forgotten.batch_id, batch_id);
        assert!(get_batch_session(&batch_id).is_err());
    }

    #[test]
    fn missing_destination_faults_the_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), b"alpha").expect("write");

        let batch_id = start_batch(BatchRequest {
            paths: vec![dir.path().to_path_buf()],
            operation: FsOperation::Copy {
                dest: dir.path().join("absent"),
                verify: false,
            },
            ..BatchRequest::default()
        })
        .expect("batch starts");

        let snapshot = wait_for(&batch_id);
        assert_eq!(snapshot.status, BatchSessionStatus::Faulted);
        assert!(snapshot
            .error
            .as_deref()
            .is_some_and(|error| error.contains("destination")));
        assert_eq!(snapshot.pending, 1);
        assert_eq!(snapshot.total_events, 0);
    }

    #[test]
    fn missing_roots_fail_the_batch() {
        let batch_id = start_batch(BatchRequest {
            paths: vec![PathBuf::from("/definitely/not/here/path-batch-service")],
            ..BatchRequest::default()
        })
        .expect("batch starts");

        let snapshot = wait_for(&batch_id);
        assert_eq!(snapshot.status, BatchSessionStatus::Failed);
        assert!(snapshot
            .error
            .as_deref()
            .is_some_and(|error| error.contains("no-roots")));
    }

    #[test]
    fn invalid_requests_are_rejected_up_front() {
        assert!(start_batch(BatchRequest::default()).is_err());
        assert!(get_batch_session("no-such-batch").is_err());
        assert!(poll_batch_events("no-such-batch", 0).is_err());
        assert!(forget_batch("no-such-batch").is_err());
    }

    #[test]
    fn request_defaults_apply_when_deserializing() {
        let request: BatchRequest =
            serde_json::from_str(r#"{"paths":["/tmp"]}"#).expect("parse request");
        assert_eq!(request.operation, FsOperation::List);
        assert_eq!(request.retry_passes, 3);
        assert!(request.emit_progress_events);

        let request: BatchRequest = serde_json::from_str(
            r#"{"paths":["/tmp"],"operation":{"op":"move","dest":"/srv"},"retry_passes":0}"#,
        )
        .expect("parse request");
        assert_eq!(
            request.operation,
            FsOperation::Move {
                dest: PathBuf::from("/srv")
            }
        );
        assert_eq!(request.retry_passes, 0);
    }
}
