use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classification::{ErrorClassification, ErrorFactory, StandardErrors};
use crate::error::EngineFault;
use crate::error_list::{ErrorList, ErrorListView};
use crate::hooks::{EngineObserver, PathLoader, PathSource, ProcessHooks};
use crate::model::{
    EngineState, ErrorItem, LoadSummary, PathItem, ProcessState, ProgressEvent, RunPhase,
    RunSummary, StateChange,
};
use crate::progress::ProgressModel;
use crate::queue::{PathQueue, PathQueueView};

/// Drives a load/run/reset lifecycle over one path queue and one error list.
///
/// Every call runs to completion on the caller's thread. Item-level failures
/// are routed into the error list; global failures stop the current run and
/// are recorded on the engine. Lifecycle misuse is reported as an
/// [`EngineFault`].
pub struct ProcessEngine {
    source: Option<Box<dyn PathSource>>,
    hooks: Option<Box<dyn ProcessHooks>>,
    factory: Box<dyn ErrorFactory>,
    observer: Option<Box<dyn EngineObserver>>,
    queue: PathQueue,
    errors: ErrorList,
    progress: ProgressModel,
    are_paths_loaded: bool,
    error: ErrorClassification,
    state: EngineState,
    event_seq: u64,
}

struct RunContext {
    run_id: String,
    started_at: String,
    phase: RunPhase,
    retry_target: Option<ErrorClassification>,
    attempted: u64,
    succeeded: u64,
    failed: u64,
    aborted: bool,
    refailed: Vec<ErrorItem>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: timestamp(),
            phase: RunPhase::Idle,
            retry_target: None,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            aborted: false,
            refailed: Vec::new(),
        }
    }
}

impl ProcessEngine {
    pub fn new<S, H>(source: S, hooks: H) -> Self
    where
        S: PathSource + 'static,
        H: ProcessHooks + 'static,
    {
        Self {
            source: Some(Box::new(source)),
            hooks: Some(Box::new(hooks)),
            factory: Box::new(StandardErrors),
            observer: None,
            queue: PathQueue::new(),
            errors: ErrorList::new(),
            progress: ProgressModel::default(),
            are_paths_loaded: false,
            error: ErrorClassification::None,
            state: EngineState::Unloaded,
            event_seq: 0,
        }
    }

    pub fn with_error_factory<F>(mut self, factory: F) -> Self
    where
        F: ErrorFactory + 'static,
    {
        self.error = factory.none();
        self.factory = Box::new(factory);
        self
    }

    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: EngineObserver + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.state == EngineState::Disposed
    }

    pub fn are_paths_loaded(&self) -> Result<bool, EngineFault> {
        self.ensure_live()?;
        Ok(self.are_paths_loaded)
    }

    pub fn error(&self) -> Result<&ErrorClassification, EngineFault> {
        self.ensure_live()?;
        Ok(&self.error)
    }

    pub fn progress(&self) -> Result<&ProgressModel, EngineFault> {
        self.ensure_live()?;
        Ok(&self.progress)
    }

    pub fn process_state(&self) -> Result<ProcessState, EngineFault> {
        self.ensure_live()?;
        Ok(ProcessState {
            are_paths_loaded: self.are_paths_loaded,
            error: self.error.clone(),
            initial_total_size: self.progress.initial_total_size(),
            initial_item_count: self.progress.initial_item_count(),
            actual_remaining_size: self.progress.actual_remaining_size(),
        })
    }

    pub fn queue(&self) -> Result<PathQueueView<'_>, EngineFault> {
        self.ensure_live()?;
        Ok(self.queue.view())
    }

    pub fn error_list(&self) -> Result<ErrorListView<'_>, EngineFault> {
        self.ensure_live()?;
        Ok(self.errors.view())
    }

    /// Populates the queue from the path source and captures the initial
    /// totals. Leftovers of an earlier failed load are dropped first. On
    /// failure the engine stays unloaded and `error()` holds the reported
    /// classification.
    pub fn load_paths(&mut self) -> Result<LoadSummary, EngineFault> {
        self.ensure_live()?;
        if self.are_paths_loaded {
            return Err(EngineFault::AlreadyLoaded);
        }
        let source = self.source.as_deref().ok_or(EngineFault::Disposed)?;
        self.queue.clear();
        let queue = &mut self.queue;
        let outcome = guarded(|| {
            let mut loader = PathLoader::new(queue);
            source.discover(&mut loader)
        });

        match outcome {
            Ok(discovery) if discovery.succeeded() => {
                let total_size = self.queue.aggregate_size();
                let item_count = self.queue.len() as u64;
                self.set_error(discovery.error);
                self.update_progress(|progress| progress.capture(total_size, item_count));
                self.set_paths_loaded(true);
                self.transition(EngineState::Loaded);
                info!("paths loaded: {item_count} item(s), {total_size} byte(s)");
            }
            Ok(discovery) => {
                if discovery.clear_on_error {
                    self.queue.clear();
                }
                warn!(
                    "path discovery reported failure: {} (queue cleared: {})",
                    discovery.error, discovery.clear_on_error
                );
                self.set_error(discovery.error);
            }
            Err(err) => {
                warn!("path discovery failed unexpectedly: {err:#}");
                self.queue.clear();
                self.set_error(self.factory.unknown_error());
                self.run_cleanup();
            }
        }

        Ok(LoadSummary {
            loaded: self.are_paths_loaded,
            item_count: self.queue.len() as u64,
            total_size: self.queue.aggregate_size(),
            error: self.error.clone(),
        })
    }

    /// Runs one pass: fresh items while the queue is non-empty, otherwise one
    /// classified retry pass over the error list. The cleanup hook runs once
    /// at the end regardless of how the pass ended.
    pub fn start(&mut self) -> Result<RunSummary, EngineFault> {
        self.ensure_live()?;
        if !self.are_paths_loaded {
            return Err(EngineFault::PathsNotLoaded);
        }
        let mut hooks = self.hooks.take().ok_or(EngineFault::Disposed)?;
        let mut run = RunContext::new();

        self.transition(EngineState::Running);
        info!(
            "run {} started: {} queued, {} in error list",
            run.run_id,
            self.queue.len(),
            self.errors.len()
        );

        let result = guarded(|| self.run_pass(hooks.as_mut(), &mut run));

        self.errors.end_retry_pass();
        for item in run.refailed.drain(..) {
            self.errors.push_back(item);
        }
        if let Err(err) = result {
            warn!("run {} aborted by unexpected hook failure: {err:#}", run.run_id);
            self.set_error(self.factory.unknown_error());
            run.aborted = true;
        }
        self.recompute_remaining();

        self.hooks = Some(hooks);
        if !self.run_cleanup() {
            run.aborted = true;
        }

        let next = if self.error.is_global() {
            EngineState::Faulted
        } else {
            EngineState::Loaded
        };
        self.transition(next);

        info!(
            "run {} finished ({:?}): {} attempted, {} succeeded, {} failed, error {}",
            run.run_id, run.phase, run.attempted, run.succeeded, run.failed, self.error
        );

        Ok(RunSummary {
            run_id: run.run_id,
            started_at: run.started_at,
            phase: run.phase,
            retry_target: run.retry_target,
            attempted: run.attempted,
            succeeded: run.succeeded,
            failed: run.failed,
            aborted: run.aborted,
            error: self.error.clone(),
            remaining_size: self.progress.actual_remaining_size(),
        })
    }

    /// Empties both collections, runs the cleanup hook and zeroes the
    /// progress counters. `error()` is left as it was unless cleanup fails.
    pub fn reset(&mut self) -> Result<(), EngineFault> {
        self.ensure_live()?;
        self.queue.clear();
        self.errors.clear();
        self.run_cleanup();
        self.update_progress(ProgressModel::reset);
        self.set_paths_loaded(false);
        self.transition(EngineState::Unloaded);
        debug!("engine reset");
        Ok(())
    }

    /// Releases the collections, hooks and observer. Idempotent; every other
    /// operation except `state()` and `is_disposed()` faults afterwards.
    pub fn dispose(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.queue = PathQueue::new();
        self.errors = ErrorList::new();
        self.source = None;
        self.hooks = None;
        self.progress = ProgressModel::default();
        self.are_paths_loaded = false;
        self.error = self.factory.none();
        self.transition(EngineState::Disposed);
        self.observer = None;
        debug!("engine disposed");
    }

    fn run_pass(&mut self, hooks: &mut dyn ProcessHooks, run: &mut RunContext) -> Result<()> {
        let check = hooks.check()?;
        let refused = !check.ok || !check.error.is_none();
        self.set_error(check.error);
        if refused {
            run.phase = RunPhase::Precheck;
            run.aborted = true;
            warn!(
                "run {} refused by precondition check: {}",
                run.run_id, self.error
            );
            return Ok(());
        }

        if !self.queue.is_empty() {
            run.phase = RunPhase::Fresh;
            self.process_fresh(hooks, run)
        } else if !self.errors.is_empty() {
            run.phase = RunPhase::Retry;
            self.process_retry(hooks, run)
        } else {
            Ok(())
        }
    }

    fn process_fresh(&mut self, hooks: &mut dyn ProcessHooks, run: &mut RunContext) -> Result<()> {
        while let Ok(item) = self.queue.peek() {
            let item = item.clone();
            self.emit_progress(run, &item);
            run.attempted += 1;

            let outcome = hooks.process_path(&item)?;
            if outcome.is_none() {
                self.queue.dequeue()?;
                run.succeeded += 1;
                self.update_progress(|progress| progress.consume(item.size_or_zero()));
                debug!("processed {}", item.path().display());
            } else if outcome.is_global() {
                warn!(
                    "run {} stopped at {}: {outcome}",
                    run.run_id,
                    item.path().display()
                );
                self.set_error(outcome);
                run.aborted = true;
                break;
            } else {
                let item = self.queue.dequeue()?;
                run.failed += 1;
                debug!("{} failed: {outcome}", item.path().display());
                self.errors.push_back(ErrorItem::new(item, outcome));
            }
        }
        Ok(())
    }

    fn process_retry(&mut self, hooks: &mut dyn ProcessHooks, run: &mut RunContext) -> Result<()> {
        let Some(target) = self.errors.begin_retry_pass() else {
            return Ok(());
        };
        info!("run {} retrying items classified {target}", run.run_id);
        run.retry_target = Some(target);

        loop {
            let factory = &self.factory;
            if !self
                .errors
                .has_match(|left, right| factory.same_kind(left, right))
            {
                break;
            }
            let Some(entry) = self.errors.current_match().cloned() else {
                break;
            };
            self.emit_progress(run, entry.item());
            run.attempted += 1;

            let outcome = hooks.process_error(&entry)?;
            if outcome.is_none() {
                self.errors.take_match();
                run.succeeded += 1;
                let size = entry.item().size_or_zero();
                self.update_progress(|progress| progress.consume(size));
                debug!("retried {}", entry.item().path().display());
            } else if outcome.is_global() {
                warn!(
                    "run {} stopped at {}: {outcome}",
                    run.run_id,
                    entry.item().path().display()
                );
                self.set_error(outcome);
                run.aborted = true;
                break;
            } else {
                run.failed += 1;
                debug!("{} failed again: {outcome}", entry.item().path().display());
                if let Some(taken) = self.errors.take_match() {
                    run.refailed.push(ErrorItem::new(taken.into_item(), outcome));
                }
            }
        }
        Ok(())
    }

    /// Returns false when the cleanup hook itself failed.
    fn run_cleanup(&mut self) -> bool {
        let Some(hooks) = self.hooks.as_mut() else {
            return true;
        };
        match guarded(|| hooks.reset_status()) {
            Ok(()) => true,
            Err(err) => {
                warn!("cleanup hook failed: {err:#}");
                self.set_error(self.factory.wrong_status_error());
                false
            }
        }
    }

    fn recompute_remaining(&mut self) {
        let pending = self
            .queue
            .aggregate_size()
            .saturating_add(self.errors.aggregate_size());
        self.update_progress(|progress| progress.recompute(pending));
    }

    fn emit_progress(&mut self, run: &RunContext, item: &PathItem) {
        self.event_seq = self.event_seq.saturating_add(1);
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        observer.on_progress(&ProgressEvent {
            seq: self.event_seq,
            run_id: run.run_id.clone(),
            phase: run.phase,
            current_path: item.path().to_string_lossy().to_string(),
            item_size: item.size(),
            remaining_size: self.progress.actual_remaining_size(),
            attempted: run.attempted,
            failed: run.failed,
            timestamp: timestamp(),
        });
    }

    fn update_progress<F>(&mut self, update: F)
    where
        F: FnOnce(&mut ProgressModel),
    {
        let before = self.progress.clone();
        update(&mut self.progress);

        let mut changes = Vec::new();
        if before.initial_total_size() != self.progress.initial_total_size() {
            changes.push(StateChange::InitialTotalSize(
                self.progress.initial_total_size(),
            ));
        }
        if before.initial_item_count() != self.progress.initial_item_count() {
            changes.push(StateChange::InitialItemCount(
                self.progress.initial_item_count(),
            ));
        }
        if before.actual_remaining_size() != self.progress.actual_remaining_size() {
            changes.push(StateChange::ActualRemainingSize(
                self.progress.actual_remaining_size(),
            ));
        }
        for change in changes {
            self.notify(change);
        }
    }

    fn set_error(&mut self, error: ErrorClassification) {
        if self.error != error {
            self.error = error.clone();
            self.notify(StateChange::Error(error));
        }
    }

    fn set_paths_loaded(&mut self, loaded: bool) {
        if self.are_paths_loaded != loaded {
            self.are_paths_loaded = loaded;
            self.notify(StateChange::ArePathsLoaded(loaded));
        }
    }

    fn transition(&mut self, state: EngineState) {
        if self.state != state {
            debug!("engine state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.notify(StateChange::State(state));
        }
    }

    fn notify(&mut self, change: StateChange) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_state_change(&change);
        }
    }

    fn ensure_live(&self) -> Result<(), EngineFault> {
        if self.is_disposed() {
            return Err(EngineFault::Disposed);
        }
        Ok(())
    }
}

/// Runs a hook, folding a panic into an ordinary error.
fn guarded<T, F>(hook: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("hook panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
