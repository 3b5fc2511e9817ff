use anyhow::Result;

use crate::classification::ErrorClassification;
use crate::model::{ErrorItem, PathItem, ProgressEvent, StateChange};
use crate::queue::PathQueue;

/// What a path source reports after populating the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub ok: bool,
    /// Drop whatever was enqueued before the failure.
    pub clear_on_error: bool,
    pub error: ErrorClassification,
}

impl Discovery {
    pub fn loaded() -> Self {
        Self {
            ok: true,
            clear_on_error: false,
            error: ErrorClassification::None,
        }
    }

    pub fn failed(error: ErrorClassification, clear_on_error: bool) -> Self {
        Self {
            ok: false,
            clear_on_error,
            error,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.ok && self.error.is_none()
    }
}

/// Append-only handle to the engine's queue, lent to a [`PathSource`] for
/// the duration of a load.
pub struct PathLoader<'a> {
    queue: &'a mut PathQueue,
}

impl<'a> PathLoader<'a> {
    pub(crate) fn new(queue: &'a mut PathQueue) -> Self {
        Self { queue }
    }

    pub fn push(&mut self, item: PathItem) {
        self.queue.enqueue(item);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn aggregate_size(&self) -> u64 {
        self.queue.aggregate_size()
    }
}

impl Extend<PathItem> for PathLoader<'_> {
    fn extend<T: IntoIterator<Item = PathItem>>(&mut self, iter: T) {
        for item in iter {
            self.push(item);
        }
    }
}

pub trait PathSource: Send {
    fn discover(&self, loader: &mut PathLoader<'_>) -> Result<Discovery>;
}

/// Already-materialized item list.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    items: Vec<PathItem>,
}

impl StaticSource {
    pub fn new(items: Vec<PathItem>) -> Self {
        Self { items }
    }
}

impl PathSource for StaticSource {
    fn discover(&self, loader: &mut PathLoader<'_>) -> Result<Discovery> {
        loader.extend(self.items.iter().cloned());
        Ok(Discovery::loaded())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub ok: bool,
    pub error: ErrorClassification,
}

impl CheckOutcome {
    pub fn passed() -> Self {
        Self {
            ok: true,
            error: ErrorClassification::None,
        }
    }

    pub fn failed(error: ErrorClassification) -> Self {
        Self { ok: false, error }
    }
}

/// The per-run strategy the engine drives.
///
/// Work hooks return the classification of the attempt. `Err` and panics are
/// treated as unexpected failures and abort the run with
/// `GlobalError(UnknownError)`.
pub trait ProcessHooks: Send {
    fn check(&mut self) -> Result<CheckOutcome> {
        Ok(CheckOutcome::passed())
    }

    fn process_path(&mut self, item: &PathItem) -> Result<ErrorClassification>;

    fn process_error(&mut self, item: &ErrorItem) -> Result<ErrorClassification> {
        self.process_path(item.item())
    }

    fn reset_status(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait EngineObserver: Send {
    fn on_progress(&mut self, _event: &ProgressEvent) {}

    fn on_state_change(&mut self, _change: &StateChange) {}
}

pub struct ProgressFn<F>(F);

impl<F> EngineObserver for ProgressFn<F>
where
    F: FnMut(&ProgressEvent) + Send,
{
    fn on_progress(&mut self, event: &ProgressEvent) {
        (self.0)(event)
    }
}

pub struct StateFn<F>(F);

impl<F> EngineObserver for StateFn<F>
where
    F: FnMut(&StateChange) + Send,
{
    fn on_state_change(&mut self, change: &StateChange) {
        (self.0)(change)
    }
}

pub fn progress_fn<F>(on_progress: F) -> ProgressFn<F>
where
    F: FnMut(&ProgressEvent) + Send,
{
    ProgressFn(on_progress)
}

pub fn state_fn<F>(on_state_change: F) -> StateFn<F>
where
    F: FnMut(&StateChange) + Send,
{
    StateFn(on_state_change)
}

#[cfg(test)]
mod tests {
    use super::{Discovery, PathLoader, PathSource, StaticSource};
    use crate::classification::ErrorClassification;
    use crate::model::PathItem;
    use crate::queue::PathQueue;

    #[test]
    fn static_source_enqueues_in_order() {
        let source = StaticSource::new(vec![PathItem::file("a", 3), PathItem::file("b", 4)]);
        let mut queue = PathQueue::new();
        let discovery = {
            let mut loader = PathLoader::new(&mut queue);
            source.discover(&mut loader).expect("discover")
        };

        assert!(discovery.succeeded());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.aggregate_size(), 7);
    }

    #[test]
    fn discovery_success_requires_ok_and_no_error() {
        assert!(!Discovery::failed(ErrorClassification::None, false).succeeded());
        let inconsistent = Discovery {
            ok: true,
            clear_on_error: false,
            error: ErrorClassification::global("no-roots"),
        };
        assert!(!inconsistent.succeeded());
    }
}
