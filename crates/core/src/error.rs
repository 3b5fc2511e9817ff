use thiserror::Error;

/// Programming errors: calls the engine refuses in its current lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineFault {
    #[error("paths are not loaded; call load_paths before start")]
    PathsNotLoaded,
    #[error("paths are already loaded; reset before loading again")]
    AlreadyLoaded,
    #[error("engine has been disposed")]
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("path queue is empty")]
    EmptyQueue,
}
