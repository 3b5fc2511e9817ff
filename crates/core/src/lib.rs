pub mod classification;
pub mod discover;
pub mod engine;
pub mod error;
pub mod error_list;
pub mod hooks;
pub mod model;
pub mod ops;
pub mod progress;
pub mod queue;
pub mod report;

pub use classification::{ErrorCause, ErrorClassification, ErrorFactory, StandardErrors};
pub use discover::{validate_discover_options, DiscoverOptions, WalkSource, NO_ROOTS_CAUSE};
pub use engine::ProcessEngine;
pub use error::{EngineFault, QueueError};
pub use error_list::{ErrorList, ErrorListView, NodeId};
pub use hooks::{
    progress_fn, state_fn, CheckOutcome, Discovery, EngineObserver, PathLoader, PathSource,
    ProcessHooks, StaticSource,
};
pub use model::{
    EngineState, ErrorItem, LoadSummary, PathItem, ProcessState, ProgressEvent, RunPhase,
    RunSummary, StateChange, REPORT_VERSION,
};
pub use ops::{classify_io_error, file_digest, FsHooks, FsOperation, OpStats};
pub use progress::ProgressModel;
pub use queue::{PathQueue, PathQueueView};
pub use report::{build_report, group_errors, load_report, write_report, BatchReport, ErrorGroup};
