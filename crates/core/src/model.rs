use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classification::ErrorClassification;

pub const REPORT_VERSION: &str = "1.0.0";

/// A single unit of work: a path plus the metadata discovery attached to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PathItem {
    path: PathBuf,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    root: Option<PathBuf>,
}

impl PathItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: None,
            is_dir: false,
            root: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>, size: u64) -> Self {
        Self::new(path).with_size(size)
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            is_dir: true,
            ..Self::new(path)
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Root the item was discovered under; destinations mirror the path
    /// relative to it.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn size_or_zero(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn relative_path(&self) -> PathBuf {
        if let Some(relative) = self
            .root
            .as_deref()
            .and_then(|root| self.path.strip_prefix(root).ok())
            .filter(|relative| !relative.as_os_str().is_empty())
        {
            return relative.to_path_buf();
        }
        self.path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.path.clone())
    }
}

/// A path item that failed with an item-level classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorItem {
    item: PathItem,
    classification: ErrorClassification,
}

impl ErrorItem {
    pub(crate) fn new(item: PathItem, classification: ErrorClassification) -> Self {
        Self {
            item,
            classification,
        }
    }

    pub fn item(&self) -> &PathItem {
        &self.item
    }

    pub fn classification(&self) -> &ErrorClassification {
        &self.classification
    }

    pub fn into_item(self) -> PathItem {
        self.item
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Unloaded,
    Loaded,
    Running,
    /// Paths are still loaded but the last run ended in a global error.
    Faulted,
    Disposed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessState {
    pub are_paths_loaded: bool,
    pub error: ErrorClassification,
    pub initial_total_size: u64,
    pub initial_item_count: u64,
    pub actual_remaining_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum StateChange {
    State(EngineState),
    ArePathsLoaded(bool),
    Error(ErrorClassification),
    InitialTotalSize(u64),
    InitialItemCount(u64),
    ActualRemainingSize(u64),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Nothing was attempted: the precondition check refused the run.
    Precheck,
    Fresh,
    Retry,
    /// Queue and error list were both empty.
    Idle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub seq: u64,
    pub run_id: String,
    pub phase: RunPhase,
    pub current_path: String,
    pub item_size: Option<u64>,
    pub remaining_size: u64,
    pub attempted: u64,
    pub failed: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadSummary {
    pub loaded: bool,
    pub item_count: u64,
    pub total_size: u64,
    pub error: ErrorClassification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub phase: RunPhase,
    #[serde(default)]
    pub retry_target: Option<ErrorClassification>,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub aborted: bool,
    pub error: ErrorClassification,
    pub remaining_size: u64,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::PathItem;

    #[test]
    fn relative_path_strips_discovery_root() {
        let item = PathItem::file("/data/photos/2024/a.jpg", 10).with_root("/data/photos");
        assert_eq!(item.relative_path(), PathBuf::from("2024/a.jpg"));
        assert_eq!(item.size_or_zero(), 10);
    }

    #[test]
    fn relative_path_falls_back_to_file_name() {
        let item = PathItem::new("/data/photos/a.jpg");
        assert_eq!(item.relative_path(), PathBuf::from("a.jpg"));
        assert_eq!(item.size(), None);

        let root_itself = PathItem::directory("/data/photos").with_root("/data/photos");
        assert_eq!(root_itself.relative_path(), PathBuf::from("photos"));
        assert!(root_itself.is_dir());
    }
}
