use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classification::ErrorClassification;
use crate::hooks::{CheckOutcome, ProcessHooks};
use crate::model::{ErrorItem, PathItem};

pub const PERMISSION_CAUSE: &str = "permission";
pub const NOT_FOUND_CAUSE: &str = "not-found";
pub const IO_CAUSE: &str = "io";
pub const VERIFY_CAUSE: &str = "verify";
pub const DESTINATION_CAUSE: &str = "destination";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FsOperation {
    /// Confirms each path still exists without touching it.
    List,
    Delete,
    Copy {
        dest: PathBuf,
        #[serde(default)]
        verify: bool,
    },
    Move {
        dest: PathBuf,
    },
}

impl FsOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Delete => "delete",
            Self::Copy { .. } => "copy",
            Self::Move { .. } => "move",
        }
    }

    fn destination(&self) -> Option<&Path> {
        match self {
            Self::Copy { dest, .. } | Self::Move { dest } => Some(dest.as_path()),
            Self::List | Self::Delete => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpStats {
    pub completed: u64,
    pub bytes: u64,
    pub failed: u64,
}

/// [`ProcessHooks`] that performs one filesystem operation per item and
/// classifies I/O failures.
#[derive(Debug, Clone)]
pub struct FsHooks {
    operation: FsOperation,
    stats: OpStats,
}

impl FsHooks {
    pub fn new(operation: FsOperation) -> Self {
        Self {
            operation,
            stats: OpStats::default(),
        }
    }

    pub fn operation(&self) -> &FsOperation {
        &self.operation
    }

    pub fn stats(&self) -> OpStats {
        self.stats
    }

    fn apply(&mut self, item: &PathItem) -> ErrorClassification {
        let result = match &self.operation {
            FsOperation::List => fs::symlink_metadata(item.path())
                .map(|_| ())
                .map_err(|err| classify_io_error(&err)),
            FsOperation::Delete => delete_path(item).map_err(|err| classify_io_error(&err)),
            FsOperation::Copy { dest, verify } => {
                copy_item(item, &dest.join(item.relative_path()), *verify)
            }
            FsOperation::Move { dest } => move_path(item, &dest.join(item.relative_path()))
                .map_err(|err| classify_io_error(&err)),
        };

        match result {
            Ok(()) => {
                self.stats.completed += 1;
                self.stats.bytes = self.stats.bytes.saturating_add(item.size_or_zero());
                debug!("{} {}", self.operation.name(), item.path().display());
                ErrorClassification::None
            }
            Err(classification) => {
                self.stats.failed += 1;
                debug!(
                    "{} {} failed: {classification}",
                    self.operation.name(),
                    item.path().display()
                );
                classification
            }
        }
    }
}

impl ProcessHooks for FsHooks {
    fn check(&mut self) -> Result<CheckOutcome> {
        let Some(dest) = self.operation.destination() else {
            return Ok(CheckOutcome::passed());
        };
        if dest.is_dir() {
            Ok(CheckOutcome::passed())
        } else {
            Ok(CheckOutcome::failed(ErrorClassification::global(
                DESTINATION_CAUSE,
            )))
        }
    }

    fn process_path(&mut self, item: &PathItem) -> Result<ErrorClassification> {
        Ok(self.apply(item))
    }

    fn process_error(&mut self, item: &ErrorItem) -> Result<ErrorClassification> {
        Ok(self.apply(item.item()))
    }

    fn reset_status(&mut self) -> Result<()> {
        self.stats = OpStats::default();
        Ok(())
    }
}

pub fn classify_io_error(err: &io::Error) -> ErrorClassification {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorClassification::item(PERMISSION_CAUSE),
        io::ErrorKind::NotFound => ErrorClassification::item(NOT_FOUND_CAUSE),
        _ => ErrorClassification::item(IO_CAUSE),
    }
}

fn delete_path(item: &PathItem) -> io::Result<()> {
    if item.is_dir() {
        fs::remove_dir(item.path())
    } else {
        fs::remove_file(item.path())
    }
}

fn copy_path(item: &PathItem, target: &Path) -> io::Result<()> {
    if item.is_dir() {
        return fs::create_dir_all(target);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(item.path(), target).map(|_| ())
}

fn move_path(item: &PathItem, target: &Path) -> io::Result<()> {
    if item.is_dir() {
        fs::create_dir_all(target)?;
        return fs::remove_dir(item.path());
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(item.path(), target) {
        Ok(()) => Ok(()),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) =>
        {
            Err(err)
        }
        Err(_) => {
            fs::copy(item.path(), target)?;
            fs::remove_file(item.path())
        }
    }
}

fn copy_item(item: &PathItem, target: &Path, verify: bool) -> Result<(), ErrorClassification> {
    copy_path(item, target).map_err(|err| classify_io_error(&err))?;
    if verify && !item.is_dir() {
        let matched = verify_copy(item.path(), target).map_err(|err| classify_io_error(&err))?;
        if !matched {
            return Err(ErrorClassification::item(VERIFY_CAUSE));
        }
    }
    Ok(())
}

fn verify_copy(source: &Path, target: &Path) -> io::Result<bool> {
    Ok(file_digest(source)? == file_digest(target)?)
}

pub fn file_digest(path: &Path) -> io::Result<blake3::Hash> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;

    use super::{classify_io_error, file_digest, FsHooks, FsOperation};
    use crate::classification::ErrorClassification;
    use crate::hooks::ProcessHooks;
    use crate::model::PathItem;

    #[test]
    fn io_errors_map_to_item_causes() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let missing = io::Error::from(io::ErrorKind::NotFound);
        let other = io::Error::from(io::ErrorKind::InvalidData);
        assert_eq!(classify_io_error(&denied), ErrorClassification::item("permission"));
        assert_eq!(classify_io_error(&missing), ErrorClassification::item("not-found"));
        assert_eq!(classify_io_error(&other), ErrorClassification::item("io"));
    }

    #[test]
    fn copy_mirrors_relative_layout_and_verifies() {
        let source = tempfile::tempdir().expect("source dir");
        let dest = tempfile::tempdir().expect("dest dir");
        fs::create_dir_all(source.path().join("sub")).expect("mkdir");
        let file = source.path().join("sub/data.bin");
        fs::write(&file, b"payload").expect("write");

        let mut hooks = FsHooks::new(FsOperation::Copy {
            dest: dest.path().to_path_buf(),
            verify: true,
        });
        assert!(hooks.check().expect("check").ok);

        let item = PathItem::file(&file, 7).with_root(source.path());
        let outcome = hooks.process_path(&item).expect("process");
        assert!(outcome.is_none());

        let copied = dest.path().join("sub/data.bin");
        assert_eq!(
            file_digest(&file).expect("digest source"),
            file_digest(&copied).expect("digest copy")
        );
        assert_eq!(hooks.stats().completed, 1);
        assert_eq!(hooks.stats().bytes, 7);

        hooks.reset_status().expect("reset");
        assert_eq!(hooks.stats().completed, 0);
    }

    #[test]
    fn move_and_delete_report_missing_sources() {
        let root = tempfile::tempdir().expect("root");
        let dest = tempfile::tempdir().expect("dest");
        let file = root.path().join("a.txt");
        fs::write(&file, b"abc").expect("write");

        let mut mover = FsHooks::new(FsOperation::Move {
            dest: dest.path().to_path_buf(),
        });
        let item = PathItem::file(&file, 3).with_root(root.path());
        assert!(mover.process_path(&item).expect("move").is_none());
        assert!(!file.exists());
        assert!(dest.path().join("a.txt").exists());

        let mut deleter = FsHooks::new(FsOperation::Delete);
        assert_eq!(
            deleter.process_path(&item).expect("delete"),
            ErrorClassification::item("not-found")
        );
        assert_eq!(deleter.stats().failed, 1);
    }

    #[test]
    fn missing_destination_fails_the_check_globally() {
        let root = tempfile::tempdir().expect("root");
        let mut hooks = FsHooks::new(FsOperation::Copy {
            dest: root.path().join("absent"),
            verify: false,
        });
        let check = hooks.check().expect("check");
        assert!(!check.ok);
        assert_eq!(check.error, ErrorClassification::global("destination"));

        let mut lister = FsHooks::new(FsOperation::List);
        assert!(lister.check().expect("check").ok);
    }
}
