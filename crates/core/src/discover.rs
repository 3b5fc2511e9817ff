use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::classification::ErrorClassification;
use crate::hooks::{Discovery, PathLoader, PathSource};
use crate::model::PathItem;

pub const NO_ROOTS_CAUSE: &str = "no-roots";

#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    pub roots: Vec<PathBuf>,
    pub max_depth: Option<usize>,
    pub excludes: Vec<String>,
    /// Also emit directories. They are emitted after their contents so that
    /// delete and move operations find them empty.
    pub include_directories: bool,
    pub follow_links: bool,
}

/// Walks the configured roots lazily when the engine loads paths.
#[derive(Debug)]
pub struct WalkSource {
    options: DiscoverOptions,
    excludes: ExcludeMatcher,
}

impl WalkSource {
    pub fn new(options: DiscoverOptions) -> Result<Self> {
        validate_discover_options(&options)?;
        let excludes = ExcludeMatcher::compile(&options.excludes);
        for warning in &excludes.warnings {
            warn!("{warning}");
        }
        Ok(Self { options, excludes })
    }

    pub fn options(&self) -> &DiscoverOptions {
        &self.options
    }

    fn walk_root(&self, root: &Path, loader: &mut PathLoader<'_>) -> u64 {
        let mut walker = WalkDir::new(root)
            .follow_links(self.options.follow_links)
            .contents_first(true)
            .sort_by_file_name();
        if let Some(depth) = self.options.max_depth {
            walker = walker.max_depth(depth);
        }
        let iter = walker.into_iter().filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            !self.excludes.is_excluded(entry.path())
        });

        let mut emitted = 0_u64;
        for item in iter {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("walk error under {}: {}", root.display(), err);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                if entry.depth() == 0 || !self.options.include_directories {
                    continue;
                }
                loader.push(PathItem::directory(entry.path()).with_root(root));
                emitted += 1;
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(err) => {
                    warn!("metadata unavailable for {}: {}", entry.path().display(), err);
                    0
                }
            };
            let item_root = if entry.depth() == 0 {
                root.parent().unwrap_or(root)
            } else {
                root
            };
            loader.push(PathItem::file(entry.path(), size).with_root(item_root));
            emitted += 1;
        }
        emitted
    }
}

impl PathSource for WalkSource {
    fn discover(&self, loader: &mut PathLoader<'_>) -> Result<Discovery> {
        let roots = resolve_roots(&self.options.roots);
        if roots.is_empty() {
            return Ok(Discovery::failed(
                ErrorClassification::global(NO_ROOTS_CAUSE),
                true,
            ));
        }

        for root in &roots {
            let emitted = self.walk_root(root, loader);
            info!("discovered {} item(s) under {}", emitted, root.display());
        }
        Ok(Discovery::loaded())
    }
}

/// Drops missing roots and repeats. Two roots are the same when they
/// canonicalize to the same path, so case is significant wherever the
/// filesystem says it is.
fn resolve_roots(raw_roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let mut seen = HashSet::new();
    for root in raw_roots {
        let key = match fs::canonicalize(root) {
            Ok(canonical) => canonical,
            Err(_) if !root.exists() => {
                warn!("discovery root not found: {}", root.display());
                continue;
            }
            Err(_) => root.clone(),
        };
        if !seen.insert(key) {
            debug!("skipping repeated discovery root {}", root.display());
            continue;
        }
        roots.push(root.clone());
    }
    roots
}

/// Glob patterns plus plain case-insensitive substrings. A pattern that does
/// not compile as a glob degrades to a substring.
#[derive(Debug, Default)]
struct ExcludeMatcher {
    globset: Option<GlobSet>,
    substrings: Vec<String>,
    warnings: Vec<String>,
}

impl ExcludeMatcher {
    fn compile(patterns: &[String]) -> Self {
        let mut matcher = Self::default();
        let mut builder = GlobSetBuilder::new();
        let mut glob_count = 0_usize;

        for pattern in patterns.iter().map(|pattern| pattern.trim()) {
            if pattern.is_empty() {
                continue;
            }
            if is_plain_substring_pattern(pattern) {
                matcher.substrings.push(pattern.to_lowercase());
                continue;
            }
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    glob_count += 1;
                }
                Err(err) => {
                    matcher.warnings.push(format!(
                        "invalid exclude glob '{pattern}': {err}; matching it as a substring"
                    ));
                    matcher.substrings.push(pattern.to_lowercase());
                }
            }
        }

        if glob_count > 0 {
            match builder.build() {
                Ok(set) => matcher.globset = Some(set),
                Err(err) => matcher.warnings.push(format!(
                    "failed to compile exclude glob set: {err}; glob excludes disabled"
                )),
            }
        }
        matcher
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if let Some(globset) = &self.globset {
            if globset.is_match(path) {
                return true;
            }
        }

        if self.substrings.is_empty() {
            return false;
        }

        let lowered = path.to_string_lossy().to_lowercase();
        self.substrings
            .iter()
            .any(|pattern| lowered.contains(pattern))
    }
}

fn is_plain_substring_pattern(pattern: &str) -> bool {
    !pattern
        .chars()
        .any(|ch| matches!(ch, '*' | '?' | '[' | ']' | '{' | '}'))
}

pub fn validate_discover_options(options: &DiscoverOptions) -> Result<()> {
    if options.roots.is_empty() {
        return Err(anyhow!("at least one discovery root is required"));
    }
    if options.roots.iter().any(|root| root.as_os_str().is_empty()) {
        return Err(anyhow!("discovery roots must not be empty paths"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::{
        resolve_roots, validate_discover_options, DiscoverOptions, ExcludeMatcher, WalkSource,
    };
    use crate::classification::ErrorClassification;
    use crate::hooks::{PathLoader, PathSource};
    use crate::queue::PathQueue;

    #[test]
    fn exclude_matcher_matches_glob_and_substring() {
        let matcher = ExcludeMatcher::compile(&[
            "**/*.tmp".to_string(),
            "[".to_string(),
            "node_modules".to_string(),
        ]);

        assert!(matcher.is_excluded(Path::new("C:/repo/a.tmp")));
        assert!(matcher.is_excluded(Path::new("C:/repo/node_modules/pkg/index.js")));
        assert!(!matcher.is_excluded(Path::new("C:/repo/src/main.rs")));
        assert_eq!(matcher.warnings.len(), 1);
        assert!(matcher.is_excluded(Path::new("C:/odd[name/file.rs")));
    }

    #[test]
    fn rejects_missing_or_empty_roots() {
        assert!(validate_discover_options(&DiscoverOptions::default()).is_err());
        let options = DiscoverOptions {
            roots: vec![PathBuf::new()],
            ..DiscoverOptions::default()
        };
        assert!(validate_discover_options(&options).is_err());
    }

    #[test]
    fn walk_emits_files_with_sizes_and_directories_after_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("nested")).expect("mkdir");
        fs::write(dir.path().join("a.txt"), b"hello").expect("write a");
        fs::write(dir.path().join("nested/b.txt"), b"hi").expect("write b");
        fs::write(dir.path().join("nested/skip.tmp"), b"ignored").expect("write tmp");

        let source = WalkSource::new(DiscoverOptions {
            roots: vec![dir.path().to_path_buf()],
            excludes: vec!["*.tmp".to_string()],
            include_directories: true,
            ..DiscoverOptions::default()
        })
        .expect("valid options");

        let mut queue = PathQueue::new();
        let discovery = source
            .discover(&mut PathLoader::new(&mut queue))
            .expect("discover");
        assert!(discovery.succeeded());

        let relative = queue
            .iter()
            .map(|item| item.relative_path().to_string_lossy().replace('\\', "/"))
            .collect::<Vec<_>>();
        assert_eq!(relative, vec!["a.txt", "nested/b.txt", "nested"]);
        assert_eq!(queue.aggregate_size(), 7);
    }

    #[test]
    fn missing_roots_fail_with_clear_request() {
        let source = WalkSource::new(DiscoverOptions {
            roots: vec![PathBuf::from("/definitely/not/here/path-batch")],
            ..DiscoverOptions::default()
        })
        .expect("valid options");

        let mut queue = PathQueue::new();
        let discovery = source
            .discover(&mut PathLoader::new(&mut queue))
            .expect("discover");
        assert!(!discovery.succeeded());
        assert!(discovery.clear_on_error);
        assert_eq!(discovery.error, ErrorClassification::global("no-roots"));
    }

    #[test]
    fn roots_differing_only_in_case_are_both_walked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let upper = dir.path().join("Data");
        let lower = dir.path().join("data");
        fs::create_dir_all(&upper).expect("mkdir upper");
        fs::write(upper.join("u.txt"), b"u").expect("write upper");
        if lower.join("u.txt").exists() {
            // case-insensitive filesystem: both names are one directory
            return;
        }
        fs::create_dir_all(&lower).expect("mkdir lower");
        fs::write(lower.join("l.txt"), b"l").expect("write lower");

        let source = WalkSource::new(DiscoverOptions {
            roots: vec![upper.clone(), lower.clone()],
            ..DiscoverOptions::default()
        })
        .expect("valid options");
        let mut queue = PathQueue::new();
        source
            .discover(&mut PathLoader::new(&mut queue))
            .expect("discover");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn repeated_roots_are_walked_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        let dotted = root.join(".");
        assert_eq!(resolve_roots(&[root.clone(), dotted, root.clone()]), vec![root]);
    }
}
