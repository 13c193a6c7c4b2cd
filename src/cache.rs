//! Per-file tree cache with single-flight builds.
//!
//! Each path owns a slot holding a `OnceCell`. Concurrent first requests for
//! the same path block on that cell, so exactly one build runs and every
//! caller sees the finished result. Failed builds are kept in the slot as
//! well; only [`FileCache::reload`] makes a path build again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use indicatif::ProgressBar;
use log::{debug, info};
use once_cell::sync::OnceCell;
use rayon::prelude::*;

use crate::error::{CacheError, ParseError};
use crate::tree::{PositionTable, SyntaxTree, TreeBuilder};

/// A source file as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

/// A built tree together with the file it came from.
#[derive(Debug)]
pub struct CachedTree {
    source: SourceFile,
    tree: SyntaxTree,
    positions: Option<PositionTable>,
    generation: u64,
}

impl CachedTree {
    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    pub fn path(&self) -> &Path {
        &self.source.path
    }

    pub fn tree(&self) -> &SyntaxTree {
        &self.tree
    }

    /// Side table of positions when the tree was built without embedding
    /// them.
    pub fn positions(&self) -> Option<&PositionTable> {
        self.positions.as_ref()
    }

    /// Build stamp; later builds carry larger values.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

type BuildResult = Result<Arc<CachedTree>, Arc<ParseError>>;
type Slot = OnceCell<BuildResult>;

/// Caches one tree per path for the lifetime of the session.
#[derive(Debug)]
pub struct FileCache {
    builder: TreeBuilder,
    slots: RwLock<HashMap<PathBuf, Arc<Slot>>>,
    generation: AtomicU64,
    builds: AtomicUsize,
}

impl Default for FileCache {
    fn default() -> Self {
        Self::new(TreeBuilder::default())
    }
}

impl FileCache {
    pub fn new(builder: TreeBuilder) -> Self {
        Self {
            builder,
            slots: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn builder(&self) -> &TreeBuilder {
        &self.builder
    }

    /// The tree for `path`, building it on first use.
    pub fn get(&self, path: &Path) -> Result<Arc<CachedTree>, CacheError> {
        let slot = self.slot(path);
        slot.get_or_init(|| self.build(path))
            .clone()
            .map_err(CacheError::Build)
    }

    fn slot(&self, path: &Path) -> Arc<Slot> {
        // Check for an existing slot first
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get(path) {
                return Arc::clone(slot);
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(path.to_path_buf()).or_default())
    }

    fn build(&self, path: &Path) -> BuildResult {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.builds.fetch_add(1, Ordering::SeqCst);
        debug!("building {} (generation {generation})", path.display());

        match self.builder.build_file(path) {
            Ok((text, built)) => Ok(Arc::new(CachedTree {
                source: SourceFile {
                    path: path.to_path_buf(),
                    text,
                },
                tree: built.tree,
                positions: built.positions,
                generation,
            })),
            Err(e) => {
                debug!("build failed: {e}");
                Err(Arc::new(e))
            }
        }
    }

    /// Whether `path` has a slot, finished or in progress.
    pub fn contains(&self, path: &Path) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    /// Forget `path` so the next [`get`](Self::get) rebuilds it. Returns
    /// whether anything was cached.
    pub fn reload(&self, path: &Path) -> bool {
        let removed = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some();
        if removed {
            debug!("invalidated {}", path.display());
        }
        removed
    }

    /// Forget every cached tree.
    pub fn reload_all(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        info!("invalidating {} cached trees", slots.len());
        slots.clear();
    }

    /// Number of builds run so far, failed ones included.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build every path up front and return the failures in input order.
    ///
    /// The optional progress bar is advanced once per file.
    pub fn preload(
        &self,
        paths: &[PathBuf],
        parallel: bool,
        progress: Option<&ProgressBar>,
    ) -> Vec<CacheError> {
        let load = |path: &PathBuf| {
            let result = self.get(path).err();
            if let Some(pb) = progress {
                pb.inc(1);
            }
            result
        };

        let failures: Vec<CacheError> = if parallel {
            paths.par_iter().filter_map(load).collect()
        } else {
            paths.iter().filter_map(load).collect()
        };

        info!(
            "loaded {} files ({} failed)",
            paths.len() - failures.len(),
            failures.len()
        );
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn repeated_get_returns_same_tree() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.py", "import os\n");
        let cache = FileCache::default();

        let first = cache.get(&path).unwrap();
        let second = cache.get(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.build_count(), 1);
        assert_eq!(first.source().text, "import os\n");
        assert_eq!(first.path(), path.as_path());
    }

    #[test]
    fn concurrent_first_requests_build_once() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.py", "def f():\n    return 1\n");
        let cache = FileCache::default();

        let trees: Vec<Arc<CachedTree>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| cache.get(&path).unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.build_count(), 1);
        assert!(trees.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn reload_forces_rebuild() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.py", "x = 1\n");
        let cache = FileCache::default();

        let before = cache.get(&path).unwrap();
        assert!(cache.reload(&path));
        assert!(!cache.contains(&path));
        let after = cache.get(&path).unwrap();

        assert_eq!(cache.build_count(), 2);
        assert!(after.generation() > before.generation());
        assert!(before.tree().structurally_eq(after.tree()));
    }

    #[test]
    fn reload_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.py", "x = 1\n");
        let cache = FileCache::default();
        let before = cache.get(&path).unwrap();

        fs::write(&path, "x = 1\ny = 2\n").unwrap();
        // No implicit invalidation.
        assert!(Arc::ptr_eq(&before, &cache.get(&path).unwrap()));

        cache.reload_all();
        assert!(cache.is_empty());
        let after = cache.get(&path).unwrap();
        assert!(!before.tree().structurally_eq(after.tree()));
    }

    #[test]
    fn failures_are_cached_per_generation() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.py", "def broken(:\n");
        let cache = FileCache::default();

        let err = cache.get(&path).unwrap_err();
        assert!(matches!(err.parse_error(), ParseError::Syntax { .. }));
        assert!(cache.get(&path).is_err());
        assert_eq!(cache.build_count(), 1);

        fs::write(&path, "def fixed():\n    pass\n").unwrap();
        cache.reload(&path);
        assert!(cache.get(&path).is_ok());
    }

    #[test]
    fn preload_reports_failures_in_order() {
        let dir = TempDir::new().unwrap();
        let paths = vec![
            write(&dir, "a.py", "import os\n"),
            write(&dir, "b.py", "def (\n"),
            dir.path().join("missing.py"),
            write(&dir, "c.py", "pass\n"),
        ];
        let cache = FileCache::default();

        let failures = cache.preload(&paths, true, None);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].parse_error().path(), &paths[1]);
        assert!(matches!(failures[1].parse_error(), ParseError::Io { .. }));
        assert_eq!(cache.build_count(), 4);
        assert_eq!(cache.len(), 4);
    }
}
