//! The set of files a search runs over, plus their tree cache.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use indicatif::ProgressBar;
use log::{debug, info};
use walkdir::WalkDir;

use crate::cache::FileCache;
use crate::error::{CacheError, WorkspaceError};
use crate::tree::{grammar_for_path, TreeBuilder};

/// Files selected for searching, in a stable order.
#[derive(Debug)]
pub struct Workspace {
    files: Vec<PathBuf>,
    cache: FileCache,
}

impl Workspace {
    pub fn new(builder: TreeBuilder) -> Self {
        Self {
            files: Vec::new(),
            cache: FileCache::new(builder),
        }
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_single_file(&self) -> bool {
        self.files.len() == 1
    }

    /// Use an explicit file list, kept in the given order.
    pub fn load_files(&mut self, files: Vec<PathBuf>) -> usize {
        debug!("using {} explicit files", files.len());
        self.files = files;
        self.files.len()
    }

    /// Use every supported file under `folder`.
    pub fn load_folder(
        &mut self,
        folder: &Path,
        exclude: &[String],
        recursive: bool,
    ) -> Result<usize, WorkspaceError> {
        self.files = collect_files(folder, exclude, recursive)?;
        info!(
            "found {} files under {}",
            self.files.len(),
            folder.display()
        );
        Ok(self.files.len())
    }

    /// Build every selected file's tree ahead of the search.
    pub fn preload(&self, parallel: bool, progress: Option<&ProgressBar>) -> Vec<CacheError> {
        self.cache.preload(&self.files, parallel, progress)
    }
}

/// Supported source files under `root`, sorted by path.
///
/// Hidden directories are skipped. `exclude` globs are matched against paths
/// relative to `root`; a matching directory is not descended into.
pub fn collect_files(
    root: &Path,
    exclude: &[String],
    recursive: bool,
) -> Result<Vec<PathBuf>, WorkspaceError> {
    let excluded = build_globset(exclude)?;
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            if e.file_type().is_dir() && name.starts_with('.') {
                return false;
            }
            let relative = e.path().strip_prefix(root).unwrap_or(e.path());
            !excluded.is_match(relative)
        });

    for entry in walker {
        let entry = entry.map_err(|source| WorkspaceError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && grammar_for_path(entry.path()).is_some() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, WorkspaceError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| WorkspaceError::Glob {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| WorkspaceError::Glob {
        pattern: patterns.join(", "),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "pass\n").unwrap();
    }

    fn relative(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.py");
        touch(dir.path(), "a.py");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "pkg/mod.py");
        touch(dir.path(), "pkg/lib.rs");
        touch(dir.path(), "venv/site.py");
        touch(dir.path(), ".git/hook.py");
        dir
    }

    #[test]
    fn collects_supported_files_sorted() {
        let dir = tree();
        let files = collect_files(dir.path(), &[], true).unwrap();
        assert_eq!(
            relative(dir.path(), &files),
            vec!["a.py", "b.py", "pkg/lib.rs", "pkg/mod.py", "venv/site.py"]
        );
    }

    #[test]
    fn exclude_globs_prune_directories() {
        let dir = tree();
        let exclude = vec!["venv".to_string(), "**/*.rs".to_string()];
        let files = collect_files(dir.path(), &exclude, true).unwrap();
        assert_eq!(relative(dir.path(), &files), vec!["a.py", "b.py", "pkg/mod.py"]);
    }

    #[test]
    fn non_recursive_stays_at_top_level() {
        let dir = tree();
        let files = collect_files(dir.path(), &[], false).unwrap();
        assert_eq!(relative(dir.path(), &files), vec!["a.py", "b.py"]);
    }

    #[test]
    fn invalid_glob_is_reported() {
        let dir = tree();
        let err = collect_files(dir.path(), &["a[".to_string()], true).unwrap_err();
        assert!(matches!(err, WorkspaceError::Glob { .. }));
    }

    #[test]
    fn explicit_files_keep_order() {
        let mut ws = Workspace::new(TreeBuilder::default());
        ws.load_files(vec![PathBuf::from("z.py"), PathBuf::from("a.py")]);
        assert_eq!(ws.files(), [PathBuf::from("z.py"), PathBuf::from("a.py")]);
        assert!(!ws.is_single_file());
    }
}
