//! Regex-driven file and folder classification for completed torrent
//! payloads, and the recursive walker that applies it (§4.3).

use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CleanupError, CleanupResult};

/// Outcome of a [`CleanupPredicates::clean`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Number of files deleted by `file_patterns`.
    pub files_deleted: u64,
    /// Number of folders removed wholesale by `folder_patterns`, plus any
    /// empty descendant directories reaped afterward.
    pub folders_deleted: u64,
}

/// Compiled, case-insensitive pattern lists used to classify filesystem
/// entries under a completed torrent's content path.
pub struct CleanupPredicates {
    file_patterns: Vec<Regex>,
    folder_patterns: Vec<Regex>,
    disable_file_patterns: Vec<Regex>,
}

impl CleanupPredicates {
    /// Compile the three pattern lists. Patterns are matched
    /// case-insensitively against a basename, never a full path.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending list and pattern if any
    /// entry fails to compile as a regex.
    pub fn new(
        file_patterns: &[String],
        folder_patterns: &[String],
        disable_file_patterns: &[String],
    ) -> CleanupResult<Self> {
        Ok(Self {
            file_patterns: compile_all("file_patterns", file_patterns)?,
            folder_patterns: compile_all("folder_patterns", folder_patterns)?,
            disable_file_patterns: compile_all("disable_file_patterns", disable_file_patterns)?,
        })
    }

    /// `true` if `name` matches one of the configured `file_patterns`.
    #[must_use]
    pub fn should_delete_file(&self, name: &str) -> bool {
        any_match(&self.file_patterns, name)
    }

    /// `true` if `name` matches one of the configured `folder_patterns`.
    #[must_use]
    pub fn should_delete_folder(&self, name: &str) -> bool {
        any_match(&self.folder_patterns, name)
    }

    /// `true` if `name` matches one of the configured `disable_file_patterns`.
    #[must_use]
    pub fn should_disable_file(&self, name: &str) -> bool {
        any_match(&self.disable_file_patterns, name)
    }

    /// Recursively clean `root_path`.
    ///
    /// Walks the tree top-down: a directory matching `folder_patterns` is
    /// removed as a whole subtree and its descendants are never visited;
    /// a file matching `file_patterns` is deleted. The surviving
    /// directories are then reaped bottom-up (deepest first) if left
    /// empty, finishing with `root_path` itself — this never ascends
    /// above `root_path`, so the caller's original root is the shallowest
    /// directory this call will ever remove. Failures on individual
    /// entries are logged and counted against neither total; the walk
    /// continues.
    pub fn clean(&self, root_path: &Path) -> CleanupResult<CleanupReport> {
        let mut report = CleanupReport::default();
        if root_path.is_file() {
            if self.basename_matches_delete_file(root_path) {
                remove_file_logged(root_path, &mut report);
            }
            return Ok(report);
        }
        if !root_path.is_dir() {
            return Ok(report);
        }

        let mut directories = Vec::new();
        let walker = WalkDir::new(root_path).min_depth(1).into_iter().filter_entry(|entry| {
            !(entry.file_type().is_dir() && self.basename_matches_delete_folder(entry.path()))
        });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(path = %root_path.display(), error = %err, "failed to traverse directory during cleanup");
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().is_dir() {
                if self.basename_matches_delete_folder(path) {
                    remove_dir_all_logged(path, &mut report);
                } else {
                    directories.push(entry);
                }
            } else if self.basename_matches_delete_file(path) {
                remove_file_logged(path, &mut report);
            }
        }

        directories.sort_by_key(walkdir::DirEntry::depth);
        for entry in directories.iter().rev() {
            remove_if_empty(entry.path(), &mut report);
        }
        remove_if_empty(root_path, &mut report);
        Ok(report)
    }

    fn basename_matches_delete_file(&self, path: &Path) -> bool {
        basename(path).is_some_and(|name| self.should_delete_file(name))
    }

    fn basename_matches_delete_folder(&self, path: &Path) -> bool {
        basename(path).is_some_and(|name| self.should_delete_folder(name))
    }
}

fn basename(path: &Path) -> Option<&str> {
    path.file_name().and_then(std::ffi::OsStr::to_str)
}

fn any_match(patterns: &[Regex], name: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(name))
}

fn compile_all(list: &'static str, patterns: &[String]) -> CleanupResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(&format!("(?i){pattern}")).map_err(|source| CleanupError::InvalidPattern {
                list,
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

fn remove_file_logged(path: &Path, report: &mut CleanupReport) {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "deleted file");
            report.files_deleted += 1;
        }
        Err(err) => warn!(path = %path.display(), error = %err, "failed to delete file"),
    }
}

fn remove_dir_all_logged(path: &Path, report: &mut CleanupReport) {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!(path = %path.display(), "deleted folder");
            report.folders_deleted += 1;
        }
        Err(err) => warn!(path = %path.display(), error = %err, "failed to delete folder"),
    }
}

fn remove_if_empty(path: &Path, report: &mut CleanupReport) {
    let is_empty = fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none());
    if !is_empty {
        return;
    }
    match fs::remove_dir(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed empty folder");
            report.folders_deleted += 1;
        }
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove empty folder"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn predicates() -> CleanupPredicates {
        CleanupPredicates::new(
            &[r"\.nfo$".to_string()],
            &[r"^sample$".to_string()],
            &[r"sample\.mp4$".to_string()],
        )
        .expect("patterns compile")
    }

    #[test]
    fn should_delete_file_matches_case_insensitively() {
        let predicates = predicates();
        assert!(predicates.should_delete_file("README.NFO"));
        assert!(!predicates.should_delete_file("movie.mkv"));
    }

    #[test]
    fn should_delete_folder_matches_exact_name() {
        let predicates = predicates();
        assert!(predicates.should_delete_folder("Sample"));
        assert!(!predicates.should_delete_folder("samples"));
    }

    #[test]
    fn should_disable_file_matches_suffix() {
        let predicates = predicates();
        assert!(predicates.should_disable_file("movie-sample.mp4"));
        assert!(!predicates.should_disable_file("movie.mp4"));
    }

    #[test]
    fn clean_removes_matching_folder_and_file_but_preserves_rest() {
        let root = tempdir().expect("tempdir");
        let root = root.path();
        fs::write(root.join("movie.mkv"), b"data").unwrap();
        fs::write(root.join("readme.nfo"), b"data").unwrap();
        fs::create_dir(root.join("sample")).unwrap();
        fs::write(root.join("sample/trailer.mp4"), b"data").unwrap();

        let predicates = predicates();
        let report = predicates.clean(root).unwrap();

        assert_eq!(report.files_deleted, 1);
        assert_eq!(report.folders_deleted, 1);
        assert!(root.join("movie.mkv").exists());
        assert!(!root.join("readme.nfo").exists());
        assert!(!root.join("sample").exists());
    }

    #[test]
    fn clean_is_idempotent_p9() {
        let root = tempdir().expect("tempdir");
        let root = root.path();
        fs::write(root.join("readme.nfo"), b"data").unwrap();

        let predicates = predicates();
        predicates.clean(root).unwrap();
        let second = predicates.clean(root).unwrap();

        assert_eq!(second.files_deleted, 0);
        assert_eq!(second.folders_deleted, 0);
    }

    #[test]
    fn clean_removes_root_itself_when_left_empty() {
        let parent = tempdir().expect("tempdir");
        let root = parent.path().join("payload");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("readme.nfo"), b"data").unwrap();

        let predicates = predicates();
        predicates.clean(&root).unwrap();

        assert!(!root.exists());
        assert!(parent.path().exists());
    }

    #[test]
    fn clean_never_ascends_above_root_when_file_is_passed() {
        let root = tempdir().expect("tempdir");
        let file = root.path().join("readme.nfo");
        fs::write(&file, b"data").unwrap();

        let predicates = predicates();
        let report = predicates.clean(&file).unwrap();

        assert_eq!(report.files_deleted, 1);
        assert!(root.path().exists());
    }
}
