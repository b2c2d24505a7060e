//! Working-tree writer.
//!
//! Applying a batch of code changes stages every file next to its target
//! first and only renames once all of them were written. A failure while
//! staging removes the temporaries and leaves the tree as it was.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::types::CodeChange;
use crate::io::git::resolve_in_repo;

/// Applies code changes to files on disk.
pub trait WorkTreeWriter {
    fn apply(&self, changes: &[CodeChange]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct WorkTree {
    root: PathBuf,
}

impl WorkTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl WorkTreeWriter for WorkTree {
    #[instrument(skip_all, fields(changes = changes.len()))]
    fn apply(&self, changes: &[CodeChange]) -> Result<()> {
        // Later changes to the same file win.
        let mut targets: Vec<(PathBuf, &str)> = Vec::new();
        for change in changes {
            let target = resolve_in_repo(&self.root, &change.file_path)?;
            match targets.iter_mut().find(|(path, _)| *path == target) {
                Some(entry) => entry.1 = change.code.as_str(),
                None => targets.push((target, change.code.as_str())),
            }
        }

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        for (target, code) in &targets {
            match stage(target, code) {
                Ok(tmp) => staged.push((tmp, target.clone())),
                Err(err) => {
                    for (tmp, _) in &staged {
                        if let Err(cleanup) = fs::remove_file(tmp) {
                            warn!(path = %tmp.display(), err = %cleanup, "failed to remove staged file");
                        }
                    }
                    return Err(err);
                }
            }
        }

        for (tmp, target) in &staged {
            fs::rename(tmp, target)
                .with_context(|| format!("replace {}", target.display()))?;
            debug!(path = %target.display(), "applied change");
        }
        Ok(())
    }
}

fn stage(target: &Path, code: &str) -> Result<PathBuf> {
    let parent = target
        .parent()
        .with_context(|| format!("path missing parent {}", target.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = target
        .file_name()
        .with_context(|| format!("path missing file name {}", target.display()))?;
    let tmp = parent.join(format!(".{}.patchloop.tmp", file_name.to_string_lossy()));
    let mut contents = code.to_string();
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    fs::write(&tmp, contents).with_context(|| format!("stage {}", tmp.display()))?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, code: &str) -> CodeChange {
        CodeChange {
            file_path: path.to_string(),
            code: code.to_string(),
            task: "t".to_string(),
        }
    }

    #[test]
    fn applies_all_changes_creating_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tree = WorkTree::new(temp.path());
        tree.apply(&[
            change("api/health.py", "def health():\n    return 'ok'"),
            change("README.md", "# demo\n"),
        ])
        .expect("apply");

        assert_eq!(
            fs::read_to_string(temp.path().join("api/health.py")).expect("read"),
            "def health():\n    return 'ok'\n"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("README.md")).expect("read"),
            "# demo\n"
        );
    }

    #[test]
    fn later_change_to_same_file_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tree = WorkTree::new(temp.path());
        tree.apply(&[change("a.py", "v1"), change("a.py", "v2")])
            .expect("apply");
        assert_eq!(
            fs::read_to_string(temp.path().join("a.py")).expect("read"),
            "v2\n"
        );
    }

    #[test]
    fn escaping_path_leaves_tree_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tree = WorkTree::new(temp.path());
        let err = tree
            .apply(&[change("ok.py", "x"), change("../evil.py", "y")])
            .unwrap_err();
        assert!(err.to_string().contains("escapes repository"));
        assert!(!temp.path().join("ok.py").exists());
    }

    #[cfg(unix)]
    #[test]
    fn staging_failure_removes_temporaries() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("blocker"), "file, not a dir").expect("write");
        let tree = WorkTree::new(temp.path());
        let err = tree
            .apply(&[change("first.py", "x"), change("blocker/second.py", "y")])
            .unwrap_err();
        assert!(format!("{err:#}").contains("create directory"));
        assert!(!temp.path().join("first.py").exists());
        assert!(!temp.path().join(".first.py.patchloop.tmp").exists());
    }
}
