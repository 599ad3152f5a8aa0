//! Project context handed to task generation: file tree and pending diff.

use std::path::Path;

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::io::git::Git;

/// Directory names never listed in the file tree.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "venv",
    ".venv",
    "node_modules",
    "target",
    ".oracle_data",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoContext {
    pub file_tree: String,
    /// Staged plus unstaged diff, absent outside a git work tree.
    pub diff: Option<String>,
}

/// Collect the file tree of `git.workdir()` and, inside a repository, its
/// diff cut to `diff_limit_bytes`.
pub fn gather(git: &Git, diff_limit_bytes: usize) -> RepoContext {
    RepoContext {
        file_tree: file_tree(git.workdir()),
        diff: diff_context(git, diff_limit_bytes),
    }
}

/// Indented listing of `root`; directories end with `/`.
pub fn file_tree(root: &Path) -> String {
    let mut out = String::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let indent = " ".repeat(4 * entry.depth());
        let name = if entry.depth() == 0 {
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| ".".to_string())
        } else {
            entry.file_name().to_string_lossy().into_owned()
        };
        if entry.file_type().is_dir() {
            out.push_str(&format!("{indent}{name}/\n"));
        } else {
            out.push_str(&format!("{indent}{name}\n"));
        }
    }
    out
}

/// Staged and unstaged changes, or `None` when not in a git work tree.
pub fn diff_context(git: &Git, limit_bytes: usize) -> Option<String> {
    if !git.is_repository() {
        return None;
    }
    let staged = git.diff_cached().unwrap_or_default();
    let unstaged = git.diff_worktree().unwrap_or_default();
    let text = format!("--- Staged Changes ---\n{staged}\n\n--- Unstaged Changes ---\n{unstaged}");
    Some(truncate_utf8(&text, limit_bytes).to_string())
}

/// Longest prefix of `text` that fits in `limit` bytes without splitting a
/// character.
pub fn truncate_utf8(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn is_excluded(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn tree_lists_files_and_skips_excluded_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("app");
        fs::create_dir_all(root.join("src")).expect("mkdir");
        fs::create_dir_all(root.join("node_modules/pkg")).expect("mkdir");
        fs::write(root.join("src/main.rs"), "fn main() {}").expect("write");
        fs::write(root.join("Cargo.toml"), "").expect("write");

        let tree = file_tree(&root);

        assert_eq!(tree, "app/\n    Cargo.toml\n    src/\n        main.rs\n");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("abc", 10), "abc");
        assert_eq!(truncate_utf8("abcdef", 3), "abc");
    }

    #[test]
    fn no_diff_outside_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path(), Duration::from_secs(10), 10_000);
        let ctx = gather(&git, 2000);
        assert_eq!(ctx.diff, None);
    }
}
