#![allow(dead_code)]

//! C3: lazy enumeration of note files under the vault root.
//!
//! Built on `walkdir`, the same traversal crate the teacher crate's `FileIndexer::index_directory`
//! uses, generalized to the two-suffix markdown recognition and glob ignore-pattern rules
//! SPEC_FULL.md §4.3 adds.

use std::path::Path;

use chrono::{DateTime, Utc};
use glob::Pattern;
use walkdir::WalkDir;

use crate::cancellation::CancellationToken;
use crate::types::{SyncError, VaultEntry};

pub struct VaultScanner {
    vault_root: std::path::PathBuf,
    ignore_patterns: Vec<Pattern>,
}

impl VaultScanner {
    pub fn new(vault_root: impl Into<std::path::PathBuf>, ignore_patterns: &[String]) -> Result<Self, SyncError> {
        let ignore_patterns = ignore_patterns
            .iter()
            .map(|p| Pattern::new(&normalize_double_star(p)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            vault_root: vault_root.into(),
            ignore_patterns,
        })
    }

    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    /// Walks the vault, yielding every markdown file not excluded by an ignore pattern or
    /// hidden-directory rule. Checked against `token` between directory entries.
    pub fn scan(&self, token: &CancellationToken) -> Result<Vec<VaultEntry>, SyncError> {
        let mut entries = Vec::new();

        let walker = WalkDir::new(&self.vault_root)
            .into_iter()
            .filter_entry(|e| !is_hidden_dir(e));

        for entry in walker {
            token.check()?;
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk error"))
            })?;

            let path = entry.path();
            if !path.is_file() || !is_markdown_file(path) {
                continue;
            }

            let relative = path
                .strip_prefix(&self.vault_root)
                .map_err(SyncError::from)?
                .to_path_buf();
            let relative_str = crate::types::normalize_path(&relative);

            if self.is_ignored(&relative_str, path) {
                continue;
            }

            let metadata = std::fs::metadata(path)?;
            let modified: DateTime<Utc> = metadata.modified()?.into();

            entries.push(VaultEntry {
                relative_path: relative_str,
                absolute_path: path.to_path_buf(),
                modified,
                size: metadata.len(),
            });
        }

        Ok(entries)
    }

    fn is_ignored(&self, relative_path: &str, absolute: &Path) -> bool {
        let basename = absolute.file_name().and_then(|n| n.to_str()).unwrap_or("");
        self.ignore_patterns
            .iter()
            .any(|p| p.matches(relative_path) || p.matches(basename))
    }
}

fn is_hidden_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.') && entry.depth() > 0)
            .unwrap_or(false)
}

fn is_markdown_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "md" | "markdown"))
        .unwrap_or(false)
}

/// `glob::Pattern` already treats `**` as matching across separators; this normalizes
/// collapsed `***`-style inputs to a plain `**` so the rule in SPEC_FULL.md §4.3 holds
/// regardless of how the caller wrote the pattern.
fn normalize_double_star(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut stars = 0usize;
    for c in pattern.chars() {
        if c == '*' {
            stars += 1;
            continue;
        }
        if stars > 0 {
            out.push_str(if stars >= 2 { "**" } else { "*" });
            stars = 0;
        }
        out.push(c);
    }
    if stars > 0 {
        out.push_str(if stars >= 2 { "**" } else { "*" });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn empty_vault_yields_no_entries() {
        let dir = TempDir::new().unwrap();
        let scanner = VaultScanner::new(dir.path(), &[]).unwrap();
        let entries = scanner.scan(&CancellationToken::new()).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn only_markdown_suffixes_are_yielded() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "hello");
        write(&dir, "b.markdown", "hello");
        write(&dir, "c.txt", "hello");
        let scanner = VaultScanner::new(dir.path(), &[]).unwrap();
        let mut paths: Vec<_> = scanner
            .scan(&CancellationToken::new())
            .unwrap()
            .into_iter()
            .map(|e| e.relative_path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["a.md", "b.markdown"]);
    }

    #[test]
    fn hidden_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".obsidian/config.md", "hello");
        write(&dir, "visible.md", "hello");
        let scanner = VaultScanner::new(dir.path(), &[]).unwrap();
        let paths: Vec<_> = scanner
            .scan(&CancellationToken::new())
            .unwrap()
            .into_iter()
            .map(|e| e.relative_path)
            .collect();
        assert_eq!(paths, vec!["visible.md"]);
    }

    #[test]
    fn ignore_pattern_matches_full_path_and_basename() {
        let dir = TempDir::new().unwrap();
        write(&dir, "drafts/secret.md", "hello");
        write(&dir, "keep.md", "hello");
        let scanner = VaultScanner::new(dir.path(), &["drafts/**".to_string()]).unwrap();
        let paths: Vec<_> = scanner
            .scan(&CancellationToken::new())
            .unwrap()
            .into_iter()
            .map(|e| e.relative_path)
            .collect();
        assert_eq!(paths, vec!["keep.md"]);
    }

    #[test]
    fn cancellation_is_observed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "hello");
        let scanner = VaultScanner::new(dir.path(), &[]).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(scanner.scan(&token).is_err());
    }
}
