//! Tree comparison.
//!
//! Walks two trees and reports which relative paths were added, changed or
//! removed. Like a recursive `diff -rq`, a directory that exists on only one
//! side is reported once at its top-most path rather than per descendant.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use rayon::prelude::*;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{DiffPackError, Result};
use crate::fsutil::{self, EntryKind};
use crate::manifest::{DiffOperation, Manifest};

/// OS metadata artifacts that never take part in a comparison.
pub const IGNORED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

pub fn is_ignored(name: &str) -> bool {
    IGNORED_NAMES.contains(&name)
}

#[derive(Debug, Clone)]
struct ScanEntry {
    kind: EntryKind,
    full_path: PathBuf,
    size: u64,
}

/// Relative paths (leading `/`, sorted) that differ between two trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len() + self.removed.len()
    }

    /// Adds, then changes, then removes. This order fixes slot numbering.
    pub fn into_manifest(self) -> Manifest {
        let ops = self
            .added
            .into_iter()
            .map(DiffOperation::add)
            .chain(self.changed.into_iter().map(DiffOperation::change))
            .chain(self.removed.into_iter().map(DiffOperation::remove))
            .collect();
        Manifest::Entries(ops)
    }
}

/// Compare tree `old` against tree `new`.
pub fn compare_trees(old: &Path, new: &Path) -> Result<TreeDiff> {
    let old_entries = scan_tree(old)?;
    let new_entries = scan_tree(new)?;
    debug!(
        old_entries = old_entries.len(),
        new_entries = new_entries.len(),
        "scanned trees"
    );

    let mut diff = TreeDiff::default();
    let mut candidates: Vec<(&String, &ScanEntry, &ScanEntry)> = Vec::new();

    for (path, entry) in &new_entries {
        match old_entries.get(path) {
            Some(old_entry) if old_entry.kind != entry.kind => diff.changed.push(path.clone()),
            Some(old_entry) => match entry.kind {
                EntryKind::Dir => {}
                _ => candidates.push((path, old_entry, entry)),
            },
            None if parent_is_dir(&old_entries, path) => diff.added.push(path.clone()),
            None => {}
        }
    }

    for path in old_entries.keys() {
        if !new_entries.contains_key(path) && parent_is_dir(&new_entries, path) {
            diff.removed.push(path.clone());
        }
    }

    let mut changed: Vec<String> = candidates
        .par_iter()
        .map(|(path, old_entry, new_entry)| -> Result<Option<String>> {
            if entries_differ(old_entry, new_entry)? {
                Ok(Some((*path).clone()))
            } else {
                Ok(None)
            }
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    diff.changed.append(&mut changed);
    diff.changed.sort();

    Ok(diff)
}

/// Walk a tree and index its entries by `/`-prefixed relative path.
/// Ignored names are pruned together with everything below them.
fn scan_tree(root: &Path) -> Result<BTreeMap<String, ScanEntry>> {
    let meta = std::fs::metadata(root).map_err(|e| DiffPackError::comparison(root, e))?;
    if !meta.is_dir() {
        return Err(DiffPackError::comparison(root, "not a directory"));
    }

    let mut entries = BTreeMap::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_str().is_some_and(is_ignored));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            DiffPackError::comparison(path, e)
        })?;

        let full_path = entry.path().to_path_buf();
        let relative = full_path
            .strip_prefix(root)
            .map_err(|e| DiffPackError::comparison(&full_path, e))?;
        let relative =
            manifest_path(relative).map_err(|e| DiffPackError::comparison(&full_path, e))?;

        let kind = EntryKind::of(entry.file_type());
        let size = if kind == EntryKind::File {
            entry
                .metadata()
                .map_err(|e| DiffPackError::comparison(&full_path, e))?
                .len()
        } else {
            0
        };

        entries.insert(
            relative,
            ScanEntry {
                kind,
                full_path,
                size,
            },
        );
    }

    Ok(entries)
}

/// Join the components of a walk-relative path with `/`, leaving every name
/// exactly as the filesystem reports it.
fn manifest_path(relative: &Path) -> std::result::Result<String, &'static str> {
    let mut joined = String::new();
    for component in relative.components() {
        let Component::Normal(name) = component else {
            return Err("unexpected path component");
        };
        joined.push('/');
        joined.push_str(name.to_str().ok_or("non-UTF8 path")?);
    }
    Ok(joined)
}

fn parent_is_dir(entries: &BTreeMap<String, ScanEntry>, path: &str) -> bool {
    match path.rfind('/') {
        Some(0) | None => true,
        Some(idx) => entries
            .get(&path[..idx])
            .is_some_and(|e| e.kind == EntryKind::Dir),
    }
}

fn entries_differ(old: &ScanEntry, new: &ScanEntry) -> Result<bool> {
    match new.kind {
        EntryKind::Symlink => {
            let old_target = std::fs::read_link(&old.full_path)
                .map_err(|e| DiffPackError::comparison(&old.full_path, e))?;
            let new_target = std::fs::read_link(&new.full_path)
                .map_err(|e| DiffPackError::comparison(&new.full_path, e))?;
            Ok(old_target != new_target)
        }
        _ => {
            if old.size != new.size {
                return Ok(true);
            }
            let old_hash = fsutil::hash_file_streaming(&old.full_path)
                .map_err(|e| DiffPackError::comparison(&old.full_path, e))?;
            let new_hash = fsutil::hash_file_streaming(&new.full_path)
                .map_err(|e| DiffPackError::comparison(&new.full_path, e))?;
            Ok(old_hash != new_hash)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let full = root.join(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    #[test]
    fn classifies_added_changed_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        write(&a, "same.txt", b"same");
        write(&a, "file1", b"x");
        write(&a, "gone.txt", b"bye");
        write(&b, "same.txt", b"same");
        write(&b, "file1", b"y");
        write(&b, "file2", b"z");

        let diff = compare_trees(&a, &b).unwrap();
        assert_eq!(diff.added, vec!["/file2"]);
        assert_eq!(diff.changed, vec!["/file1"]);
        assert_eq!(diff.removed, vec!["/gone.txt"]);
    }

    #[test]
    fn same_size_different_content_is_changed() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        write(&a, "f", b"aaaa");
        write(&b, "f", b"bbbb");
        assert_eq!(compare_trees(&a, &b).unwrap().changed, vec!["/f"]);
    }

    #[test]
    fn new_and_removed_directories_reported_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        write(&a, "keep/x", b"1");
        write(&a, "obsolete/deep/y", b"2");
        write(&b, "keep/x", b"1");
        write(&b, "keep/fresh/z", b"3");
        write(&b, "extras/bonus/w", b"4");

        let diff = compare_trees(&a, &b).unwrap();
        assert_eq!(diff.added, vec!["/extras", "/keep/fresh"]);
        assert!(diff.changed.is_empty());
        assert_eq!(diff.removed, vec!["/obsolete"]);
    }

    #[test]
    fn kind_change_is_a_change_without_children() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        write(&a, "node", b"file");
        write(&b, "node/child", b"now a dir");

        let diff = compare_trees(&a, &b).unwrap();
        assert_eq!(diff.changed, vec!["/node"]);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn ignored_artifacts_never_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        write(&a, "f", b"1");
        write(&a, ".DS_Store", b"old");
        write(&a, "sub/Thumbs.db", b"gone");
        write(&b, "f", b"1");
        write(&b, ".DS_Store", b"new");
        write(&b, "sub/desktop.ini", b"added");

        let diff = compare_trees(&a, &b).unwrap();
        assert!(diff.is_empty(), "{diff:?}");
        assert_eq!(diff.into_manifest(), Manifest::Entries(vec![]));
    }

    #[test]
    fn missing_root_fails_comparison() {
        let tmp = tempfile::tempdir().unwrap();
        let err = compare_trees(&tmp.path().join("nope"), tmp.path()).unwrap_err();
        assert!(matches!(err, DiffPackError::ComparisonFailed { .. }));

        let file = tmp.path().join("plain");
        fs::write(&file, b"").unwrap();
        let err = compare_trees(tmp.path(), &file).unwrap_err();
        assert!(matches!(err, DiffPackError::ComparisonFailed { .. }));
    }

    #[test]
    fn trailing_separator_does_not_change_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        write(&a, "x", b"1");
        write(&b, "x", b"2");
        let b_slash = PathBuf::from(format!("{}/", b.display()));
        assert_eq!(compare_trees(&a, &b_slash).unwrap().changed, vec!["/x"]);
    }

    #[cfg(unix)]
    #[test]
    fn backslash_names_are_kept_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        write(&a, "a/b", b"real nested file");
        write(&b, "a/b", b"real nested file");
        write(&b, r"we\ird.txt", b"odd name");
        write(&b, r"a\b", b"not nested");

        let diff = compare_trees(&a, &b).unwrap();
        assert_eq!(diff.added, vec![r"/a\b", r"/we\ird.txt"]);
        assert!(diff.changed.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_compare_by_target() {
        use std::os::unix::fs::symlink;

        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        write(&a, "one", b"1");
        write(&a, "two", b"2");
        write(&b, "one", b"1");
        write(&b, "two", b"2");
        symlink("one", a.join("same")).unwrap();
        symlink("one", b.join("same")).unwrap();
        symlink("one", a.join("moved")).unwrap();
        symlink("two", b.join("moved")).unwrap();
        write(&a, "became_link", b"1");
        symlink("one", b.join("became_link")).unwrap();

        let diff = compare_trees(&a, &b).unwrap();
        assert_eq!(diff.changed, vec!["/became_link", "/moved"]);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn manifest_order_is_adds_changes_removes() {
        let diff = TreeDiff {
            added: vec!["/n".into()],
            changed: vec!["/c".into()],
            removed: vec!["/r".into()],
        };
        let manifest = diff.into_manifest();
        let lines: Vec<String> = manifest.entries().iter().map(|op| op.to_string()).collect();
        assert_eq!(lines, vec!["add:/n", "change:/c", "remove:/r"]);
    }
}
