use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

impl EntryKind {
    pub fn of(file_type: fs::FileType) -> Self {
        if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::File
        }
    }
}

/// Stream-hash a file using BLAKE3.
/// Uses a 256 KB BufReader to reduce syscall overhead vs the default 8 KB.
pub fn hash_file_streaming(path: &Path) -> io::Result<blake3::Hash> {
    let file = fs::File::open(path)?;
    let mut reader = io::BufReader::with_capacity(256 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Copy a file, symlink or whole directory tree from `src` to `dst`.
///
/// Parent directories of `dst` are created as needed. Existing files at the
/// destination are overwritten; existing directories are merged into.
pub fn copy_path(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    let kind = EntryKind::of(fs::symlink_metadata(src)?.file_type());
    if kind != EntryKind::Dir {
        return copy_leaf(kind, src, dst);
    }

    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = dst.join(rel);
        match EntryKind::of(entry.file_type()) {
            EntryKind::Dir => fs::create_dir_all(&target)?,
            kind => copy_leaf(kind, entry.path(), &target)?,
        }
    }
    Ok(())
}

fn copy_leaf(kind: EntryKind, src: &Path, dst: &Path) -> io::Result<()> {
    match kind {
        EntryKind::Symlink => copy_symlink(src, dst),
        _ => fs::copy(src, dst).map(|_| ()),
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    remove_path(dst)?;
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

/// Remove whatever lives at `path`. Returns `false` when nothing was there.
pub fn remove_path(path: &Path) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let res = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match res {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create an exclusively owned scratch directory next to `beside`, named
/// `<name>_temp<random>`. It is deleted when the returned handle drops.
pub fn scratch_dir_beside(beside: &Path) -> io::Result<TempDir> {
    let parent = match beside.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let name = beside
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "diffpack".to_string());
    fs::create_dir_all(parent)?;
    tempfile::Builder::new()
        .prefix(&format!("{name}_temp"))
        .tempdir_in(parent)
}

/// Resolve `path` to an absolute path with symlinks followed, even when its
/// tail does not exist yet. The longest existing prefix is canonicalized and
/// the missing names are appended to it.
pub fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(resolved) => {
                return Ok(missing.iter().rev().fold(resolved, |acc, name| acc.join(name)));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name);
                        existing = parent;
                    }
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Replace the entry at `dst` with a copy of `src`, whatever either one is.
pub fn replace_path(src: &Path, dst: &Path) -> io::Result<()> {
    remove_path(dst)?;
    copy_path(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_tree_recreates_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("top.txt"), b"top").unwrap();
        fs::write(src.join("a/b/deep.txt"), b"deep").unwrap();

        let dst = tmp.path().join("out/copy");
        copy_path(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(dst.join("a/b/deep.txt")).unwrap(), b"deep");
    }

    #[test]
    fn replace_file_with_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("inner"), b"x").unwrap();
        let dst = tmp.path().join("dst");
        fs::write(&dst, b"was a file").unwrap();

        replace_path(&src, &dst).unwrap();

        assert!(dst.is_dir());
        assert_eq!(fs::read(dst.join("inner")).unwrap(), b"x");
    }

    #[test]
    fn remove_missing_path_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!remove_path(&tmp.path().join("absent")).unwrap());

        let file = tmp.path().join("present");
        fs::write(&file, b"1").unwrap();
        assert!(remove_path(&file).unwrap());
        assert!(!file.exists());
    }

    #[test]
    fn scratch_dir_is_sibling_and_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = scratch_dir_beside(&tmp.path().join("pkg.tar.zst")).unwrap();
        let path = scratch.path().to_path_buf();
        assert_eq!(path.parent().unwrap(), tmp.path());
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("pkg.tar.zst_temp"));
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn resolve_path_keeps_missing_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("real")).unwrap();

        assert_eq!(resolve_path(&tmp.path().join("real")).unwrap(), root.join("real"));
        assert_eq!(
            resolve_path(&tmp.path().join("real/not/yet")).unwrap(),
            root.join("real/not/yet")
        );
    }

    #[test]
    fn streaming_hash_matches_in_memory_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("blob");
        let data = vec![7u8; 300 * 1024];
        fs::write(&file, &data).unwrap();
        assert_eq!(hash_file_streaming(&file).unwrap(), blake3::hash(&data));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_copied_as_links() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        std::os::unix::fs::symlink("target.txt", src.join("link")).unwrap();

        let dst = tmp.path().join("dst");
        copy_path(&src, &dst).unwrap();

        let link = dst.join("link");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("target.txt"));
    }
}
