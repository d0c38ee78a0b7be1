use std::fs;
use std::path::{Path, PathBuf};

pub fn create_dir_tree(root: &Path, files: &[(&str, &[u8])]) {
    fs::create_dir_all(root).unwrap();
    for (rel_path, content) in files {
        let full = root.join(rel_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full, content).unwrap();
    }
}

/// What a tree entry is, with enough detail to compare two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir,
    File(Vec<u8>),
    Link(PathBuf),
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap()
        .components()
        .map(|c| c.as_os_str().to_str().unwrap())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every entry under `root`, directories and symlinks included, sorted by
/// `/`-joined relative path. Symlinks are not followed.
pub fn collect_tree_shape(root: &Path) -> Vec<(String, Node)> {
    let mut entries: Vec<(String, Node)> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let file_type = e.file_type();
            let node = if file_type.is_symlink() {
                Node::Link(fs::read_link(e.path()).unwrap())
            } else if file_type.is_dir() {
                Node::Dir
            } else {
                Node::File(fs::read(e.path()).unwrap())
            };
            (relative_name(root, e.path()), node)
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

/// All files under `root` as sorted `(relative path, content)` pairs.
pub fn collect_dir_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    collect_tree_shape(root)
        .into_iter()
        .filter_map(|(rel, node)| match node {
            Node::File(content) => Some((rel, content)),
            _ => None,
        })
        .collect()
}

/// Scratch directories (`*_temp*`) still present directly under `dir`.
pub fn leftover_scratch_dirs(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains("_temp"))
        })
        .collect()
}
