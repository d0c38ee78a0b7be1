//! Manifest codec.
//!
//! A manifest is persisted as a pretty-printed JSON array of
//! `"kind:/relative/path"` strings. The array `["create:::all"]` is the
//! bootstrap sentinel: the package carries a whole tree in its `all` slot.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{DiffPackError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const BOOTSTRAP_SENTINEL: &str = "create:::all";
pub const BOOTSTRAP_SLOT: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Change,
    Remove,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Change => "change",
            OpKind::Remove => "remove",
        }
    }
}

/// One entry of a manifest: what happened to a path relative to the tree root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiffOperation {
    pub kind: OpKind,
    /// POSIX-style path with a leading `/`, e.g. `/config/app.json`.
    pub path: String,
}

impl DiffOperation {
    pub fn new(kind: OpKind, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self { kind, path }
    }

    pub fn add(path: impl Into<String>) -> Self {
        Self::new(OpKind::Add, path)
    }

    pub fn change(path: impl Into<String>) -> Self {
        Self::new(OpKind::Change, path)
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::new(OpKind::Remove, path)
    }

    /// Whether this entry carries staged content.
    pub fn has_slot(&self) -> bool {
        self.kind != OpKind::Remove
    }

    /// Resolve the entry's path underneath `root`.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let mut full = root.to_path_buf();
        for part in self.path.split('/').filter(|p| !p.is_empty()) {
            full.push(part);
        }
        full
    }
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.path)
    }
}

impl FromStr for DiffOperation {
    type Err = DiffPackError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, path) = s
            .split_once(':')
            .ok_or_else(|| malformed(format!("entry without kind: {s:?}")))?;
        let kind = match kind {
            "add" => OpKind::Add,
            "change" => OpKind::Change,
            "remove" => OpKind::Remove,
            other => return Err(malformed(format!("unknown kind {other:?} in {s:?}"))),
        };
        validate_path(path)?;
        Ok(DiffOperation::new(kind, path))
    }
}

impl Serialize for DiffOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DiffOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Paths must be plain `/`-separated names below the root: no empty, `.` or
/// `..` segments. A backslash is an ordinary name character except on
/// Windows, where it would act as a second separator.
fn validate_path(path: &str) -> Result<()> {
    let relative = path.strip_prefix('/').unwrap_or(path);
    if relative.is_empty() {
        return Err(malformed(format!("empty path in entry {path:?}")));
    }
    let plain = relative.split('/').all(|segment| {
        let mut components = Path::new(segment).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !(cfg!(windows) && segment.contains('\\'))
    });
    if !plain {
        return Err(malformed(format!("path is not a plain relative path: {path:?}")));
    }
    Ok(())
}

fn malformed(msg: impl Into<String>) -> DiffPackError {
    DiffPackError::MalformedManifest(msg.into())
}

/// Per-kind totals, used for summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// No prior state: the destination is replaced wholesale by the `all` slot.
    Bootstrap,
    Entries(Vec<DiffOperation>),
}

impl Manifest {
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, Manifest::Bootstrap)
    }

    pub fn entries(&self) -> &[DiffOperation] {
        match self {
            Manifest::Bootstrap => &[],
            Manifest::Entries(ops) => ops,
        }
    }

    /// Non-remove entries paired with the slot index holding their content.
    /// Removes keep their manifest position but take no slot number.
    pub fn slots(&self) -> impl Iterator<Item = (usize, &DiffOperation)> + '_ {
        self.entries().iter().filter(|op| op.has_slot()).enumerate()
    }

    pub fn slot_count(&self) -> usize {
        match self {
            Manifest::Bootstrap => 1,
            Manifest::Entries(_) => self.slots().count(),
        }
    }

    pub fn counts(&self) -> OpCounts {
        let mut counts = OpCounts::default();
        for op in self.entries() {
            match op.kind {
                OpKind::Add => counts.added += 1,
                OpKind::Change => counts.changed += 1,
                OpKind::Remove => counts.removed += 1,
            }
        }
        counts
    }

    pub fn encode(&self) -> Result<String> {
        let encoded = match self {
            Manifest::Bootstrap => serde_json::to_string_pretty(&[BOOTSTRAP_SENTINEL]),
            Manifest::Entries(ops) => serde_json::to_string_pretty(ops),
        };
        encoded.map_err(|e| malformed(format!("failed to encode manifest: {e}")))
    }

    pub fn decode(text: &str) -> Result<Self> {
        let raw: Vec<String> =
            serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;

        if raw.iter().any(|s| s == BOOTSTRAP_SENTINEL) {
            if raw.len() != 1 {
                return Err(malformed(
                    "bootstrap entry mixed with regular entries".to_string(),
                ));
            }
            return Ok(Manifest::Bootstrap);
        }

        let ops = raw
            .iter()
            .map(|s| s.parse::<DiffOperation>())
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::with_capacity(ops.len());
        for op in &ops {
            if !seen.insert(op.path.as_str()) {
                return Err(malformed(format!("duplicate path {}", op.path)));
            }
        }
        // Entries are replayed concurrently; one must never sit inside another.
        for op in &ops {
            let mut ancestor = op.path.as_str();
            while let Some(idx) = ancestor.rfind('/').filter(|&i| i > 0) {
                ancestor = &ancestor[..idx];
                if seen.contains(ancestor) {
                    return Err(malformed(format!(
                        "{} is nested inside {ancestor}",
                        op.path
                    )));
                }
            }
        }

        Ok(Manifest::Entries(ops))
    }
}
