use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::archive;
use crate::error::{DiffPackError, IoContext, Result};
use crate::fsutil;
use crate::manifest::{Manifest, OpKind, BOOTSTRAP_SLOT, MANIFEST_FILE};
use crate::timing::StepTimer;

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Replay onto a fresh copy of the target at this path instead of the
    /// target itself.
    pub copy_to: Option<PathBuf>,
}

enum ReplayStep {
    Replace { slot: PathBuf, dest: PathBuf },
    Remove { dest: PathBuf },
}

/// Apply the package at `package` to the tree at `target`.
/// Returns the manifest that was replayed.
pub async fn apply_package(package: &Path, target: &Path, options: &ApplyOptions) -> Result<Manifest> {
    let mut timer = StepTimer::new("apply");

    let dest = match &options.copy_to {
        Some(copy_to) => {
            ensure_disjoint(target, copy_to)?;
            timer.step(&format!("copying {} to {}", target.display(), copy_to.display()));
            let (src, dst) = (target.to_path_buf(), copy_to.clone());
            tokio::task::spawn_blocking(move || {
                fsutil::replace_path(&src, &dst).with_context(|| {
                    format!("Failed to copy {} to {}", src.display(), dst.display())
                })
            })
            .await??;
            copy_to.clone()
        }
        None => target.to_path_buf(),
    };

    let scratch = fsutil::scratch_dir_beside(&dest)
        .with_context(|| format!("Failed to create scratch directory for {}", dest.display()))?;
    timer.step(&format!(
        "unpacking {} to {}",
        package.display(),
        scratch.path().display()
    ));
    let (archive_path, unpack_dir) = (package.to_path_buf(), scratch.path().to_path_buf());
    tokio::task::spawn_blocking(move || archive::unpack_file(&archive_path, &unpack_dir)).await??;

    timer.step("reading manifest");
    let manifest = read_manifest(scratch.path()).await?;

    match &manifest {
        Manifest::Bootstrap => replay_bootstrap(scratch.path(), &dest, &mut timer).await?,
        Manifest::Entries(_) => replay_entries(&manifest, scratch.path(), &dest, &mut timer).await?,
    }

    let scratch_path = scratch.path().to_path_buf();
    scratch
        .close()
        .with_context(|| format!("Failed to remove scratch directory: {}", scratch_path.display()))?;
    timer.step(&format!("removed scratch directory {}", scratch_path.display()));

    let counts = manifest.counts();
    info!(
        bootstrap = manifest.is_bootstrap(),
        added = counts.added,
        changed = counts.changed,
        removed = counts.removed,
        elapsed_ms = timer.elapsed().as_millis() as u64,
        "package applied to {}",
        dest.display()
    );
    Ok(manifest)
}

/// `copy_to` is emptied before the target is copied there, so the two paths
/// must not contain one another.
fn ensure_disjoint(target: &Path, copy_to: &Path) -> Result<()> {
    let target_real = fsutil::resolve_path(target)
        .with_context(|| format!("Failed to resolve {}", target.display()))?;
    let copy_real = fsutil::resolve_path(copy_to)
        .with_context(|| format!("Failed to resolve {}", copy_to.display()))?;
    if copy_real.starts_with(&target_real) || target_real.starts_with(&copy_real) {
        return Err(DiffPackError::OverlappingCopy {
            target: target.to_path_buf(),
            copy_to: copy_to.to_path_buf(),
        });
    }
    Ok(())
}

async fn read_manifest(unpacked: &Path) -> Result<Manifest> {
    let path = unpacked.join(MANIFEST_FILE);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DiffPackError::MalformedManifest(format!(
                "package contains no {MANIFEST_FILE}"
            )));
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read manifest: {}", path.display()))
        }
    };
    Manifest::decode(&text)
}

fn require_slot(unpacked: &Path, name: &str) -> Result<PathBuf> {
    let slot = unpacked.join(name);
    if std::fs::symlink_metadata(&slot).is_err() {
        return Err(DiffPackError::MalformedManifest(format!(
            "package is missing content slot {name:?}"
        )));
    }
    Ok(slot)
}

/// Replace the destination wholesale with the package's `all` slot.
async fn replay_bootstrap(unpacked: &Path, dest: &Path, timer: &mut StepTimer) -> Result<()> {
    timer.step("strategy: replace destination from bootstrap package");
    let all = require_slot(unpacked, BOOTSTRAP_SLOT)?;
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        fsutil::remove_path(&dest)
            .with_context(|| format!("Failed to remove {}", dest.display()))?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // The scratch area is a sibling of the destination, so this is a
        // same-filesystem rename in the common case.
        if let Err(e) = std::fs::rename(&all, &dest) {
            debug!(error = %e, "rename failed, copying bootstrap content instead");
            fsutil::copy_path(&all, &dest).with_context(|| {
                format!("Failed to move {} to {}", all.display(), dest.display())
            })?;
        }
        Ok(())
    })
    .await??;

    timer.step("moved bootstrap content into place");
    Ok(())
}

async fn replay_entries(
    manifest: &Manifest,
    unpacked: &Path,
    dest: &Path,
    timer: &mut StepTimer,
) -> Result<()> {
    let mut steps = Vec::with_capacity(manifest.entries().len());
    let mut slot = 0usize;
    for op in manifest.entries() {
        let target = op.resolve(dest);
        match op.kind {
            OpKind::Add | OpKind::Change => {
                let src = require_slot(unpacked, &slot.to_string())?;
                steps.push(ReplayStep::Replace { slot: src, dest: target });
                slot += 1;
            }
            OpKind::Remove => steps.push(ReplayStep::Remove { dest: target }),
        }
    }

    tokio::fs::create_dir_all(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    timer.step(&format!(
        "applying {} changes from {} content slots to {}",
        steps.len(),
        manifest.slot_count(),
        dest.display()
    ));
    tokio::task::spawn_blocking(move || -> Result<()> {
        // Entries target disjoint paths, so they can run in any order.
        steps.par_iter().try_for_each(|step| match step {
            ReplayStep::Replace { slot, dest } => fsutil::replace_path(slot, dest)
                .with_context(|| format!("Failed to write {}", dest.display())),
            ReplayStep::Remove { dest } => fsutil::remove_path(dest)
                .map(|_| ())
                .with_context(|| format!("Failed to remove {}", dest.display())),
        })
    })
    .await??;
    timer.step("applied all changes");
    Ok(())
}
