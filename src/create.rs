use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::archive;
use crate::compare;
use crate::error::{IoContext, Result};
use crate::fsutil;
use crate::manifest::{Manifest, BOOTSTRAP_SLOT, MANIFEST_FILE};
use crate::timing::StepTimer;

/// Create a package at `output` describing how to turn `prior` into `next`.
///
/// Without a `prior` tree the package is a bootstrap package carrying all of
/// `next`. Returns the manifest written into the package.
pub async fn create_package(prior: Option<&Path>, next: &Path, output: &Path) -> Result<Manifest> {
    let mut timer = StepTimer::new("create");

    let manifest = match prior {
        Some(prior) => create_diff(prior, next, output, &mut timer).await?,
        None => create_bootstrap(next, output, &mut timer).await?,
    };

    let counts = manifest.counts();
    info!(
        bootstrap = manifest.is_bootstrap(),
        added = counts.added,
        changed = counts.changed,
        removed = counts.removed,
        elapsed_ms = timer.elapsed().as_millis() as u64,
        "package created at {}",
        output.display()
    );
    Ok(manifest)
}

async fn create_diff(
    prior: &Path,
    next: &Path,
    output: &Path,
    timer: &mut StepTimer,
) -> Result<Manifest> {
    timer.step(&format!("comparing {} with {}", prior.display(), next.display()));
    let (prior_owned, next_owned) = (prior.to_path_buf(), next.to_path_buf());
    let diff = tokio::task::spawn_blocking(move || compare::compare_trees(&prior_owned, &next_owned))
        .await??;
    timer.step(&format!("calculated {} differences", diff.len()));

    let manifest = diff.into_manifest();

    let staging = fsutil::scratch_dir_beside(output)
        .with_context(|| format!("Failed to create staging directory for {}", output.display()))?;
    timer.step(&format!(
        "staging {} content slots in {}",
        manifest.slot_count(),
        staging.path().display()
    ));

    // Slot k holds the post-change content of the k-th non-remove entry.
    let copies: Vec<(PathBuf, PathBuf)> = manifest
        .slots()
        .map(|(slot, op)| (op.resolve(next), staging.path().join(slot.to_string())))
        .collect();

    tokio::task::spawn_blocking(move || -> Result<()> {
        copies.par_iter().try_for_each(|(src, dst)| {
            fsutil::copy_path(src, dst).with_context(|| {
                format!("Failed to stage {} into {}", src.display(), dst.display())
            })
        })
    })
    .await??;
    timer.step("staged added and changed content");

    seal_package(&manifest, staging, output, timer).await?;
    Ok(manifest)
}

async fn create_bootstrap(next: &Path, output: &Path, timer: &mut StepTimer) -> Result<Manifest> {
    timer.step("strategy: bootstrap package from blank state");

    let staging = fsutil::scratch_dir_beside(output)
        .with_context(|| format!("Failed to create staging directory for {}", output.display()))?;

    // Copy rather than move: the caller's tree is never relocated.
    let src = next.to_path_buf();
    let dst = staging.path().join(BOOTSTRAP_SLOT);
    tokio::task::spawn_blocking(move || {
        fsutil::copy_path(&src, &dst)
            .with_context(|| format!("Failed to stage {} into {}", src.display(), dst.display()))
    })
    .await??;
    timer.step("staged full tree");

    let manifest = Manifest::Bootstrap;
    seal_package(&manifest, staging, output, timer).await?;
    Ok(manifest)
}

/// Write the manifest into the staging area, archive it to `output` and
/// remove the staging area.
async fn seal_package(
    manifest: &Manifest,
    staging: tempfile::TempDir,
    output: &Path,
    timer: &mut StepTimer,
) -> Result<()> {
    let manifest_path = staging.path().join(MANIFEST_FILE);
    tokio::fs::write(&manifest_path, manifest.encode()?)
        .await
        .with_context(|| format!("Failed to write manifest: {}", manifest_path.display()))?;
    timer.step("wrote manifest");

    let (folder, archive_path) = (staging.path().to_path_buf(), output.to_path_buf());
    tokio::task::spawn_blocking(move || archive::pack_dir(&folder, &archive_path)).await??;
    timer.step(&format!("archived package to {}", output.display()));

    let staging_path = staging.path().to_path_buf();
    staging
        .close()
        .with_context(|| format!("Failed to remove staging directory: {}", staging_path.display()))?;
    timer.step("removed staging directory");
    Ok(())
}
