//! Build a package straight from two revisions of a git repository.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::info;

use crate::create::create_package;
use crate::error::{DiffPackError, IoContext, Result};
use crate::fsutil;
use crate::manifest::Manifest;
use crate::timing::StepTimer;

#[derive(Debug, Clone)]
pub struct RepoDiffOptions {
    /// Scratch directory the repository is cloned into. Wiped before use, so
    /// the output package must not live inside it.
    pub working_dir: PathBuf,
    /// Anything `git clone` accepts.
    pub repo: String,
    pub output: PathBuf,
    pub from: String,
    pub to: String,
    /// Shell commands run in both checkouts before comparing them.
    pub commands: Vec<String>,
    pub keep_working_dir: bool,
}

impl RepoDiffOptions {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        repo: impl Into<String>,
        output: impl Into<PathBuf>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            repo: repo.into(),
            output: output.into(),
            from: from.into(),
            to: "HEAD".to_string(),
            commands: Vec::new(),
            keep_working_dir: false,
        }
    }
}

/// Clone the repository, check out `from` and `to` side by side, run the
/// post-checkout commands in both, and package the difference.
pub async fn from_repository(opts: &RepoDiffOptions) -> Result<Manifest> {
    let mut timer = StepTimer::new("repo");
    let work = &opts.working_dir;

    timer.step(&format!("resetting working directory {}", work.display()));
    let work_owned = work.clone();
    tokio::task::spawn_blocking(move || fsutil::remove_path(&work_owned))
        .await?
        .with_context(|| format!("Failed to remove {}", work.display()))?;
    tokio::fs::create_dir_all(work)
        .await
        .with_context(|| format!("Failed to create {}", work.display()))?;

    timer.step(&format!("cloning {}", opts.repo));
    run(git(&["clone", &opts.repo]), work, "git clone").await?;
    let folder_a = single_child(work).await?;
    let folder_b = sibling_with_suffix(&folder_a, "_b");

    timer.step(&format!("copying clone to {}", folder_b.display()));
    let (src, dst) = (folder_a.clone(), folder_b.clone());
    tokio::task::spawn_blocking(move || {
        fsutil::copy_path(&src, &dst)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))
    })
    .await??;

    timer.step(&format!("checking out {} and {}", opts.from, opts.to));
    tokio::try_join!(
        run(git(&["checkout", &opts.from]), &folder_a, "git checkout"),
        run(git(&["checkout", &opts.to]), &folder_b, "git checkout"),
    )?;

    for command in &opts.commands {
        timer.step(&format!("running `{command}` in both checkouts"));
        tokio::try_join!(
            run(shell(command), &folder_a, command),
            run(shell(command), &folder_b, command),
        )?;
    }

    let manifest = create_package(Some(&folder_a), &folder_b, &opts.output).await?;

    if !opts.keep_working_dir {
        timer.step(&format!("removing working directory {}", work.display()));
        let work_owned = work.clone();
        tokio::task::spawn_blocking(move || fsutil::remove_path(&work_owned))
            .await?
            .with_context(|| format!("Failed to remove {}", work.display()))?;
    }

    info!(
        from = %opts.from,
        to = %opts.to,
        elapsed_ms = timer.elapsed().as_millis() as u64,
        "package created from repository"
    );
    Ok(manifest)
}

fn git(args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.args(args);
    cmd
}

fn shell(command: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C");
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c");
        c
    };
    cmd.arg(command);
    cmd
}

async fn run(mut cmd: Command, cwd: &Path, label: &str) -> Result<()> {
    let output = cmd
        .current_dir(cwd)
        .output()
        .await
        .with_context(|| format!("Failed to spawn `{label}` in {}", cwd.display()))?;
    if !output.status.success() {
        return Err(DiffPackError::CommandFailed {
            command: label.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

async fn single_child(dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    entries
        .next_entry()
        .await
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .map(|e| e.path())
        .ok_or_else(|| DiffPackError::Io {
            context: format!("Clone produced nothing in {}", dir.display()),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
