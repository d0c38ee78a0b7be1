use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use diffpack::{apply_package, create_package, from_repository, ApplyOptions, Manifest, RepoDiffOptions};

#[derive(Parser)]
#[command(name = "diffpack", about = "Directory diff package creator and applier")]
struct Cli {
    /// Print step-by-step diagnostics with timings
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a package by comparing old and new directories
    Create {
        /// Path to the old (original) directory; omit to package the whole new tree
        #[arg(long)]
        old: Option<PathBuf>,
        /// Path to the new (updated) directory
        #[arg(long)]
        new: PathBuf,
        /// Output path for the package file
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Apply a package to a target directory
    Apply {
        /// Path to the target directory to update
        #[arg(long)]
        target: PathBuf,
        /// Path to the package file
        #[arg(long, short)]
        package: PathBuf,
        /// Copy the target here first and apply to the copy instead
        #[arg(long)]
        copy_to: Option<PathBuf>,
    },
    /// Create a package from two revisions of a git repository
    Repo {
        /// Repository to clone
        #[arg(long)]
        repo: String,
        /// Scratch directory for the clones (wiped before use)
        #[arg(long)]
        working_dir: PathBuf,
        /// Output path for the package file
        #[arg(long, short)]
        output: PathBuf,
        /// Revision to diff from
        #[arg(long)]
        from: String,
        /// Revision to diff to
        #[arg(long, default_value = "HEAD")]
        to: String,
        /// Command to run in both checkouts before comparing (repeatable)
        #[arg(long = "exec")]
        commands: Vec<String>,
        /// Keep the working directory afterwards
        #[arg(long)]
        keep_working_dir: bool,
    },
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(manifest: &Manifest, elapsed_secs: f64) {
    if manifest.is_bootstrap() {
        println!("  Bootstrap package: destination replaced wholesale");
    } else {
        let counts = manifest.counts();
        println!("  Added: {}", counts.added);
        println!("  Changed: {}", counts.changed);
        println!("  Removed: {}", counts.removed);
    }
    println!("  Time elapsed: {:.3}s", elapsed_secs);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Create { old, new, output } => {
            println!("Creating package...");
            match &old {
                Some(old) => println!("  Old: {}", old.display()),
                None => println!("  Old: <none>"),
            }
            println!("  New: {}", new.display());
            println!("  Output: {}", output.display());

            let start = Instant::now();
            let manifest = create_package(old.as_deref(), &new, &output).await?;

            println!("\nPackage created successfully!");
            print_summary(&manifest, start.elapsed().as_secs_f64());
        }
        Commands::Apply {
            target,
            package,
            copy_to,
        } => {
            println!("Applying package...");
            println!("  Target: {}", target.display());
            println!("  Package: {}", package.display());
            if let Some(copy_to) = &copy_to {
                println!("  Copy to: {}", copy_to.display());
            }

            let start = Instant::now();
            let manifest = apply_package(&package, &target, &ApplyOptions { copy_to }).await?;

            println!("\nPackage applied successfully!");
            print_summary(&manifest, start.elapsed().as_secs_f64());
        }
        Commands::Repo {
            repo,
            working_dir,
            output,
            from,
            to,
            commands,
            keep_working_dir,
        } => {
            println!("Creating package from repository...");
            println!("  Repository: {repo}");
            println!("  Revisions: {from}..{to}");
            println!("  Output: {}", output.display());

            let opts = RepoDiffOptions {
                to,
                commands,
                keep_working_dir,
                ..RepoDiffOptions::new(working_dir, repo, output, from)
            };
            let start = Instant::now();
            let manifest = from_repository(&opts).await?;

            println!("\nPackage created successfully!");
            print_summary(&manifest, start.elapsed().as_secs_f64());
        }
    }

    Ok(())
}
