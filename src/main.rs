use anyhow::Result;
use clap::{Parser, Subcommand};
use lanepost::integrations::archive::ZipSnapshot;
use lanepost::integrations::git::GitCli;
use lanepost::integrations::remote_config;
use lanepost::session::merger::{is_experiment_root, merge_lane, LaneStatus, MergeOutcome};
use lanepost::submit::{self, ManifestLedger, SubmissionPlan, TusTransport, UploadScheduler, VersionLedger};
use lanepost::{config, session};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "lanepost")]
#[command(about = "Merge A/B session logs and submit experiments")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge multiple sessions of each lane into one
    Merge {
        /// Experiment root or a single lane log directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Validate and upload an experiment
    Submit {
        /// Experiment root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Validate and list files without uploading
        #[arg(long, short = 'n')]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lanepost=info".parse()?),
        )
        .with_target(false)
        .init();

    match args.command {
        Command::Merge { path } => {
            if !run_merge(&path)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Submit { root, dry_run, yes } => {
            run_submit(args.config.as_deref(), &root, dry_run, yes).await
        }
    }
}

/// Returns false if any lane failed.
fn run_merge(path: &Path) -> Result<bool> {
    if !path.is_dir() {
        anyhow::bail!("{} is not a directory", path.display());
    }

    if !is_experiment_root(path) {
        match merge_lane(path)? {
            MergeOutcome::NothingToMerge { found } => {
                println!("Found {} session file(s) in {}, no merge needed", found, path.display());
            }
            MergeOutcome::Merged(report) => {
                println!(
                    "Merged {} sessions into session_{}.jsonl ({} messages, {} raw events, {} originals backed up)",
                    report.sessions_merged,
                    report.session_id,
                    report.messages,
                    report.raw_events,
                    report.backed_up
                );
            }
        }
        return Ok(true);
    }

    let report = session::merge_experiment(path)?;
    println!("Merge summary:");
    for (lane, status) in &report.lanes {
        let line = match status {
            LaneStatus::NoMergeNeeded => "single session, no merge needed".to_string(),
            LaneStatus::Merged { session_id, sessions } => {
                format!("merged {} sessions into {}", sessions, session_id)
            }
            LaneStatus::SkippedMissing => "no sessions, skipped".to_string(),
            LaneStatus::Failed(e) => format!("FAILED: {}", e),
        };
        println!("  {}: {}", lane, line);
    }
    Ok(report.is_success())
}

async fn run_submit(config_path: Option<&Path>, root: &Path, dry_run: bool, yes: bool) -> Result<()> {
    let config = config::load(config_path)?;
    let root = root
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("Cannot open {}: {}", root.display(), e))?;

    let dest_folder = remote_config::resolve_sprint_folder(&config.remote).await?;
    let plan = submit::prepare(&root, &dest_folder, &ZipSnapshot, &GitCli).await?;
    print_plan(&plan);

    if dry_run {
        println!("\nDry run complete. Files that would be uploaded:");
        for artifact in &plan.artifacts {
            println!("  - {}", artifact.relative);
        }
        submit::cleanup(&root);
        return Ok(());
    }

    if !yes && !confirm("Proceed with upload?")? {
        println!("Upload cancelled");
        submit::cleanup(&root);
        return Ok(());
    }

    let transport = TusTransport::new(&config.remote, &config.upload)?;
    let scheduler = UploadScheduler::new(Arc::new(transport), &config.upload);
    let mut ledger = ManifestLedger::open(&root.join(submit::manifest::MANIFEST_FILE))?;

    let result = tokio::select! {
        result = submit::execute(&plan, &scheduler, &mut ledger) => result?,
        _ = tokio::signal::ctrl_c() => {
            submit::cleanup(&root);
            anyhow::bail!("Interrupted; files already uploaded were left in place");
        }
    };

    let publish = &result.publish;
    if !publish.success {
        if let Some(attempt) = publish.final_attempt() {
            for task in attempt.tasks.iter().filter(|t| t.error.is_some()) {
                eprintln!("  - {}: {}", task.remote, task.error.as_deref().unwrap_or_default());
            }
        }
        if publish.had_conflict {
            anyhow::bail!("Upload failed: files already exist after {} version(s)", publish.attempts.len());
        }
        anyhow::bail!("Upload failed with non-conflict errors");
    }

    println!("\nSubmission completed successfully!");
    println!("  Files: {} uploaded", publish.uploaded);
    println!("  Path: {}", publish.upload_path().unwrap_or_default());
    if let Some(version) = ledger.last_version() {
        println!("  Submission version: {}", version);
    }
    if !result.summary_uploaded {
        println!("  (submission summary was not uploaded)");
    }
    Ok(())
}

fn print_plan(plan: &SubmissionPlan) {
    println!("\nUpload summary:");
    println!("  Expert: {}", plan.manifest.expert_name);
    println!("  Task ID: {}", plan.manifest.task_id);
    println!("  Destination: {}", plan.upload_path());
    println!("  Files to upload: {}", plan.artifacts.len());
    println!("  Attempt version: {}", plan.start_version);
    if let Some(last) = plan.manifest.last_submission_version {
        println!("  Last submission version: {}", last);
    }
    for warning in &plan.validation.warnings {
        println!("  warning: {}", warning);
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("\n{} (y/N): ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
