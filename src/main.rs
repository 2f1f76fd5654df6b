//! Subburn - Upload-to-Burned-Subtitles Video Pipeline
//!
//! This is the main entry point for the subburn binary, which submits videos,
//! runs the background workers and drives the subtitle editing flow.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use subburn::cli::{Args, Commands};
use subburn::config::Config;
use subburn::job::{JobId, OwnerId};
use subburn::media::Resolution;
use subburn::service::{ReportedStatus, StatusDetail, StatusReport};
use subburn::workflow::Workflow;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Setup logging to both console and file
    setup_logging(args.verbose, &config.logging.dir)?;
    info!("Starting subburn");

    let workflow = Workflow::new(config);
    workflow.prepare().await?;

    match args.command {
        Commands::Worker { workers, once } => {
            workflow.check_dependencies().await?;

            if once {
                let worker = workflow.worker("inline");
                let processed = worker.drain().await?;
                println!("Processed {} queued units", processed);
            } else {
                let workers = workers.unwrap_or(workflow.config().dispatcher.workers);
                let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutdown requested, finishing running units...");
                        let _ = shutdown_tx.send(true);
                    }
                });
                workflow.worker_pool().run(workers, shutdown_rx).await?;
            }
        }
        Commands::Submit { input, owner, resolution, language, wait } => {
            info!("Submitting video file: {}", input.display());

            let owner = OwnerId::from(owner);
            let resolution: Resolution = resolution.parse()?;
            let limits = workflow.config().limits.for_owner(owner.as_str());
            let filename = input
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();

            let source = tokio::fs::File::open(&input).await?;
            let job_id = workflow
                .service()
                .submit(&owner, limits, source, &filename, resolution, language.as_deref())
                .await?;
            println!("Submitted job {}", job_id);

            if wait {
                let report = wait_for_transcription(&workflow, &job_id, &owner).await?;
                print_report(&report);
            }
        }
        Commands::Status { job, owner } => {
            let job_id: JobId = job.parse()?;
            let report = workflow.service().status(&job_id, &OwnerId::from(owner)).await?;
            print_report(&report);
        }
        Commands::Edit { job, owner, output } => {
            let job_id: JobId = job.parse()?;
            let session = workflow
                .service()
                .open_editor(&job_id, &OwnerId::from(owner))
                .await?;

            tokio::fs::write(&output, &session.subtitle_text).await?;
            println!(
                "Wrote subtitles of {} ({}, language {}) to {}",
                session.filename,
                session.resolution,
                session.language.as_deref().unwrap_or("auto"),
                output.display()
            );
        }
        Commands::Burn { job, owner, subtitles, resolution } => {
            let job_id: JobId = job.parse()?;
            let owner = OwnerId::from(owner);
            let subtitle_text = tokio::fs::read_to_string(&subtitles).await?;

            let resolution = match resolution {
                Some(resolution) => resolution.parse::<Resolution>()?,
                None => workflow.service().open_editor(&job_id, &owner).await?.resolution,
            };

            let task_id = workflow
                .service()
                .save_edit(&job_id, &owner, &subtitle_text, resolution)
                .await?;
            println!("Queued burn task {} for job {}", task_id, job_id);
        }
        Commands::Stats => {
            let stats = workflow.service().queue_stats().await?;
            println!("\nQueue Statistics:");
            println!("{:<10} {:<10} {:<10} {:<10}", "Queued", "Running", "Dead", "Workers");
            println!("{}", "-".repeat(40));
            println!(
                "{:<10} {:<10} {:<10} {:<10}",
                stats.queued, stats.running, stats.dead, stats.workers
            );
        }
        Commands::Usage { owner } => {
            let history = workflow.service().usage_history(&OwnerId::from(owner)).await?;
            if history.is_empty() {
                println!("No processed videos recorded.");
            } else {
                println!("\nUsage History:");
                println!("{:<12} {:<10}", "Date", "Videos");
                println!("{}", "-".repeat(22));
                for entry in history {
                    println!("{:<12} {:<10}", entry.date, entry.videos_processed);
                }
            }
        }
        Commands::Probe { input } => {
            let duration = workflow.media().probe_duration(&input).await?;
            println!("{}: {}", input.display(), format_duration(duration));
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(log_dir, "subburn.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Create console layer
    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subburn.log").display()
    );

    Ok(())
}

/// Poll the job until transcription has settled
async fn wait_for_transcription(workflow: &Workflow, job_id: &JobId, owner: &OwnerId) -> Result<StatusReport> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")?);
    spinner.enable_steady_tick(Duration::from_millis(120));

    let poll = workflow.config().dispatcher.poll_interval().max(Duration::from_millis(250));
    loop {
        let report = workflow.service().status(job_id, owner).await?;
        match (&report.status, &report.detail) {
            (
                ReportedStatus::Queued | ReportedStatus::Running | ReportedStatus::Pending,
                StatusDetail::Progress { label },
            ) => spinner.set_message(label.clone()),
            _ => {
                spinner.finish_and_clear();
                return Ok(report);
            }
        }
        tokio::time::sleep(poll).await;
    }
}

fn print_report(report: &StatusReport) {
    println!("Job {}: {:?}", report.job_id, report.status);
    match &report.detail {
        StatusDetail::Redirect => println!("Subtitles are ready. Run `subburn edit` to review them."),
        StatusDetail::Download { file } => println!("Download: {}", file),
        StatusDetail::Error { message } => println!("Error: {}", message),
        StatusDetail::Progress { label } => println!("{}", label),
    }
    println!("Last update: {}", report.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

/// Format duration in seconds to human readable string
fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let whole = seconds as u64;
    if whole < 60 {
        format!("{:.2}s", seconds)
    } else if whole < 3600 {
        format!("{}m {}s", whole / 60, whole % 60)
    } else {
        format!("{}h {}m", whole / 3600, (whole % 3600) / 60)
    }
}
