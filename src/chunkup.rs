use anyhow::{Context, Result};
use chunkup::config::Settings;
use chunkup::upload::{
    HttpTransferClient, JobOutcome, NotificationConfig, PartMaterializer, PresignClient, Registry,
    UploadError, UploadEvent, UploadJob, UploadSequencer, file_info, part_count, plan,
};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "chunkup",
    version = env!("CARGO_PKG_VERSION"),
    author = "Tyr Chen <tyr.chen@gmail.com>",
    about = "Upload large files part by part to presigned object store URLs",
    long_about = "Splits a file into parts, asks a signing endpoint for a presigned URL per part \
                  and uploads the parts strictly one after another. Jobs can resume from any part.",
    after_help = "Examples:\n  \
                  chunkup upload job.json                 # Run an upload job\n  \
                  chunkup upload job.yaml --json          # Emit events as JSON lines\n  \
                  chunkup plan ./video.mp4 -s 5242880     # Show part ranges for 5 MiB parts\n  \
                  chunkup info ./video.mp4                # Show size and MIME type\n\n\
                  Job file fields:\n  \
                  path, fileName, getPresignUrl, s3UploadId, beginPart, totalPart, partSize\n  \
                  optional: method, type (raw|multipart), field, headers, parameters,\n  \
                  customUploadId, authToken, notification\n\n\
                  Configuration (.env):\n  \
                  CHUNKUP_TEMP_DIR=/var/tmp/chunkup\n  \
                  CHUNKUP_PRESIGN_TOKEN=...\n  \
                  CHUNKUP_CHECKSUM=md5|sha256|blake3\n  \
                  CHUNKUP_BUFFER_SIZE=1048576"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a multipart upload job described by a JSON or YAML file
    Upload {
        /// Job file
        job: PathBuf,

        /// Print events as JSON lines instead of a progress bar
        #[arg(long)]
        json: bool,
    },
    /// Show file name, size and MIME type
    Info {
        path: String,
    },
    /// Show how a file splits into parts
    Plan {
        path: String,

        /// Part size in bytes
        #[arg(long, short = 's')]
        part_size: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    // Initialize tracing/logging with support for LOG_LEVEL from .env
    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Upload { job, json } => {
            let code = run_upload(&job, json).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Info { path } => {
            let info = file_info(&path).await;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Plan { path, part_size } => print_plan(&path, part_size).await?,
    }

    Ok(())
}

/// Parse a job file as JSON, falling back to YAML
fn load_job(path: &Path) -> Result<UploadJob> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;

    let options: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => serde_yaml::from_str(&text)
            .with_context(|| format!("{} is neither valid JSON nor YAML", path.display()))?,
    };

    UploadJob::from_options(&options).map_err(|e| anyhow::anyhow!(e.user_message()))
}

async fn run_upload(job_path: &Path, json: bool) -> Result<i32> {
    let settings = Settings::from_env()?;
    let job = load_job(job_path)?.with_default_auth_token(settings.presign_token.clone());
    let key = job.key().to_string();
    let notification = job.notification().clone();

    info!("chunkup v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Temp dir: {}, checksum: {}",
        settings.temp_dir.display(),
        settings.checksum
    );

    let client = reqwest::Client::builder()
        .user_agent(concat!("chunkup/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let sequencer = Arc::new(
        UploadSequencer::new(HttpTransferClient::new().with_client(client.clone()))
            .with_presign_client(PresignClient::with_client(client))
            .with_temp_dir(&settings.temp_dir)
            .with_materializer(
                PartMaterializer::new(settings.checksum).with_buffer_size(settings.buffer_size),
            ),
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<UploadEvent>();
    let handle = Arc::clone(&sequencer).spawn(job, Arc::new(tx));

    // Ctrl-C routes through the registry like any other cancellation request
    let cancel_key = key.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && !Registry::global().cancel(&cancel_key) {
            warn!("No running upload for {}", cancel_key);
        }
    });

    let pb = (!json && notification.enabled).then(|| progress_bar(&notification));

    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        }
        let Some(pb) = &pb else {
            continue;
        };
        match &event {
            UploadEvent::Progress {
                progress,
                current_part,
                ..
            } => {
                pb.set_position(*progress as u64);
                pb.set_message(format!(
                    "{} (part {})",
                    notification
                        .on_progress_message
                        .as_deref()
                        .unwrap_or("Uploading"),
                    current_part
                ));
            }
            UploadEvent::Completed { .. } => finish_bar(
                pb,
                &notification,
                notification.on_complete_title.as_deref(),
                notification.on_complete_message.as_deref().unwrap_or("Upload complete"),
            ),
            UploadEvent::Error { error, .. } => {
                finish_bar(
                    pb,
                    &notification,
                    notification.on_error_title.as_deref(),
                    notification.on_error_message.as_deref().unwrap_or(error),
                );
            }
            UploadEvent::Cancelled { .. } => finish_bar(
                pb,
                &notification,
                notification.on_cancelled_title.as_deref(),
                notification
                    .on_cancelled_message
                    .as_deref()
                    .unwrap_or("Upload cancelled"),
            ),
        }
    }

    let outcome = handle.await.context("Upload task panicked")?;
    Ok(report_outcome(&key, outcome, json))
}

/// Print the result of a run and pick the process exit code
fn report_outcome(key: &str, outcome: JobOutcome, json: bool) -> i32 {
    match outcome.into_result() {
        Ok((response_code, _)) => {
            if !json {
                println!(
                    "{} {}",
                    style("✓").green(),
                    style(format!("Upload {} finished ({})", key, response_code)).green()
                );
            }
            0
        }
        Err(e @ UploadError::Cancelled) => {
            eprintln!(
                "{} {}",
                style("⚠").yellow(),
                style(format!("{} ({})", e.user_message(), key)).yellow()
            );
            130
        }
        Err(e) => {
            eprintln!("{} {}", style("✗").red(), style(e.user_message()).red());
            1
        }
    }
}

fn progress_bar(notification: &NotificationConfig) -> ProgressBar {
    let pb = ProgressBar::new(100);
    let template = "{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}% {msg}";
    match ProgressStyle::default_bar().template(template) {
        Ok(s) => pb.set_style(s.progress_chars("#>-")),
        Err(e) => warn!("Invalid progress template: {}", e),
    }
    if let Some(title) = &notification.on_progress_title {
        pb.set_prefix(title.clone());
    }
    pb
}

fn finish_bar(pb: &ProgressBar, notification: &NotificationConfig, title: Option<&str>, message: &str) {
    if let Some(title) = title {
        pb.set_prefix(title.to_string());
    }
    if notification.auto_clear {
        pb.finish_and_clear();
    } else {
        pb.finish_with_message(message.to_string());
    }
}

async fn print_plan(path: &str, part_size: u64) -> Result<()> {
    let info = file_info(path).await;
    let size = match info.size {
        Some(size) if info.exists => size,
        _ => anyhow::bail!("Path does not exist: {}", path),
    };
    let total = part_count(size, part_size)?;

    println!(
        "{}",
        style(format!(
            "{}: {} ({} bytes) in {} part(s) of {}",
            info.name,
            format_size(size),
            size,
            total,
            format_size(part_size)
        ))
        .bold()
    );
    for index in 1..=total {
        let p = plan(size, part_size, index, total)?;
        println!(
            "  part {:>5}  offset {:>14}  length {:>12}",
            p.index, p.offset, p.length
        );
    }
    Ok(())
}

/// Format file size for display
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
