use anyhow::{bail, Context};
use clap::Parser;
use guestcap::progress::{format_bytes, LocalFile, TaskStatus};
use guestcap::protocol::HttpSessionClient;
use guestcap::transfer::{HttpPutTransport, RetryPolicy, MAX_RETRIES};
use guestcap::uploader::{ChannelObserver, ChunkedUploader, UploadEvent, UploaderConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const BAR_STYLE: &str =
    "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

/// Upload photos to an event as a guest
#[derive(Debug, Parser)]
#[command(name = "guestcap-upload")]
struct Args {
    /// Base URL of the session service
    #[arg(long, env = "GUESTCAP_SERVER_URL", default_value = "http://localhost:3000")]
    server: String,

    #[arg(long, env = "GUESTCAP_EVENT_ID")]
    event: String,

    #[arg(long, env = "GUESTCAP_GUEST_ID")]
    guest: String,

    #[arg(long, env = "GUESTCAP_GUEST_TOKEN", hide_env_values = true)]
    token: String,

    /// Retries per file after the first attempt
    #[arg(long, default_value_t = MAX_RETRIES)]
    retries: u32,

    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let file = LocalFile::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        files.push(file);
    }

    let config = UploaderConfig::new(args.event, args.guest, args.token).with_retry(RetryPolicy::new(
        args.retries,
        Duration::from_millis(args.retry_delay_ms),
    ));
    let (observer, mut events) = ChannelObserver::new();
    let uploader = Arc::new(ChunkedUploader::new(
        HttpSessionClient::new(args.server),
        HttpPutTransport::new(),
        config,
        Arc::new(observer),
    ));
    uploader.add_files(files);

    let bar = ProgressBar::new(uploader.total_size());
    if let Ok(style) = ProgressStyle::with_template(BAR_STYLE) {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(120));

    let mut run = {
        let uploader = uploader.clone();
        tokio::spawn(async move { uploader.start().await })
    };

    let mut failure = None;
    let mut cancelled = false;
    let result = loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => match event {
                UploadEvent::Progress(progress) => {
                    bar.set_position(progress.bytes_uploaded);
                    bar.set_message(format!(
                        "{}/{} {}",
                        progress.completed_files, progress.total_files, progress.current_file_name
                    ));
                }
                UploadEvent::Completed { uploaded_paths } => {
                    bar.finish_with_message(format!("{} files stored", uploaded_paths.len()));
                }
                UploadEvent::Error { message, unreconciled } => {
                    if unreconciled {
                        bar.abandon_with_message("uploaded, but not recorded by the server");
                    } else {
                        bar.abandon_with_message("failed");
                    }
                    failure = Some(message);
                }
            },
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                bar.abandon_with_message("cancelled");
                uploader.cancel().await;
            }
            joined = &mut run => break joined,
        }
    };

    if cancelled {
        bail!("upload cancelled");
    }
    result.context("upload task panicked")??;
    if let Some(message) = failure {
        bail!(message);
    }

    let failed: Vec<_> = uploader
        .files()
        .into_iter()
        .filter(|task| task.status == TaskStatus::Error)
        .collect();
    for task in &failed {
        eprintln!(
            "  {} ({}): {}",
            task.name,
            format_bytes(task.size),
            task.error.as_deref().unwrap_or("unknown error")
        );
    }

    let progress = uploader.progress();
    println!(
        "{} of {} files uploaded ({} of {})",
        progress.completed_files,
        progress.total_files,
        format_bytes(progress.bytes_uploaded),
        format_bytes(progress.bytes_total)
    );

    if !failed.is_empty() {
        bail!("{} files failed", failed.len());
    }
    Ok(())
}
