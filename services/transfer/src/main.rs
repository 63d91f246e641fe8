use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guestlens_transfer::keys::{archive_file_name, content_type_for};
use guestlens_transfer::{
    AccessScope, BatchStatus, ItemProgress, ObjectDescriptor, ProgressEvent, TransferClient,
    TransferConfig, UploadRequest,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Guestlens - upload to and export from event galleries
#[derive(Parser, Debug)]
#[command(name = "guestlens")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files to a gallery
    Upload {
        /// Gallery (event) slug
        #[arg(long)]
        slug: String,
        /// Uploading user
        #[arg(long)]
        user: String,
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Download gallery objects into one ZIP archive
    Export {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        user: String,
        /// Object keys to export (default: everything listed)
        #[arg(long = "key")]
        keys: Vec<String>,
        /// Directory for the archive
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// List gallery objects
    List {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        user: String,
    },

    /// Delete one object
    Delete {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        user: String,
        /// Object key
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = TransferConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.logging.level, &config.logging.format);
    config.validate().context("Invalid configuration")?;

    let client = TransferClient::from_config(&config).context("Failed to create transfer client")?;

    match cli.command {
        Command::Upload { slug, user, files } => upload(&client, slug, user, files).await,
        Command::Export {
            slug,
            user,
            keys,
            out,
        } => export(&client, slug, user, keys, &out).await,
        Command::List { slug, user } => {
            let objects = client
                .api()
                .list_objects(&slug, &user)
                .await
                .context("Failed to list objects")?;
            for object in &objects {
                println!("{}\t{}", object.key, object.expires_at.to_rfc3339());
            }
            info!(count = objects.len(), "Listed objects");
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { slug, user, key } => {
            let deleted = client
                .api()
                .delete_object(&key, &AccessScope::new(slug, user))
                .await
                .with_context(|| format!("Failed to delete {}", key))?;
            info!(key = %key, deleted, "Delete finished");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn upload(
    client: &TransferClient,
    slug: String,
    user: String,
    files: Vec<PathBuf>,
) -> Result<ExitCode> {
    let mut items = Vec::with_capacity(files.len());
    for path in &files {
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        items.push(UploadRequest {
            content_type: content_type_for(&file_name).to_string(),
            file_name,
            body: body.into(),
            owner_prefix: slug.clone(),
            caller_identity: user.clone(),
        });
    }

    let progress: ItemProgress = Arc::new(|index: usize, event: ProgressEvent| {
        debug!(item = index, percent = event.percent(), "Upload progress");
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight uploads");
            on_signal.cancel();
        }
    });

    let report = client
        .uploads()
        .upload_batch(items, Some(progress), Some(cancel))
        .await;

    for item in &report.items {
        match item.outcome.failure_kind() {
            None => info!(
                file_name = %item.file_name,
                object_key = item.object_key.as_deref().unwrap_or_default(),
                attempts = item.attempts,
                "Uploaded"
            ),
            Some(kind) => error!(file_name = %item.file_name, kind = %kind, "Upload failed"),
        }
    }

    println!("Uploaded {} files", report.summary);
    Ok(exit_code(report.summary.status()))
}

async fn export(
    client: &TransferClient,
    slug: String,
    user: String,
    keys: Vec<String>,
    out: &Path,
) -> Result<ExitCode> {
    let selection: Vec<ObjectDescriptor> = if keys.is_empty() {
        client
            .api()
            .list_objects(&slug, &user)
            .await
            .context("Failed to list objects")?
    } else {
        keys.into_iter()
            .map(|key| ObjectDescriptor {
                key,
                display_url: String::new(),
                expires_at: chrono::Utc::now(),
            })
            .collect()
    };

    let scope = AccessScope::new(slug.clone(), user);
    let report = client
        .exports()
        .export(&selection, &scope)
        .await
        .context("Export failed")?;

    for item in report.items.iter().filter(|item| !item.outcome.is_success()) {
        error!(key = %item.key, outcome = ?item.outcome, "Object not exported");
    }

    let Some(archive) = report.archive else {
        println!("Exported {} images", report.summary);
        return Ok(ExitCode::FAILURE);
    };

    let path = out.join(archive_file_name(&slug, chrono::Utc::now().timestamp_millis()));
    tokio::fs::write(&path, &archive)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!(
        "Exported {} images to {}",
        report.summary,
        path.display()
    );
    Ok(exit_code(report.summary.status()))
}

fn exit_code(status: BatchStatus) -> ExitCode {
    match status {
        BatchStatus::AllFailed => ExitCode::FAILURE,
        BatchStatus::AllSucceeded | BatchStatus::Partial => ExitCode::SUCCESS,
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}
