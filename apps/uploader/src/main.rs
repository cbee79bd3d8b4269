use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::UploadTarget;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, error, info};
use upload_core::{
    FileDescriptor, HttpUploadTransport, NewFile, UploadEvent, UploadQueue, UploadTransport,
};

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(about = "Queue local files and upload them to the classwork file endpoint")]
struct Cli {
    /// Overrides the configured server base URL.
    #[arg(long)]
    server_url: Option<String>,
    /// Bearer token sent with every request.
    #[arg(long)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files in one batch and print the reconciled file list as JSON.
    Upload {
        #[arg(long)]
        folder: Option<String>,
        /// Record the files belong to, e.g. a classwork id.
        #[arg(long)]
        parent_id: Option<String>,
        /// JSON array of already attached files to merge with.
        #[arg(long)]
        seed: Option<PathBuf>,
        files: Vec<PathBuf>,
    },
    /// Delete a stored file by key.
    Delete { file_key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    if let Some(token) = cli.token {
        settings.auth_token = Some(token);
    }

    let transport = Arc::new(
        HttpUploadTransport::from_options(settings.transport_options())
            .context("failed to configure upload transport")?,
    );
    info!(endpoint = %transport.endpoint(), "upload endpoint");

    match cli.command {
        Command::Upload {
            folder,
            parent_id,
            seed,
            files,
        } => {
            let folder = folder.unwrap_or_else(|| settings.default_folder.clone());
            let mut target = UploadTarget::new(folder);
            if let Some(parent_id) = parent_id {
                target = target.with_parent(parent_id);
            }
            let initial_files = match seed {
                Some(path) => read_seed(&path)?,
                None => Vec::new(),
            };

            let (queue, events) = UploadQueue::with_initial_files(transport, target, initial_files);
            let queue = queue.with_progress_clear_delay(settings.progress_clear_delay());
            let events = tokio::spawn(log_events(events));

            let mut selected = Vec::with_capacity(files.len());
            for path in &files {
                let mime_type = mime_guess::from_path(path).first_raw().map(str::to_string);
                let file = NewFile::from_path(path, mime_type)
                    .await
                    .with_context(|| format!("failed to stat '{}'", path.display()))?;
                selected.push(file);
            }
            queue.add_files(selected);

            let target = queue.target();
            info!(folder = %target.folder, parent_id = ?target.parent_id, "uploading pending files");
            match queue.upload_pending().await {
                Ok(uploaded) => info!(count = uploaded.len(), "upload finished"),
                Err(err) if err.is_precondition() => info!(reason = %err, "nothing sent"),
                Err(err) => {
                    return Err(anyhow::Error::new(err).context("upload failed; files remain queued"))
                }
            }

            println!("{}", serde_json::to_string_pretty(&queue.snapshot())?);
            drop(queue);
            let _ = events.await;
        }
        Command::Delete { file_key } => {
            transport
                .delete_stored(&file_key)
                .await
                .with_context(|| format!("failed to delete '{file_key}'"))?;
            println!("deleted {file_key}");
        }
    }

    Ok(())
}

fn read_seed(path: &Path) -> Result<Vec<FileDescriptor>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file '{}'", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("seed file '{}' is not a JSON file list", path.display()))
}

async fn log_events(mut rx: Receiver<UploadEvent>) {
    loop {
        match rx.recv().await {
            Ok(UploadEvent::FilesChanged(files)) => {
                let uploaded = files.iter().filter(|file| file.is_uploaded()).count();
                info!(
                    uploaded,
                    pending = files.len() - uploaded,
                    "file list changed"
                );
            }
            Ok(UploadEvent::ProgressChanged(progress)) => debug!(?progress, "upload progress"),
            Ok(UploadEvent::UploadFailed(message)) => error!(%message, "upload failed"),
            Ok(UploadEvent::BatchMismatch {
                submitted,
                reported,
            }) => error!(submitted, reported, "server did not confirm every file"),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
