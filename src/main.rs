//! megadl: background downloader for public MEGA links.
//!
//! Links are enqueued over a small HTTP API (or `megadl add`), persisted in
//! SQLite, and downloaded one file at a time by a single worker that picks
//! up where it left off after a restart.

#![warn(clippy::all)]

mod api;
mod cli;
mod config;
mod link;
mod processor;
mod resolver;
pub mod retry;
mod shutdown;
mod store;
mod systemd;
mod transfer;
mod types;

#[cfg(test)]
mod test_support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fs4::fs_std::FileExt;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::{expand_tilde, Config};
use processor::DownloadProcessor;
use resolver::GatewayRemote;
use store::{FileRecord, LinkStatus, SqliteStore, Store};
use transfer::HttpTransfer;

async fn open_store(database: &Path) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = database.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }
    Ok(SqliteStore::open(database).await?)
}

/// Take the exclusive daemon lock. The lock lives as long as the file.
async fn acquire_lock(lock_path: &Path) -> anyhow::Result<std::fs::File> {
    let lock_path = lock_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = std::fs::File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another megadl instance is serving this database (lock: {})",
                lock_path.display()
            )
        })?;
        Ok::<std::fs::File, anyhow::Error>(file)
    })
    .await?
}

/// Run the processor and the HTTP API until a shutdown signal.
async fn run_serve(database: &str, args: cli::ServeArgs) -> anyhow::Result<()> {
    let config = Config::from_args(database, args)?;
    tracing::debug!(?config, "Loaded configuration");
    let notifier = systemd::SystemdNotifier::new(config.notify_systemd);

    let _lock = acquire_lock(&config.lock_path()).await?;
    let store = open_store(&config.database).await?;
    tokio::fs::create_dir_all(&config.destination)
        .await
        .with_context(|| {
            format!(
                "Failed to create destination directory: {}",
                config.destination.display()
            )
        })?;

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("megadl/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let remote = Arc::new(GatewayRemote::new(
        client.clone(),
        &config.gateway,
        config.retry.clone(),
    ));
    let transfer = Arc::new(
        HttpTransfer::new(client, config.retry.clone())
            .with_progress_interval(config.progress_interval),
    );

    let api_store = store.session().await?;
    let processor = DownloadProcessor::new(
        store.session().await?,
        remote,
        transfer,
        config.processor_settings(),
    )
    .await?;
    let handle = processor.handle();

    let shutdown_token = shutdown::install_signal_handler()?;

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    tracing::info!(
        listen = %config.listen,
        worker_id = %config.worker_id,
        "Starting megadl"
    );

    // A processor exit, including a panic, shuts the server down too.
    let processor_exit = shutdown_token.clone().drop_guard();
    let processor_task = tokio::spawn(async move {
        let _shutdown_on_exit = processor_exit;
        processor.run().await
    });
    tokio::spawn(notifier.report_processor(handle.clone(), shutdown_token.clone()));

    let app = api::router(
        api::AppState {
            store: api_store,
            processor: handle.clone(),
        },
        config.cors_origin.clone(),
    );
    notifier.notify_ready();

    let server_token = shutdown_token.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await;

    notifier.notify_stopping();
    handle.stop();
    match processor_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Download processor failed: {e:#}"),
        Err(e) => tracing::error!("Download processor task panicked: {}", e),
    }
    served.context("HTTP server failed")?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Enqueue a link directly in the database.
async fn run_add(database: &str, args: cli::AddArgs) -> anyhow::Result<()> {
    let url = link::decode_url(&args.url)?;
    let store = open_store(&expand_tilde(database)).await?;
    let category = args
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let link = store.add_link(&url, category).await?;
    println!("Link {} queued: {}", link.id, link.url);
    Ok(())
}

async fn run_status(database: &str) -> anyhow::Result<()> {
    let db_path = expand_tilde(database);
    if !db_path.exists() {
        println!("No database found at {}", db_path.display());
        return Ok(());
    }

    let store = SqliteStore::open(&db_path).await?;
    let summary = store.summary().await?;

    println!("Database: {}", store.path().display());
    println!();
    println!("Links:");
    println!("  Idle:        {}", summary.links_idle);
    println!("  Processing:  {}", summary.links_processing);
    println!("  Done:        {}", summary.links_done);
    println!("  Error:       {}", summary.links_error);
    println!();
    println!("Files:");
    println!("  Total:       {}", summary.files_total);
    println!("  Finished:    {}", summary.files_finished);
    println!("  Downloading: {}", summary.files_downloading);
    println!(
        "  Transferred: {} / {} bytes",
        summary.transferred_bytes, summary.total_bytes
    );

    let errors: Vec<_> = store
        .list_links()
        .await?
        .into_iter()
        .filter(|l| l.status == LinkStatus::Error)
        .collect();
    if !errors.is_empty() {
        println!();
        println!("Failed links:");
        for link in errors {
            println!(
                "  {} {} - {}",
                link.id,
                link.url,
                link.message.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}

/// Finished files whose destination no longer exists.
async fn missing_downloads(store: &dyn Store) -> anyhow::Result<Vec<FileRecord>> {
    let mut missing = Vec::new();
    for file in store.list_files(None).await? {
        if file.is_finished && !tokio::fs::try_exists(&file.path).await.unwrap_or(false) {
            missing.push(file);
        }
    }
    Ok(missing)
}

async fn run_verify(database: &str) -> anyhow::Result<()> {
    let db_path = expand_tilde(database);
    if !db_path.exists() {
        println!("No database found at {}", db_path.display());
        return Ok(());
    }

    let store = SqliteStore::open(&db_path).await?;
    let missing = missing_downloads(&store).await?;
    let finished = store.summary().await?.files_finished;

    println!(
        "Verifying {} downloaded files from {}...",
        finished,
        store.path().display()
    );
    for file in &missing {
        println!("MISSING: {} (link {})", file.path.display(), file.link_id);
    }
    println!();
    println!("Results:");
    println!("  Verified: {}", finished.saturating_sub(missing.len() as u64));
    println!("  Missing:  {}", missing.len());

    if !missing.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_decode(args: cli::DecodeArgs) -> anyhow::Result<()> {
    println!("{}", link::decode_url(&args.input)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let database = cli.database.clone();
    match cli.effective_command() {
        Command::Serve(args) => run_serve(&database, args).await,
        Command::Add(args) => run_add(&database, args).await,
        Command::Status => run_status(&database).await,
        Command::Verify => run_verify(&database).await,
        Command::Decode(args) => run_decode(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::store::{FileProgress, NewFile};

    #[tokio::test]
    async fn test_second_lock_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("megadl.db.lock");
        let _first = acquire_lock(&path).await.unwrap();
        assert!(acquire_lock(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_downloads_only_reports_finished() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir.path().join("db").join("megadl.db"))
            .await
            .unwrap();
        let link = store.add_link("https://mega.nz/#F!a!k", None).await.unwrap();
        let present = dir.path().join("present.txt");
        std::fs::write(&present, b"ok").unwrap();

        let mut ids = Vec::new();
        for (handle, path) in [
            ("p", present),
            ("g", dir.path().join("gone.txt")),
            ("u", dir.path().join("unfinished.txt")),
        ] {
            let file = store
                .create_file(&NewFile {
                    link_id: link.id,
                    path,
                    handle: handle.into(),
                    total_bytes: 2,
                })
                .await
                .unwrap();
            ids.push(file.id);
        }
        for id in &ids[..2] {
            store
                .record_progress(
                    *id,
                    &FileProgress {
                        transferred_bytes: 2,
                        total_bytes: 2,
                        num_retry: 0,
                        max_retries: 3,
                        mean_speed: 2,
                        start_time: chrono::Utc::now(),
                        state: 6,
                        finished: true,
                    },
                )
                .await
                .unwrap();
        }

        let missing = missing_downloads(&store).await.unwrap();

        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].handle, "g");
    }
}
