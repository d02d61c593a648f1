//! Startup passes that repair state left by an interrupted run.

use std::io;
use std::path::Path;

use crate::store::{LinkStatus, Store, StoreError};
use crate::transfer::is_temp_artifact;

/// What [`reconcile`] changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub files_reset: u64,
    pub links_demoted: u64,
    pub claims_released: u64,
    pub processing_flags_cleared: u64,
}

/// Delete transfer temp files anywhere under `root`.
///
/// Returns the number of files removed. Unreadable directories and files
/// that cannot be removed are logged and skipped; a missing root yields 0.
pub async fn reap_temp_files(root: &Path) -> io::Result<usize> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || reap_dir(&root))
        .await
        .map_err(io::Error::other)
}

fn reap_dir(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to read directory entry");
                continue;
            }
        };
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            tracing::warn!(path = %path.display(), "Failed to stat entry, skipping");
            continue;
        };
        if file_type.is_dir() {
            removed += reap_dir(&path);
        } else if file_type.is_file() && is_temp_artifact(&entry.file_name().to_string_lossy()) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Removed stale transfer file");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale transfer file");
                }
            }
        }
    }
    removed
}

/// Bring persisted state in line with the disk.
///
/// Files whose destination is missing are reset, and their links go back
/// to `idle`. Claims held by other workers are released and stale
/// `processing` flags are cleared. Safe to run repeatedly.
pub async fn reconcile(store: &dyn Store, worker_id: &str) -> Result<ReconcileReport, StoreError> {
    let mut report = ReconcileReport {
        claims_released: store.release_foreign_claims(worker_id).await?,
        processing_flags_cleared: store.clear_processing_flags().await?,
        ..ReconcileReport::default()
    };

    for link in store.list_links().await? {
        let mut missing = 0;
        for file in store.list_files(Some(link.id)).await? {
            if destination_exists(&file.path).await {
                continue;
            }
            store.reset_file(file.id).await?;
            missing += 1;
        }

        if missing == 0 {
            continue;
        }
        report.files_reset += missing;
        if link.status != LinkStatus::Idle {
            tracing::info!(
                link_id = link.id,
                missing,
                "Files missing on disk, returning link to the queue"
            );
            store
                .update_link_status(link.id, worker_id, LinkStatus::Idle, None)
                .await?;
            report.links_demoted += 1;
        }
    }

    Ok(report)
}

async fn destination_exists(path: &Path) -> bool {
    match tokio::fs::try_exists(path).await {
        Ok(exists) => exists,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to check file existence, assuming missing"
            );
            false
        }
    }
}
