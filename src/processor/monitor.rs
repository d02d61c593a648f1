//! Persists transfer events for one file.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::{ProgressWrite, Store};
use crate::transfer::{TransferEvent, TransferOutcome};

/// Spawn the task that writes every event of a transfer to the file's
/// record, in order, through its own store session.
///
/// The handle resolves to the transfer's outcome once the terminal
/// snapshot has been written. If the file record disappears mid-transfer
/// the transfer is cancelled through `cancel` and further writes are
/// skipped.
pub fn spawn_progress_writer(
    store: Arc<dyn Store>,
    file_id: i64,
    mut events: mpsc::Receiver<TransferEvent>,
    cancel: CancellationToken,
) -> JoinHandle<TransferOutcome> {
    tokio::spawn(async move {
        let mut detached = false;

        while let Some(event) = events.recv().await {
            let (progress, outcome) = match event {
                TransferEvent::Progress(progress) => (progress.to_file_progress(false), None),
                TransferEvent::Finished { progress, outcome } => {
                    let completed = outcome == TransferOutcome::Completed;
                    (progress.to_file_progress(completed), Some(outcome))
                }
            };

            if !detached {
                match store.record_progress(file_id, &progress).await {
                    Ok(ProgressWrite::Applied | ProgressWrite::AlreadyFinished) => {}
                    Ok(ProgressWrite::Missing) => {
                        tracing::warn!(file_id, "File removed during transfer, cancelling it");
                        cancel.cancel();
                        detached = true;
                    }
                    Err(e) => {
                        tracing::warn!(file_id, error = %e, "Failed to record transfer progress");
                    }
                }
            }

            if let Some(outcome) = outcome {
                return outcome;
            }
        }

        TransferOutcome::Failed("transfer ended without a terminal event".to_string())
    })
}
