//! The capability that moves one remote file onto local disk.
//!
//! A transfer reports through a channel: any number of
//! [`TransferEvent::Progress`] snapshots followed by exactly one
//! [`TransferEvent::Finished`].

pub mod error;
pub mod http;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::resolver::RemoteNode;
use crate::store::FileProgress;

pub use http::HttpTransfer;

/// Prefix and suffix of the temp file a transfer writes before renaming it
/// into place.
pub const TEMP_PREFIX: &str = ".getxfer.";
pub const TEMP_SUFFIX: &str = ".mega";

/// Capacity of a transfer's event channel.
pub const EVENT_BUFFER: usize = 32;

/// Transfer state codes, numbered as MEGA's SDK numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum TransferState {
    Queued = 1,
    Active = 2,
    Paused = 3,
    Retrying = 4,
    Completing = 5,
    Completed = 6,
    Cancelled = 7,
    Failed = 8,
}

impl TransferState {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Queued),
            2 => Some(Self::Active),
            3 => Some(Self::Paused),
            4 => Some(Self::Retrying),
            5 => Some(Self::Completing),
            6 => Some(Self::Completed),
            7 => Some(Self::Cancelled),
            8 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A point-in-time view of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    pub num_retry: u32,
    pub max_retries: u32,
    /// Bytes per second since the transfer started.
    pub mean_speed: u64,
    pub started_at: DateTime<Utc>,
    pub state: TransferState,
}

impl TransferProgress {
    pub fn to_file_progress(&self, finished: bool) -> FileProgress {
        FileProgress {
            transferred_bytes: self.transferred_bytes,
            total_bytes: self.total_bytes,
            num_retry: self.num_retry,
            max_retries: self.max_retries,
            mean_speed: self.mean_speed,
            start_time: self.started_at,
            state: self.state.code(),
            finished,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    Progress(TransferProgress),
    Finished {
        progress: TransferProgress,
        outcome: TransferOutcome,
    },
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub node: RemoteNode,
    /// Final location of the file.
    pub destination: PathBuf,
}

/// Starts transfers. Implementations spawn their own task and must always
/// end the event stream with a `Finished` event, including when `cancel`
/// fires.
pub trait Transfer: Send + Sync {
    fn start(
        &self,
        request: TransferRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TransferEvent>;
}

/// Temp file used while `handle` downloads into `destination`.
pub fn temp_path(destination: &Path, handle: &str) -> PathBuf {
    let dir = destination.parent().unwrap_or_else(|| Path::new("."));
    let handle: String = handle
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    dir.join(format!("{TEMP_PREFIX}{handle}{TEMP_SUFFIX}"))
}

/// Whether a file name looks like a leftover transfer temp file.
pub fn is_temp_artifact(file_name: &str) -> bool {
    file_name.len() > TEMP_PREFIX.len() + TEMP_SUFFIX.len()
        && file_name.starts_with(TEMP_PREFIX)
        && file_name.ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        assert_eq!(TransferState::Completed.code(), 6);
        assert_eq!(TransferState::Failed.code(), 8);
        for code in 1..=8 {
            assert_eq!(TransferState::from_code(code).unwrap().code(), code);
        }
        assert_eq!(TransferState::from_code(0), None);
    }

    #[test]
    fn test_temp_path_sits_beside_destination() {
        let path = temp_path(Path::new("/dl/root/a.txt"), "AbC-1_x");
        assert_eq!(path, PathBuf::from("/dl/root/.getxfer.AbC-1_x.mega"));
    }

    #[test]
    fn test_temp_path_strips_separators_from_handle() {
        let path = temp_path(Path::new("/dl/a.txt"), "../evil");
        assert_eq!(path, PathBuf::from("/dl/.getxfer.evil.mega"));
    }

    #[test]
    fn test_is_temp_artifact() {
        assert!(is_temp_artifact(".getxfer.abc.mega"));
        assert!(!is_temp_artifact(".getxfer..mega"));
        assert!(!is_temp_artifact("getxfer.abc.mega"));
        assert!(!is_temp_artifact(".getxfer.abc.part"));
        assert!(!is_temp_artifact("movie.mega"));
    }
}
