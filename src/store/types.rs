//! Types for the persistent store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Lifecycle of a submitted link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// Waiting to be claimed by a processor.
    Idle,
    /// Claimed by the processor whose worker id is stored on the row.
    Processing,
    /// Every file of the link finished downloading.
    Done,
    /// Resolution failed permanently; see the link's message.
    Error,
}

impl LinkStatus {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A link submitted for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: i64,
    /// Canonical `https://mega...` URL, unique across the table.
    pub url: String,
    /// Optional destination sub-directory.
    pub category: Option<String>,
    pub status: LinkStatus,
    /// Worker id of the processor that last wrote the status.
    pub worker_id: String,
    /// Error or progress note attached to the status.
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Link {
    /// Status as seen by `worker_id`.
    ///
    /// A `processing` claim held by a different worker is stale from the
    /// caller's point of view and is reported as `idle`.
    pub fn effective_status(&self, worker_id: &str) -> LinkStatus {
        if self.status == LinkStatus::Processing && self.worker_id != worker_id {
            LinkStatus::Idle
        } else {
            self.status
        }
    }
}

/// Download status of a file, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Idle,
    Downloading,
    Finished,
}

/// A file discovered under a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub link_id: i64,
    /// Absolute destination path.
    pub path: PathBuf,
    /// Remote node handle, unique within the owning link.
    pub handle: String,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub num_retry: u32,
    pub max_retries: u32,
    /// Bytes per second averaged over the transfer so far.
    pub mean_speed: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub is_processing: bool,
    pub is_finished: bool,
    /// Last transfer state code reported for this file.
    pub state: Option<i32>,
}

impl FileRecord {
    pub fn status(&self) -> FileStatus {
        if self.is_finished {
            FileStatus::Finished
        } else if self.is_processing {
            FileStatus::Downloading
        } else {
            FileStatus::Idle
        }
    }
}

/// Input for [`super::Store::create_file`].
#[derive(Debug, Clone)]
pub struct NewFile {
    pub link_id: i64,
    pub path: PathBuf,
    pub handle: String,
    pub total_bytes: u64,
}

/// Snapshot of a running transfer, written verbatim over the file's
/// progress columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProgress {
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    pub num_retry: u32,
    pub max_retries: u32,
    pub mean_speed: u64,
    pub start_time: DateTime<Utc>,
    pub state: i32,
    /// Set only by the terminal snapshot of a successful transfer.
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// Summary of the store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreSummary {
    pub links_idle: u64,
    pub links_processing: u64,
    pub links_done: u64,
    pub links_error: u64,
    pub files_total: u64,
    pub files_finished: u64,
    pub files_downloading: u64,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
}

/// Outcome of a progress write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressWrite {
    /// The snapshot was stored.
    Applied,
    /// The file is already finished; the snapshot was ignored.
    AlreadyFinished,
    /// The file row no longer exists.
    Missing,
}
