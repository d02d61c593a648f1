//! Wire shapes for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::processor::ProcessorStatus;
use crate::store::{FileRecord, FileStatus, Link, LinkStatus, StoreSummary};
use crate::transfer::TransferState;

/// Body of `POST /api/urls`.
#[derive(Debug, Deserialize)]
pub struct AddUrlRequest {
    /// Accepts `mega_url` as used by older clients.
    #[serde(alias = "mega_url")]
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub url_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FileDto {
    pub id: i64,
    pub url_id: i64,
    pub path: String,
    pub handle: String,
    pub status: FileStatus,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub num_retry: u32,
    pub max_retries: u32,
    pub mean_speed: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub is_processing: bool,
    pub is_finished: bool,
    pub state: Option<i32>,
    /// `state` by name.
    pub transfer_state: Option<TransferState>,
}

impl From<FileRecord> for FileDto {
    fn from(file: FileRecord) -> Self {
        Self {
            id: file.id,
            url_id: file.link_id,
            path: file.path.to_string_lossy().into_owned(),
            status: file.status(),
            handle: file.handle,
            total_bytes: file.total_bytes,
            transferred_bytes: file.transferred_bytes,
            num_retry: file.num_retry,
            max_retries: file.max_retries,
            mean_speed: file.mean_speed,
            start_time: file.start_time,
            is_processing: file.is_processing,
            is_finished: file.is_finished,
            transfer_state: file.state.and_then(TransferState::from_code),
            state: file.state,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LinkDto {
    pub id: i64,
    pub url: String,
    pub category: Option<String>,
    /// Status as seen by the running processor.
    pub status: LinkStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub transferred_size: u64,
    pub total_size: u64,
    pub files: Vec<FileDto>,
}

impl LinkDto {
    pub fn new(link: Link, files: Vec<FileRecord>, worker_id: &str) -> Self {
        let transferred_size = files.iter().map(|f| f.transferred_bytes).sum();
        let total_size = files.iter().map(|f| f.total_bytes).sum();
        Self {
            status: link.effective_status(worker_id),
            id: link.id,
            url: link.url,
            category: link.category,
            message: link.message,
            created_at: link.created_at,
            transferred_size,
            total_size,
            files: files.into_iter().map(FileDto::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusDto {
    pub status: ProcessorStatus,
    pub worker_id: String,
    pub current_url_id: Option<i64>,
    pub current_file_id: Option<i64>,
    pub summary: StoreSummary,
    pub urls: Vec<LinkDto>,
}

#[derive(Debug, Serialize)]
pub struct OkDto {
    pub code: &'static str,
}

impl OkDto {
    pub fn ok() -> Self {
        Self { code: "ok" }
    }
}
