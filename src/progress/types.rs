use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Status of a single file inside a batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Uploading,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, TaskStatus::Complete)
    }

    /// Pending and errored tasks are the only ones a caller may drop from the queue
    pub fn is_removable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Error)
    }
}

/// Status of the batch as a whole
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Idle,
    Uploading,
    Processing,
    Complete,
    Error,
    Paused,
}

/// A local file handed to the uploader: name, declared media type and its bytes.
///
/// The bytes are reference counted, so re-sending the whole file on a retry is
/// a cheap clone.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub media_type: String,
    data: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk, inferring the media type from its extension
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let media_type = media_type_for(&name).to_string();

        Ok(Self::new(name, media_type, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Content type to send with the transfer
    pub fn content_type(&self) -> &str {
        if self.media_type.is_empty() {
            "application/octet-stream"
        } else {
            &self.media_type
        }
    }
}

fn media_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// One file of a batch, owned by the uploader
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: String,
    pub file: LocalFile,
    pub progress: u8,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl UploadTask {
    pub fn new(file: LocalFile) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file,
            progress: 0,
            status: TaskStatus::Pending,
            error: None,
        }
    }

    pub fn descriptor(&self) -> TaskDescriptor {
        TaskDescriptor {
            id: self.id.clone(),
            name: self.file.name.clone(),
            size: self.file.size(),
            media_type: self.file.media_type.clone(),
            progress: self.progress,
            status: self.status,
            error: self.error.clone(),
        }
    }

    pub fn mark_uploading(&mut self) {
        self.status = TaskStatus::Uploading;
        self.progress = 0;
        self.error = None;
    }

    /// Progress only moves forward while uploading
    pub fn advance(&mut self, progress: u8) {
        if self.status == TaskStatus::Uploading && progress > self.progress {
            self.progress = progress.min(100);
        }
    }

    pub fn mark_complete(&mut self) {
        self.status = TaskStatus::Complete;
        self.progress = 100;
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Error;
        self.error = Some(error.into());
    }

    /// Put an aborted transfer back in line; it restarts from zero
    pub fn reset(&mut self) {
        if self.status == TaskStatus::Uploading {
            self.status = TaskStatus::Pending;
            self.progress = 0;
        }
    }
}

/// Read-only view of a task, handed to callers for rendering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub media_type: String,
    pub progress: u8,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch-level progress snapshot, recomputed on every per-file tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregateProgress {
    pub total_files: usize,
    pub completed_files: usize,
    pub current_file_name: String,
    pub current_file_progress: u8,
    pub overall_progress: u8,
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AggregateProgress {
    pub fn idle() -> Self {
        Self {
            total_files: 0,
            completed_files: 0,
            current_file_name: String::new(),
            current_file_progress: 0,
            overall_progress: 0,
            bytes_uploaded: 0,
            bytes_total: 0,
            status: UploadStatus::Idle,
            error: None,
        }
    }

    /// Snapshot with `overall_progress` derived from the byte counters
    pub fn new(
        total_files: usize,
        completed_files: usize,
        bytes_uploaded: u64,
        bytes_total: u64,
        status: UploadStatus,
    ) -> Self {
        Self {
            total_files,
            completed_files,
            current_file_name: String::new(),
            current_file_progress: 0,
            overall_progress: percent(bytes_uploaded, bytes_total),
            bytes_uploaded,
            bytes_total,
            status,
            error: None,
        }
    }

    pub fn with_current(mut self, name: impl Into<String>, progress: u8) -> Self {
        self.current_file_name = name.into();
        self.current_file_progress = progress;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, UploadStatus::Complete | UploadStatus::Error)
    }
}

/// `round(done / total * 100)`, clamped to 0..=100. An empty total reads as 0.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let value = (done as f64 / total as f64 * 100.0).round();
    value.clamp(0.0, 100.0) as u8
}

/// Format bytes to a human readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut exponent = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && exponent < UNITS.len() - 1 {
        value /= 1024.0;
        exponent += 1;
    }
    let rounded = (value * 10.0).round() / 10.0;

    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, UNITS[exponent])
    } else {
        format!("{:.1} {}", rounded, UNITS[exponent])
    }
}
