use crate::progress::{AggregateProgress, UploadStatus};
use crate::transfer::RetryPolicy;
use crate::uploader::error::UploaderError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Who is uploading, and where
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub event_id: String,
    pub guest_id: String,
    pub guest_token: String,
    pub retry: RetryPolicy,
}

impl UploaderConfig {
    pub fn new(
        event_id: impl Into<String>,
        guest_id: impl Into<String>,
        guest_token: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            guest_id: guest_id.into(),
            guest_token: guest_token.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BatchState {
    Idle,
    Uploading,
    Processing,
    Paused,
    Complete,
    Error { message: String },
}

impl BatchState {
    pub fn status(&self) -> UploadStatus {
        match self {
            BatchState::Idle => UploadStatus::Idle,
            BatchState::Uploading => UploadStatus::Uploading,
            BatchState::Processing => UploadStatus::Processing,
            BatchState::Paused => UploadStatus::Paused,
            BatchState::Complete => UploadStatus::Complete,
            BatchState::Error { .. } => UploadStatus::Error,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BatchState::Error { message } => Some(message),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BatchState::Uploading | BatchState::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Complete | BatchState::Error { .. })
    }
}

#[derive(Debug, Clone)]
pub enum BatchEvent {
    Start,
    Pause,
    Resume,
    /// Every task was attempted; reconciliation begins
    Reconcile,
    Finish,
    Fail { message: String },
    Cancel,
}

/// The three reporting channels of a batch
pub trait UploadObserver: Send + Sync {
    fn on_progress(&self, progress: &AggregateProgress);

    /// Called once the batch is reconciled, with every path stored so far
    fn on_complete(&self, _uploaded_paths: &[String]) {}

    /// Batch-level failures only; per-file failures show up in the task list
    fn on_error(&self, _error: &UploaderError) {}
}

/// Observer that drops everything
pub struct NoopObserver;

impl UploadObserver for NoopObserver {
    fn on_progress(&self, _progress: &AggregateProgress) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Progress(AggregateProgress),
    Completed { uploaded_paths: Vec<String> },
    Error { message: String, unreconciled: bool },
}

/// Forwards every callback into an unbounded channel
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UploadObserver for ChannelObserver {
    fn on_progress(&self, progress: &AggregateProgress) {
        let _ = self.tx.send(UploadEvent::Progress(progress.clone()));
    }

    fn on_complete(&self, uploaded_paths: &[String]) {
        let _ = self.tx.send(UploadEvent::Completed {
            uploaded_paths: uploaded_paths.to_vec(),
        });
    }

    fn on_error(&self, error: &UploaderError) {
        let _ = self.tx.send(UploadEvent::Error {
            message: error.to_string(),
            unreconciled: error.is_unreconciled(),
        });
    }
}
