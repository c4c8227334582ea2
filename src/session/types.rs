use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionStatus::Completed)
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One batch submission by one guest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: String,
    pub event_id: String,
    pub guest_id: String,
    pub total_files: u32,
    pub uploaded_files: u32,
    pub status: SessionStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UploadSession {
    /// Every destination minted for this session lives under this prefix
    pub fn path_prefix(&self) -> String {
        format!("events/{}/originals/{}/", self.event_id, self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    /// `None` means the deployment default applies
    pub storage_limit_mb: Option<i64>,
    pub storage_used_bytes: u64,
    pub created_at: i64,
}

impl EventRecord {
    pub fn storage_used_mb(&self) -> f64 {
        self.storage_used_bytes as f64 / BYTES_PER_MB
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuestRecord {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub guest_token: String,
    pub created_at: i64,
}

/// A reconciled upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRecord {
    pub id: String,
    pub event_id: String,
    pub guest_id: String,
    pub upload_session_id: String,
    pub storage_path: String,
    pub url: String,
    pub original_filename: String,
    /// Derivative generation state; always starts as `pending`
    pub status: String,
    pub created_at: i64,
}

/// Result of recording one path at completion
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPhoto {
    pub id: String,
    pub storage_path: String,
    /// False when the path was already recorded for this session
    pub created: bool,
}

/// What one completion wrote
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub recorded: Vec<RecordedPhoto>,
    /// Bytes added to the event by this call
    pub stored_bytes: u64,
    /// Event usage after the increment, when there was one
    pub storage_used_bytes: Option<u64>,
    /// False when the session had already been completed
    pub newly_completed: bool,
}

/// Body of `POST /guest/create`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateGuestRequest {
    pub name: String,
    pub event_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateGuestResponse {
    pub guest: GuestRecord,
    pub event: EventSummary,
}

/// Body of `POST /guest/validate`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidateGuestRequest {
    pub guest_token: String,
    pub guest_id: String,
    pub event_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidateGuestResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest: Option<GuestRecord>,
}
