use serde::{Deserialize, Serialize};

/// Client-declared description of one file in a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub media_type: String,
}

/// Body of `POST /upload/create-session`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSessionRequest {
    pub event_id: String,
    pub guest_id: String,
    pub guest_token: String,
    pub files: Vec<FileDescriptor>,
}

impl CreateSessionRequest {
    /// Sum of the declared sizes; `None` if it does not fit in a `u64`
    pub fn total_bytes(&self) -> Option<u64> {
        self.files
            .iter()
            .try_fold(0u64, |total, f| total.checked_add(f.size))
    }
}

/// A time-limited write destination minted for one file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignedDestination {
    pub file_id: String,
    pub url: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub signed_urls: Vec<SignedDestination>,
}

impl CreateSessionResponse {
    pub fn destination_for(&self, file_id: &str) -> Option<&SignedDestination> {
        self.signed_urls.iter().find(|d| d.file_id == file_id)
    }
}

/// Body of `POST /upload/complete`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CompleteSessionRequest {
    pub session_id: String,
    pub guest_token: String,
    pub uploaded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSessionResponse {
    pub success: bool,
    pub photos_created: usize,
    pub photo_ids: Vec<String>,
}

/// Error body shared by every endpoint. Quota and rate-limit rejections fill
/// the optional fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Marker carried in `ErrorBody::error` for quota rejections
pub const STORAGE_LIMIT_EXCEEDED: &str = "STORAGE_LIMIT_EXCEEDED";

impl ErrorBody {
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }

    pub fn quota_exceeded(used: f64, limit: f64, requested: f64) -> Self {
        Self {
            error: STORAGE_LIMIT_EXCEEDED.to_string(),
            used: Some(used),
            limit: Some(limit),
            requested: Some(requested),
            retry_after: None,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        self.error == STORAGE_LIMIT_EXCEEDED
    }
}
