use crate::metrics::{
    record_session_completed, record_session_created, record_session_rejected, set_storage_used,
};
use crate::protocol::{
    CompleteSessionRequest, CompleteSessionResponse, CreateSessionRequest, CreateSessionResponse,
    FileDescriptor, SignedDestination,
};
use crate::ratelimit::{check_rate_limit, GovernorRateLimiter, RateLimitPolicy, RateLimiter};
use crate::session::error::{ServiceError, ServiceResult};
use crate::session::store::UploadStore;
use crate::session::types::{
    CreateGuestRequest, CreateGuestResponse, EventSummary, PhotoRecord, UploadSession,
    ValidateGuestRequest, ValidateGuestResponse, BYTES_PER_MB,
};
use crate::storage::ObjectStorage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Per-event limit used when the event has none
pub const DEFAULT_STORAGE_LIMIT_MB: f64 = 10240.0;

/// Lifetime of a minted upload URL
pub const DEFAULT_UPLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub default_limit_mb: f64,
    pub upload_url_ttl: Duration,
    pub upload_policy: RateLimitPolicy,
    pub api_policy: RateLimitPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_limit_mb: DEFAULT_STORAGE_LIMIT_MB,
            upload_url_ttl: DEFAULT_UPLOAD_URL_TTL,
            upload_policy: RateLimitPolicy::uploads(),
            api_policy: RateLimitPolicy::api(),
        }
    }
}

/// The trust boundary: guest checks, quota, destination minting and
/// reconciliation of finished uploads.
pub struct UploadService {
    store: Arc<UploadStore>,
    storage: Arc<dyn ObjectStorage>,
    upload_limiter: Arc<dyn RateLimiter>,
    api_limiter: Arc<dyn RateLimiter>,
    settings: ServiceSettings,
}

impl UploadService {
    pub fn new(
        store: Arc<UploadStore>,
        storage: Arc<dyn ObjectStorage>,
        settings: ServiceSettings,
    ) -> Self {
        let upload_limiter = Arc::new(GovernorRateLimiter::new(settings.upload_policy.clone()));
        let api_limiter = Arc::new(GovernorRateLimiter::new(settings.api_policy.clone()));

        Self {
            store,
            storage,
            upload_limiter,
            api_limiter,
            settings,
        }
    }

    pub fn with_upload_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.upload_limiter = limiter;
        self
    }

    pub fn with_api_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.api_limiter = limiter;
        self
    }

    pub fn store(&self) -> &Arc<UploadStore> {
        &self.store
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Validate the guest and quota, persist a session and mint one upload
    /// URL per declared file.
    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> ServiceResult<CreateSessionResponse> {
        if request.event_id.is_empty()
            || request.guest_id.is_empty()
            || request.guest_token.is_empty()
            || request.files.is_empty()
        {
            return Err(ServiceError::InvalidRequest("Missing required fields".into()));
        }
        if let Some(file) = request.files.iter().find(|f| !is_valid_file_id(&f.id)) {
            return Err(ServiceError::InvalidRequest(format!(
                "Invalid file id: {:?}",
                file.id
            )));
        }
        let mut seen = HashSet::new();
        if !request.files.iter().all(|f| seen.insert(f.id.as_str())) {
            return Err(ServiceError::InvalidRequest("Duplicate file ids".into()));
        }
        let requested_bytes = request
            .total_bytes()
            .ok_or_else(|| ServiceError::InvalidRequest("Declared file sizes are too large".into()))?;

        let cost = u32::try_from(request.files.len()).unwrap_or(u32::MAX);
        let decision = check_rate_limit(self.upload_limiter.as_ref(), &request.guest_id, cost).await;
        if !decision.success {
            record_session_rejected("rate_limited");
            return Err(ServiceError::RateLimited {
                retry_after: decision.reset_after,
            });
        }

        let guest = self
            .store
            .find_guest(&request.guest_id, &request.guest_token, &request.event_id)
            .await?;
        if guest.is_none() {
            record_session_rejected("invalid_guest");
            return Err(ServiceError::Forbidden("Invalid guest token".into()));
        }

        let event = self
            .store
            .get_event(&request.event_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Event not found".into()))?;
        if !event.is_active {
            record_session_rejected("inactive_event");
            return Err(ServiceError::Forbidden("Event is not active".into()));
        }

        // Reads usage committed by earlier completions only; concurrent
        // sessions of the same event are not reserved against each other.
        let used = event.storage_used_mb();
        // An unset or zero event limit falls back to the default
        let limit = event
            .storage_limit_mb
            .filter(|mb| *mb > 0)
            .map(|mb| mb as f64)
            .unwrap_or(self.settings.default_limit_mb);
        let requested = requested_bytes as f64 / BYTES_PER_MB;
        if used + requested > limit {
            record_session_rejected("quota");
            info!(
                "Event {} over quota: {:.1} + {:.1} > {:.1} MB",
                event.id, used, requested, limit
            );
            return Err(ServiceError::QuotaExceeded {
                used,
                limit,
                requested,
            });
        }

        let session = self
            .store
            .create_session(&event.id, &request.guest_id, cost)
            .await?;

        let mut signed_urls = Vec::with_capacity(request.files.len());
        for file in &request.files {
            let path = destination_path(&session, file);
            match self
                .storage
                .sign_upload(&path, self.settings.upload_url_ttl)
                .await
            {
                Ok(url) => signed_urls.push(SignedDestination {
                    file_id: file.id.clone(),
                    url,
                    path,
                }),
                Err(e) => warn!("Failed to sign upload URL for {}: {}", path, e),
            }
        }

        if signed_urls.is_empty() {
            error!("No upload URL could be signed for session {}", session.id);
            if let Err(e) = self.store.delete_session(&session.id).await {
                warn!("Failed to remove unusable session {}: {}", session.id, e);
            }
            return Err(ServiceError::Internal("Failed to create upload URLs".into()));
        }

        record_session_created(request.files.len(), requested_bytes);
        info!(
            "Session {} created for guest {}: {}/{} destinations",
            session.id,
            request.guest_id,
            signed_urls.len(),
            request.files.len()
        );

        Ok(CreateSessionResponse {
            session_id: session.id,
            signed_urls,
        })
    }

    /// Record the uploaded paths of a session and account their bytes.
    ///
    /// Paths already recorded for the session are not recorded or counted
    /// again, so a repeated call is harmless.
    pub async fn complete_session(
        &self,
        request: &CompleteSessionRequest,
    ) -> ServiceResult<CompleteSessionResponse> {
        if request.session_id.is_empty() || request.guest_token.is_empty() {
            return Err(ServiceError::InvalidRequest("Missing required fields".into()));
        }

        let session = self
            .store
            .load_session(&request.session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Session not found".into()))?;

        let owner = self.store.get_guest(&session.guest_id).await?;
        if owner.map(|g| g.guest_token) != Some(request.guest_token.clone()) {
            return Err(ServiceError::Forbidden("Invalid guest token".into()));
        }

        let prefix = session.path_prefix();
        if let Some(path) = request
            .uploaded_paths
            .iter()
            .find(|p| !p.starts_with(&prefix) || p.len() == prefix.len() || p.contains(".."))
        {
            return Err(ServiceError::InvalidRequest(format!(
                "Path does not belong to this session: {path}"
            )));
        }

        let mut seen = HashSet::new();
        let now = chrono::Utc::now().timestamp();
        let photos: Vec<PhotoRecord> = request
            .uploaded_paths
            .iter()
            .filter(|p| seen.insert(p.as_str()))
            .map(|path| PhotoRecord {
                id: uuid::Uuid::new_v4().to_string(),
                event_id: session.event_id.clone(),
                guest_id: session.guest_id.clone(),
                upload_session_id: session.id.clone(),
                storage_path: path.clone(),
                url: self.storage.public_url(path),
                original_filename: path.rsplit('/').next().unwrap_or(path).to_string(),
                status: "pending".to_string(),
                created_at: now,
            })
            .collect();

        // Size new objects before writing anything so the writes below
        // commit or roll back together.
        let already = self.store.recorded_paths(&session.id).await?;
        let mut sizes = HashMap::new();
        for photo in photos.iter().filter(|p| !already.contains(&p.storage_path)) {
            match self.storage.object_size(&photo.storage_path).await {
                Ok(Some(size)) => {
                    sizes.insert(photo.storage_path.clone(), size);
                }
                Ok(None) => warn!("Reported upload {} is not in storage", photo.storage_path),
                Err(e) => warn!("Could not size {}: {}", photo.storage_path, e),
            }
        }

        let done = self.store.reconcile_session(&session, &photos, &sizes).await?;
        if let Some(total) = done.storage_used_bytes {
            set_storage_used(&session.event_id, total);
        }
        if !done.newly_completed {
            debug!("Session {} was already completed", session.id);
        }

        let created = done.recorded.iter().filter(|r| r.created).count();
        let stored_bytes = done.stored_bytes;
        record_session_completed(created, stored_bytes);
        info!(
            "Session {} completed: {} photos created, {} bytes",
            session.id, created, stored_bytes
        );

        Ok(CompleteSessionResponse {
            success: true,
            photos_created: created,
            photo_ids: done.recorded.into_iter().map(|r| r.id).collect(),
        })
    }

    /// Register a guest for an active event
    pub async fn create_guest(
        &self,
        request: &CreateGuestRequest,
    ) -> ServiceResult<CreateGuestResponse> {
        let name = request.name.trim();
        if name.is_empty() || request.event_id.is_empty() {
            return Err(ServiceError::InvalidRequest("Missing required fields".into()));
        }

        let decision = check_rate_limit(self.api_limiter.as_ref(), &request.event_id, 1).await;
        if !decision.success {
            return Err(ServiceError::RateLimited {
                retry_after: decision.reset_after,
            });
        }

        let event = self
            .store
            .get_event(&request.event_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Event not found".into()))?;
        if !event.is_active {
            return Err(ServiceError::Forbidden("Event is not active".into()));
        }

        let guest = self.store.create_guest(&event.id, name).await?;
        info!("Guest {} joined event {}", guest.id, event.id);

        Ok(CreateGuestResponse {
            guest,
            event: EventSummary {
                id: event.id,
                name: event.name,
            },
        })
    }

    pub async fn validate_guest(
        &self,
        request: &ValidateGuestRequest,
    ) -> ServiceResult<ValidateGuestResponse> {
        if request.guest_token.is_empty() || request.guest_id.is_empty() || request.event_id.is_empty()
        {
            return Err(ServiceError::InvalidRequest("Missing required fields".into()));
        }

        let decision = check_rate_limit(self.api_limiter.as_ref(), &request.event_id, 1).await;
        if !decision.success {
            return Err(ServiceError::RateLimited {
                retry_after: decision.reset_after,
            });
        }

        let guest = self
            .store
            .find_guest(&request.guest_id, &request.guest_token, &request.event_id)
            .await?;

        Ok(ValidateGuestResponse {
            valid: guest.is_some(),
            guest,
        })
    }
}

fn is_valid_file_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `events/{event}/originals/{session}/{file id}.{ext}`
fn destination_path(session: &UploadSession, file: &FileDescriptor) -> String {
    format!("{}{}.{}", session.path_prefix(), file.id, extension(&file.name))
}

/// Lower-cased alphanumeric extension of `name`, `jpg` when there is none
fn extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string())
}
