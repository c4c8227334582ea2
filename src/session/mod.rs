pub mod error;
pub mod service;
pub mod store;
pub mod types;

pub use error::{ServiceError, ServiceResult, SessionError, SessionResult};
pub use service::{ServiceSettings, UploadService, DEFAULT_STORAGE_LIMIT_MB, DEFAULT_UPLOAD_URL_TTL};
pub use store::UploadStore;
pub use types::{
    CreateGuestRequest, CreateGuestResponse, EventRecord, EventSummary, GuestRecord, PhotoRecord,
    Reconciliation, RecordedPhoto, SessionStatus, UploadSession, ValidateGuestRequest, ValidateGuestResponse,
    BYTES_PER_MB,
};
