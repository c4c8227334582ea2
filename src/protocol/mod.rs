mod client;
mod error;
mod types;

pub use client::{
    error_from_response, HttpSessionClient, SessionApi, COMPLETE_SESSION_PATH, CREATE_SESSION_PATH,
};
pub use error::{ProtocolError, ProtocolResult};
pub use types::{
    CompleteSessionRequest, CompleteSessionResponse, CreateSessionRequest, CreateSessionResponse,
    ErrorBody, FileDescriptor, SignedDestination, STORAGE_LIMIT_EXCEEDED,
};
