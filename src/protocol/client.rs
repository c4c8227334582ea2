use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::protocol::types::{
    CompleteSessionRequest, CompleteSessionResponse, CreateSessionRequest, CreateSessionResponse,
    ErrorBody,
};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub const CREATE_SESSION_PATH: &str = "/upload/create-session";
pub const COMPLETE_SESSION_PATH: &str = "/upload/complete";

/// The two calls the uploader makes against the session service
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Request one signed destination per declared file
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> ProtocolResult<CreateSessionResponse>;

    /// Report which destination paths actually received their bytes
    async fn complete_session(
        &self,
        request: &CompleteSessionRequest,
    ) -> ProtocolResult<CompleteSessionResponse>;
}

/// `SessionApi` over HTTP/JSON
#[derive(Clone)]
pub struct HttpSessionClient {
    client: Client,
    base_url: String,
}

impl HttpSessionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req, fallback: &str) -> ProtocolResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| ProtocolError::InvalidResponse(e.to_string()));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.unwrap_or_default();

        let err = error_from_response(status, retry_after.as_deref(), &body, fallback);
        tracing::debug!("{} rejected with {}: {}", path, status, err);
        Err(err)
    }
}

#[async_trait]
impl SessionApi for HttpSessionClient {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> ProtocolResult<CreateSessionResponse> {
        self.post(
            CREATE_SESSION_PATH,
            request,
            "Failed to create upload session",
        )
        .await
    }

    async fn complete_session(
        &self,
        request: &CompleteSessionRequest,
    ) -> ProtocolResult<CompleteSessionResponse> {
        self.post(
            COMPLETE_SESSION_PATH,
            request,
            "Failed to complete upload session",
        )
        .await
    }
}

/// Turn a non-success response into a typed error, keeping the server message
pub fn error_from_response(
    status: StatusCode,
    retry_after: Option<&str>,
    body: &[u8],
    fallback: &str,
) -> ProtocolError {
    let parsed: Option<ErrorBody> = serde_json::from_slice(body).ok();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let secs = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or_else(|| parsed.as_ref().and_then(|b| b.retry_after))
            .unwrap_or(0);
        return ProtocolError::RateLimited(Duration::from_secs(secs));
    }

    match parsed {
        Some(body) if body.is_quota_exceeded() => ProtocolError::QuotaExceeded {
            used: body.used.unwrap_or_default(),
            limit: body.limit.unwrap_or_default(),
            requested: body.requested.unwrap_or_default(),
        },
        Some(body) if !body.error.is_empty() => ProtocolError::Rejected {
            status: status.as_u16(),
            message: body.error,
        },
        _ => ProtocolError::Rejected {
            status: status.as_u16(),
            message: fallback.to_string(),
        },
    }
}
