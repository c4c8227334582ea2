use crate::api::error::ApiResult;
use crate::api::types::ApiJson;
use crate::metrics::metrics_route;
use crate::protocol::{
    CompleteSessionRequest, CompleteSessionResponse, CreateSessionRequest, CreateSessionResponse,
    COMPLETE_SESSION_PATH, CREATE_SESSION_PATH,
};
use crate::session::{
    CreateGuestRequest, CreateGuestResponse, UploadService, ValidateGuestRequest,
    ValidateGuestResponse,
};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

pub const CREATE_GUEST_PATH: &str = "/guest/create";
pub const VALIDATE_GUEST_PATH: &str = "/guest/validate";

pub struct RestApi {
    service: Arc<UploadService>,
}

impl RestApi {
    pub fn new(service: Arc<UploadService>) -> Self {
        Self { service }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route(CREATE_SESSION_PATH, post(create_session))
            .route(COMPLETE_SESSION_PATH, post(complete_session))
            .route(CREATE_GUEST_PATH, post(create_guest))
            .route(VALIDATE_GUEST_PATH, post(validate_guest))
            .with_state(self.service.clone())
            .route("/metrics", metrics_route())
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn create_session(
    State(service): State<Arc<UploadService>>,
    ApiJson(req): ApiJson<CreateSessionRequest>,
) -> ApiResult<Json<CreateSessionResponse>> {
    Ok(Json(service.create_session(&req).await?))
}

async fn complete_session(
    State(service): State<Arc<UploadService>>,
    ApiJson(req): ApiJson<CompleteSessionRequest>,
) -> ApiResult<Json<CompleteSessionResponse>> {
    Ok(Json(service.complete_session(&req).await?))
}

async fn create_guest(
    State(service): State<Arc<UploadService>>,
    ApiJson(req): ApiJson<CreateGuestRequest>,
) -> ApiResult<Json<CreateGuestResponse>> {
    Ok(Json(service.create_guest(&req).await?))
}

async fn validate_guest(
    State(service): State<Arc<UploadService>>,
    ApiJson(req): ApiJson<ValidateGuestRequest>,
) -> ApiResult<Json<ValidateGuestResponse>> {
    Ok(Json(service.validate_guest(&req).await?))
}
