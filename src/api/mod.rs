mod error;
mod rest;
mod types;

pub use error::{ApiError, ApiResult};
pub use rest::{RestApi, CREATE_GUEST_PATH, VALIDATE_GUEST_PATH};
pub use types::ApiJson;

use crate::session::UploadService;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Session service router with CORS and request tracing
pub fn create_api_server(service: Arc<UploadService>) -> Router {
    let rest_api = RestApi::new(service);

    // Browsers call the session endpoints cross-origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    rest_api
        .router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
