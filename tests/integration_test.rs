use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use dashmap::DashMap;
use guestcap::api::create_api_server;
use guestcap::progress::{LocalFile, UploadStatus};
use guestcap::protocol::{
    CreateSessionRequest, FileDescriptor, HttpSessionClient, ProtocolError, SessionApi,
};
use guestcap::session::{EventRecord, GuestRecord, ServiceSettings, UploadService, UploadStore};
use guestcap::storage::PresignedStorage;
use guestcap::transfer::{HttpPutTransport, RetryPolicy};
use guestcap::uploader::{
    BatchState, ChannelObserver, ChunkedUploader, UploadEvent, UploaderConfig, UploaderError,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "integration-secret";
const BUCKET: &str = "event-photos";
const MB: u64 = 1024 * 1024;

/// Object storage double: accepts PUTs only with a valid signature
#[derive(Clone)]
struct StorageDouble {
    signer: Arc<PresignedStorage>,
    objects: Arc<DashMap<String, Bytes>>,
}

async fn storage_handler(
    State(storage): State<StorageDouble>,
    method: Method,
    Path(rest): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    if method == Method::PUT {
        let Some(bucket_path) = rest.strip_prefix("object/upload/sign/") else {
            return StatusCode::NOT_FOUND.into_response();
        };
        let expires = params
            .get("expires")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or_default();
        let signature = params.get("signature").cloned().unwrap_or_default();
        let now = chrono::Utc::now().timestamp();

        return match storage.signer.verify(bucket_path, expires, &signature, now) {
            Ok(()) => {
                storage.objects.insert(bucket_path.to_string(), body);
                StatusCode::OK.into_response()
            }
            Err(_) => StatusCode::FORBIDDEN.into_response(),
        };
    }

    // GET and HEAD of a stored object
    match rest
        .strip_prefix("object/")
        .and_then(|bucket_path| storage.objects.get(bucket_path))
    {
        Some(object) => object.value().clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    api_url: String,
    store: Arc<UploadStore>,
    objects: Arc<DashMap<String, Bytes>>,
    event: EventRecord,
    guest: GuestRecord,
}

async fn start_harness(limit_mb: Option<i64>) -> Harness {
    let objects = Arc::new(DashMap::new());
    let storage_router = {
        let double = StorageDouble {
            signer: Arc::new(PresignedStorage::new("http://unused", BUCKET, SECRET)),
            objects: objects.clone(),
        };
        Router::new()
            .route("/storage/v1/*rest", any(storage_handler))
            .layer(DefaultBodyLimit::disable())
            .with_state(double)
    };
    let storage_addr = serve(storage_router).await;

    let store = Arc::new(UploadStore::new_in_memory().await.unwrap());
    let event = store.create_event("Summer Wedding", limit_mb).await.unwrap();
    let guest = store.create_guest(&event.id, "Ana").await.unwrap();

    let storage = Arc::new(PresignedStorage::new(
        format!("http://{storage_addr}"),
        BUCKET,
        SECRET,
    ));
    let service = Arc::new(UploadService::new(
        store.clone(),
        storage,
        ServiceSettings::default(),
    ));
    let api_addr = serve(create_api_server(service)).await;

    Harness {
        api_url: format!("http://{api_addr}"),
        store,
        objects,
        event,
        guest,
    }
}

fn uploader_for(
    harness: &Harness,
) -> (
    ChunkedUploader<HttpSessionClient, HttpPutTransport>,
    tokio::sync::mpsc::UnboundedReceiver<UploadEvent>,
) {
    let (observer, events) = ChannelObserver::new();
    let config = UploaderConfig::new(
        harness.event.id.clone(),
        harness.guest.id.clone(),
        harness.guest.guest_token.clone(),
    )
    .with_retry(RetryPolicy::new(1, Duration::from_millis(10)));

    let uploader = ChunkedUploader::new(
        HttpSessionClient::new(harness.api_url.clone()),
        HttpPutTransport::new(),
        config,
        Arc::new(observer),
    );
    (uploader, events)
}

/// Three 2 MB photos go through the real HTTP stack end to end
#[tokio::test]
async fn test_batch_upload_happy_path() {
    let harness = start_harness(None).await;
    let (uploader, mut events) = uploader_for(&harness);

    uploader.add_files(
        (0..3)
            .map(|i| LocalFile::new(format!("IMG_{i}.jpg"), "image/jpeg", vec![i as u8; 2 * MB as usize]))
            .collect(),
    );
    uploader.start().await.unwrap();

    assert_eq!(uploader.state(), BatchState::Complete);
    let progress = uploader.progress();
    assert_eq!(progress.status, UploadStatus::Complete);
    assert_eq!(progress.completed_files, 3);
    assert_eq!(progress.overall_progress, 100);
    assert_eq!(progress.bytes_uploaded, 6 * MB);

    let mut last_overall = 0;
    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        match event {
            UploadEvent::Progress(p) => {
                assert!(p.overall_progress >= last_overall, "overall progress went back");
                last_overall = p.overall_progress;
            }
            UploadEvent::Completed { uploaded_paths } => completed = Some(uploaded_paths),
            UploadEvent::Error { message, .. } => panic!("unexpected error: {message}"),
        }
    }
    let uploaded_paths = completed.expect("completion was reported");
    assert_eq!(uploaded_paths.len(), 3);

    let prefix = format!("events/{}/originals/", harness.event.id);
    assert!(uploaded_paths.iter().all(|p| p.starts_with(&prefix) && p.ends_with(".jpg")));
    assert_eq!(harness.objects.len(), 3);

    let photos = harness.store.list_photos(&harness.event.id).await.unwrap();
    assert_eq!(photos.len(), 3);

    let event = harness.store.get_event(&harness.event.id).await.unwrap().unwrap();
    assert_eq!(event.storage_used_bytes, 6 * MB);

    let sessions = harness.store.list_sessions(&harness.event.id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].status.is_completed());
    assert_eq!(sessions[0].uploaded_files, 3);
}

/// An inactive event rejects the session; nothing is transferred
#[tokio::test]
async fn test_inactive_event_is_rejected() {
    let harness = start_harness(None).await;
    harness
        .store
        .set_event_active(&harness.event.id, false)
        .await
        .unwrap();
    let (uploader, _events) = uploader_for(&harness);
    uploader.add_files(vec![LocalFile::new("a.jpg", "image/jpeg", vec![1u8; 1024])]);

    let err = uploader.start().await.unwrap_err();

    match err {
        UploaderError::SessionCreate(ProtocolError::Rejected { status, message }) => {
            assert_eq!(status, 403);
            assert_eq!(message, "Event is not active");
        }
        other => panic!("Expected a 403 rejection, got {other:?}"),
    }
    assert!(matches!(uploader.state(), BatchState::Error { .. }));
    assert!(harness.objects.is_empty());
}

/// A request that would cross the event limit gets the structured quota error
#[tokio::test]
async fn test_quota_exceeded_is_structured() {
    let harness = start_harness(Some(10240)).await;
    harness
        .store
        .increment_storage(&harness.event.id, 9900 * MB)
        .await
        .unwrap();

    let client = HttpSessionClient::new(harness.api_url.clone());
    let err = client
        .create_session(&CreateSessionRequest {
            event_id: harness.event.id.clone(),
            guest_id: harness.guest.id.clone(),
            guest_token: harness.guest.guest_token.clone(),
            files: vec![FileDescriptor {
                id: "big".into(),
                name: "video.mov".into(),
                size: 200 * MB,
                media_type: "video/quicktime".into(),
            }],
        })
        .await
        .unwrap_err();

    match err {
        ProtocolError::QuotaExceeded {
            used,
            limit,
            requested,
        } => {
            assert_eq!(used, 9900.0);
            assert_eq!(limit, 10240.0);
            assert_eq!(requested, 200.0);
        }
        other => panic!("Expected QuotaExceeded, got {other:?}"),
    }
    assert!(harness
        .store
        .list_sessions(&harness.event.id)
        .await
        .unwrap()
        .is_empty());
}
