use crate::metrics::FileTransferMetrics;
use crate::progress::{AggregateProgress, LocalFile, TaskDescriptor, TaskStatus, UploadTask};
use crate::protocol::{CompleteSessionRequest, CreateSessionRequest, FileDescriptor, SessionApi};
use crate::transfer::{PutTransport, TransferEngine};
use crate::uploader::error::{UploaderError, UploaderResult};
use crate::uploader::state_machine::BatchStateMachine;
use crate::uploader::types::{BatchEvent, BatchState, UploadObserver, UploaderConfig};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Uploads a queue of files one at a time through a server-issued session.
///
/// Each pass (`start` or `resume`) requests one session covering every task
/// that is not yet complete, transfers the files in queue order, then reports
/// the paths that landed back to the server exactly once. A file that fails
/// after its retries is marked `error` and the pass moves on.
///
/// Control methods take `&self`; share the uploader through an `Arc` to pause
/// or cancel from another task while `start` is running.
pub struct ChunkedUploader<A, T> {
    api: A,
    engine: TransferEngine<T>,
    config: UploaderConfig,
    observer: Arc<dyn UploadObserver>,
    tasks: Mutex<Vec<UploadTask>>,
    /// Destination paths stored since the queue was created, across sessions
    uploaded_paths: Mutex<Vec<String>>,
    state: BatchStateMachine,
    /// Aborts the in-flight transfer of the current pass
    abort: Mutex<CancellationToken>,
    /// Held for the whole duration of a pass
    run_lock: tokio::sync::Mutex<()>,
}

impl<A: SessionApi, T: PutTransport> ChunkedUploader<A, T> {
    pub fn new(
        api: A,
        transport: T,
        config: UploaderConfig,
        observer: Arc<dyn UploadObserver>,
    ) -> Self {
        let engine = TransferEngine::new(transport, config.retry);

        Self {
            api,
            engine,
            config,
            observer,
            tasks: Mutex::new(Vec::new()),
            uploaded_paths: Mutex::new(Vec::new()),
            state: BatchStateMachine::new(),
            abort: Mutex::new(CancellationToken::new()),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn transport(&self) -> &T {
        self.engine.transport()
    }

    /// Queue files as pending tasks
    pub fn add_files(&self, files: Vec<LocalFile>) -> Vec<TaskDescriptor> {
        let new_tasks: Vec<UploadTask> = files.into_iter().map(UploadTask::new).collect();
        let descriptors = new_tasks.iter().map(UploadTask::descriptor).collect();

        self.tasks.lock().extend(new_tasks);
        descriptors
    }

    /// Drop a pending or failed task from the queue
    pub fn remove_file(&self, id: &str) -> UploaderResult<TaskDescriptor> {
        let mut tasks = self.tasks.lock();
        let index = tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| UploaderError::TaskNotFound(id.to_string()))?;

        let status = tasks[index].status;
        if !status.is_removable() {
            return Err(UploaderError::TaskNotRemovable {
                id: id.to_string(),
                status,
            });
        }

        Ok(tasks.remove(index).descriptor())
    }

    pub fn files(&self) -> Vec<TaskDescriptor> {
        self.tasks.lock().iter().map(UploadTask::descriptor).collect()
    }

    pub fn total_size(&self) -> u64 {
        self.tasks.lock().iter().map(|t| t.file.size()).sum()
    }

    pub fn uploaded_paths(&self) -> Vec<String> {
        self.uploaded_paths.lock().clone()
    }

    pub fn state(&self) -> BatchState {
        self.state.current_state()
    }

    pub fn progress(&self) -> AggregateProgress {
        self.snapshot(&self.state.current_state())
    }

    /// Upload every task that is not complete yet
    pub async fn start(&self) -> UploaderResult<()> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| UploaderError::AlreadyRunning)?;

        if self.tasks.lock().is_empty() {
            let err = UploaderError::EmptyQueue;
            self.observer.on_error(&err);
            return Err(err);
        }

        self.state.transition(BatchEvent::Start)?;
        self.run_guarded().await
    }

    /// Abort the in-flight transfer. The running pass still reconciles the
    /// files it finished, then settles in `Paused`.
    pub fn pause(&self) -> UploaderResult<()> {
        self.state.transition(BatchEvent::Pause)?;
        self.abort.lock().cancel();
        info!("Upload paused");
        Ok(())
    }

    /// Continue a paused batch with a new session for the remaining tasks.
    ///
    /// An aborted transfer restarts from zero. With nothing left to send this
    /// reports `Complete` straight away.
    pub async fn resume(&self) -> UploaderResult<()> {
        let _guard = self.run_lock.lock().await;

        let event = match self.state.current_state() {
            BatchState::Paused => BatchEvent::Resume,
            _ => BatchEvent::Start,
        };
        self.state.transition(event)?;

        for task in self.tasks.lock().iter_mut() {
            task.reset();
        }

        info!("Resuming upload");
        self.run_guarded().await
    }

    /// Abort everything and empty the queue. Once this returns no request is
    /// in flight and no further callbacks fire.
    pub async fn cancel(&self) {
        let _ = self.state.transition(BatchEvent::Cancel);
        self.abort.lock().cancel();

        // Wait for the running pass to observe the abort
        let _guard = self.run_lock.lock().await;

        self.tasks.lock().clear();
        self.uploaded_paths.lock().clear();
        info!("Upload cancelled");
    }

    /// `run`, with a panic inside a collaborator reported as `Unhandled`
    async fn run_guarded(&self) -> UploaderResult<()> {
        match AssertUnwindSafe(self.run()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "upload pass panicked".to_string());
                error!("Upload pass panicked: {}", message);
                Err(self.fail(UploaderError::Unhandled(message)))
            }
        }
    }

    async fn run(&self) -> UploaderResult<()> {
        let abort = CancellationToken::new();
        *self.abort.lock() = abort.clone();

        let pending: Vec<(String, LocalFile)> = self
            .tasks
            .lock()
            .iter()
            .filter(|t| !t.status.is_complete())
            .map(|t| (t.id.clone(), t.file.clone()))
            .collect();

        if pending.is_empty() {
            debug!("Nothing left to upload");
            return self.finish();
        }

        let request = CreateSessionRequest {
            event_id: self.config.event_id.clone(),
            guest_id: self.config.guest_id.clone(),
            guest_token: self.config.guest_token.clone(),
            files: pending
                .iter()
                .map(|(id, file)| FileDescriptor {
                    id: id.clone(),
                    name: file.name.clone(),
                    size: file.size(),
                    media_type: file.content_type().to_string(),
                })
                .collect(),
        };
        self.emit();

        let session = match self.api.create_session(&request).await {
            Ok(session) => session,
            Err(e) if self.is_cancelled() => {
                debug!("Session creation finished after cancel: {}", e);
                return Ok(());
            }
            Err(e) => return Err(self.fail(UploaderError::SessionCreate(e))),
        };
        info!(
            "Upload session {} created for {} files",
            session.session_id,
            pending.len()
        );

        let mut session_paths = Vec::new();
        for (id, file) in &pending {
            if self.state.current_state() != BatchState::Uploading {
                break;
            }

            let Some(destination) = session.destination_for(id) else {
                warn!("No upload destination issued for {}", file.name);
                self.update_task(id, |t| t.mark_failed("No upload destination issued"));
                self.emit();
                continue;
            };

            // Removed from the queue after the session was requested
            if !self.update_task(id, UploadTask::mark_uploading) {
                continue;
            }
            self.emit();

            let on_progress = |pct: u8| {
                self.update_task(id, |t| t.advance(pct));
                self.emit();
            };

            let timer = FileTransferMetrics::start(file.size());
            match self
                .engine
                .transfer(file, &destination.url, &on_progress, &abort)
                .await
            {
                Ok(report) => {
                    timer.complete();
                    debug!("{} uploaded in {} attempt(s)", file.name, report.attempts);
                    self.update_task(id, UploadTask::mark_complete);
                    session_paths.push(destination.path.clone());
                    self.uploaded_paths.lock().push(destination.path.clone());
                }
                Err(e) if e.is_aborted() => {
                    debug!("Transfer of {} aborted", file.name);
                    break;
                }
                Err(e) => {
                    timer.fail("transfer");
                    warn!("Failed to upload {}: {}", file.name, e);
                    self.update_task(id, |t| t.mark_failed(e.to_string()));
                }
            }
            self.emit();
        }

        if self.is_cancelled() {
            return Ok(());
        }

        // Fails only when a pause landed; the pass then reconciles and stays paused
        let reconciling = self.state.transition(BatchEvent::Reconcile).is_ok();
        self.emit();

        let complete = CompleteSessionRequest {
            session_id: session.session_id.clone(),
            guest_token: self.config.guest_token.clone(),
            uploaded_paths: session_paths,
        };
        let result = self.api.complete_session(&complete).await;

        if self.is_cancelled() {
            return Ok(());
        }

        match result {
            Ok(response) => {
                info!(
                    "Session {} reconciled: {} photos created",
                    session.session_id, response.photos_created
                );
                if reconciling {
                    self.finish()
                } else {
                    self.emit();
                    Ok(())
                }
            }
            Err(e) => {
                error!(
                    "Session {} uploaded {} files that were not recorded: {}",
                    session.session_id,
                    complete.uploaded_paths.len(),
                    e
                );
                Err(self.fail(UploaderError::SessionComplete(e)))
            }
        }
    }

    fn finish(&self) -> UploaderResult<()> {
        if self.state.transition(BatchEvent::Finish).is_err() {
            // Cancelled while reconciling
            return Ok(());
        }
        self.emit();

        let paths = self.uploaded_paths();
        self.observer.on_complete(&paths);
        Ok(())
    }

    fn fail(&self, err: UploaderError) -> UploaderError {
        let _ = self.state.transition(BatchEvent::Fail {
            message: err.to_string(),
        });
        self.emit();
        self.observer.on_error(&err);
        err
    }

    fn is_cancelled(&self) -> bool {
        // A pass only runs outside `Idle`; getting back there means cancel
        self.state.current_state() == BatchState::Idle
    }

    fn update_task(&self, id: &str, update: impl FnOnce(&mut UploadTask)) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                update(task);
                true
            }
            None => false,
        }
    }

    fn emit(&self) {
        let state = self.state.current_state();
        if state == BatchState::Idle {
            return;
        }
        let progress = self.snapshot(&state);
        self.observer.on_progress(&progress);
    }

    /// Byte-weighted view of the queue; the in-flight file counts in proportion
    /// to its own progress.
    fn snapshot(&self, state: &BatchState) -> AggregateProgress {
        let tasks = self.tasks.lock();

        let mut completed = 0;
        let mut bytes_uploaded = 0u64;
        let mut bytes_total = 0u64;
        let mut current = None;

        for task in tasks.iter() {
            let size = task.file.size();
            bytes_total += size;
            match task.status {
                TaskStatus::Complete => {
                    completed += 1;
                    bytes_uploaded += size;
                }
                TaskStatus::Uploading => {
                    bytes_uploaded += size * task.progress as u64 / 100;
                    current.get_or_insert((task.file.name.clone(), task.progress));
                }
                TaskStatus::Pending | TaskStatus::Error => {}
            }
        }

        let mut progress = AggregateProgress::new(
            tasks.len(),
            completed,
            bytes_uploaded,
            bytes_total,
            state.status(),
        );
        if let Some((name, pct)) = current {
            progress = progress.with_current(name, pct);
        }
        if let Some(message) = state.error() {
            progress = progress.with_error(message);
        }
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{percent, UploadStatus};
    use crate::protocol::{
        CompleteSessionResponse, CreateSessionResponse, ProtocolError, ProtocolResult,
        SignedDestination,
    };
    use crate::transfer::{RetryPolicy, TransferError, TransferResult};
    use crate::uploader::types::{ChannelObserver, NoopObserver, UploadEvent};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch, Notify};

    #[derive(Default)]
    struct FakeApi {
        creates: Mutex<Vec<CreateSessionRequest>>,
        completes: Mutex<Vec<CompleteSessionRequest>>,
        create_error: Mutex<Option<ProtocolError>>,
        complete_error: Mutex<Option<ProtocolError>>,
        /// File names that get no destination
        unsigned: Vec<String>,
    }

    #[async_trait]
    impl SessionApi for FakeApi {
        async fn create_session(
            &self,
            request: &CreateSessionRequest,
        ) -> ProtocolResult<CreateSessionResponse> {
            if let Some(err) = self.create_error.lock().take() {
                return Err(err);
            }

            let mut creates = self.creates.lock();
            creates.push(request.clone());
            let session_id = format!("session-{}", creates.len());

            let signed_urls = request
                .files
                .iter()
                .filter(|f| !self.unsigned.contains(&f.name))
                .map(|f| SignedDestination {
                    file_id: f.id.clone(),
                    url: format!("mem://{}", f.name),
                    path: format!("events/{}/originals/{}/{}", request.event_id, session_id, f.name),
                })
                .collect();

            Ok(CreateSessionResponse {
                session_id,
                signed_urls,
            })
        }

        async fn complete_session(
            &self,
            request: &CompleteSessionRequest,
        ) -> ProtocolResult<CompleteSessionResponse> {
            if let Some(err) = self.complete_error.lock().take() {
                return Err(err);
            }

            self.completes.lock().push(request.clone());
            Ok(CompleteSessionResponse {
                success: true,
                photos_created: request.uploaded_paths.len(),
                photo_ids: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        /// File name of every attempt, in order
        calls: Mutex<Vec<String>>,
        /// Names that always fail with a 503
        failing: Vec<String>,
        /// Name whose first attempt hangs halfway through
        stall_once: Option<String>,
        stalled: Notify,
        /// Name whose transfer panics
        panic_on: Option<String>,
    }

    #[async_trait]
    impl PutTransport for FakeTransport {
        async fn put(
            &self,
            _url: &str,
            file: &LocalFile,
            progress: watch::Sender<u64>,
        ) -> TransferResult<()> {
            let attempt = {
                let mut calls = self.calls.lock();
                calls.push(file.name.clone());
                calls.iter().filter(|n| **n == file.name).count()
            };

            if self.panic_on.as_deref() == Some(file.name.as_str()) {
                panic!("transport exploded");
            }

            progress.send_replace(file.size() / 2);
            tokio::task::yield_now().await;

            if self.failing.contains(&file.name) {
                return Err(TransferError::Status(503));
            }
            if self.stall_once.as_deref() == Some(file.name.as_str()) && attempt == 1 {
                self.stalled.notify_one();
                std::future::pending::<()>().await;
            }

            progress.send_replace(file.size());
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    type TestUploader = ChunkedUploader<FakeApi, FakeTransport>;

    fn uploader(
        api: FakeApi,
        transport: FakeTransport,
    ) -> (Arc<TestUploader>, mpsc::UnboundedReceiver<UploadEvent>) {
        let (observer, rx) = ChannelObserver::new();
        let config = UploaderConfig::new("event-1", "guest-1", "token-1")
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));

        let uploader = ChunkedUploader::new(api, transport, config, Arc::new(observer));
        (Arc::new(uploader), rx)
    }

    fn file(name: &str, size: usize) -> LocalFile {
        LocalFile::new(name, "image/jpeg", vec![0u8; size])
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn progress_of(events: &[UploadEvent]) -> Vec<AggregateProgress> {
        events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::Progress(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    fn paths(api: &FakeApi, call: usize) -> Vec<String> {
        api.completes.lock()[call].uploaded_paths.clone()
    }

    #[tokio::test]
    async fn test_add_and_remove_files() {
        let uploader = ChunkedUploader::new(
            FakeApi::default(),
            FakeTransport::default(),
            UploaderConfig::new("event-1", "guest-1", "token-1"),
            Arc::new(NoopObserver),
        );

        let added = uploader.add_files(vec![file("a.jpg", 10), file("b.jpg", 20)]);
        assert_eq!(added.len(), 2);
        assert!(added.iter().all(|t| t.status == TaskStatus::Pending));
        assert_eq!(uploader.total_size(), 30);

        let removed = uploader.remove_file(&added[0].id).unwrap();
        assert_eq!(removed.name, "a.jpg");
        assert_eq!(uploader.files().len(), 1);

        assert!(matches!(
            uploader.remove_file("missing"),
            Err(UploaderError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_completed_task_cannot_be_removed() {
        let (uploader, _rx) = uploader(FakeApi::default(), FakeTransport::default());
        let added = uploader.add_files(vec![file("a.jpg", 10)]);

        uploader.start().await.unwrap();

        assert!(matches!(
            uploader.remove_file(&added[0].id),
            Err(UploaderError::TaskNotRemovable { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_with_empty_queue_reports_error() {
        let (uploader, mut rx) = uploader(FakeApi::default(), FakeTransport::default());

        let err = uploader.start().await.unwrap_err();
        assert!(matches!(err, UploaderError::EmptyQueue));
        assert_eq!(uploader.state(), BatchState::Idle);

        let events = drain(&mut rx);
        assert!(matches!(events.as_slice(), [UploadEvent::Error { .. }]));
        assert!(uploader.api().creates.lock().is_empty());
    }

    #[tokio::test]
    async fn test_byte_weighted_progress() {
        let (uploader, mut rx) = uploader(FakeApi::default(), FakeTransport::default());
        uploader.add_files(vec![file("a.jpg", 100), file("b.jpg", 200), file("c.jpg", 300)]);

        uploader.start().await.unwrap();

        let progress = progress_of(&drain(&mut rx));
        for p in &progress {
            assert_eq!(p.overall_progress, percent(p.bytes_uploaded, p.bytes_total));
        }

        for (completed, bytes) in [(1usize, 100u64), (2, 300), (3, 600)] {
            let after = progress
                .iter()
                .find(|p| p.completed_files == completed)
                .unwrap();
            assert_eq!(after.bytes_uploaded, bytes);
            assert_eq!(after.overall_progress, percent(bytes, 600));
        }

        let last = progress.last().unwrap();
        assert_eq!(last.status, UploadStatus::Complete);
        assert_eq!(last.completed_files, 3);
        assert_eq!(last.overall_progress, 100);
    }

    #[tokio::test]
    async fn test_current_file_progress_is_monotonic() {
        let (uploader, mut rx) = uploader(FakeApi::default(), FakeTransport::default());
        uploader.add_files(vec![file("a.jpg", 1000)]);

        uploader.start().await.unwrap();

        let seen: Vec<u8> = progress_of(&drain(&mut rx))
            .iter()
            .filter(|p| p.current_file_name == "a.jpg")
            .map(|p| p.current_file_progress)
            .collect();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(uploader.files()[0].progress, 100);
    }

    #[tokio::test]
    async fn test_partial_failure_still_reconciles_the_rest() {
        let transport = FakeTransport {
            failing: vec!["b.jpg".into()],
            ..Default::default()
        };
        let (uploader, mut rx) = uploader(FakeApi::default(), transport);
        uploader.add_files(vec![file("a.jpg", 10), file("b.jpg", 10), file("c.jpg", 10)]);

        uploader.start().await.unwrap();

        let statuses: Vec<TaskStatus> = uploader.files().iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Complete, TaskStatus::Error, TaskStatus::Complete]
        );
        assert!(uploader.files()[1].error.is_some());

        let api = uploader.api();
        assert_eq!(api.completes.lock().len(), 1);
        assert_eq!(
            paths(api, 0),
            vec![
                "events/event-1/originals/session-1/a.jpg".to_string(),
                "events/event-1/originals/session-1/c.jpg".to_string(),
            ]
        );

        // 1 attempt + 3 retries for the failing file
        let b_attempts = uploader
            .transport()
            .calls
            .lock()
            .iter()
            .filter(|n| *n == "b.jpg")
            .count();
        assert_eq!(b_attempts, 4);

        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, UploadEvent::Error { .. })));
        let last = progress_of(&events).pop().unwrap();
        assert_eq!(last.status, UploadStatus::Complete);
        assert_eq!(last.completed_files, 2);
        assert_eq!(last.total_files, 3);
        assert!(last.overall_progress < 100);
    }

    #[tokio::test]
    async fn test_pause_then_resume_skips_completed_files() {
        let transport = FakeTransport {
            stall_once: Some("b.jpg".into()),
            ..Default::default()
        };
        let (uploader, mut rx) = uploader(FakeApi::default(), transport);
        let added = uploader.add_files(vec![file("a.jpg", 100), file("b.jpg", 100), file("c.jpg", 100)]);

        let run = {
            let uploader = uploader.clone();
            tokio::spawn(async move { uploader.start().await })
        };

        uploader.transport().stalled.notified().await;
        uploader.pause().unwrap();
        run.await.unwrap().unwrap();

        assert_eq!(uploader.state(), BatchState::Paused);
        assert_eq!(
            paths(uploader.api(), 0),
            vec!["events/event-1/originals/session-1/a.jpg".to_string()]
        );
        drain(&mut rx);

        uploader.resume().await.unwrap();
        assert_eq!(uploader.state(), BatchState::Complete);

        // The resumed session never asks for the finished file again
        let second: Vec<String> = uploader.api().creates.lock()[1]
            .files
            .iter()
            .map(|f| f.id.clone())
            .collect();
        assert_eq!(second, vec![added[1].id.clone(), added[2].id.clone()]);

        let calls = uploader.transport().calls.lock().clone();
        assert_eq!(calls, vec!["a.jpg", "b.jpg", "b.jpg", "c.jpg"]);

        // b.jpg starts again from zero
        let resumed = progress_of(&drain(&mut rx));
        let first_b = resumed
            .iter()
            .find(|p| p.current_file_name == "b.jpg")
            .unwrap();
        assert_eq!(first_b.current_file_progress, 0);

        assert_eq!(
            paths(uploader.api(), 1),
            vec![
                "events/event-1/originals/session-2/b.jpg".to_string(),
                "events/event-1/originals/session-2/c.jpg".to_string(),
            ]
        );
        assert_eq!(uploader.uploaded_paths().len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_everything() {
        let transport = FakeTransport {
            stall_once: Some("a.jpg".into()),
            ..Default::default()
        };
        let (uploader, mut rx) = uploader(FakeApi::default(), transport);
        uploader.add_files(vec![file("a.jpg", 100), file("b.jpg", 100)]);

        let run = {
            let uploader = uploader.clone();
            tokio::spawn(async move { uploader.start().await })
        };

        uploader.transport().stalled.notified().await;
        uploader.cancel().await;
        run.await.unwrap().unwrap();

        drain(&mut rx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        assert!(uploader.api().completes.lock().is_empty());
        assert_eq!(uploader.transport().calls.lock().len(), 1);
        assert!(uploader.files().is_empty());
        assert_eq!(uploader.state(), BatchState::Idle);
    }

    #[tokio::test]
    async fn test_session_create_failure_attempts_nothing() {
        let api = FakeApi::default();
        *api.create_error.lock() = Some(ProtocolError::QuotaExceeded {
            used: 9900.0,
            limit: 10240.0,
            requested: 200.0,
        });
        let (uploader, mut rx) = uploader(api, FakeTransport::default());
        uploader.add_files(vec![file("a.jpg", 10)]);

        let err = uploader.start().await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(!err.is_unreconciled());
        assert!(uploader.transport().calls.lock().is_empty());
        assert!(matches!(uploader.state(), BatchState::Error { .. }));

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UploadEvent::Error { unreconciled: false, .. })));
    }

    #[tokio::test]
    async fn test_completion_failure_is_unreconciled() {
        let api = FakeApi::default();
        *api.complete_error.lock() = Some(ProtocolError::Rejected {
            status: 500,
            message: "Failed to complete upload".into(),
        });
        let (uploader, mut rx) = uploader(api, FakeTransport::default());
        uploader.add_files(vec![file("a.jpg", 10)]);

        let err = uploader.start().await.unwrap_err();
        assert!(err.is_unreconciled());
        assert_eq!(uploader.files()[0].status, TaskStatus::Complete);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UploadEvent::Error { unreconciled: true, .. })));
        let last = progress_of(&events).pop().unwrap();
        assert_eq!(last.status, UploadStatus::Error);
        assert!(last.error.is_some());
    }

    #[tokio::test]
    async fn test_missing_destination_marks_only_that_file() {
        let api = FakeApi {
            unsigned: vec!["b.jpg".into()],
            ..Default::default()
        };
        let (uploader, _rx) = uploader(api, FakeTransport::default());
        uploader.add_files(vec![file("a.jpg", 10), file("b.jpg", 10)]);

        uploader.start().await.unwrap();

        let files = uploader.files();
        assert_eq!(files[0].status, TaskStatus::Complete);
        assert_eq!(files[1].status, TaskStatus::Error);
        assert_eq!(uploader.transport().calls.lock().clone(), vec!["a.jpg"]);
    }

    #[tokio::test]
    async fn test_all_failed_batch_still_completes_session() {
        let transport = FakeTransport {
            failing: vec!["a.jpg".into()],
            ..Default::default()
        };
        let (uploader, _rx) = uploader(FakeApi::default(), transport);
        uploader.add_files(vec![file("a.jpg", 10)]);

        uploader.start().await.unwrap();

        assert_eq!(uploader.api().completes.lock().len(), 1);
        assert!(paths(uploader.api(), 0).is_empty());
        assert_eq!(uploader.progress().completed_files, 0);
    }

    #[tokio::test]
    async fn test_resume_with_everything_complete_is_noop() {
        let (uploader, mut rx) = uploader(FakeApi::default(), FakeTransport::default());
        uploader.add_files(vec![file("a.jpg", 10)]);
        uploader.start().await.unwrap();
        drain(&mut rx);

        uploader.resume().await.unwrap();

        assert_eq!(uploader.api().creates.lock().len(), 1);
        assert_eq!(uploader.state(), BatchState::Complete);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UploadEvent::Completed { uploaded_paths } if uploaded_paths.len() == 1)));
    }

    #[tokio::test]
    async fn test_second_start_only_sends_new_files() {
        let (uploader, _rx) = uploader(FakeApi::default(), FakeTransport::default());
        let added = uploader.add_files(vec![file("a.jpg", 10)]);
        uploader.start().await.unwrap();

        uploader.add_files(vec![file("b.jpg", 10)]);
        uploader.start().await.unwrap();

        let second = uploader.api().creates.lock()[1].files.clone();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "b.jpg");
        assert_ne!(second[0].id, added[0].id);
        assert_eq!(uploader.uploaded_paths().len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_transport_is_reported_as_unhandled() {
        let transport = FakeTransport {
            panic_on: Some("b.jpg".into()),
            ..Default::default()
        };
        let (uploader, mut rx) = uploader(FakeApi::default(), transport);
        uploader.add_files(vec![file("a.jpg", 10), file("b.jpg", 10)]);

        let err = uploader.start().await.unwrap_err();

        assert!(matches!(&err, UploaderError::Unhandled(m) if m.contains("transport exploded")));
        assert!(matches!(uploader.state(), BatchState::Error { .. }));
        assert!(uploader.api().completes.lock().is_empty());

        let mut reported = false;
        while let Ok(event) = rx.try_recv() {
            if let UploadEvent::Error { message, unreconciled } = event {
                assert!(message.contains("transport exploded"));
                assert!(!unreconciled);
                reported = true;
            }
        }
        assert!(reported);
    }
}
