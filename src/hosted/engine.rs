use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::queue::{self, EngineConstraints, EngineEvent, FileCandidate, FileId, QueueError, UploadEngine, UploadResponse};
use crate::utils::{retry_with_config, RetryBuilder, RetryConfig};
use super::client::HostedClient;
use super::errors::{HostedError, Result};
use super::progress_stream::EventGate;

/// Default number of simultaneous transfers
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Engine-side lifecycle of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    /// Never started, or reset by cancel
    Idle,
    Running,
    /// Only `retry_upload` restarts it
    Failed,
    Done,
}

struct ActiveTransfer {
    token: CancellationToken,
    gate: Arc<EventGate>,
}

impl ActiveTransfer {
    fn stop(self) {
        self.gate.close();
        self.token.cancel();
    }
}

struct TrackedFile {
    candidate: FileCandidate,
    /// Bumped on every start so a stale job can't settle a newer one
    generation: u64,
    state: TransferState,
    active: Option<ActiveTransfer>,
}

struct EngineInner {
    client: HostedClient,
    events: mpsc::UnboundedSender<EngineEvent>,
    files: Mutex<HashMap<FileId, TrackedFile>>,
    semaphore: Arc<Semaphore>,
    retry: RetryConfig<HostedError>,
    constraints: EngineConstraints,
}

/// Upload engine backed by the hosted media API.
#[derive(Clone)]
pub struct HostedEngine {
    inner: Arc<EngineInner>,
}

impl HostedEngine {
    pub fn new(client: HostedClient, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self::with_concurrency(client, events, DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(client: HostedClient, events: mpsc::UnboundedSender<EngineEvent>, concurrency: usize) -> Self {
        let retry = RetryBuilder::new()
            .max_attempts(3)
            .should_retry(HostedError::is_transient)
            .build();

        Self {
            inner: Arc::new(EngineInner {
                client,
                events,
                files: Mutex::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
                retry,
                constraints: EngineConstraints::default(),
            }),
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Caller holds the `files` lock.
    fn launch(&self, id: FileId, file: &mut TrackedFile) {
        file.generation += 1;
        file.state = TransferState::Running;

        let transfer = ActiveTransfer {
            token: CancellationToken::new(),
            gate: EventGate::new(self.inner.events.clone()),
        };
        let job = UploadJob {
            id,
            candidate: file.candidate.clone(),
            generation: file.generation,
            token: transfer.token.clone(),
            gate: transfer.gate.clone(),
        };
        file.active = Some(transfer);

        tokio::spawn(job.run(self.inner.clone()));
    }
}

#[async_trait]
impl UploadEngine for HostedEngine {
    async fn add_file(&self, id: FileId, file: &FileCandidate) -> queue::Result<()> {
        let mut files = self.inner.files.lock().await;
        if files.contains_key(&id) {
            return Err(QueueError::engine(format!("file {} already added", id)));
        }

        files.insert(id, TrackedFile {
            candidate: file.clone(),
            generation: 0,
            state: TransferState::Idle,
            active: None,
        });
        drop(files);

        self.emit(EngineEvent::FileAdded { file: file.describe(id) });
        Ok(())
    }

    /// Start every idle file. Failed and finished files are left alone.
    async fn upload(&self) -> queue::Result<()> {
        let mut files = self.inner.files.lock().await;
        self.emit(EngineEvent::UploadStarted);

        for (id, file) in files.iter_mut() {
            if file.state == TransferState::Idle {
                self.launch(*id, file);
            }
        }
        Ok(())
    }

    async fn cancel_all(&self) -> queue::Result<()> {
        let mut files = self.inner.files.lock().await;

        for (id, file) in files.iter_mut() {
            if file.state != TransferState::Running {
                continue;
            }
            file.state = TransferState::Idle;
            if let Some(transfer) = file.active.take() {
                transfer.stop();
            }
            debug!(%id, "transfer cancelled");
        }
        Ok(())
    }

    async fn retry_upload(&self, id: FileId) -> queue::Result<()> {
        let mut files = self.inner.files.lock().await;
        let Some(file) = files.get_mut(&id) else {
            return Err(QueueError::engine(format!("file {} is not tracked", id)));
        };

        match file.state {
            TransferState::Failed | TransferState::Idle => self.launch(id, file),
            TransferState::Running | TransferState::Done => {
                debug!(%id, state = ?file.state, "retry ignored");
            }
        }
        Ok(())
    }

    async fn remove_file(&self, id: FileId) -> queue::Result<()> {
        let removed = self.inner.files.lock().await.remove(&id);

        if let Some(mut file) = removed {
            if let Some(transfer) = file.active.take() {
                transfer.stop();
            }
            self.emit(EngineEvent::FileRemoved { id });
        }
        Ok(())
    }

    fn constraints(&self) -> EngineConstraints {
        self.inner.constraints.clone()
    }
}

struct UploadJob {
    id: FileId,
    candidate: FileCandidate,
    generation: u64,
    token: CancellationToken,
    gate: Arc<EventGate>,
}

impl UploadJob {
    async fn run(self, inner: Arc<EngineInner>) {
        let outcome = tokio::select! {
            _ = self.token.cancelled() => None,
            result = self.transfer(&inner) => Some(result),
        };

        // The outcome is settled and reported under the lock, so it can't
        // interleave with cancel_all or remove_file.
        let mut files = inner.files.lock().await;
        let Some(file) = files.get_mut(&self.id) else {
            debug!(id = %self.id, "file removed during upload");
            return;
        };
        if file.generation != self.generation || file.state != TransferState::Running {
            debug!(id = %self.id, "upload cancelled");
            return;
        }
        let Some(outcome) = outcome else { return };

        file.active = None;
        let event = match outcome {
            Ok(response) => {
                file.state = TransferState::Done;
                EngineEvent::UploadSuccess { id: self.id, response }
            }
            Err(err) => {
                file.state = TransferState::Failed;
                warn!(id = %self.id, error = %err, "upload failed");
                EngineEvent::UploadError {
                    id: self.id,
                    error: err.to_string(),
                    response: err.response_body().map(str::to_string),
                }
            }
        };

        self.gate.send(event);
    }

    async fn transfer(&self, inner: &EngineInner) -> Result<UploadResponse> {
        let _permit = inner.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HostedError::Cancelled)?;

        let data = self.candidate.source.read().await?;
        debug!(id = %self.id, bytes = data.len(), "uploading");

        let client = &inner.client;
        let gate = self.gate.clone();
        let (id, name, mime_type) = (self.id, self.candidate.name.as_str(), self.candidate.mime_type.as_str());

        retry_with_config(&inner.retry, move || {
            client.upload(id, name, mime_type, data.clone(), gate.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use crate::config::CloudConfig;
    use crate::hosted::client::UploadOptions;
    use crate::queue::upload_error_message;

    const SUCCESS_BODY: &str = r#"{"secure_url":"https://res.example.com/demo/a.png","public_id":"avatars/a","format":"png"}"#;
    const ERROR_BODY: &str = r#"{"error":{"message":"Invalid image file"}}"#;

    #[derive(Clone, Copy)]
    struct Reply {
        status: u16,
        body: &'static str,
        delay: Duration,
        /// Read the request head, then never read the body nor answer
        stall: bool,
    }

    impl Reply {
        fn json(status: u16, body: &'static str) -> Self {
            Self { status, body, delay: Duration::ZERO, stall: false }
        }

        fn stall() -> Self {
            Self { stall: true, ..Self::json(200, "") }
        }

        fn delayed(self, delay: Duration) -> Self {
            Self { delay, ..self }
        }
    }

    /// Minimal HTTP/1.1 endpoint standing in for the hosted API.
    struct StubServer {
        addr: SocketAddr,
        requests: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        bodies: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl StubServer {
        async fn start<F>(respond: F) -> Self
        where
            F: Fn(usize) -> Reply + Send + Sync + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(AtomicUsize::new(0));
            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let bodies = Arc::new(std::sync::Mutex::new(Vec::new()));
            let respond = Arc::new(respond);

            let server = Self { addr, requests: requests.clone(), peak: peak.clone(), bodies: bodies.clone() };

            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let (requests, active, peak, bodies, respond) =
                        (requests.clone(), active.clone(), peak.clone(), bodies.clone(), respond.clone());

                    tokio::spawn(async move {
                        handle_connection(socket, requests, active, peak, bodies, respond).await;
                    });
                }
            });

            server
        }

        fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    async fn handle_connection<F>(
        mut socket: TcpStream,
        requests: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        bodies: Arc<std::sync::Mutex<Vec<String>>>,
        respond: Arc<F>,
    ) where
        F: Fn(usize) -> Reply,
    {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 16 * 1024];
        let mut head_end = None;
        let mut reply = None;

        loop {
            if head_end.is_none() {
                head_end = buf.windows(4).position(|w| w == b"\r\n\r\n");
                if head_end.is_some() {
                    let index = requests.fetch_add(1, Ordering::SeqCst);
                    reply = Some(respond(index));
                }
            }

            if let (Some(end), Some(reply)) = (head_end, reply) {
                if reply.stall {
                    std::future::pending::<()>().await;
                }
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok());
                let complete = match length {
                    Some(length) => buf.len() >= end + 4 + length,
                    None => buf.ends_with(b"0\r\n\r\n"),
                };
                if complete {
                    break;
                }
            }

            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }

        let Some(reply) = reply else { return };
        bodies.lock().unwrap().push(String::from_utf8_lossy(&buf).into_owned());

        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(reply.delay).await;
        active.fetch_sub(1, Ordering::SeqCst);

        let response = format!(
            "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            reply.status,
            reply.body.len(),
            reply.body,
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    }

    fn engine_for(api_base: String) -> (HostedEngine, mpsc::UnboundedReceiver<EngineEvent>) {
        let config = CloudConfig {
            cloud_name: "demo".into(),
            upload_preset: "unsigned".into(),
            folder: "avatars".into(),
            api_base,
        };
        let client = HostedClient::new(&config, UploadOptions::default()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (HostedEngine::new(client, tx), rx)
    }

    fn engine() -> (HostedEngine, mpsc::UnboundedReceiver<EngineEvent>) {
        // Unreachable; these tests never send a request
        engine_for("http://127.0.0.1:9".into())
    }

    fn png(size: usize) -> FileCandidate {
        FileCandidate::from_bytes("a.png", "image/png", vec![7u8; size])
    }

    async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<EngineEvent>, matches: F) -> EngineEvent
    where
        F: Fn(&EngineEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.expect("engine dropped");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for engine event")
    }

    #[tokio::test]
    async fn test_add_and_remove_emit_events() {
        let (engine, mut rx) = engine();
        let id = FileId::new();
        let file = png(16);

        engine.add_file(id, &file).await.unwrap();
        assert!(engine.add_file(id, &file).await.is_err());
        engine.remove_file(id).await.unwrap();

        match rx.recv().await.unwrap() {
            EngineEvent::FileAdded { file } => assert_eq!(file.id, id),
            other => panic!("Expected FileAdded, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            EngineEvent::FileRemoved { id: removed } => assert_eq!(removed, id),
            other => panic!("Expected FileRemoved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_unknown_file_fails() {
        let (engine, _rx) = engine();
        assert!(engine.retry_upload(FileId::new()).await.is_err());
    }

    #[test]
    fn test_default_constraints() {
        let (engine, _rx) = engine();
        assert_eq!(engine.constraints(), EngineConstraints::default());
    }

    #[tokio::test]
    async fn test_successful_upload() {
        let server = StubServer::start(|_| Reply::json(200, SUCCESS_BODY)).await;
        let (engine, mut rx) = engine_for(format!("http://{}", server.addr));
        let id = FileId::new();

        engine.add_file(id, &png(200 * 1024)).await.unwrap();
        engine.upload().await.unwrap();

        let mut last_progress = 0;
        let response = loop {
            match wait_for(&mut rx, |_| true).await {
                EngineEvent::UploadProgress { bytes_uploaded, .. } => last_progress = bytes_uploaded,
                EngineEvent::UploadSuccess { id: done, response } => {
                    assert_eq!(done, id);
                    break response;
                }
                EngineEvent::UploadError { error, .. } => panic!("upload failed: {}", error),
                _ => {}
            }
        };

        assert_eq!(response.secure_url, "https://res.example.com/demo/a.png");
        assert_eq!(response.public_id, "avatars/a");
        assert_eq!(response.format.as_deref(), Some("png"));
        assert_eq!(last_progress, 200 * 1024);

        let bodies = server.bodies.lock().unwrap();
        assert!(bodies[0].starts_with("POST /demo/image/upload"));
        assert!(bodies[0].contains("name=\"upload_preset\""));
        assert!(bodies[0].contains("name=\"folder\""));
        assert!(bodies[0].contains("filename=\"a.png\""));
    }

    #[tokio::test]
    async fn test_failed_file_only_restarts_on_retry() {
        let server = StubServer::start(|_| Reply::json(400, ERROR_BODY)).await;
        let (engine, mut rx) = engine_for(format!("http://{}", server.addr));
        let id = FileId::new();

        engine.add_file(id, &png(1024)).await.unwrap();
        engine.upload().await.unwrap();

        match wait_for(&mut rx, |event| matches!(event, EngineEvent::UploadError { .. })).await {
            EngineEvent::UploadError { id: failed, error, response } => {
                assert_eq!(failed, id);
                assert_eq!(response.as_deref(), Some(ERROR_BODY));
                assert_eq!(upload_error_message(&error, response.as_deref()), "Invalid image file");
            }
            other => panic!("Expected UploadError, got {:?}", other),
        }
        assert_eq!(server.requests(), 1);

        // A second upload leaves the failed file alone
        engine.upload().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.requests(), 1);
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, EngineEvent::UploadStarted), "unexpected event {:?}", event);
        }

        engine.retry_upload(id).await.unwrap();
        wait_for(&mut rx, |event| matches!(event, EngineEvent::UploadError { .. })).await;
        assert_eq!(server.requests(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let server = StubServer::start(|_| Reply::json(200, SUCCESS_BODY).delayed(Duration::from_millis(300))).await;
        let (engine, mut rx) = engine_for(format!("http://{}", server.addr));

        for _ in 0..5 {
            engine.add_file(FileId::new(), &png(1024)).await.unwrap();
        }
        engine.upload().await.unwrap();

        for _ in 0..5 {
            wait_for(&mut rx, |event| matches!(event, EngineEvent::UploadSuccess { .. })).await;
        }

        assert_eq!(server.requests(), 5);
        assert_eq!(server.peak.load(Ordering::SeqCst), DEFAULT_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_cancel_silences_transfer_and_allows_reupload() {
        let server = StubServer::start(|index| match index {
            0 => Reply::stall(),
            _ => Reply::json(200, SUCCESS_BODY),
        }).await;
        let (engine, mut rx) = engine_for(format!("http://{}", server.addr));
        let id = FileId::new();
        let size = 8 * 1024 * 1024;

        engine.add_file(id, &png(size)).await.unwrap();
        engine.upload().await.unwrap();
        wait_for(&mut rx, |event| matches!(event, EngineEvent::UploadProgress { .. })).await;

        engine.cancel_all().await.unwrap();

        // Nothing more from the cancelled transfer once cancel_all returns
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());

        engine.upload().await.unwrap();
        match wait_for(&mut rx, |event| matches!(event, EngineEvent::UploadSuccess { .. })).await {
            EngineEvent::UploadSuccess { id: done, .. } => assert_eq!(done, id),
            other => panic!("Expected UploadSuccess, got {:?}", other),
        }
        assert_eq!(server.requests(), 2);
    }

    #[tokio::test]
    async fn test_finished_file_is_not_uploaded_again() {
        let server = StubServer::start(|_| Reply::json(200, SUCCESS_BODY)).await;
        let (engine, mut rx) = engine_for(format!("http://{}", server.addr));
        let id = FileId::new();

        engine.add_file(id, &png(1024)).await.unwrap();
        engine.upload().await.unwrap();
        wait_for(&mut rx, |event| matches!(event, EngineEvent::UploadSuccess { .. })).await;

        engine.upload().await.unwrap();
        engine.retry_upload(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(server.requests(), 1);
    }
}
