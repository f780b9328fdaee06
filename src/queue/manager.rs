use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use super::aggregator::QueueProgress;
use super::engine::UploadEngine;
use super::errors::{QueueError, Result};
use super::store::FileQueueStore;
use super::types::{
    AdmissionReport, EngineEvent, FileCandidate, FileEntry, FileId, QueueCommand, QueueEvent, Snapshot,
};
use super::validation::ValidationOptions;
use super::worker::QueueWorker;

/// 队列配置
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub validation: ValidationOptions,
    pub max_files: usize,
    pub min_files: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            validation: ValidationOptions::default(),
            max_files: 10,
            min_files: 1,
        }
    }
}

impl QueueConfig {
    /// 与引擎的限制保持一致
    pub fn for_engine<E: UploadEngine>(engine: &E) -> Self {
        let constraints = engine.constraints();
        Self {
            validation: constraints.validation_options(),
            max_files: constraints.max_files,
            min_files: constraints.min_files,
        }
    }
}

/// 队列前端，可克隆，所有操作都转发给工作任务
#[derive(Clone)]
pub struct UploadQueue {
    command_tx: mpsc::Sender<QueueCommand>,
    event_tx: broadcast::Sender<QueueEvent>,
    snapshot_rx: watch::Receiver<Snapshot>,
}

/// 队列句柄 - 包含队列和工作任务
pub struct UploadQueueHandle {
    pub queue: UploadQueue,
    pub worker_handle: JoinHandle<()>,
}

impl UploadQueueHandle {
    /// 释放队列并等待工作任务结束
    ///
    /// 所有 [`UploadQueue`] 克隆都释放后工作任务才会退出
    pub async fn shutdown(self) -> Result<()> {
        drop(self.queue);
        self.worker_handle
            .await
            .map_err(|err| QueueError::internal(format!("Worker panic: {}", err)))
    }
}

impl UploadQueue {
    /// 启动工作任务，`engine_rx` 必须接收 `engine` 发出的事件
    pub fn new<E: UploadEngine>(
        engine: E,
        engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
        config: QueueConfig,
    ) -> UploadQueueHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        // 最大缓存 256 个事件
        let (event_tx, _) = broadcast::channel(256);

        let store = FileQueueStore::new();
        let snapshot_rx = store.subscribe();

        let worker_handle = tokio::spawn(QueueWorker::run(
            engine,
            store,
            config,
            command_rx,
            engine_rx,
            event_tx.clone(),
        ));

        UploadQueueHandle {
            queue: Self {
                command_tx,
                event_tx,
                snapshot_rx,
            },
            worker_handle,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> QueueCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| QueueError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| QueueError::ManagerShutdown)
    }

    /// 批量校验并入队，`None` 表示缺失的文件
    pub async fn add_files(&self, files: Vec<Option<FileCandidate>>) -> Result<AdmissionReport> {
        self.request(|reply| QueueCommand::AddFiles { files, reply }).await
    }

    pub async fn add_file(&self, file: FileCandidate) -> Result<FileId> {
        let mut report = self.add_files(vec![Some(file)]).await?;

        match report.rejected.pop() {
            Some(rejection) => Err(rejection.error),
            None => report
                .admitted
                .pop()
                .ok_or_else(|| QueueError::internal("empty admission report")),
        }
    }

    pub async fn upload_all(&self) -> Result<()> {
        self.request(|reply| QueueCommand::UploadAll { reply }).await?
    }

    pub async fn cancel_all(&self) -> Result<()> {
        self.request(|reply| QueueCommand::CancelAll { reply }).await?
    }

    /// `id` 不在队列中时返回 false
    pub async fn retry(&self, id: FileId) -> Result<bool> {
        self.request(|reply| QueueCommand::Retry { id, reply }).await?
    }

    pub async fn retry_all(&self) -> Result<usize> {
        self.request(|reply| QueueCommand::RetryAll { reply }).await?
    }

    pub async fn remove(&self, id: FileId) -> Result<Option<FileEntry>> {
        self.request(|reply| QueueCommand::Remove { id, reply }).await?
    }

    pub async fn clear_completed(&self) -> Result<usize> {
        self.request(|reply| QueueCommand::ClearCompleted { reply }).await
    }

    pub async fn get_entry(&self, id: FileId) -> Result<Option<FileEntry>> {
        self.request(|reply| QueueCommand::GetEntry { id, reply }).await
    }

    pub async fn progress(&self) -> Result<QueueProgress> {
        self.request(|reply| QueueCommand::GetProgress { reply }).await
    }

    /// 最新的队列快照
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// 订阅队列快照
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// 订阅事件
    ///
    /// 注意：接收速度跟不上时会丢失事件（lagged error）
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }
}
