use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use super::aggregator::{aggregate, QueueProgress};
use super::engine::UploadEngine;
use super::errors::{QueueError, Result};
use super::manager::QueueConfig;
use super::store::{FileQueueStore, StatusChange};
use super::types::{
    AdmissionReport, EngineEvent, FileCandidate, FileEntry, FileId, FileStatus, QueueCommand, QueueEvent,
    Rejection,
};
use super::validation::validate_candidate;

/// 队列工作任务 - 唯一的写入者
///
/// 持有 store 和引擎，按到达顺序逐个处理用户命令和引擎事件
pub struct QueueWorker<E> {
    engine: E,
    store: FileQueueStore,
    config: QueueConfig,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl<E: UploadEngine> QueueWorker<E> {
    pub(crate) async fn run(
        engine: E,
        store: FileQueueStore,
        config: QueueConfig,
        mut command_rx: mpsc::Receiver<QueueCommand>,
        engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
        event_tx: broadcast::Sender<QueueEvent>,
    ) {
        let mut worker = Self {
            engine,
            store,
            config,
            engine_rx,
            event_tx,
        };

        // 主事件循环
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => worker.handle_command(command).await,
                    None => break,
                },
                Some(event) = worker.engine_rx.recv() => {
                    worker.handle_engine_event(event);
                }
            }
        }

        debug!("command channel closed, stopping queue worker");
        if let Err(err) = worker.engine.cancel_all().await {
            warn!(error = %err, "failed to cancel uploads on shutdown");
        }
    }

    async fn handle_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::AddFiles { files, reply } => {
                let report = self.add_files(files).await;
                self.emit_progress();
                let _ = reply.send(report);
            }
            QueueCommand::UploadAll { reply } => {
                let result = self.upload_all().await;
                let _ = reply.send(result);
            }
            QueueCommand::CancelAll { reply } => {
                let result = self.cancel_all().await;
                self.emit_progress();
                let _ = reply.send(result);
            }
            QueueCommand::Retry { id, reply } => {
                let result = self.retry(id).await;
                self.emit_progress();
                let _ = reply.send(result);
            }
            QueueCommand::RetryAll { reply } => {
                let result = self.retry_all().await;
                self.emit_progress();
                let _ = reply.send(Ok(result));
            }
            QueueCommand::Remove { id, reply } => {
                let result = self.remove(id).await;
                self.emit_progress();
                let _ = reply.send(result);
            }
            QueueCommand::ClearCompleted { reply } => {
                let removed = self.clear_completed().await;
                self.emit_progress();
                let _ = reply.send(removed);
            }
            QueueCommand::GetEntry { id, reply } => {
                let _ = reply.send(self.store.get(&id).cloned());
            }
            QueueCommand::GetProgress { reply } => {
                let _ = reply.send(self.progress());
            }
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        let removed = match &event {
            EngineEvent::FileRemoved { id } if self.store.contains(id) => Some(*id),
            _ => None,
        };

        let changes = self.store.apply(event);
        for change in &changes {
            if change.to == FileStatus::Success {
                info!(id = %change.id, "upload finished");
            }
        }
        self.emit_changes(&changes);

        if let Some(id) = removed {
            let _ = self.event_tx.send(QueueEvent::Removed { id });
        }

        self.emit_progress();
    }

    async fn add_files(&mut self, files: Vec<Option<FileCandidate>>) -> AdmissionReport {
        let mut report = AdmissionReport::default();

        for file in files {
            let name = file.as_ref().map(|f| f.name.clone());
            match self.admit(file).await {
                Ok(id) => {
                    info!(%id, name = name.as_deref().unwrap_or_default(), "file admitted");
                    let _ = self.event_tx.send(QueueEvent::Admitted {
                        id,
                        name: name.unwrap_or_default(),
                    });
                    report.admitted.push(id);
                }
                Err(error) => {
                    info!(name = name.as_deref().unwrap_or("<none>"), %error, "file rejected");
                    let _ = self.event_tx.send(QueueEvent::Rejected {
                        name: name.clone(),
                        reason: error.to_string(),
                    });
                    report.rejected.push(Rejection { name, error });
                }
            }
        }

        report
    }

    async fn admit(&mut self, file: Option<FileCandidate>) -> Result<FileId> {
        let file = validate_candidate(file, &self.config.validation)?;

        if self.store.len() >= self.config.max_files {
            return Err(QueueError::QueueFull { max_files: self.config.max_files });
        }

        let id = FileId::new();
        self.store.admit(file.describe(id));

        if let Err(err) = self.engine.add_file(id, &file).await {
            // 引擎拒绝，撤销入队
            let _ = self.store.remove(&id);
            return Err(err);
        }

        Ok(id)
    }

    async fn upload_all(&mut self) -> Result<()> {
        let pending = self.store.ids_with_status(FileStatus::Pending).len();
        if pending < self.config.min_files {
            return Err(QueueError::NotEnoughFiles { min_files: self.config.min_files });
        }

        self.engine.upload().await
    }

    /// 顺序：停止引擎，处理通道中已有的事件，再重置状态
    async fn cancel_all(&mut self) -> Result<()> {
        let result = self.engine.cancel_all().await;
        self.drain_engine_events();

        let changes = self.store.cancel_all();
        self.emit_changes(&changes);
        result
    }

    fn drain_engine_events(&mut self) {
        while let Ok(event) = self.engine_rx.try_recv() {
            self.handle_engine_event(event);
        }
    }

    async fn retry(&mut self, id: FileId) -> Result<bool> {
        let Some(change) = self.store.retry(&id)? else {
            return Ok(false);
        };

        self.emit_changes(&[change]);
        self.engine.retry_upload(id).await?;
        Ok(true)
    }

    async fn retry_all(&mut self) -> usize {
        let changes = self.store.retry_all();
        self.emit_changes(&changes);

        for change in &changes {
            if let Err(err) = self.engine.retry_upload(change.id).await {
                warn!(id = %change.id, error = %err, "engine refused retry");
            }
        }

        changes.len()
    }

    async fn remove(&mut self, id: FileId) -> Result<Option<FileEntry>> {
        let Some(entry) = self.store.remove(&id)? else {
            return Ok(None);
        };

        if let Err(err) = self.engine.remove_file(id).await {
            warn!(%id, error = %err, "engine failed to drop removed file");
        }
        let _ = self.event_tx.send(QueueEvent::Removed { id });

        Ok(Some(entry))
    }

    async fn clear_completed(&mut self) -> usize {
        let removed = self.store.clear_completed();

        for entry in &removed {
            if let Err(err) = self.engine.remove_file(entry.id).await {
                warn!(id = %entry.id, error = %err, "engine failed to drop cleared file");
            }
            let _ = self.event_tx.send(QueueEvent::Removed { id: entry.id });
        }

        removed.len()
    }

    fn progress(&self) -> QueueProgress {
        aggregate(self.store.entries())
    }

    fn emit_changes(&self, changes: &[StatusChange]) {
        for change in changes {
            let _ = self.event_tx.send(QueueEvent::StateChanged {
                id: change.id,
                old_status: change.from,
                new_status: change.to,
            });
        }
    }

    fn emit_progress(&self) {
        let _ = self.event_tx.send(QueueEvent::Progress(self.progress()));
    }
}
