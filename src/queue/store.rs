use std::sync::Arc;
use chrono::Utc;
use tokio::sync::watch;
use tracing::debug;
use super::errors::{QueueError, Result};
use super::types::{EngineEvent, FileDescriptor, FileEntry, FileId, FileStatus, Snapshot, Thumbnail, UploadResponse};

const GENERIC_UPLOAD_ERROR: &str = "Upload failed";

/// A status transition applied to one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub id: FileId,
    pub from: FileStatus,
    pub to: FileStatus,
}

/// Owns the canonical list of file entries.
///
/// Every mutation that changes the list publishes a fresh [`Snapshot`] to
/// subscribers; readers never see the list mid-update.
pub struct FileQueueStore {
    entries: Vec<FileEntry>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Default for FileQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileQueueStore {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entries: Vec::new(),
            snapshot_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn get(&self, id: &FileId) -> Option<&FileEntry> {
        self.entries.iter().find(|entry| entry.id == *id)
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids_with_status(&self, status: FileStatus) -> Vec<FileId> {
        self.entries
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.id)
            .collect()
    }

    fn get_mut(&mut self, id: &FileId) -> Option<&mut FileEntry> {
        self.entries.iter_mut().find(|entry| entry.id == *id)
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Arc::new(self.entries.clone()));
    }

    /// Insert a validated file as `Pending`. Returns false if the id is already queued.
    pub fn admit(&mut self, file: FileDescriptor) -> bool {
        if self.contains(&file.id) {
            debug!(id = %file.id, "file already queued");
            return false;
        }

        self.entries.push(FileEntry::new(file));
        self.publish();
        true
    }

    /// Apply one engine event. Events for unknown ids are dropped.
    pub fn apply(&mut self, event: EngineEvent) -> Vec<StatusChange> {
        match event {
            EngineEvent::FileAdded { file } => {
                self.admit(file);
                Vec::new()
            }
            EngineEvent::FileRemoved { id } => {
                self.discard(&id);
                Vec::new()
            }
            EngineEvent::ThumbnailGenerated { id, preview } => {
                self.set_thumbnail(&id, preview);
                Vec::new()
            }
            EngineEvent::UploadStarted => self.start_all(),
            EngineEvent::UploadProgress { id, bytes_uploaded, bytes_total } => {
                self.update_progress(&id, bytes_uploaded, bytes_total).into_iter().collect()
            }
            EngineEvent::UploadSuccess { id, response } => {
                self.mark_success(&id, response).into_iter().collect()
            }
            EngineEvent::UploadError { id, error, response } => {
                let message = upload_error_message(&error, response.as_deref());
                self.mark_error(&id, message).into_iter().collect()
            }
        }
    }

    /// Every pending entry starts uploading.
    pub fn start_all(&mut self) -> Vec<StatusChange> {
        let mut changes = Vec::new();

        for entry in self.entries.iter_mut().filter(|e| e.status == FileStatus::Pending) {
            entry.status = FileStatus::Uploading;
            changes.push(StatusChange { id: entry.id, from: FileStatus::Pending, to: FileStatus::Uploading });
        }

        if !changes.is_empty() {
            self.publish();
        }
        changes
    }

    pub fn update_progress(&mut self, id: &FileId, bytes_uploaded: u64, bytes_total: u64) -> Option<StatusChange> {
        let Some(entry) = self.get_mut(id) else {
            debug!(%id, "progress for unknown file dropped");
            return None;
        };

        if entry.status == FileStatus::Success {
            debug!(%id, "late progress for completed file dropped");
            return None;
        }

        let percentage = percent(bytes_uploaded, bytes_total);
        let from = entry.status;

        if from == FileStatus::Uploading {
            entry.progress = entry.progress.max(percentage);
            entry.bytes_uploaded = entry.bytes_uploaded.max(bytes_uploaded);
        } else {
            entry.progress = percentage;
            entry.bytes_uploaded = bytes_uploaded;
            entry.status = FileStatus::Uploading;
            entry.error_message = None;
        }

        self.publish();
        (from != FileStatus::Uploading).then_some(StatusChange { id: *id, from, to: FileStatus::Uploading })
    }

    pub fn mark_success(&mut self, id: &FileId, response: UploadResponse) -> Option<StatusChange> {
        let Some(entry) = self.get_mut(id) else {
            debug!(%id, "success for unknown file dropped");
            return None;
        };

        let from = entry.status;
        entry.status = FileStatus::Success;
        entry.progress = 100;
        entry.bytes_uploaded = entry.size;
        entry.upload_url = Some(response.secure_url);
        entry.public_id = Some(response.public_id);
        entry.error_message = None;
        entry.completed_at = Some(Utc::now());

        self.publish();
        (from != FileStatus::Success).then_some(StatusChange { id: *id, from, to: FileStatus::Success })
    }

    pub fn mark_error(&mut self, id: &FileId, message: String) -> Option<StatusChange> {
        let Some(entry) = self.get_mut(id) else {
            debug!(%id, "error for unknown file dropped");
            return None;
        };

        let from = entry.status;
        entry.status = FileStatus::Error;
        entry.error_message = Some(message);
        entry.upload_url = None;
        entry.public_id = None;

        self.publish();
        (from != FileStatus::Error).then_some(StatusChange { id: *id, from, to: FileStatus::Error })
    }

    /// Every uploading entry goes back to pending with progress reset.
    pub fn cancel_all(&mut self) -> Vec<StatusChange> {
        let mut changes = Vec::new();

        for entry in self.entries.iter_mut().filter(|e| e.status == FileStatus::Uploading) {
            reset_to_pending(entry);
            changes.push(StatusChange { id: entry.id, from: FileStatus::Uploading, to: FileStatus::Pending });
        }

        if !changes.is_empty() {
            self.publish();
        }
        changes
    }

    /// Move a failed entry back to pending. `Ok(None)` if the id is unknown.
    pub fn retry(&mut self, id: &FileId) -> Result<Option<StatusChange>> {
        let Some(entry) = self.get_mut(id) else {
            return Ok(None);
        };

        if entry.status != FileStatus::Error {
            return Err(QueueError::invalid_transition(*id, entry.status, "retry"));
        }

        reset_to_pending(entry);
        self.publish();

        Ok(Some(StatusChange { id: *id, from: FileStatus::Error, to: FileStatus::Pending }))
    }

    pub fn retry_all(&mut self) -> Vec<StatusChange> {
        let mut changes = Vec::new();

        for entry in self.entries.iter_mut().filter(|e| e.status == FileStatus::Error) {
            reset_to_pending(entry);
            changes.push(StatusChange { id: entry.id, from: FileStatus::Error, to: FileStatus::Pending });
        }

        if !changes.is_empty() {
            self.publish();
        }
        changes
    }

    /// User-initiated removal. In-flight uploads must be cancelled first.
    pub fn remove(&mut self, id: &FileId) -> Result<Option<FileEntry>> {
        match self.get(id) {
            None => Ok(None),
            Some(entry) if entry.status == FileStatus::Uploading => {
                Err(QueueError::invalid_transition(*id, entry.status, "remove"))
            }
            Some(_) => Ok(self.discard(id)),
        }
    }

    fn discard(&mut self, id: &FileId) -> Option<FileEntry> {
        let index = self.entries.iter().position(|entry| entry.id == *id)?;
        let entry = self.entries.remove(index);
        self.publish();
        Some(entry)
    }

    /// Drop every successful entry.
    pub fn clear_completed(&mut self) -> Vec<FileEntry> {
        let (completed, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.status == FileStatus::Success);

        self.entries = remaining;
        if !completed.is_empty() {
            self.publish();
        }
        completed
    }

    pub fn set_thumbnail(&mut self, id: &FileId, preview: Thumbnail) -> bool {
        let Some(entry) = self.get_mut(id) else {
            debug!(%id, "thumbnail for unknown file dropped");
            return false;
        };

        entry.thumbnail = Some(preview);
        self.publish();
        true
    }
}

fn reset_to_pending(entry: &mut FileEntry) {
    entry.status = FileStatus::Pending;
    entry.progress = 0;
    entry.bytes_uploaded = 0;
    entry.error_message = None;
}

fn percent(bytes_uploaded: u64, bytes_total: u64) -> u8 {
    if bytes_total == 0 {
        return 0;
    }
    let value = (bytes_uploaded as f64 / bytes_total as f64 * 100.0).round();
    value.clamp(0.0, 100.0) as u8
}

/// Human-readable message for a failed upload.
///
/// Prefers the nested `error.message` of a JSON body, then the raw body, then
/// the engine's own error text.
pub fn upload_error_message(error: &str, response: Option<&str>) -> String {
    if let Some(body) = response.map(str::trim).filter(|body| !body.is_empty()) {
        let nested = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| value.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string));

        return nested.unwrap_or_else(|| body.to_string());
    }

    let error = error.trim();
    if error.is_empty() {
        GENERIC_UPLOAD_ERROR.to_string()
    } else {
        error.to_string()
    }
}
