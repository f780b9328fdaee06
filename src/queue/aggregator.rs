use crate::utils::format_time;
use super::types::{FileEntry, FileStatus, ProgressMap};

/// Seconds assumed per remaining percentage point of an in-flight upload.
const SECONDS_PER_PERCENT: f64 = 2.0;

/// Aggregate view of the queue, rebuilt from scratch after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueProgress {
    pub per_file: ProgressMap,
    /// Unweighted mean of per-file progress, 0..=100
    pub overall_progress: u8,
    pub total_files: usize,
    pub pending_count: usize,
    pub uploading_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub total_bytes: u64,
    pub bytes_uploaded: u64,
    /// `MM:SS`, or `--:--` when nothing can be estimated
    pub time_remaining: String,
}

/// Which bulk actions make sense for the current queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionAvailability {
    pub can_upload: bool,
    pub can_cancel: bool,
    pub can_retry: bool,
    pub can_clear: bool,
}

impl QueueProgress {
    pub fn is_uploading(&self) -> bool {
        self.uploading_count > 0
    }

    /// Nothing pending or in flight.
    pub fn is_settled(&self) -> bool {
        self.pending_count == 0 && self.uploading_count == 0
    }

    pub fn actions(&self) -> ActionAvailability {
        ActionAvailability {
            can_upload: self.pending_count > 0 && !self.is_uploading(),
            can_cancel: self.is_uploading(),
            can_retry: self.failed_count > 0,
            can_clear: self.completed_count > 0,
        }
    }
}

/// Derive the aggregate view of a queue.
///
/// Holds no state: progress may move backwards between calls (cancel-all),
/// so every field is computed from `entries` alone.
pub fn aggregate(entries: &[FileEntry]) -> QueueProgress {
    let mut per_file = ProgressMap::with_capacity(entries.len());
    let mut progress_sum = 0u64;
    let mut uploading_sum = 0u64;
    let mut progress = QueueProgress {
        per_file: ProgressMap::new(),
        overall_progress: 0,
        total_files: entries.len(),
        pending_count: 0,
        uploading_count: 0,
        completed_count: 0,
        failed_count: 0,
        total_bytes: 0,
        bytes_uploaded: 0,
        time_remaining: String::new(),
    };

    for entry in entries {
        let value = entry.effective_progress();
        per_file.insert(entry.id, value);
        progress_sum += value as u64;
        progress.total_bytes += entry.size;
        progress.bytes_uploaded += entry.effective_bytes_uploaded();

        match entry.status {
            FileStatus::Pending => progress.pending_count += 1,
            FileStatus::Uploading => {
                progress.uploading_count += 1;
                uploading_sum += value as u64;
            }
            FileStatus::Success => progress.completed_count += 1,
            FileStatus::Error => progress.failed_count += 1,
        }
    }

    if !entries.is_empty() {
        progress.overall_progress = (progress_sum as f64 / entries.len() as f64).round() as u8;
    }

    let mean_uploading = (progress.uploading_count > 0)
        .then(|| uploading_sum as f64 / progress.uploading_count as f64);
    progress.time_remaining = estimate_time_remaining(mean_uploading);
    progress.per_file = per_file;

    progress
}

fn estimate_time_remaining(mean_uploading: Option<f64>) -> String {
    match mean_uploading {
        Some(mean) if mean > 0.0 && mean < 100.0 => format_time((100.0 - mean) * SECONDS_PER_PERCENT),
        _ => "--:--".to_string(),
    }
}
