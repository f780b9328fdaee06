use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use super::aggregator::QueueProgress;
use super::errors::Result;

/// 队列中文件的唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 文件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// 等待上传
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Success,
    /// 失败
    Error,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileStatus::Pending => "pending",
            FileStatus::Uploading => "uploading",
            FileStatus::Success => "success",
            FileStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// 本地生成的预览图，已编码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub mime_type: String,
    pub data: Bytes,
}

impl Thumbnail {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64_STANDARD.encode(&self.data))
    }
}

/// 文件内容来源
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Bytes(Bytes),
}

impl FileSource {
    pub async fn read(&self) -> std::io::Result<Bytes> {
        match self {
            FileSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            FileSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// 待入队的原始文件
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub source: FileSource,
}

impl FileCandidate {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            source: FileSource::Bytes(data),
        }
    }

    /// 读取文件信息，并根据内容识别 MIME 类型
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}' is not a file", path.display()),
            ));
        }

        let sniff_path = path.clone();
        let mime_type = tokio::task::spawn_blocking(move || {
            tree_magic_mini::from_filepath(sniff_path.as_path())
                .unwrap_or("application/octet-stream")
                .to_string()
        })
        .await
        .map_err(std::io::Error::other)?;

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name,
            size: metadata.len(),
            mime_type,
            source: FileSource::Path(path),
        })
    }

    pub fn describe(&self, id: FileId) -> FileDescriptor {
        FileDescriptor {
            id,
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
        }
    }
}

/// 入队时记录的元数据，之后不变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// 队列中的一个文件
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub status: FileStatus,
    /// 0..=100
    pub progress: u8,
    pub bytes_uploaded: u64,
    pub thumbnail: Option<Thumbnail>,
    pub upload_url: Option<String>,
    pub public_id: Option<String>,
    pub error_message: Option<String>,
    pub added_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FileEntry {
    pub fn new(descriptor: FileDescriptor) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.name,
            size: descriptor.size,
            mime_type: descriptor.mime_type,
            status: FileStatus::Pending,
            progress: 0,
            bytes_uploaded: 0,
            thumbnail: None,
            upload_url: None,
            public_id: None,
            error_message: None,
            added_at: Utc::now(),
            completed_at: None,
        }
    }

    /// 对外展示的进度，等待中的文件始终为 0
    pub fn effective_progress(&self) -> u8 {
        match self.status {
            FileStatus::Pending => 0,
            _ => self.progress,
        }
    }

    pub fn effective_bytes_uploaded(&self) -> u64 {
        match self.status {
            FileStatus::Pending => 0,
            FileStatus::Success => self.size,
            _ => self.bytes_uploaded,
        }
    }
}

/// 只读队列快照
pub type Snapshot = Arc<Vec<FileEntry>>;

/// 托管媒体服务返回的上传结果
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadResponse {
    pub secure_url: String,
    pub public_id: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

/// 上传引擎推送的事件
#[derive(Debug, Clone)]
pub enum EngineEvent {
    FileAdded {
        file: FileDescriptor,
    },

    FileRemoved {
        id: FileId,
    },

    ThumbnailGenerated {
        id: FileId,
        preview: Thumbnail,
    },

    /// 批量开始上传
    UploadStarted,

    UploadProgress {
        id: FileId,
        bytes_uploaded: u64,
        bytes_total: u64,
    },

    UploadSuccess {
        id: FileId,
        response: UploadResponse,
    },

    UploadError {
        id: FileId,
        error: String,
        /// 服务器返回的原始响应体
        response: Option<String>,
    },
}

/// 未能入队的文件
#[derive(Debug)]
pub struct Rejection {
    pub name: Option<String>,
    pub error: super::errors::QueueError,
}

/// 批量添加的结果
#[derive(Debug, Default)]
pub struct AdmissionReport {
    pub admitted: Vec<FileId>,
    pub rejected: Vec<Rejection>,
}

/// 队列工作任务广播的通知
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Admitted {
        id: FileId,
        name: String,
    },

    Rejected {
        name: Option<String>,
        reason: String,
    },

    StateChanged {
        id: FileId,
        old_status: FileStatus,
        new_status: FileStatus,
    },

    Removed {
        id: FileId,
    },

    /// 每次队列变化后的聚合进度
    Progress(QueueProgress),
}

/// 队列命令
pub enum QueueCommand {
    AddFiles {
        files: Vec<Option<FileCandidate>>,
        reply: oneshot::Sender<AdmissionReport>,
    },

    UploadAll {
        reply: oneshot::Sender<Result<()>>,
    },

    CancelAll {
        reply: oneshot::Sender<Result<()>>,
    },

    Retry {
        id: FileId,
        reply: oneshot::Sender<Result<bool>>,
    },

    RetryAll {
        reply: oneshot::Sender<Result<usize>>,
    },

    Remove {
        id: FileId,
        reply: oneshot::Sender<Result<Option<FileEntry>>>,
    },

    ClearCompleted {
        reply: oneshot::Sender<usize>,
    },

    GetEntry {
        id: FileId,
        reply: oneshot::Sender<Option<FileEntry>>,
    },

    GetProgress {
        reply: oneshot::Sender<QueueProgress>,
    },
}

/// 按 id 索引的文件进度
pub type ProgressMap = HashMap<FileId, u8>;

// 确保类型可以跨线程发送
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<FileEntry>();
        assert_send::<EngineEvent>();
        assert_send::<QueueEvent>();
        assert_send::<QueueCommand>();
    }
};
