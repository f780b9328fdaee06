pub mod config;
pub mod hosted;
pub mod logging;
pub mod queue;
pub mod utils;

// 重新导出核心类型
pub use queue::{
    aggregate,
    EngineEvent,
    FileCandidate,
    FileEntry,
    FileId,
    FileQueueStore,
    FileStatus,
    QueueConfig,
    QueueError,
    QueueEvent,
    QueueProgress,
    UploadEngine,
    UploadQueue,
    UploadQueueHandle,
    Result,
};

pub use config::{CloudConfig, ConfigError};
pub use hosted::{HostedClient, HostedEngine, UploadOptions};
