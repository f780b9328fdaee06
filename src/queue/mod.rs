mod aggregator;
mod engine;
mod errors;
mod manager;
mod store;
mod worker;
pub mod types;
pub mod validation;

pub use aggregator::{aggregate, ActionAvailability, QueueProgress};
pub use engine::{EngineConstraints, UploadEngine};
pub use errors::{QueueError, Result};
pub use manager::{QueueConfig, UploadQueue, UploadQueueHandle};
pub use store::{upload_error_message, FileQueueStore, StatusChange};
pub use types::{
    AdmissionReport, EngineEvent, FileCandidate, FileDescriptor, FileEntry, FileId, FileSource, FileStatus,
    QueueEvent, Rejection, Snapshot, Thumbnail, UploadResponse,
};
pub use validation::{
    validate_candidate, validate_file, validate_files, is_image_file, ValidationError, ValidationOptions,
    DEFAULT_ALLOWED_TYPES,
};
