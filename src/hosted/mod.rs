mod client;
mod engine;
mod errors;
mod progress_stream;

pub use client::{parse_upload_response, HostedClient, UploadOptions, DEFAULT_TIMEOUT};
pub use engine::{HostedEngine, DEFAULT_CONCURRENCY};
pub use errors::{HostedError, Result};
pub use progress_stream::{EventGate, ProgressStream};
