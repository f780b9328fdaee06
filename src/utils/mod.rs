pub mod format;
pub mod retry;

pub use format::{format_bytes, format_bytes_with, format_speed, format_time, calculate_time_remaining};
pub use retry::{retry_with_config, RetryConfig, RetryStrategy, RetryBuilder};
