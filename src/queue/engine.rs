use async_trait::async_trait;
use super::errors::Result;
use super::types::{FileCandidate, FileId};
use super::validation::{ValidationOptions, DEFAULT_MAX_FILE_SIZE};

/// Restrictions the upload engine is configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConstraints {
    pub max_file_size: u64,
    pub max_files: usize,
    pub min_files: usize,
    /// Exact MIME types, or wildcards such as `image/*`
    pub allowed_types: Vec<String>,
}

impl Default for EngineConstraints {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: 10,
            min_files: 1,
            allowed_types: vec!["image/*".to_string()],
        }
    }
}

impl EngineConstraints {
    /// Validation options equivalent to these constraints. The allow-list is
    /// always replaced: wildcards are already covered by the `image/` prefix
    /// rule, so `["image/*"]` yields an empty list (any image).
    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions::default()
            .with_max_size(self.max_file_size)
            .with_allowed_types(self.allowed_types.iter().filter(|t| !t.ends_with("/*")).cloned())
    }
}

/// The component that actually moves bytes.
///
/// Implementations report what happens through
/// [`EngineEvent`](super::types::EngineEvent)s on the channel they were built with.
/// Calls return once the request is accepted, not once the transfer ends.
#[async_trait]
pub trait UploadEngine: Send + Sync + 'static {
    async fn add_file(&self, id: FileId, file: &FileCandidate) -> Result<()>;

    /// Start every file that has not been started yet.
    async fn upload(&self) -> Result<()>;

    /// Stop in-flight transfers. Once this returns, cancelled transfers
    /// emit no further events; anything they sent earlier is already queued.
    async fn cancel_all(&self) -> Result<()>;

    async fn retry_upload(&self, id: FileId) -> Result<()>;

    async fn remove_file(&self, id: FileId) -> Result<()>;

    fn constraints(&self) -> EngineConstraints {
        EngineConstraints::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints() {
        let constraints = EngineConstraints::default();

        assert_eq!(constraints.max_file_size, 10 * 1024 * 1024);
        assert_eq!(constraints.max_files, 10);
        assert_eq!(constraints.min_files, 1);
    }

    #[test]
    fn test_wildcards_dropped_from_allow_list() {
        let constraints = EngineConstraints {
            allowed_types: vec!["image/*".into(), "image/png".into()],
            ..Default::default()
        };

        assert_eq!(constraints.validation_options().allowed_types, vec!["image/png".to_string()]);
    }

    #[test]
    fn test_wildcard_only_accepts_any_image() {
        let options = EngineConstraints::default().validation_options();
        assert!(options.allowed_types.is_empty());

        let file = crate::queue::FileCandidate::from_bytes("a.svg", "image/svg+xml", vec![0u8; 10]);
        assert!(crate::queue::validate_file(Some(&file), &options).is_ok());
    }
}
