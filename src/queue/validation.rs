use thiserror::Error;
use super::types::FileCandidate;

/// 默认最大文件大小 10MB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// 默认允许的图片类型
pub const DEFAULT_ALLOWED_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

const MEBIBYTE: f64 = 1024.0 * 1024.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file provided")]
    NoFileProvided,

    #[error("File size exceeds {}MB limit", whole_mebibytes(.limit))]
    FileTooLarge {
        size: u64,
        limit: u64,
    },

    #[error("Only image files are allowed")]
    NotAnImage,

    #[error("File type {mime_type} is not allowed")]
    UnsupportedType {
        mime_type: String,
    },
}

fn whole_mebibytes(bytes: &u64) -> u64 {
    (*bytes as f64 / MEBIBYTE).round() as u64
}

/// 校验选项
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub max_size: u64,
    /// 精确匹配的 MIME 类型，为空时接受任意 `image/*`
    pub allowed_types: Vec<String>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_FILE_SIZE,
            allowed_types: DEFAULT_ALLOWED_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl ValidationOptions {
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_allowed_types<I, S>(mut self, allowed_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_types = allowed_types.into_iter().map(Into::into).collect();
        self
    }
}

pub fn is_image_file(file: &FileCandidate) -> bool {
    file.mime_type.starts_with("image/")
}

/// 校验单个文件，返回第一个不满足的规则
pub fn validate_file<'a>(
    file: Option<&'a FileCandidate>,
    options: &ValidationOptions,
) -> Result<&'a FileCandidate, ValidationError> {
    let file = file.ok_or(ValidationError::NoFileProvided)?;
    check(file, options)?;
    Ok(file)
}

/// 校验并取得所有权，用于入队
pub fn validate_candidate(
    file: Option<FileCandidate>,
    options: &ValidationOptions,
) -> Result<FileCandidate, ValidationError> {
    let file = file.ok_or(ValidationError::NoFileProvided)?;
    check(&file, options)?;
    Ok(file)
}

fn check(file: &FileCandidate, options: &ValidationOptions) -> Result<(), ValidationError> {
    if file.size > options.max_size {
        return Err(ValidationError::FileTooLarge {
            size: file.size,
            limit: options.max_size,
        });
    }

    if !is_image_file(file) {
        return Err(ValidationError::NotAnImage);
    }

    if !options.allowed_types.is_empty() && !options.allowed_types.iter().any(|t| *t == file.mime_type) {
        return Err(ValidationError::UnsupportedType {
            mime_type: file.mime_type.clone(),
        });
    }

    Ok(())
}

/// 批量校验结果
#[derive(Debug, Default)]
pub struct ValidatedBatch {
    pub valid: Vec<FileCandidate>,
    pub invalid: Vec<(Option<FileCandidate>, ValidationError)>,
}

/// 批量校验，整体不会失败
pub fn validate_files<I>(files: I, options: &ValidationOptions) -> ValidatedBatch
where
    I: IntoIterator<Item = Option<FileCandidate>>,
{
    let mut batch = ValidatedBatch::default();

    for file in files {
        match file {
            Some(file) => match check(&file, options) {
                Ok(()) => batch.valid.push(file),
                Err(err) => batch.invalid.push((Some(file), err)),
            },
            None => batch.invalid.push((None, ValidationError::NoFileProvided)),
        }
    }

    batch
}
