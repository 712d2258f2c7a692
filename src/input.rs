//! Checks applied to image files before they are read into memory.

use std::path::Path;
use thiserror::Error;

/// Extensions accepted when none are configured.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Largest file accepted when no limit is configured (16 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File too large: {0} bytes (max: {1})")]
    FileTooLarge(u64, u64),
}

impl InputError {
    pub fn kind(&self) -> &'static str {
        match self {
            InputError::Io(_) => "io_error",
            InputError::UnsupportedFileType(_) => "unsupported_file_type",
            InputError::FileTooLarge(..) => "file_too_large",
        }
    }
}

/// Which files may be handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPolicy {
    pub allowed_extensions: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for InputPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl InputPolicy {
    /// Extension match is case-insensitive.
    pub fn check_extension(&self, path: &Path) -> Result<(), InputError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        if self.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(extension)) {
            Ok(())
        } else {
            Err(InputError::UnsupportedFileType(path.display().to_string()))
        }
    }

    pub fn check_size(&self, size: u64) -> Result<(), InputError> {
        if size > self.max_file_bytes {
            return Err(InputError::FileTooLarge(size, self.max_file_bytes));
        }
        Ok(())
    }

    /// Validates and reads one image file.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, InputError> {
        self.check_extension(path)?;
        let size = tokio::fs::metadata(path).await?.len();
        self.check_size(size)?;
        Ok(tokio::fs::read(path).await?)
    }
}
