use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the listing core.
///
/// `NotFound`, `HashingDisabled` and `FileTooLarge` are expected,
/// user-visible outcomes rendered into the response body. Only
/// `InvalidDirectory` is fatal, and only at construction time.
#[derive(Debug, Error)]
pub enum ListerError {
    #[error("Invalid file or directory")]
    NotFound,
    #[error("Hashing disabled.")]
    HashingDisabled,
    #[error("File is too large.")]
    FileTooLarge,
    #[error("\"{}\" is not a valid directory", .0.display())]
    InvalidDirectory(PathBuf),
}

impl ListerError {
    /// Numeric code carried in JSON error bodies of the hash endpoint.
    pub fn hash_error_code(&self) -> Option<u8> {
        match self {
            ListerError::HashingDisabled => Some(0),
            ListerError::FileTooLarge => Some(1),
            _ => None,
        }
    }
}
