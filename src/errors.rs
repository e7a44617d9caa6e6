//! Error types for per-object file operations.

use thiserror::Error;

/// Outcome of a failed per-object operation.
///
/// OS error text is carried verbatim so the UI can display it; the object
/// that produced the failure also retains it via `last_error_message()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsOpError {
    /// Generic OS failure with the OS message attached.
    #[error("{0}")]
    Fail(String),

    /// The object was gone by the time the operation ran.
    #[error("object does not exist: {0}")]
    ObjectDoesNotExist(String),

    /// The destination path is already occupied.
    #[error("target already exists: {0}")]
    TargetAlreadyExists(String),

    /// A rename was attempted across volume boundaries. Callers fall back
    /// to copy + delete when they see this.
    #[error("source and destination are on different volumes")]
    CrossVolume,
}

impl FsOpError {
    /// Wraps an I/O error, keeping only its display text.
    pub fn os(err: &std::io::Error) -> Self {
        Self::Fail(err.to_string())
    }
}

impl serde::Serialize for FsOpError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias for per-object operations.
pub type FsOpResult<T> = Result<T, FsOpError>;
