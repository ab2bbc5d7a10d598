//! Error types for the gallery scanner

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur during scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorKind {
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// Metadata store operation failed
    DatabaseError,
    /// Image header could not be decoded
    DecodeError,
    /// Invalid path encoding or record contents
    InvalidPath,
    /// Invalid configuration value
    ConfigError,
    /// Unknown error
    Unknown,
}

/// Represents an error that occurred during scanning
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct ScanError {
    /// The kind of error
    pub kind: ScanErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl ScanError {
    /// Create a new scan error
    pub fn new(kind: ScanErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(path: PathBuf) -> Self {
        Self::new(
            ScanErrorKind::NotFound,
            Some(path.clone()),
            format!("Not found: {:?}", path),
        )
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::IoError, path, message)
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::DatabaseError, None, message)
    }

    /// Create an image decode error
    pub fn decode_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::DecodeError, Some(path), message)
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::ConfigError, None, message)
    }

    /// Attach a path to an error that was created without one
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ScanErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => ScanErrorKind::NotFound,
            _ => ScanErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_error(err.to_string())
    }
}

impl From<image::ImageError> for ScanError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => io.into(),
            other => Self::new(ScanErrorKind::DecodeError, None, other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        Self::config_error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let err: ScanError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(err.kind, ScanErrorKind::NotFound);

        let err: ScanError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(err.kind, ScanErrorKind::PermissionDenied);

        let err: ScanError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert_eq!(err.kind, ScanErrorKind::IoError);
    }

    #[test]
    fn test_with_path_keeps_existing_path() {
        let err = ScanError::not_found(PathBuf::from("/a")).with_path("/b");
        assert_eq!(err.path, Some(PathBuf::from("/a")));

        let err = ScanError::database_error("locked").with_path("/b");
        assert_eq!(err.path, Some(PathBuf::from("/b")));
    }
}
