//! Error types for bundle persistence.
//!
//! These stay inside the crate boundary: the public `Persistence` surface
//! converts every failure into a `bool` or `Option` result.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while saving or loading bundles.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode bundle: {0}")]
    Encode(String),

    #[error("failed to decode bundle: {0}")]
    Decode(String),

    #[error("unsupported bundle schema version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("bundle cap reached: {count} of {max} files on disk")]
    CapacityExceeded { count: usize, max: usize },

    #[error("path is outside the bundle store: {0}")]
    OutsideStore(PathBuf),
}

impl PersistenceError {
    /// Whether the file behind this error should be treated as lost data.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PersistenceError::Decode(_) | PersistenceError::UnsupportedVersion { .. }
        )
    }
}

/// Result type for persistence operations
pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PersistenceError::CapacityExceeded { count: 5, max: 5 };
        assert_eq!(err.to_string(), "bundle cap reached: 5 of 5 files on disk");

        let err = PersistenceError::UnsupportedVersion {
            found: 9,
            expected: 1,
        };
        assert_eq!(
            err.to_string(),
            "unsupported bundle schema version 9 (expected 1)"
        );
    }

    #[test]
    fn test_is_corruption() {
        assert!(PersistenceError::Decode("eof".into()).is_corruption());
        assert!(!PersistenceError::CapacityExceeded { count: 1, max: 1 }.is_corruption());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(!PersistenceError::from(io).is_corruption());
    }
}
