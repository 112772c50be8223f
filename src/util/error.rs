//! Error types for the renderer core.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for scene processing and rendering.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid scene, mesh, material or texture reference
    #[error("Invalid scene configuration: {0}")]
    Configuration(String),

    /// Device-side object could not be created or updated
    #[error("Render resource error: {0}")]
    Resource(String),

    /// Denoising filter failed (non-fatal for the frame loop)
    #[error("Denoiser failed: {0}")]
    Filter(String),

    /// Incremental top-level rebuild attempted on a changed topology
    #[error("Top-level topology changed ({what}): expected {expected}, got {actual}")]
    TopologyChanged {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Scene used before `Scene::process` ran
    #[error("Scene has not been processed")]
    NotProcessed,

    /// No loader registered for the file extension
    #[error("Unsupported scene format: {0}")]
    UnsupportedFormat(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Wavefront OBJ parse error
    #[error("OBJ error: {0}")]
    Obj(#[from] tobj::LoadError),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a device resource error.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Create a denoiser error.
    pub fn filter(msg: impl Into<String>) -> Self {
        Self::Filter(msg.into())
    }
}

/// Result type alias for renderer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::TopologyChanged {
            what: "instances",
            expected: 5,
            actual: 7,
        };
        assert!(e.to_string().contains("5"));
        assert!(e.to_string().contains("7"));

        let e = Error::config("mesh 3 out of range");
        assert!(e.to_string().contains("mesh 3"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
