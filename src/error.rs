//! Error types for the upgrade helpers

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no version tag found on image {url}")]
    MissingVersionTag { url: String },

    #[error("target version tag must not be empty")]
    EmptyTargetTag,

    #[error("marshal old object failed: {0}")]
    SerializeOldFailed(#[source] serde_json::Error),

    #[error("marshal new object failed: {0}")]
    SerializeNewFailed(#[source] serde_json::Error),

    #[error("patch computation failed: {0}")]
    PatchComputationFailed(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingVersionTag { .. } => "MissingVersionTag",
            Error::EmptyTargetTag => "EmptyTargetTag",
            Error::SerializeOldFailed(_) => "SerializeOldFailed",
            Error::SerializeNewFailed(_) => "SerializeNewFailed",
            Error::PatchComputationFailed(_) => "PatchComputationFailed",
            Error::Io { .. } => "Io",
            Error::ManifestParse { .. } => "ManifestParse",
        }
    }
}
