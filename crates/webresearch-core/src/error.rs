use std::path::PathBuf;

use thiserror::Error;

/// Core error type for the research workflow.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("planning failed: {0}")]
    Planning(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("checkpoint I/O error at {path}: {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed checkpoint artifact {path}: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("a run for task '{0}' is already active")]
    AlreadyRunning(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn checkpoint_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::CheckpointIo { path, source }
    }

    pub fn malformed(path: PathBuf, reason: impl Into<String>) -> Self {
        Self::MalformedArtifact {
            path,
            reason: reason.into(),
        }
    }
}
