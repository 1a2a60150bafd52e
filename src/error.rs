// src/error.rs

use std::{fmt, io, path::PathBuf};

/// Pipeline stage an error was raised in. Used for the single terminal error
/// report a failed run produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Decompress,
    Parse,
    Filter,
    Save,
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Decompress => "decompress",
            Stage::Parse => "parse",
            Stage::Filter => "filter",
            Stage::Save => "save",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a download attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("GET {url} returned HTTP status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("GET {url} failed")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("writing download to {path:?} failed")]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("{path:?} is not a valid gzip stream")]
    Decompression {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed row at line {line}: {detail}")]
    MalformedRow { line: u64, detail: String },

    #[error("column {column:?} is not present in the header")]
    MissingColumn { column: String },

    #[error("invalid filter: {detail}")]
    InvalidFilter { detail: String },

    #[error("no rows matched {filter}; nothing to save")]
    EmptyResult { filter: String },

    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stage this error belongs to when the caller has not attached one.
    /// `Io` errors are raised by several stages, so the pipeline tags those
    /// itself via [`StageError`].
    pub fn default_stage(&self) -> Stage {
        match self {
            PipelineError::Transfer(_) => Stage::Fetch,
            PipelineError::Decompression { .. } => Stage::Decompress,
            PipelineError::MalformedRow { .. } => Stage::Parse,
            PipelineError::MissingColumn { .. } | PipelineError::InvalidFilter { .. } => {
                Stage::Filter
            }
            PipelineError::EmptyResult { .. } | PipelineError::Io { .. } => Stage::Save,
        }
    }
}

/// A [`PipelineError`] tagged with the stage that raised it.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}

impl StageError {
    pub fn new(stage: Stage, source: PipelineError) -> Self {
        Self { stage, source }
    }
}

impl From<PipelineError> for StageError {
    fn from(source: PipelineError) -> Self {
        Self {
            stage: source.default_stage(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
