//! Errors surfaced to callers of the worker.

use crate::{expression, geojson, vector_tile};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Query(String),

    /// The fetch was cancelled through `abort_tile`. Never reported as a failure.
    #[error("Aborted.")]
    Aborted,

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// The worker thread stopped before answering.
    #[error("Worker thread is gone.")]
    WorkerGone,
}

impl From<expression::Error> for Error {
    fn from(error: expression::Error) -> Self {
        Self::Parse(error.to_string())
    }
}

impl From<vector_tile::DecodeError> for Error {
    fn from(error: vector_tile::DecodeError) -> Self {
        Self::Parse(error.to_string())
    }
}

impl From<geojson::Error> for Error {
    fn from(error: geojson::Error) -> Self {
        Self::Parse(error.to_string())
    }
}

impl From<futures::future::Aborted> for Error {
    fn from(_: futures::future::Aborted) -> Self {
        Self::Aborted
    }
}

impl From<futures::channel::oneshot::Canceled> for Error {
    fn from(_: futures::channel::oneshot::Canceled) -> Self {
        Self::Dependency("Dependency channel was closed.".to_owned())
    }
}

impl Error {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}
