//! Pipeline error types

use std::path::PathBuf;
use thiserror::Error;

use crate::types::Generation;

/// Errors from fetching or decoding an audio source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request for {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("HTTP request for {url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to read audio file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio decode failed: {0}")]
    Decode(String),
}

/// Errors surfaced by [`crate::SpectrogramPipeline`]
///
/// Stale-generation races are deliberately absent: a superseded setup or
/// completion is expected during rapid interaction and is absorbed silently.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An operation that needs a connected worker ran before `connect`
    #[error("Pipeline not initialized: call connect() before {operation}()")]
    NotInitialized { operation: &'static str },

    /// `connect` ran twice; the paint surface can only be handed over once
    #[error("Pipeline already connected: the paint surface has been transferred to the worker")]
    AlreadyConnected,

    /// `regenerate_spectrogram` ran before any source was loaded successfully
    #[error("No audio source loaded")]
    NoSource,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Rendering worker disconnected")]
    WorkerDisconnected,

    #[error("Timed out waiting for {waiting_for} ({generation})")]
    SyncTimeout {
        waiting_for: &'static str,
        generation: Generation,
    },

    #[error("Failed to spawn {name} thread")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::TaskFailed(e.to_string())
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
