//! Spectra Core - streaming spectrogram decode/render pipeline
//!
//! Fetches an audio source, decodes it, and streams the samples through a
//! lock-free ring to a long-lived rendering worker that owns the paint
//! surface. Every decode/render attempt runs under a [`Generation`]; starting
//! a new attempt bumps the generation so that anything still in flight from
//! the old one is recognized as stale and dropped.
//!
//! # Threads
//!
//! ```text
//! ┌──────────────────┐  WorkerMessage   ┌────────────────────┐
//! │ SpectrogramPipe- │ ───────────────► │ spectrogram-worker │
//! │ line (tokio)     │                  │ (owns PaintSurface)│
//! └──────────────────┘                  └────────────────────┘
//!        │ spawn per generation                  ▲
//!        ▼                                       │ tagged segments (rtrb)
//! ┌──────────────────┐                           │
//! │ capture-g{N}     │ ──────────────────────────┘
//! └──────────────────┘
//!        all three read/write the ControlState atomics
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod gc;
pub mod pipeline;
pub mod source;
pub mod sync;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PipelineError, Result, SourceError};
pub use pipeline::{RunPhase, SpectrogramPipeline};
pub use types::*;
pub use worker::{PaintSurface, RenderWorker, WorkerLink, WorkerMessage};
