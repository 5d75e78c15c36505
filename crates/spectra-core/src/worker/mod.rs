//! Rendering worker
//!
//! The worker is a long-lived thread that owns the [`PaintSurface`] after
//! the one-time [`WorkerMessage::Setup`] handover. It reads generation-tagged
//! segments from the sample ring and forwards them to the surface, honoring:
//!
//! - a `RegenerateSpectrogram` older than the current generation is dropped
//! - ring segments older than the current generation are recycled unread
//! - every newly observed generation is acknowledged with `mark_worker_idle`
//! - a pass is finished only after `processor_complete` for its generation
//!   and after every segment of that generation has been painted

mod messages;
mod thread;

pub use messages::{MessageKind, WorkerMessage, WorkerSetup};
pub use thread::RenderWorker;

use crate::error::Result;
use crate::types::{AudioInformation, CanvasScale, CanvasSize, Generation, SpectrogramOptions};

/// Black-box painter driven by the worker
///
/// FFT, windowing and color mapping all live behind this trait.
pub trait PaintSurface: Send {
    /// A repaint pass for `generation` starts; earlier output is obsolete
    fn begin(&mut self, generation: Generation, options: &SpectrogramOptions, audio: &AudioInformation);

    /// Next block of mono samples for the pass
    fn paint(&mut self, generation: Generation, samples: &[f32]);

    /// Every sample of the pass has been painted
    fn finish(&mut self, generation: Generation);

    fn resize(&mut self, size: CanvasSize, scale: CanvasScale);
}

/// Sending half of the pipeline-to-worker channel
pub trait WorkerLink: Send + Sync {
    fn post(&self, message: WorkerMessage) -> Result<()>;
}
