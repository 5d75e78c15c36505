//! Messages from the pipeline to the rendering worker

use std::sync::Arc;

use super::PaintSurface;
use crate::sync::{ControlState, SampleReader};
use crate::types::{AudioInformation, CanvasScale, CanvasSize, Generation, SpectrogramOptions};

/// One-time handover of everything the worker owns for its lifetime
pub struct WorkerSetup {
    pub control: Arc<ControlState>,
    pub samples: SampleReader,
    pub surface: Box<dyn PaintSurface>,
}

/// Commands accepted by the rendering worker
pub enum WorkerMessage {
    /// Transfers the paint surface and ring reader; sent exactly once
    Setup(WorkerSetup),

    /// Start a repaint pass scoped to `generation`
    RegenerateSpectrogram {
        options: SpectrogramOptions,
        audio_information: AudioInformation,
        generation: Generation,
    },

    /// Geometry only, independent of any generation
    ResizeCanvas { size: CanvasSize, scale: CanvasScale },

    /// Stop the worker thread
    Shutdown,
}

/// Payload-free discriminant of a [`WorkerMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Setup,
    RegenerateSpectrogram,
    ResizeCanvas,
    Shutdown,
}

impl WorkerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            WorkerMessage::Setup(_) => MessageKind::Setup,
            WorkerMessage::RegenerateSpectrogram { .. } => MessageKind::RegenerateSpectrogram,
            WorkerMessage::ResizeCanvas { .. } => MessageKind::ResizeCanvas,
            WorkerMessage::Shutdown => MessageKind::Shutdown,
        }
    }

    /// Generation the message is scoped to, if any
    pub fn generation(&self) -> Option<Generation> {
        match self {
            WorkerMessage::RegenerateSpectrogram { generation, .. } => Some(*generation),
            _ => None,
        }
    }
}

impl std::fmt::Debug for WorkerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerMessage::Setup(setup) => f
                .debug_struct("Setup")
                .field("control", &setup.control)
                .finish_non_exhaustive(),
            WorkerMessage::RegenerateSpectrogram {
                options,
                audio_information,
                generation,
            } => f
                .debug_struct("RegenerateSpectrogram")
                .field("options", options)
                .field("audio_information", audio_information)
                .field("generation", generation)
                .finish(),
            WorkerMessage::ResizeCanvas { size, scale } => f
                .debug_struct("ResizeCanvas")
                .field("size", size)
                .field("scale", scale)
                .finish(),
            WorkerMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}
