//! Cross-thread coordination
//!
//! - [`ControlState`]: lock-free control flags and the generation counter
//! - [`sample_ring`]: generation-tagged SPSC sample transport

mod control;
mod ring;

pub use control::{ControlState, SyncTiming};
pub use ring::{sample_ring, SampleReader, SampleWriter, Segment};
