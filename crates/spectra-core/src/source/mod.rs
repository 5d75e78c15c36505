//! Audio sources: fetching raw bytes and decoding them

mod decode;
mod fetch;

pub use decode::{AudioDecoder, DecodedAudio, SymphoniaDecoder};
pub use fetch::{extension_hint, ByteFetcher, SourceFetcher};

use std::sync::Arc;

use crate::types::AudioMetadata;

/// A loaded source: where it came from, its raw bytes, and what it decoded to
///
/// The bytes are immutable and shared; every decode gets its own handle so
/// `regenerate_spectrogram` can re-render without a refetch.
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub src: String,
    bytes: Arc<[u8]>,
    pub metadata: AudioMetadata,
}

impl AudioSource {
    pub fn new(src: impl Into<String>, bytes: Arc<[u8]>, metadata: AudioMetadata) -> Self {
        Self {
            src: src.into(),
            bytes,
            metadata,
        }
    }

    /// Fresh handle to the cached bytes, for one consuming decode
    pub fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }
}
