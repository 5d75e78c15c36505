//! Audio decoding (bytes -> mono f32 samples + format metadata)

use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::SourceError;
use crate::types::AudioMetadata;

/// Fully decoded source, mixed down to mono
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub metadata: AudioMetadata,
}

/// Decodes a complete audio file held in memory
///
/// Decoding consumes its input stream, which is why callers pass a fresh
/// handle of the shared byte buffer for every decode.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: Arc<[u8]>, hint: Option<&str>) -> Result<DecodedAudio, SourceError>;
}

/// symphonia-backed decoder supporting every format symphonia was built with
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: Arc<[u8]>, hint: Option<&str>) -> Result<DecodedAudio, SourceError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut probe_hint = Hint::new();
        if let Some(ext) = hint {
            probe_hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&probe_hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| SourceError::UnsupportedFormat(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SourceError::UnsupportedFormat("No audio track found".to_string()))?;
        let track_id = track.id;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| SourceError::UnsupportedFormat("Unknown sample rate".to_string()))?;
        let mut channels = track.codec_params.channels.map(|c| c.count());

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| SourceError::UnsupportedFormat(e.to_string()))?;

        let mut mono: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(SourceError::Decode(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(SourceError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let channel_count = spec.channels.count().max(1);
            channels.get_or_insert(channel_count);

            let needed = decoded.capacity() * channel_count;
            if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                mix_to_mono(buf.samples(), channel_count, &mut mono);
            }
        }

        let channel_count = channels.unwrap_or(1).max(1) as u16;
        let metadata = AudioMetadata {
            duration: mono.len() as f64 / sample_rate as f64,
            sample_rate,
            channel_count,
        };

        log::info!(
            "Decoded {:.2}s of audio ({} Hz, {} ch)",
            metadata.duration,
            metadata.sample_rate,
            metadata.channel_count
        );

        Ok(DecodedAudio {
            samples: mono,
            metadata,
        })
    }
}

/// Average interleaved frames into `out`
fn mix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}
