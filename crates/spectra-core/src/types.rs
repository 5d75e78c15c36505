//! Common types for Spectra
//!
//! Generation tokens, display options, and the metadata handed between the
//! pipeline, the capture thread, and the rendering worker.

use serde::{Deserialize, Serialize};

/// Default number of samples per ring segment (about one second of audio)
///
/// Too large and the worker paints in big, late chunks; too small and the
/// per-segment signalling overhead dominates.
pub const DEFAULT_SEGMENT_SIZE: usize = 41_100;

/// Default number of segments the sample ring can hold
pub const DEFAULT_RING_SEGMENTS: usize = 4;

/// Token identifying exactly one decode/render attempt
///
/// Generations are handed out by [`crate::sync::ControlState::reset`] and
/// only ever move forward. Anything tagged with a generation older than the
/// newest one a reader has seen is stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation `connect` renders under
    pub const INITIAL: Generation = Generation(0);

    /// Raw counter value
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    /// The generation after this one
    #[inline]
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    /// Encode as a control-region flag tag (`0` is reserved for "never set")
    #[inline]
    pub(crate) fn tag(self) -> u64 {
        self.0 + 1
    }

    /// Decode a control-region flag tag
    #[inline]
    pub(crate) fn from_tag(tag: u64) -> Option<Self> {
        tag.checked_sub(1).map(Generation)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// FFT window functions understood by the paint surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    #[default]
    Hann,
    Hamming,
    Blackman,
    Bartlett,
    Welch,
    Rectangular,
}

impl WindowFunction {
    /// All window functions (for UI / CLI enumeration)
    pub const ALL: [WindowFunction; 6] = [
        WindowFunction::Hann,
        WindowFunction::Hamming,
        WindowFunction::Blackman,
        WindowFunction::Bartlett,
        WindowFunction::Welch,
        WindowFunction::Rectangular,
    ];

    /// Lowercase name, as used in config files
    pub fn name(&self) -> &'static str {
        match self {
            WindowFunction::Hann => "hann",
            WindowFunction::Hamming => "hamming",
            WindowFunction::Blackman => "blackman",
            WindowFunction::Bartlett => "bartlett",
            WindowFunction::Welch => "welch",
            WindowFunction::Rectangular => "rectangular",
        }
    }
}

impl std::str::FromStr for WindowFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|w| w.name() == wanted)
            .ok_or_else(|| format!("Unknown window function: {}", s))
    }
}

impl std::fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Display options for one repaint
///
/// Passed by value into every render call; the worker never sees a
/// partially-updated set of options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramOptions {
    /// FFT window size in samples
    pub window_size: usize,
    /// Overlap between consecutive windows in samples
    pub window_overlap: usize,
    pub window_function: WindowFunction,
    pub mel_scale: bool,
    pub brightness: f64,
    pub contrast: f64,
    /// Color map identifier (empty = surface default)
    pub color_map: String,
}

impl Default for SpectrogramOptions {
    fn default() -> Self {
        Self {
            window_size: 512,
            window_overlap: 0,
            window_function: WindowFunction::Hann,
            mel_scale: false,
            brightness: 0.0,
            contrast: 1.0,
            color_map: String::new(),
        }
    }
}

/// Decoded format metadata, returned to callers of `connect`/`change_source`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    /// Duration in seconds
    pub duration: f64,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count of the source (samples are mixed to mono for painting)
    pub channel_count: u16,
}

impl AudioMetadata {
    /// Total frames in the source
    pub fn frame_count(&self) -> u64 {
        (self.duration * self.sample_rate as f64).round() as u64
    }
}

/// Sample range the worker should expect for a repaint pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInformation {
    pub start_sample: u64,
    pub end_sample: u64,
    pub sample_rate: u32,
}

impl From<&AudioMetadata> for AudioInformation {
    fn from(meta: &AudioMetadata) -> Self {
        Self {
            start_sample: 0,
            end_sample: meta.frame_count(),
            sample_rate: meta.sample_rate,
        }
    }
}

/// Paint surface size in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// How the spectrogram is fitted to the paint surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanvasScale {
    /// Fill the surface, ignoring aspect ratio
    #[default]
    Stretch,
    /// 1:1 until one dimension overflows
    Natural,
    /// 1:1 with the height capped at the FFT window
    Original,
}
