//! In-memory fakes shared by the unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, SourceError};
use crate::source::{AudioDecoder, ByteFetcher, DecodedAudio};
use crate::types::{AudioInformation, AudioMetadata, CanvasScale, CanvasSize, Generation, SpectrogramOptions};
use crate::worker::{MessageKind, PaintSurface, RenderWorker, WorkerLink, WorkerMessage};

pub const FAKE_SAMPLE_RATE: u32 = 8000;

/// Serves byte buffers from a map and counts fetches
#[derive(Default)]
pub struct MemoryFetcher {
    sources: Mutex<HashMap<String, Arc<[u8]>>>,
    delays: Mutex<HashMap<String, Duration>>,
    fetches: AtomicUsize,
}

impl MemoryFetcher {
    pub fn with(sources: &[(&str, Vec<u8>)]) -> Arc<Self> {
        let fetcher = Self::default();
        {
            let mut map = fetcher.sources.lock().unwrap();
            for (src, bytes) in sources {
                map.insert(src.to_string(), Arc::from(bytes.as_slice()));
            }
        }
        Arc::new(fetcher)
    }

    /// Block every fetch of `src` for `delay`
    pub fn delay(&self, src: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(src.to_string(), delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ByteFetcher for MemoryFetcher {
    fn fetch(&self, src: &str) -> std::result::Result<Arc<[u8]>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(src).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.sources
            .lock()
            .unwrap()
            .get(src)
            .cloned()
            .ok_or_else(|| SourceError::HttpStatus {
                url: src.to_string(),
                status: 404,
            })
    }
}

/// Treats every byte as one mono sample (`byte / 255`) at 8 kHz
pub struct ByteDecoder;

impl AudioDecoder for ByteDecoder {
    fn decode(&self, bytes: Arc<[u8]>, _hint: Option<&str>) -> std::result::Result<DecodedAudio, SourceError> {
        if bytes.is_empty() {
            return Err(SourceError::Decode("empty input".to_string()));
        }
        let samples: Vec<f32> = bytes.iter().map(|&b| b as f32 / 255.0).collect();
        Ok(DecodedAudio {
            metadata: AudioMetadata {
                duration: samples.len() as f64 / FAKE_SAMPLE_RATE as f64,
                sample_rate: FAKE_SAMPLE_RATE,
                channel_count: 1,
            },
            samples,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Begin {
        generation: Generation,
        options: SpectrogramOptions,
        audio: AudioInformation,
    },
    Paint {
        generation: Generation,
        samples: Vec<f32>,
    },
    Finish {
        generation: Generation,
    },
    Resize {
        size: CanvasSize,
        scale: CanvasScale,
    },
}

impl SurfaceEvent {
    pub fn generation(&self) -> Option<Generation> {
        match self {
            SurfaceEvent::Begin { generation, .. }
            | SurfaceEvent::Paint { generation, .. }
            | SurfaceEvent::Finish { generation } => Some(*generation),
            SurfaceEvent::Resize { .. } => None,
        }
    }
}

/// Paint surface that records every call
pub struct RecordingSurface {
    events: Arc<Mutex<Vec<SurfaceEvent>>>,
    paint_delay: Option<Duration>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            paint_delay: None,
        }
    }

    /// Sleep on every paint call, to keep a pass in flight
    pub fn slow(delay: Duration) -> Self {
        Self {
            paint_delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SurfaceEvent>>> {
        Arc::clone(&self.events)
    }
}

impl PaintSurface for RecordingSurface {
    fn begin(&mut self, generation: Generation, options: &SpectrogramOptions, audio: &AudioInformation) {
        self.events.lock().unwrap().push(SurfaceEvent::Begin {
            generation,
            options: options.clone(),
            audio: *audio,
        });
    }

    fn paint(&mut self, generation: Generation, samples: &[f32]) {
        if let Some(delay) = self.paint_delay {
            std::thread::sleep(delay);
        }
        self.events.lock().unwrap().push(SurfaceEvent::Paint {
            generation,
            samples: samples.to_vec(),
        });
    }

    fn finish(&mut self, generation: Generation) {
        self.events.lock().unwrap().push(SurfaceEvent::Finish { generation });
    }

    fn resize(&mut self, size: CanvasSize, scale: CanvasScale) {
        self.events.lock().unwrap().push(SurfaceEvent::Resize { size, scale });
    }
}

/// Forwards to a real worker, recording what was posted
pub struct SpyLink {
    inner: RenderWorker,
    posted: Mutex<Vec<(MessageKind, Option<Generation>)>>,
}

impl SpyLink {
    pub fn spawn() -> Arc<Self> {
        Arc::new(Self {
            inner: RenderWorker::spawn(Duration::from_millis(1)).unwrap(),
            posted: Mutex::new(Vec::new()),
        })
    }

    pub fn posted(&self) -> Vec<(MessageKind, Option<Generation>)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.posted().iter().filter(|(k, _)| *k == kind).count()
    }

    /// Generations of every `RegenerateSpectrogram`, in posting order
    pub fn regenerations(&self) -> Vec<Generation> {
        self.posted()
            .into_iter()
            .filter(|(k, _)| *k == MessageKind::RegenerateSpectrogram)
            .filter_map(|(_, g)| g)
            .collect()
    }
}

impl WorkerLink for SpyLink {
    fn post(&self, message: WorkerMessage) -> Result<()> {
        self.posted
            .lock()
            .unwrap()
            .push((message.kind(), message.generation()));
        self.inner.post(message)
    }
}
