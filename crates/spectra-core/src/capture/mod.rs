//! Per-generation capture thread binding
//!
//! A [`DecodeGraph`] owns one `capture-g{N}` thread that streams a decoded
//! source into the sample ring under generation N. It replies to the control
//! context only through [`ControlState`] flags:
//!
//! 1. `processor_ready(N)` once it holds the writer and is set up
//! 2. waits for [`DecodeGraph::start`] (or cancellation / supersession)
//! 3. streams samples, checking its cancellation token and the generation
//!    before every block
//! 4. `processor_complete(N)` after the last segment is published
//!
//! The ring's single [`SampleWriter`] lives in a [`WriterSlot`]. A capture
//! thread holds it through a [`WriterLease`] and the lease puts it back on
//! drop, so the next generation cannot start writing until the previous
//! thread has exited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, Thread};

use basedrop::Shared;
use tokio::sync::Notify;

use crate::error::{PipelineError, Result};
use crate::source::DecodedAudio;
use crate::sync::{ControlState, SampleWriter};
use crate::types::Generation;

/// Samples pushed per ring write
const CAPTURE_BLOCK: usize = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// Writer slot
// ─────────────────────────────────────────────────────────────────────────────

/// Parking place for the ring's writer half between capture threads
pub struct WriterSlot {
    writer: Mutex<Option<SampleWriter>>,
    available: Notify,
}

impl WriterSlot {
    pub fn new(writer: SampleWriter) -> Arc<Self> {
        Arc::new(Self {
            writer: Mutex::new(Some(writer)),
            available: Notify::new(),
        })
    }

    fn try_take(&self) -> Option<SampleWriter> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn restore(&self, writer: SampleWriter) {
        *self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(writer);
        self.available.notify_one();
    }

    /// Wait for the previous capture thread to release the writer
    pub async fn acquire(self: &Arc<Self>, control: &ControlState, generation: Generation) -> Result<WriterLease> {
        let wait = async {
            loop {
                if let Some(writer) = self.try_take() {
                    return WriterLease {
                        slot: Arc::clone(self),
                        writer: Some(writer),
                    };
                }
                self.available.notified().await;
            }
        };

        tokio::time::timeout(control.timing().timeout, wait)
            .await
            .map_err(|_| PipelineError::SyncTimeout {
                waiting_for: "sample writer",
                generation,
            })
    }

    pub fn is_available(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

/// Exclusive use of the ring's writer; returns it to the slot on drop
pub struct WriterLease {
    slot: Arc<WriterSlot>,
    writer: Option<SampleWriter>,
}

impl WriterLease {
    fn push_samples(&mut self, generation: Generation, samples: &[f32]) -> usize {
        self.writer
            .as_mut()
            .map_or(0, |w| w.push_samples(generation, samples))
    }

    fn flush(&mut self) -> bool {
        self.writer.as_mut().map_or(true, |w| w.flush())
    }

    fn discard_pending(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.discard_pending();
        }
    }
}

impl std::fmt::Debug for WriterLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterLease")
            .field("has_writer", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            self.slot.restore(writer);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decode graph
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a capture thread receives at spawn
pub struct CaptureSetup {
    pub control: Arc<ControlState>,
    pub writer: WriterLease,
    pub generation: Generation,
}

/// How a capture thread ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Every sample was published and completion was signalled
    Completed,
    /// Its cancellation token fired
    Cancelled,
    /// A newer generation started before it finished
    Superseded,
}

#[derive(Default)]
struct GraphSignals {
    cancelled: AtomicBool,
    started: AtomicBool,
}

/// Handle to one generation's capture thread
pub struct DecodeGraph {
    generation: Generation,
    signals: Arc<GraphSignals>,
    thread: Thread,
    handle: Option<JoinHandle<CaptureOutcome>>,
}

impl DecodeGraph {
    /// Spawn the capture thread; it signals `processor_ready` on its own
    pub fn spawn(setup: CaptureSetup, audio: Shared<DecodedAudio>) -> Result<Self> {
        let generation = setup.generation;
        let signals = Arc::new(GraphSignals::default());
        let name = format!("capture-{}", generation);

        let thread_signals = Arc::clone(&signals);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_capture(setup, audio, thread_signals))
            .map_err(|source| PipelineError::ThreadSpawn { name, source })?;

        Ok(Self {
            generation,
            signals,
            thread: handle.thread().clone(),
            handle: Some(handle),
        })
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Let the capture thread begin streaming
    pub fn start(&self) {
        self.signals.started.store(true, Ordering::Release);
        self.thread.unpark();
    }

    /// Stop sample production at the next block boundary
    pub fn cancel(&self) {
        if !self.signals.cancelled.swap(true, Ordering::AcqRel) {
            log::debug!("Cancelling decode graph {}", self.generation);
        }
        self.thread.unpark();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.cancelled.load(Ordering::Acquire)
    }

    /// Take the join handle (once) so the thread can be joined off the control context
    pub fn take_join(&mut self) -> Option<JoinHandle<CaptureOutcome>> {
        self.handle.take()
    }
}

impl std::fmt::Debug for DecodeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeGraph")
            .field("generation", &self.generation)
            .field("started", &self.signals.started.load(Ordering::Relaxed))
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn run_capture(setup: CaptureSetup, audio: Shared<DecodedAudio>, signals: Arc<GraphSignals>) -> CaptureOutcome {
    let CaptureSetup {
        control,
        mut writer,
        generation,
    } = setup;
    let poll = control.timing().poll_interval;

    let halted = || -> Option<CaptureOutcome> {
        if signals.cancelled.load(Ordering::Acquire) {
            Some(CaptureOutcome::Cancelled)
        } else if !control.is_current(generation) {
            Some(CaptureOutcome::Superseded)
        } else {
            None
        }
    };

    if !control.processor_ready(generation) {
        log::debug!("Capture {} superseded during setup", generation);
        return CaptureOutcome::Superseded;
    }

    while !signals.started.load(Ordering::Acquire) {
        if let Some(outcome) = halted() {
            log::debug!("Capture {} ended before start: {:?}", generation, outcome);
            return outcome;
        }
        thread::park_timeout(poll);
    }

    let samples = &audio.samples;
    let mut offset = 0;
    while offset < samples.len() {
        if let Some(outcome) = halted() {
            writer.discard_pending();
            log::debug!(
                "Capture {} stopped at sample {}/{}: {:?}",
                generation,
                offset,
                samples.len(),
                outcome
            );
            return outcome;
        }

        let end = (offset + CAPTURE_BLOCK).min(samples.len());
        let written = writer.push_samples(generation, &samples[offset..end]);
        offset += written;
        if written == 0 {
            // Ring full: the worker recycles segments as it paints
            thread::park_timeout(poll);
        }
    }

    while !writer.flush() {
        if let Some(outcome) = halted() {
            writer.discard_pending();
            return outcome;
        }
        thread::park_timeout(poll);
    }

    if control.processor_complete(generation) {
        log::debug!("Capture {} complete ({} samples)", generation, samples.len());
        CaptureOutcome::Completed
    } else {
        CaptureOutcome::Superseded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::gc_handle;
    use crate::sync::{sample_ring, SyncTiming};
    use crate::types::AudioMetadata;
    use std::time::Duration;

    fn audio(len: usize) -> Shared<DecodedAudio> {
        Shared::new(
            &gc_handle(),
            DecodedAudio {
                samples: vec![0.25; len],
                metadata: AudioMetadata {
                    duration: len as f64 / 8000.0,
                    sample_rate: 8000,
                    channel_count: 1,
                },
            },
        )
    }

    fn control() -> Arc<ControlState> {
        Arc::new(ControlState::create(SyncTiming {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_capture_streams_everything_then_completes() {
        let control = control();
        let (writer, mut reader) = sample_ring(1000, 4);
        let slot = WriterSlot::new(writer);
        let g = control.generation();

        let lease = slot.acquire(&control, g).await.unwrap();
        let mut graph = DecodeGraph::spawn(
            CaptureSetup {
                control: control.clone(),
                writer: lease,
                generation: g,
            },
            audio(10_500),
        )
        .unwrap();

        assert!(control.wait_for_processor_ready(g).await.unwrap());
        graph.start();

        let handle = graph.take_join().unwrap();
        let consumer = std::thread::spawn(move || {
            let mut total = 0;
            while total < 10_500 {
                if let Some(segment) = reader.pop() {
                    assert_eq!(segment.generation(), g);
                    total += segment.len();
                    reader.recycle(segment);
                }
            }
            total
        });

        assert_eq!(consumer.join().unwrap(), 10_500);
        assert_eq!(handle.join().unwrap(), CaptureOutcome::Completed);
        assert!(control.is_processor_complete(g));
        assert!(slot.is_available());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_before_start_releases_writer() {
        let control = control();
        let (writer, reader) = sample_ring(100, 2);
        let slot = WriterSlot::new(writer);
        let g = control.generation();

        let lease = slot.acquire(&control, g).await.unwrap();
        let mut graph = DecodeGraph::spawn(
            CaptureSetup {
                control: control.clone(),
                writer: lease,
                generation: g,
            },
            audio(1_000),
        )
        .unwrap();

        assert!(control.wait_for_processor_ready(g).await.unwrap());
        graph.cancel();

        assert_eq!(graph.take_join().unwrap().join().unwrap(), CaptureOutcome::Cancelled);
        assert!(reader.is_empty());
        assert!(!control.is_processor_complete(g));

        // Next generation can take the writer straight away
        let next = control.reset();
        slot.acquire(&control, next).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_superseded_mid_stream_stops_without_completion() {
        let control = control();
        // Tiny ring so the capture thread blocks on a full ring
        let (writer, reader) = sample_ring(10, 2);
        let slot = WriterSlot::new(writer);
        let g = control.generation();

        let lease = slot.acquire(&control, g).await.unwrap();
        let mut graph = DecodeGraph::spawn(
            CaptureSetup {
                control: control.clone(),
                writer: lease,
                generation: g,
            },
            audio(1_000),
        )
        .unwrap();

        assert!(control.wait_for_processor_ready(g).await.unwrap());
        graph.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        control.reset();

        assert_eq!(graph.take_join().unwrap().join().unwrap(), CaptureOutcome::Superseded);
        assert!(!control.is_processor_complete(g));
        drop(reader);
    }

    #[tokio::test]
    async fn test_acquire_times_out_while_lease_held() {
        let control = Arc::new(ControlState::create(SyncTiming {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        }));
        let (writer, _reader) = sample_ring(10, 1);
        let slot = WriterSlot::new(writer);

        let _held = slot.acquire(&control, Generation(0)).await.unwrap();
        let err = slot.acquire(&control, Generation(1)).await.unwrap_err();
        assert!(matches!(err, PipelineError::SyncTimeout { waiting_for: "sample writer", .. }));
    }
}
