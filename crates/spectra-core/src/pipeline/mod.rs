//! SpectrogramPipeline - decode/render orchestration
//!
//! Owns the generation lifecycle. Every public operation that starts a new
//! render first aborts the current generation:
//!
//! 1. cancel the live decode graphs through their cancellation tokens
//! 2. `reset()` the control state to get the new generation
//! 3. wait for the worker to acknowledge it is idle for that generation
//!
//! and then renders under the new generation:
//!
//! 1. fetch (or reuse the cached bytes) and decode on the blocking pool
//! 2. acquire the ring writer and spawn a `capture-g{N}` decode graph
//! 3. wait for processor-ready; a superseded setup silently stops here
//! 4. start the graph and post `RegenerateSpectrogram` to the worker
//!
//! Supersession is checked again after every suspension point, so a render
//! overtaken by a newer call returns without touching the worker.

mod run;

pub use run::{PipelineRun, RunPhase, RunTable};

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use basedrop::Shared;

use crate::capture::{CaptureOutcome, CaptureSetup, DecodeGraph, WriterSlot};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::gc::gc_handle;
use crate::source::{extension_hint, AudioDecoder, AudioSource, ByteFetcher, SourceFetcher, SymphoniaDecoder};
use crate::sync::{sample_ring, ControlState, SampleReader};
use crate::types::{AudioInformation, AudioMetadata, CanvasScale, CanvasSize, Generation, SpectrogramOptions};
use crate::worker::{PaintSurface, RenderWorker, WorkerLink, WorkerMessage, WorkerSetup};

/// Where a render gets its bytes from
enum RenderInput<'a> {
    Fetch(&'a str),
    Cached(AudioSource),
}

/// Mutable orchestrator state; never held across an `.await`
struct PipelineState {
    connected: bool,
    /// Handed to the worker by `connect`
    reader: Option<SampleReader>,
    source: Option<AudioSource>,
    /// Bumped by every fetching render; only the newest fetch may replace `source`
    fetch_seq: u64,
    runs: RunTable,
}

struct Inner {
    config: PipelineConfig,
    control: Arc<ControlState>,
    worker: Arc<dyn WorkerLink>,
    fetcher: Arc<dyn ByteFetcher>,
    decoder: Arc<dyn AudioDecoder>,
    writer_slot: Arc<WriterSlot>,
    state: Mutex<PipelineState>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Generation-safe spectrogram decode/render pipeline
///
/// Cheap to clone; clones share the same worker and generation counter.
#[derive(Clone)]
pub struct SpectrogramPipeline {
    inner: Arc<Inner>,
}

impl SpectrogramPipeline {
    /// Pipeline with the default fetcher, symphonia decoder, and a fresh worker thread
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let worker = RenderWorker::spawn(config.timing().poll_interval)?;
        let fetcher = SourceFetcher::new(config.http_timeout());
        Ok(Self::with_parts(
            config,
            Arc::new(fetcher),
            Arc::new(SymphoniaDecoder),
            Arc::new(worker),
        ))
    }

    /// Pipeline with caller-supplied collaborators
    pub fn with_parts(
        config: PipelineConfig,
        fetcher: Arc<dyn ByteFetcher>,
        decoder: Arc<dyn AudioDecoder>,
        worker: Arc<dyn WorkerLink>,
    ) -> Self {
        let (writer, reader) = sample_ring(config.segment_size, config.ring_segments);
        let control = Arc::new(ControlState::create(config.timing()));

        Self {
            inner: Arc::new(Inner {
                config,
                control,
                worker,
                fetcher,
                decoder,
                writer_slot: WriterSlot::new(writer),
                state: Mutex::new(PipelineState {
                    connected: false,
                    reader: Some(reader),
                    source: None,
                    fetch_seq: 0,
                    runs: RunTable::default(),
                }),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Public operations
    // ─────────────────────────────────────────────────────────────

    /// One-time setup: hand the surface to the worker and render `src` under generation 0
    pub async fn connect(
        &self,
        src: &str,
        surface: Box<dyn PaintSurface>,
        options: SpectrogramOptions,
    ) -> Result<AudioMetadata> {
        let reader = {
            let mut state = self.inner.lock_state();
            if state.connected {
                return Err(PipelineError::AlreadyConnected);
            }
            let reader = state.reader.take().ok_or(PipelineError::AlreadyConnected)?;
            state.connected = true;
            reader
        };

        self.inner.worker.post(WorkerMessage::Setup(WorkerSetup {
            control: Arc::clone(&self.inner.control),
            samples: reader,
            surface,
        }))?;
        self.inner.control.wait_for_worker_ready().await?;
        log::info!("Pipeline connected to rendering worker");

        let generation = self.inner.control.generation();
        self.render(RenderInput::Fetch(src), options, generation).await
    }

    /// Abort the current render and render a new source
    pub async fn change_source(&self, src: &str, options: SpectrogramOptions) -> Result<AudioMetadata> {
        self.ensure_connected("change_source")?;
        let generation = self.abort().await?;
        self.render(RenderInput::Fetch(src), options, generation).await
    }

    /// Abort the current render and repaint the cached source with new options
    pub async fn regenerate_spectrogram(&self, options: SpectrogramOptions) -> Result<()> {
        self.ensure_connected("regenerate_spectrogram")?;
        let cached = self
            .inner
            .lock_state()
            .source
            .clone()
            .ok_or(PipelineError::NoSource)?;

        let generation = self.abort().await?;
        self.render(RenderInput::Cached(cached), options, generation)
            .await
            .map(|_| ())
    }

    /// Resize the paint surface using the configured default scale
    pub fn resize_canvas(&self, size: CanvasSize) -> Result<()> {
        self.resize_canvas_scaled(size, self.inner.config.default_scale)
    }

    pub fn resize_canvas_scaled(&self, size: CanvasSize, scale: CanvasScale) -> Result<()> {
        self.ensure_connected("resize_canvas")?;
        self.inner.worker.post(WorkerMessage::ResizeCanvas { size, scale })
    }

    /// Wait until `generation` is the newest paint the worker finished
    ///
    /// `Ok(false)` means a newer generation exists and `generation` is not
    /// the newest finished paint, whether or not it finished earlier.
    pub async fn wait_until_rendered(&self, generation: Generation) -> Result<bool> {
        self.inner.control.wait_for_rendered(generation).await
    }

    pub fn generation(&self) -> Generation {
        self.inner.control.generation()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().connected
    }

    /// Metadata of the cached source
    pub fn metadata(&self) -> Option<AudioMetadata> {
        self.inner.lock_state().source.as_ref().map(|s| s.metadata)
    }

    /// Phase of a live run, `None` once it has been reaped
    pub fn phase(&self, generation: Generation) -> Option<RunPhase> {
        self.inner.lock_state().runs.phase(generation)
    }

    /// Cancel every live run and stop the worker
    pub fn shutdown(&self) {
        self.inner.lock_state().runs.cancel_all();
        if self.inner.worker.post(WorkerMessage::Shutdown).is_err() {
            log::debug!("Worker already stopped");
        }
        log::info!("Pipeline shut down");
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle internals
    // ─────────────────────────────────────────────────────────────

    fn ensure_connected(&self, operation: &'static str) -> Result<()> {
        if self.inner.lock_state().connected {
            Ok(())
        } else {
            Err(PipelineError::NotInitialized { operation })
        }
    }

    /// Cancel the current generation and wait for the worker to go idle
    async fn abort(&self) -> Result<Generation> {
        let control = &self.inner.control;

        // Cancel and bump under the state lock so a render cannot slip a
        // run into the table between the two
        let generation = {
            let mut state = self.inner.lock_state();
            let previous = control.generation();
            let cancelled = state.runs.cancel_older_than(previous.next());
            let generation = control.reset();
            log::info!("Superseding {} with {} ({} runs cancelled)", previous, generation, cancelled);
            generation
        };

        control.wait_for_worker_idle(generation).await?;
        Ok(generation)
    }

    async fn render(
        &self,
        input: RenderInput<'_>,
        options: SpectrogramOptions,
        generation: Generation,
    ) -> Result<AudioMetadata> {
        let control = &self.inner.control;

        let (src, bytes, fetch_seq) = match input {
            RenderInput::Fetch(src) => {
                let seq = {
                    let mut state = self.inner.lock_state();
                    state.fetch_seq += 1;
                    state.fetch_seq
                };
                let fetcher = Arc::clone(&self.inner.fetcher);
                let owned = src.to_string();
                let bytes = tokio::task::spawn_blocking(move || fetcher.fetch(&owned)).await??;
                (src.to_string(), bytes, Some(seq))
            }
            RenderInput::Cached(source) => (source.src.clone(), source.bytes(), None),
        };

        let decoder = Arc::clone(&self.inner.decoder);
        let hint = extension_hint(&src);
        let for_decode = Arc::clone(&bytes);
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(for_decode, hint.as_deref())).await??;
        let metadata = decoded.metadata;

        {
            let mut state = self.inner.lock_state();
            // The newest fetched source is adopted even when its render was
            // overtaken, so later regenerations repaint it
            if fetch_seq == Some(state.fetch_seq) {
                state.source = Some(AudioSource::new(src, bytes, metadata));
            }
            if !control.is_current(generation) {
                log::debug!("Render {} superseded after decode", generation);
                return Ok(metadata);
            }
        }

        let lease = self.inner.writer_slot.acquire(control, generation).await?;

        let join = {
            let mut state = self.inner.lock_state();
            if !control.is_current(generation) {
                log::debug!("Render {} superseded while waiting for the ring writer", generation);
                return Ok(metadata);
            }

            let audio = Shared::new(&gc_handle(), decoded);
            let mut graph = DecodeGraph::spawn(
                CaptureSetup {
                    control: Arc::clone(control),
                    writer: lease,
                    generation,
                },
                audio,
            )?;
            let join = graph.take_join();
            state.runs.insert(graph);
            join
        };
        if let Some(join) = join {
            self.reap_on_exit(generation, join);
        }

        let ready = match control.wait_for_processor_ready(generation).await {
            Ok(ready) => ready,
            Err(e) => {
                self.abort_run(generation);
                return Err(e);
            }
        };
        if !ready {
            log::debug!("Render {} superseded during capture setup", generation);
            self.abort_run(generation);
            return Ok(metadata);
        }

        let mut state = self.inner.lock_state();
        match state.runs.get_mut(generation) {
            Some(run) if run.phase == RunPhase::AwaitingProcessorReady => run.graph.start(),
            _ => {
                log::debug!("Render {} aborted before start", generation);
                return Ok(metadata);
            }
        }
        state.runs.advance(generation, RunPhase::Rendering);

        self.inner.worker.post(WorkerMessage::RegenerateSpectrogram {
            options,
            audio_information: AudioInformation::from(&metadata),
            generation,
        })?;
        log::info!(
            "Rendering {} ({:.2}s, {} Hz)",
            generation,
            metadata.duration,
            metadata.sample_rate
        );

        Ok(metadata)
    }

    /// Cancel one run and mark it aborted if it is still live
    fn abort_run(&self, generation: Generation) {
        let mut state = self.inner.lock_state();
        let live = match state.runs.get_mut(generation) {
            Some(run) => {
                run.graph.cancel();
                !run.phase.is_terminal()
            }
            None => false,
        };
        if live {
            state.runs.advance(generation, RunPhase::Aborted);
        }
    }

    /// Join the capture thread off the control context, then settle its run
    fn reap_on_exit(&self, generation: Generation, join: JoinHandle<CaptureOutcome>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || join.join()).await;

            let mut state = inner.lock_state();
            let live = state.runs.phase(generation).is_some_and(|p| !p.is_terminal());
            match outcome {
                Ok(Ok(CaptureOutcome::Completed)) => {
                    if inner.control.finished() {
                        log::debug!("Capture {} finished naturally", generation);
                    }
                    if live {
                        state.runs.advance(generation, RunPhase::Complete);
                    }
                }
                Ok(Ok(outcome)) => {
                    log::debug!("Capture {} ended: {:?}", generation, outcome);
                    if live {
                        state.runs.advance(generation, RunPhase::Aborted);
                    }
                }
                Ok(Err(_)) => log::error!("Capture thread for {} panicked", generation),
                Err(e) => log::error!("Failed to join capture thread for {}: {}", generation, e),
            }
            state.runs.remove(generation);
        });
    }
}
