//! The `spectrogram-worker` thread

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::{PaintSurface, WorkerLink, WorkerMessage, WorkerSetup};
use crate::error::{PipelineError, Result};
use crate::sync::{ControlState, SampleReader};
use crate::types::{AudioInformation, Generation, SpectrogramOptions};

/// Segments painted between two checks of the message channel
const SEGMENTS_PER_TURN: usize = 8;

/// Handle to the long-lived rendering worker thread
///
/// Dropping the handle shuts the worker down.
pub struct RenderWorker {
    command_tx: Sender<WorkerMessage>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RenderWorker {
    /// Spawn the worker; it idles until it receives [`WorkerMessage::Setup`]
    pub fn spawn(poll_interval: Duration) -> Result<Self> {
        let (command_tx, command_rx) = crossbeam::channel::unbounded();

        let worker = WorkerLoop {
            command_rx,
            poll_interval,
            bound: None,
            pass: None,
            observed: None,
        };

        let handle = thread::Builder::new()
            .name("spectrogram-worker".into())
            .spawn(move || worker.run())
            .map_err(|source| PipelineError::ThreadSpawn {
                name: "spectrogram-worker".to_string(),
                source,
            })?;

        Ok(Self {
            command_tx,
            thread_handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the worker and wait for its thread to exit
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(WorkerMessage::Shutdown);
        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Rendering worker panicked");
            }
        }
    }
}

impl WorkerLink for RenderWorker {
    fn post(&self, message: WorkerMessage) -> Result<()> {
        self.command_tx
            .send(message)
            .map_err(|_| PipelineError::WorkerDisconnected)
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned after the setup handover
struct Bound {
    control: Arc<ControlState>,
    samples: SampleReader,
    surface: Box<dyn PaintSurface>,
}

/// Repaint pass in progress
struct RenderPass {
    generation: Generation,
    painted: u64,
}

struct WorkerLoop {
    command_rx: Receiver<WorkerMessage>,
    poll_interval: Duration,
    bound: Option<Bound>,
    pass: Option<RenderPass>,
    /// Newest generation acknowledged idle
    observed: Option<Generation>,
}

impl WorkerLoop {
    fn run(mut self) {
        log::info!("Rendering worker started");

        loop {
            let busy = self.pump();

            let next = if busy {
                match self.command_rx.try_recv() {
                    Ok(msg) => Some(msg),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match self.command_rx.recv_timeout(self.poll_interval) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };

            if let Some(msg) = next {
                if !self.handle_message(msg) {
                    break;
                }
            }
        }

        log::info!("Rendering worker stopped");
    }

    /// Returns false when the worker should exit
    fn handle_message(&mut self, msg: WorkerMessage) -> bool {
        match msg {
            WorkerMessage::Setup(setup) => self.bind(setup),
            WorkerMessage::RegenerateSpectrogram {
                options,
                audio_information,
                generation,
            } => self.begin_pass(&options, &audio_information, generation),
            WorkerMessage::ResizeCanvas { size, scale } => match self.bound.as_mut() {
                Some(bound) => {
                    log::debug!("Resizing canvas to {}x{} ({:?})", size.width, size.height, scale);
                    bound.surface.resize(size, scale);
                }
                None => log::warn!("Resize before setup ignored"),
            },
            WorkerMessage::Shutdown => {
                log::info!("Rendering worker shutting down");
                return false;
            }
        }
        true
    }

    fn bind(&mut self, setup: WorkerSetup) {
        if self.bound.is_some() {
            log::warn!("Duplicate worker setup ignored");
            return;
        }

        let WorkerSetup {
            control,
            samples,
            surface,
        } = setup;
        control.mark_worker_ready();
        self.bound = Some(Bound {
            control,
            samples,
            surface,
        });
        log::info!("Rendering worker bound to paint surface");
    }

    fn begin_pass(&mut self, options: &SpectrogramOptions, audio: &AudioInformation, generation: Generation) {
        let Some(bound) = self.bound.as_mut() else {
            log::warn!("Repaint for {} before setup ignored", generation);
            return;
        };

        if !bound.control.is_current(generation) {
            log::debug!("Discarding stale repaint request for {}", generation);
            return;
        }

        if let Some(old) = self.pass.take() {
            log::debug!("Repaint {} replaced after {} samples", old.generation, old.painted);
        }

        log::debug!(
            "Repaint {} started (window {}, samples {}..{})",
            generation,
            options.window_size,
            audio.start_sample,
            audio.end_sample
        );
        bound.surface.begin(generation, options, audio);
        self.pass = Some(RenderPass {
            generation,
            painted: 0,
        });
    }

    /// Advance the ring; returns true if any segment was consumed
    fn pump(&mut self) -> bool {
        let Some(bound) = self.bound.as_mut() else {
            return false;
        };
        let current = bound.control.generation();

        if self.observed.map_or(true, |seen| seen < current) {
            if self.pass.as_ref().is_some_and(|p| p.generation < current) {
                if let Some(pass) = self.pass.take() {
                    log::debug!("Dropping superseded repaint {} after {} samples", pass.generation, pass.painted);
                }
            }
            let discarded = bound.samples.discard_older_than(current);
            if discarded > 0 {
                log::debug!("Discarded {} stale segments before {}", discarded, current);
            }
            bound.control.mark_worker_idle(current);
            self.observed = Some(current);
        }

        let mut consumed = false;

        // A capture thread that was mid-push during the reset can still land
        // one stale segment; it is recycled here without painting
        while bound.samples.peek_generation().is_some_and(|g| g < current) {
            if let Some(segment) = bound.samples.pop() {
                bound.samples.recycle(segment);
                consumed = true;
            }
        }

        let Some(pass) = self.pass.as_mut() else {
            return consumed;
        };

        for _ in 0..SEGMENTS_PER_TURN {
            if bound.samples.peek_generation() != Some(pass.generation) {
                break;
            }
            if let Some(segment) = bound.samples.pop() {
                bound.surface.paint(pass.generation, segment.samples());
                pass.painted += segment.len() as u64;
                bound.samples.recycle(segment);
                consumed = true;
            }
        }

        // Completion is read before the ring: every segment was published
        // before processor_complete was stored
        let generation = pass.generation;
        let complete = bound.control.is_processor_complete(generation);
        let drained = bound.samples.peek_generation() != Some(generation);
        if complete && drained && bound.control.is_current(generation) {
            bound.surface.finish(generation);
            bound.control.mark_rendered(generation);
            log::info!("Repaint {} finished ({} samples)", generation, pass.painted);
            self.pass = None;
        }

        consumed
    }
}
