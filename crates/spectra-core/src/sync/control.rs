//! Lock-free control region shared by the pipeline, capture, and worker threads
//!
//! # Layout
//!
//! Every field is its own cache-padded `AtomicU64` so the capture thread and
//! the worker never false-share a line while polling.
//!
//! | field                | written by | encoding                      |
//! |----------------------|------------|-------------------------------|
//! | `generation`         | pipeline   | raw counter, starts at 0      |
//! | `worker_ready`       | worker     | 0 = not ready, 1 = ready      |
//! | `worker_idle`        | worker     | generation tag                |
//! | `processor_ready`    | capture    | generation tag                |
//! | `processor_complete` | capture    | generation tag                |
//! | `finished`           | pipeline   | generation tag                |
//! | `rendered`           | worker     | generation tag                |
//!
//! A generation tag is `generation + 1`, leaving `0` for "never set". Tags
//! only move forward (`fetch_max`), so a late write from an old generation
//! can never roll a flag back. Writers publish with `Release`, readers load
//! with `Acquire`.
//!
//! # Waiting
//!
//! The capture thread and worker only ever store and load. The async
//! `wait_for_*` helpers run on the control context and poll at
//! [`SyncTiming::poll_interval`] until the flag flips, the generation is
//! superseded, or [`SyncTiming::timeout`] elapses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use tokio::time::Instant;

use crate::error::{PipelineError, Result};
use crate::types::Generation;

/// Polling cadence and deadline for the async waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one poll inside a wait loop
enum Poll<T> {
    Ready(T),
    Pending,
}

/// Shared control state
///
/// Created once per pipeline and shared by `Arc` with the worker (at setup)
/// and with every capture thread (per generation).
pub struct ControlState {
    generation: CachePadded<AtomicU64>,
    worker_ready: CachePadded<AtomicU64>,
    worker_idle: CachePadded<AtomicU64>,
    processor_ready: CachePadded<AtomicU64>,
    processor_complete: CachePadded<AtomicU64>,
    finished: CachePadded<AtomicU64>,
    rendered: CachePadded<AtomicU64>,
    timing: SyncTiming,
}

impl ControlState {
    /// Allocate a zeroed control region; the generation starts at 0
    pub fn create(timing: SyncTiming) -> Self {
        Self {
            generation: CachePadded::new(AtomicU64::new(0)),
            worker_ready: CachePadded::new(AtomicU64::new(0)),
            worker_idle: CachePadded::new(AtomicU64::new(0)),
            processor_ready: CachePadded::new(AtomicU64::new(0)),
            processor_complete: CachePadded::new(AtomicU64::new(0)),
            finished: CachePadded::new(AtomicU64::new(0)),
            rendered: CachePadded::new(AtomicU64::new(0)),
            timing,
        }
    }

    pub fn timing(&self) -> SyncTiming {
        self.timing
    }

    // ─────────────────────────────────────────────────────────────
    // Generation counter
    // ─────────────────────────────────────────────────────────────

    /// Current generation
    #[inline]
    pub fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::Acquire))
    }

    /// Whether `generation` is still the newest one
    #[inline]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.generation() == generation
    }

    /// Invalidate all in-flight work and return the new generation
    pub fn reset(&self) -> Generation {
        let previous = self.generation.fetch_add(1, Ordering::AcqRel);
        let next = Generation(previous + 1);
        log::debug!("Control state reset: {} -> {}", Generation(previous), next);
        next
    }

    // ─────────────────────────────────────────────────────────────
    // Worker side
    // ─────────────────────────────────────────────────────────────

    /// Acknowledge the one-time setup message
    pub fn mark_worker_ready(&self) {
        self.worker_ready.store(1, Ordering::Release);
    }

    pub fn is_worker_ready(&self) -> bool {
        self.worker_ready.load(Ordering::Acquire) == 1
    }

    /// Acknowledge that nothing older than `generation` is buffered anymore
    pub fn mark_worker_idle(&self, generation: Generation) {
        self.worker_idle.fetch_max(generation.tag(), Ordering::AcqRel);
    }

    /// Newest generation the worker has drained up to
    pub fn worker_idle(&self) -> Option<Generation> {
        Generation::from_tag(self.worker_idle.load(Ordering::Acquire))
    }

    /// Record that the worker finalized its paint for `generation`
    pub fn mark_rendered(&self, generation: Generation) {
        self.rendered.fetch_max(generation.tag(), Ordering::AcqRel);
    }

    pub fn rendered(&self) -> Option<Generation> {
        Generation::from_tag(self.rendered.load(Ordering::Acquire))
    }

    // ─────────────────────────────────────────────────────────────
    // Capture side
    // ─────────────────────────────────────────────────────────────

    /// Signal that capture setup for `generation` is done
    ///
    /// Returns false (and leaves the flag alone) when `generation` has
    /// already been superseded.
    pub fn processor_ready(&self, generation: Generation) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.processor_ready.fetch_max(generation.tag(), Ordering::AcqRel);
        self.is_current(generation)
    }

    /// Mark the capture for `generation` as complete
    ///
    /// A no-op returning false if a newer generation has started: a stale
    /// completion must never finalize anything.
    pub fn processor_complete(&self, generation: Generation) -> bool {
        if !self.is_current(generation) {
            log::debug!("Ignoring stale processor completion for {}", generation);
            return false;
        }
        self.processor_complete.fetch_max(generation.tag(), Ordering::AcqRel);
        true
    }

    /// Whether the capture for `generation` has completed
    pub fn is_processor_complete(&self, generation: Generation) -> bool {
        self.processor_complete.load(Ordering::Acquire) == generation.tag()
    }

    /// Terminal signal for the current generation's natural completion
    ///
    /// Only takes effect when the capture for the current generation has
    /// completed; returns whether it did.
    pub fn finished(&self) -> bool {
        let current = self.generation();
        if !self.is_processor_complete(current) {
            return false;
        }
        self.finished.fetch_max(current.tag(), Ordering::AcqRel);
        true
    }

    /// Newest generation that finished naturally
    pub fn finished_generation(&self) -> Option<Generation> {
        Generation::from_tag(self.finished.load(Ordering::Acquire))
    }

    // ─────────────────────────────────────────────────────────────
    // Async waits (control context only)
    // ─────────────────────────────────────────────────────────────

    async fn poll_until<T>(
        &self,
        waiting_for: &'static str,
        generation: Generation,
        mut check: impl FnMut() -> Poll<T>,
    ) -> Result<T> {
        let deadline = Instant::now() + self.timing.timeout;
        loop {
            if let Poll::Ready(value) = check() {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(PipelineError::SyncTimeout {
                    waiting_for,
                    generation,
                });
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }

    /// Suspend until the worker acknowledges its setup message
    pub async fn wait_for_worker_ready(&self) -> Result<()> {
        self.poll_until("worker ready", self.generation(), || {
            if self.is_worker_ready() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Suspend until the worker has discarded everything older than `generation`
    pub async fn wait_for_worker_idle(&self, generation: Generation) -> Result<()> {
        self.poll_until("worker idle", generation, || {
            if self.worker_idle.load(Ordering::Acquire) >= generation.tag() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Suspend until capture setup for `generation` completes
    ///
    /// Returns false as soon as a newer generation supersedes it.
    pub async fn wait_for_processor_ready(&self, generation: Generation) -> Result<bool> {
        self.poll_until("processor ready", generation, || {
            if !self.is_current(generation) {
                Poll::Ready(false)
            } else if self.processor_ready.load(Ordering::Acquire) == generation.tag() {
                Poll::Ready(true)
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Suspend until `generation` is the newest generation the worker finalized
    ///
    /// Returns false as soon as a newer generation exists without
    /// `generation` being the newest finalized one. The `rendered` flag only
    /// keeps the newest generation, so a pass that did finish but has since
    /// been overtaken by a newer finished pass also reports false.
    pub async fn wait_for_rendered(&self, generation: Generation) -> Result<bool> {
        self.poll_until("render", generation, || {
            if self.rendered.load(Ordering::Acquire) == generation.tag() {
                Poll::Ready(true)
            } else if self.generation() > generation {
                Poll::Ready(false)
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::create(SyncTiming::default())
    }
}

impl std::fmt::Debug for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlState")
            .field("generation", &self.generation())
            .field("worker_ready", &self.is_worker_ready())
            .field("worker_idle", &self.worker_idle())
            .field(
                "processor_ready",
                &Generation::from_tag(self.processor_ready.load(Ordering::Relaxed)),
            )
            .field(
                "processor_complete",
                &Generation::from_tag(self.processor_complete.load(Ordering::Relaxed)),
            )
            .field("finished", &self.finished_generation())
            .field("rendered", &self.rendered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast_timing() -> SyncTiming {
        SyncTiming {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_reset_is_strictly_monotonic() {
        let state = ControlState::default();
        assert_eq!(state.generation(), Generation::INITIAL);

        for expected in 1..=50u64 {
            assert_eq!(state.reset(), Generation(expected));
            assert_eq!(state.generation(), Generation(expected));
        }
    }

    #[test]
    fn test_concurrent_resets_never_repeat() {
        let state = Arc::new(ControlState::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || (0..250).map(|_| state.reset().value()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        seen.sort_unstable();
        let expected: Vec<u64> = (1..=1000).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_processor_ready_rejected_after_supersession() {
        let state = ControlState::default();
        let stale = state.generation();
        state.reset();
        assert!(!state.processor_ready(stale));
        assert!(state.processor_ready(state.generation()));
    }

    #[test]
    fn test_stale_completion_is_noop() {
        let state = ControlState::default();
        let g0 = state.generation();
        let g1 = state.reset();

        assert!(!state.processor_complete(g0));
        assert!(!state.is_processor_complete(g0));
        assert!(!state.finished());
        assert_eq!(state.finished_generation(), None);

        assert!(state.processor_complete(g1));
        assert!(state.finished());
        assert_eq!(state.finished_generation(), Some(g1));
    }

    #[test]
    fn test_flags_never_roll_back() {
        let state = ControlState::default();
        state.mark_worker_idle(Generation(5));
        state.mark_worker_idle(Generation(2));
        assert_eq!(state.worker_idle(), Some(Generation(5)));

        state.mark_rendered(Generation(3));
        state.mark_rendered(Generation(1));
        assert_eq!(state.rendered(), Some(Generation(3)));
    }

    #[tokio::test]
    async fn test_wait_for_processor_ready_returns_false_when_superseded() {
        let state = Arc::new(ControlState::create(fast_timing()));
        let g0 = state.generation();

        let bumper = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            bumper.reset();
        });

        assert!(!state.wait_for_processor_ready(g0).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_processor_ready_true_once_signalled() {
        let state = Arc::new(ControlState::create(fast_timing()));
        let g0 = state.generation();

        let capture = state.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            capture.processor_ready(g0);
        });

        assert!(state.wait_for_processor_ready(g0).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let state = ControlState::create(fast_timing());
        let err = state.wait_for_worker_ready().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SyncTimeout { waiting_for: "worker ready", .. }
        ));
    }

    #[tokio::test]
    async fn test_wait_for_worker_idle_accepts_newer_ack() {
        let state = ControlState::create(fast_timing());
        let g1 = state.reset();
        state.reset();
        state.mark_worker_idle(Generation(2));
        state.wait_for_worker_idle(g1).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_rendered_false_once_a_newer_pass_finished() {
        let state = ControlState::create(fast_timing());
        let g0 = state.generation();
        state.mark_rendered(g0);
        assert!(state.wait_for_rendered(g0).await.unwrap());

        let g1 = state.reset();
        state.mark_rendered(g1);
        assert!(!state.wait_for_rendered(g0).await.unwrap());
        assert!(state.wait_for_rendered(g1).await.unwrap());
    }
}
