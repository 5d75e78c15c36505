//! Per-generation run bookkeeping

use std::collections::BTreeMap;

use crate::capture::DecodeGraph;
use crate::types::Generation;

/// Lifecycle phase of one generation
///
/// ```text
/// Idle ─► AwaitingProcessorReady ─► Rendering ─► Complete
///                 │                     │
///                 └──────► Aborted ◄────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Idle,
    AwaitingProcessorReady,
    Rendering,
    Complete,
    Aborted,
}

impl RunPhase {
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, AwaitingProcessorReady)
                | (AwaitingProcessorReady, Rendering)
                | (AwaitingProcessorReady, Aborted)
                | (Rendering, Complete)
                | (Rendering, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Complete | RunPhase::Aborted)
    }
}

/// Ephemeral state of one generation's render
pub struct PipelineRun {
    pub generation: Generation,
    pub phase: RunPhase,
    pub graph: DecodeGraph,
}

/// Live runs keyed by generation
#[derive(Default)]
pub struct RunTable {
    runs: BTreeMap<Generation, PipelineRun>,
}

impl RunTable {
    /// Track a freshly spawned graph in `AwaitingProcessorReady`
    pub fn insert(&mut self, graph: DecodeGraph) {
        let generation = graph.generation();
        let mut run = PipelineRun {
            generation,
            phase: RunPhase::Idle,
            graph,
        };
        Self::transition(&mut run, RunPhase::AwaitingProcessorReady);
        if let Some(old) = self.runs.insert(generation, run) {
            log::warn!("Replaced existing run for {}", generation);
            old.graph.cancel();
        }
    }

    /// Move a run to `next`; illegal transitions are logged and refused
    pub fn advance(&mut self, generation: Generation, next: RunPhase) -> bool {
        match self.runs.get_mut(&generation) {
            Some(run) => Self::transition(run, next),
            None => {
                log::debug!("No live run for {} (wanted {:?})", generation, next);
                false
            }
        }
    }

    fn transition(run: &mut PipelineRun, next: RunPhase) -> bool {
        if run.phase.can_advance_to(next) {
            log::debug!("Run {}: {:?} -> {:?}", run.generation, run.phase, next);
            run.phase = next;
            true
        } else {
            log::warn!("Run {}: illegal transition {:?} -> {:?}", run.generation, run.phase, next);
            false
        }
    }

    /// Cancel every run older than `generation`, marking it `Aborted`
    pub fn cancel_older_than(&mut self, generation: Generation) -> usize {
        let mut cancelled = 0;
        for run in self.runs.range_mut(..generation).map(|(_, run)| run) {
            if run.phase.is_terminal() {
                continue;
            }
            run.graph.cancel();
            Self::transition(run, RunPhase::Aborted);
            cancelled += 1;
        }
        cancelled
    }

    /// Cancel everything (shutdown)
    pub fn cancel_all(&mut self) {
        for run in self.runs.values_mut() {
            run.graph.cancel();
            if !run.phase.is_terminal() {
                Self::transition(run, RunPhase::Aborted);
            }
        }
    }

    pub fn get_mut(&mut self, generation: Generation) -> Option<&mut PipelineRun> {
        self.runs.get_mut(&generation)
    }

    pub fn remove(&mut self, generation: Generation) -> Option<PipelineRun> {
        self.runs.remove(&generation)
    }

    pub fn phase(&self, generation: Generation) -> Option<RunPhase> {
        self.runs.get(&generation).map(|run| run.phase)
    }

    /// Runs still eligible to write the ring
    pub fn live_count(&self) -> usize {
        self.runs.values().filter(|run| !run.phase.is_terminal()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureSetup, WriterSlot};
    use crate::gc::gc_handle;
    use crate::source::DecodedAudio;
    use crate::sync::{sample_ring, ControlState};
    use crate::types::AudioMetadata;
    use basedrop::Shared;
    use std::sync::Arc;

    #[test]
    fn test_phase_transitions() {
        use RunPhase::*;
        assert!(Idle.can_advance_to(AwaitingProcessorReady));
        assert!(AwaitingProcessorReady.can_advance_to(Aborted));
        assert!(Rendering.can_advance_to(Complete));
        assert!(!Idle.can_advance_to(Rendering));
        assert!(!Complete.can_advance_to(Aborted));
        assert!(!Aborted.can_advance_to(Rendering));
        assert!(Complete.is_terminal() && Aborted.is_terminal());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_older_than_leaves_newer_runs() {
        let control = Arc::new(ControlState::default());
        let (writer, _reader) = sample_ring(16, 2);
        let slot = WriterSlot::new(writer);
        let audio = Shared::new(
            &gc_handle(),
            DecodedAudio {
                samples: vec![0.0; 64],
                metadata: AudioMetadata {
                    duration: 0.008,
                    sample_rate: 8000,
                    channel_count: 1,
                },
            },
        );

        let g0 = control.generation();
        let lease = slot.acquire(&control, g0).await.unwrap();
        let graph = DecodeGraph::spawn(
            CaptureSetup {
                control: control.clone(),
                writer: lease,
                generation: g0,
            },
            audio,
        )
        .unwrap();

        let mut table = RunTable::default();
        table.insert(graph);
        assert_eq!(table.phase(g0), Some(RunPhase::AwaitingProcessorReady));
        assert!(!table.advance(g0, RunPhase::Complete));

        assert_eq!(table.cancel_older_than(Generation(0)), 0);
        assert_eq!(table.cancel_older_than(Generation(1)), 1);
        assert_eq!(table.phase(g0), Some(RunPhase::Aborted));
        assert_eq!(table.live_count(), 0);
        assert!(table.get_mut(g0).unwrap().graph.is_cancelled());

        let mut run = table.remove(g0).unwrap();
        assert!(run.graph.take_join().unwrap().join().is_ok());
    }
}
