//! Generation-tagged sample ring between the capture thread and the worker
//!
//! Two rtrb SPSC queues circulate a fixed pool of preallocated segments:
//!
//! ```text
//!            filled (Segment tagged with its generation)
//!   SampleWriter ─────────────────────────────────► SampleReader
//!        ▲                                               │
//!        └──────────────── free (recycled) ──────────────┘
//! ```
//!
//! A segment carries exactly one generation. The writer starts a fresh
//! segment whenever the generation changes, so a reader can never observe a
//! segment mixing samples from two attempts. Nothing is allocated after
//! [`sample_ring`] returns.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::types::Generation;

/// One block of samples tagged with the generation that produced it
pub struct Segment {
    generation: Generation,
    len: usize,
    samples: Box<[f32]>,
}

impl Segment {
    fn with_capacity(size: usize) -> Self {
        Self {
            generation: Generation::INITIAL,
            len: 0,
            samples: vec![0.0; size].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Valid samples in this segment
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn remaining(&self) -> usize {
        self.samples.len() - self.len
    }

    fn is_full(&self) -> bool {
        self.len == self.samples.len()
    }

    fn retag(&mut self, generation: Generation) {
        self.generation = generation;
        self.len = 0;
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("generation", &self.generation)
            .field("len", &self.len)
            .field("capacity", &self.samples.len())
            .finish()
    }
}

/// Create a ring of `segments` preallocated segments of `segment_size` samples
pub fn sample_ring(segment_size: usize, segments: usize) -> (SampleWriter, SampleReader) {
    let segment_size = segment_size.max(1);
    let segments = segments.max(1);

    let (filled_tx, filled_rx) = RingBuffer::<Segment>::new(segments);
    let (mut free_tx, free_rx) = RingBuffer::<Segment>::new(segments);

    for _ in 0..segments {
        // The free queue was sized for exactly this many segments
        let _ = free_tx.push(Segment::with_capacity(segment_size));
    }

    (
        SampleWriter {
            filled: filled_tx,
            free: free_rx,
            current: None,
        },
        SampleReader {
            filled: filled_rx,
            free: free_tx,
        },
    )
}

/// Producer half, owned by whichever capture thread is currently running
///
/// There is exactly one writer per ring; it is moved from one capture
/// thread to the next, never shared.
pub struct SampleWriter {
    filled: Producer<Segment>,
    free: Consumer<Segment>,
    current: Option<Segment>,
}

impl SampleWriter {
    /// Copy `samples` into the ring under `generation`
    ///
    /// Returns how many samples were accepted. Fewer than `samples.len()`
    /// means the ring is full and the caller should retry the rest later.
    pub fn push_samples(&mut self, generation: Generation, samples: &[f32]) -> usize {
        let mut written = 0;

        while written < samples.len() {
            if self.current.is_none() {
                match self.free.pop() {
                    Ok(mut segment) => {
                        segment.retag(generation);
                        self.current = Some(segment);
                    }
                    Err(_) => return written,
                }
            }
            let Some(segment) = self.current.as_mut() else {
                return written;
            };

            // Partial data from an older generation is dropped, never published
            if segment.generation != generation {
                segment.retag(generation);
            }

            let n = segment.remaining().min(samples.len() - written);
            let start = segment.len;
            segment.samples[start..start + n].copy_from_slice(&samples[written..written + n]);
            segment.len += n;
            written += n;

            if segment.is_full() && !self.publish() {
                return written;
            }
        }

        written
    }

    /// Publish the partially filled segment, if any
    ///
    /// Returns false if the segment could not be published yet.
    pub fn flush(&mut self) -> bool {
        match &self.current {
            Some(segment) if !segment.is_empty() => self.publish(),
            _ => true,
        }
    }

    /// Drop whatever has been written but not yet published
    pub fn discard_pending(&mut self) {
        if let Some(segment) = self.current.as_mut() {
            segment.len = 0;
        }
    }

    /// Whether a free segment is available (or partially filled) for writing
    pub fn has_capacity(&self) -> bool {
        self.current.as_ref().is_some_and(|s| !s.is_full()) || !self.free.is_empty()
    }

    fn publish(&mut self) -> bool {
        let Some(segment) = self.current.take() else {
            return true;
        };
        match self.filled.push(segment) {
            Ok(()) => true,
            Err(rtrb::PushError::Full(segment)) => {
                self.current = Some(segment);
                false
            }
        }
    }
}

/// Consumer half, owned by the rendering worker
pub struct SampleReader {
    filled: Consumer<Segment>,
    free: Producer<Segment>,
}

impl SampleReader {
    /// Generation of the oldest published segment
    pub fn peek_generation(&self) -> Option<Generation> {
        self.filled.peek().ok().map(|s| s.generation)
    }

    /// Take the oldest published segment; hand it back with [`Self::recycle`]
    pub fn pop(&mut self) -> Option<Segment> {
        self.filled.pop().ok()
    }

    /// Return a consumed segment to the writer
    pub fn recycle(&mut self, segment: Segment) {
        if self.free.push(segment).is_err() {
            // Only segments from this ring circulate, so the free queue has room
            log::warn!("Sample ring free queue full, dropping segment");
        }
    }

    /// Discard every published segment tagged older than `generation`
    pub fn discard_older_than(&mut self, generation: Generation) -> usize {
        let mut discarded = 0;
        while self
            .peek_generation()
            .is_some_and(|g| g < generation)
        {
            if let Some(segment) = self.pop() {
                self.recycle(segment);
                discarded += 1;
            }
        }
        discarded
    }

    pub fn is_empty(&self) -> bool {
        self.filled.is_empty()
    }
}
