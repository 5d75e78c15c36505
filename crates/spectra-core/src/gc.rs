//! Deferred deallocation for decoded sample buffers
//!
//! A decoded source can be tens of megabytes of `f32`. The last reference
//! to it is usually dropped by a capture thread on its way out, and freeing
//! that much memory there would stall the thread that is supposed to keep
//! streaming. Buffers are therefore wrapped in `basedrop::Shared`: dropping
//! the last handle only enqueues the pointer, and a dedicated `buffer-gc`
//! thread does the actual free.
//!
//! ```ignore
//! use basedrop::Shared;
//! use spectra_core::gc::gc_handle;
//!
//! let audio = Shared::new(&gc_handle(), decoded);
//! let for_capture = audio.clone();   // cheap, like Arc
//! drop(audio);
//! drop(for_capture);                 // queued, freed on buffer-gc
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread sweeps deferred drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    // Collector is !Sync, so it is created on and never leaves its own thread
    let spawned = thread::Builder::new()
        .name("buffer-gc".to_string())
        .spawn(move || {
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }

            log::info!("Buffer GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    match spawned.ok().and_then(|_| rx.recv().ok()) {
        Some(handle) => handle,
        None => {
            // Without a collector thread the handle's collector is leaked:
            // allocations still work, deferred drops are simply never swept.
            log::error!("Failed to start buffer GC thread, deferred drops will not be reclaimed");
            let collector = Box::leak(Box::new(Collector::new()));
            collector.handle()
        }
    }
}

/// Handle for creating `Shared<T>` allocations
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
