//! Deferred deallocation for loop buffers
//!
//! Loop frames are held in `basedrop::Shared` pointers. The mixer voice on the
//! audio thread may hold the last reference to a buffer (an instrument exits
//! while its segment is still sounding). Dropping a `Shared` there only
//! enqueues the pointer; the memory is freed by the `audio-gc` thread.

use std::sync::OnceLock;
use std::time::Duration;

use basedrop::{Collector, Handle};
use crossbeam::channel::bounded;

/// How often the collector thread frees queued buffers
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = bounded::<Handle>(1);

    let spawned = std::thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives and dies on this thread
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }
            log::info!("Audio GC thread started");
            loop {
                collector.collect();
                std::thread::sleep(COLLECT_INTERVAL);
            }
        })
        .map_err(|e| e.to_string());

    match spawned.and_then(|_| rx.recv().map_err(|e| e.to_string())) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("Audio GC thread unavailable ({}), released buffers will leak", e);
            let collector: &'static mut Collector = Box::leak(Box::new(Collector::new()));
            collector.handle()
        }
    }
}

/// Handle for allocating `Shared` loop frames on the global collector
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
