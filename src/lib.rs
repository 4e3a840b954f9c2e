//! # debug-allocator
//!
//! This crate provides an instrumented allocation shim for hunting down memory bugs while debugging. Blocks handed out
//! through it are attributed to the source location that asked for them, and are laid out so that two classes of
//! bugs become visible:
//!
//! - writes past the end of a block, caught by a canary region stamped after every block
//! - reliance on zeroed memory, made obvious by filling every fresh block with a non-zero poison pattern
//!
//! It is not meant to serve allocations in production: the actual memory always comes from an underlying
//! [`GlobalAlloc`][global_alloc] implementation, and the tracker only keeps the books.
//!
//! ## high-level usage
//!
//! `debug-allocator` has three main components:
//! - [`Tracker`], which owns the ledger of live blocks grouped per call site, and provides the allocate, free and
//!   reallocate replacements along with reporting
//! - the [`GuardLock`] trait, which lets the host program plug in the lock that every tracker operation runs under
//! - the crate-level functions ([`allocate`], [`free`], [`reallocate`], and friends), which forward to a process-wide
//!   [`Tracker`] over the system allocator
//!
//! Call sites are captured with `#[track_caller]`, so `allocate(64)` is attributed to the line it was written on
//! without any macro trickery.
//!
//! ```no_run
//! let buf = debug_allocator::allocate(64);
//! let buf = debug_allocator::reallocate(buf, 128);
//! debug_allocator::report(0);
//! debug_allocator::free(buf);
//! assert_eq!(debug_allocator::consumption(), 0);
//! ```
//!
//! ## failure handling
//!
//! The tracker never returns errors. Running out of memory, or freeing or reallocating a pointer that isn't a live
//! tracked block, prints a diagnostic to standard error and aborts the process so that a debugger stops right at the
//! offending call. A corrupted canary found while freeing is reported but not fatal; [`scan_for_corruption`] treats
//! the same condition as fatal.
//!
//! With the default `tracing-compat` feature, diagnostics are also emitted as `tracing` events, and every tracked
//! operation emits a `trace`-level event.
//!
//! [global_alloc]: std::alloc::GlobalAlloc
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![warn(clippy::all)]
use std::sync::Arc;

macro_rules! trace_event {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing-compat")]
        ::tracing::trace!($($arg)+);
    };
}

mod canary;
mod fatal;
mod guard;
mod ledger;
mod report;
mod site;
mod tracker;

pub use crate::canary::{CANARY_BYTE, PAD_WIDTH, POISON_BYTE};
pub use crate::fatal::crash_exit;
pub use crate::guard::{FnLock, GuardLock};
pub use crate::ledger::SITE_CAPACITY;
pub use crate::report::{Report, SiteSummary};
pub use crate::site::{CallSite, MAX_FILE_LEN};
pub use crate::tracker::{Tracker, BLOCK_ALIGN};

// The process-wide tracker behind the crate-level functions.
static GLOBAL_TRACKER: Tracker = Tracker::system();

/// The process-wide tracker used by the crate-level functions.
pub fn global() -> &'static Tracker {
    &GLOBAL_TRACKER
}

/// Configures the lock that every operation on the process-wide tracker runs under.
///
/// Passing `None` disables locking by the host program. The last call wins.
pub fn initialize(lock: Option<Arc<dyn GuardLock>>) {
    GLOBAL_TRACKER.initialize(lock)
}

/// Allocates `size` usable bytes from the process-wide tracker, attributed to the caller's location.
#[track_caller]
pub fn allocate(size: usize) -> *mut u8 {
    GLOBAL_TRACKER.allocate_at(size, CallSite::caller())
}

/// Frees a block previously returned by the process-wide tracker.
pub fn free(block: *mut u8) {
    GLOBAL_TRACKER.free(block)
}

/// Resizes a block from the process-wide tracker, attributing the new block to the caller's location.
#[track_caller]
pub fn reallocate(block: *mut u8, new_size: usize) -> *mut u8 {
    GLOBAL_TRACKER.reallocate_at(block, new_size, CallSite::caller())
}

/// Prints every call site with more than `min_allocations` allocations to standard output.
pub fn report(min_allocations: u64) {
    GLOBAL_TRACKER.report(min_allocations)
}

/// Total bytes held by live blocks of the process-wide tracker.
pub fn consumption() -> usize {
    GLOBAL_TRACKER.consumption()
}

/// Per-site aggregates of the process-wide tracker.
pub fn snapshot() -> Vec<SiteSummary> {
    GLOBAL_TRACKER.snapshot()
}

/// Forgets every site and live block of the process-wide tracker, without freeing anything.
pub fn reset() {
    GLOBAL_TRACKER.reset()
}

/// Checks every canary of the process-wide tracker, aborting at the first overrun.
pub fn scan_for_corruption() -> bool {
    GLOBAL_TRACKER.scan_for_corruption()
}
