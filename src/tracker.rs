use std::{
    alloc::{GlobalAlloc, Layout, System},
    io::{self, Write},
    ptr,
    sync::Arc,
};

use parking_lot::{const_mutex, Mutex, MutexGuard};

use crate::canary::{poison_fill, stamp_canary, verify_canary, PAD_WIDTH};
use crate::fatal::{self, Fault, Interior};
use crate::guard::{ConcurrencyGuard, GuardLock, Held};
use crate::ledger::Ledger;
use crate::report::{Report, SiteSummary};
use crate::site::CallSite;

/// Alignment requested from the underlying allocator for every tracked block.
pub const BLOCK_ALIGN: usize = 16;

fn block_layout(size: usize) -> Option<Layout> {
    let total = size.checked_add(PAD_WIDTH)?;
    Layout::from_size_align(total, BLOCK_ALIGN).ok()
}

/// Allocation tracker.
///
/// Hands out blocks obtained from the wrapped allocator, attributing each one to the call site that asked for it. Every
/// block is over-allocated by [`PAD_WIDTH`][crate::PAD_WIDTH] canary bytes and filled with a poison pattern before it
/// is returned, so that writes past the end of a block and reads of never-written memory both become visible.
///
/// Misuse is never reported back to the caller as an error. Freeing or reallocating a pointer the tracker does not
/// know about, or running out of memory, prints a diagnostic and aborts the process on the spot.
///
/// A tracker can be a `static`, which is how the crate-level functions are implemented, but private instances work just
/// as well and keep their ledgers separate from each other.
pub struct Tracker<A = System> {
    allocator: A,
    guard: ConcurrencyGuard,
    ledger: Mutex<Ledger>,
}

impl Tracker<System> {
    /// Creates a tracker on top of the system allocator.
    pub const fn system() -> Self {
        Self::from_allocator(System)
    }
}

impl Default for Tracker<System> {
    fn default() -> Self {
        Self::system()
    }
}

impl<A> Tracker<A> {
    /// Creates a tracker on top of the given allocator.
    pub const fn from_allocator(allocator: A) -> Self {
        Self {
            allocator,
            guard: ConcurrencyGuard::new(),
            ledger: const_mutex(Ledger::new()),
        }
    }
}

impl<A: GlobalAlloc> Tracker<A> {
    /// Configures the lock that every operation runs under.
    ///
    /// Passing `None` removes any previously configured lock. The last call wins.
    pub fn initialize(&self, lock: Option<Arc<dyn GuardLock>>) {
        self.guard.configure(lock);
    }

    fn enter(&self) -> (Held, MutexGuard<'_, Ledger>) {
        let held = self.guard.enter();
        (held, self.ledger.lock())
    }

    /// Allocates `size` usable bytes, attributed to the caller's location.
    ///
    /// The returned block is filled with [`POISON_BYTE`][crate::POISON_BYTE] and aligned to [`BLOCK_ALIGN`].
    #[track_caller]
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.allocate_at(size, CallSite::caller())
    }

    /// Allocates `size` usable bytes, attributed to `site`.
    pub fn allocate_at(&self, size: usize, site: CallSite<'_>) -> *mut u8 {
        let (held, mut ledger) = self.enter();

        let block = match self.carve(size) {
            Some(block) => block,
            None => {
                drop(ledger);
                drop(held);
                self.exhausted(size, site)
            }
        };

        self.register(&mut ledger, site, block, size);
        trace_event!(
            addr = block as usize,
            size,
            file = site.file(),
            line = site.line(),
            "allocated"
        );
        block
    }

    /// Frees a block previously returned by this tracker.
    ///
    /// If the canary after the block was overwritten, the overrun is reported but the block is still freed. Freeing a
    /// pointer that is not a live tracked block (a double free, a foreign pointer, or an allocation from a call site
    /// that was never tracked) aborts the process.
    pub fn free(&self, block: *mut u8) {
        let (held, mut ledger) = self.enter();
        let addr = block as usize;

        if !self.release(&mut ledger, addr) {
            drop(ledger);
            drop(held);
            fatal::terminate(&Fault::UnknownFree { addr });
        }
    }

    /// Resizes a block, attributing the new block to the caller's location.
    ///
    /// See [`reallocate_at`][Tracker::reallocate_at].
    #[track_caller]
    pub fn reallocate(&self, block: *mut u8, new_size: usize) -> *mut u8 {
        self.reallocate_at(block, new_size, CallSite::caller())
    }

    /// Resizes a block, attributing the new block to `site`.
    ///
    /// A null `block` behaves like [`allocate_at`][Tracker::allocate_at]. Otherwise a fresh block is always carved
    /// out, the common prefix is copied over, and the old block is freed. Bytes past the old size keep the poison
    /// fill. Reallocating a pointer that is not a live tracked block aborts the process.
    pub fn reallocate_at(&self, block: *mut u8, new_size: usize, site: CallSite<'_>) -> *mut u8 {
        if block.is_null() {
            return self.allocate_at(new_size, site);
        }

        let (held, mut ledger) = self.enter();
        let addr = block as usize;

        let found = ledger.find_by_address(addr).map(|(_, record)| record.size);
        let old_size = match found {
            Some(size) => size,
            None => {
                let interior = ledger
                    .find_containing(addr)
                    .map(|(owner, record, offset)| Interior {
                        offset,
                        size: record.size,
                        site: owner.site().into(),
                    });
                drop(ledger);
                drop(held);
                fatal::terminate(&Fault::UnknownRealloc {
                    addr,
                    site: site.into(),
                    interior,
                });
            }
        };

        let new_block = match self.carve(new_size) {
            Some(new_block) => new_block,
            None => {
                drop(ledger);
                drop(held);
                self.exhausted(new_size, site)
            }
        };

        // SAFETY: both blocks are live and at least `min(old_size, new_size)` bytes long, and they can't overlap since
        // the old one hasn't been released yet.
        unsafe { ptr::copy_nonoverlapping(block, new_block, old_size.min(new_size)) };

        self.register(&mut ledger, site, new_block, new_size);
        let released = self.release(&mut ledger, addr);
        debug_assert!(released, "block vanished from the ledger mid-reallocation");

        trace_event!(
            old_addr = addr,
            addr = new_block as usize,
            old_size,
            size = new_size,
            file = site.file(),
            line = site.line(),
            "reallocated"
        );
        new_block
    }

    /// Checks the canary of every live block.
    ///
    /// Aborts the process at the first overrun found, so at most one overrun is ever reported per call. Returns `true`
    /// if every canary is intact, which in practice is the only way this returns at all.
    pub fn scan_for_corruption(&self) -> bool {
        let (held, ledger) = self.enter();

        let corrupted = ledger
            .live()
            // SAFETY: every live record describes a block of `size + PAD_WIDTH` bytes that hasn't been freed.
            .find(|(_, record)| !unsafe { verify_canary(record.addr as *const u8, record.size) })
            .map(|(site, record)| Fault::Overflow {
                addr: record.addr,
                size: record.size,
                site: site.site().into(),
            });

        drop(ledger);
        drop(held);
        if let Some(fault) = corrupted {
            fatal::terminate(&fault);
        }
        true
    }

    /// Prints every call site with more than `min_allocations` allocations to standard output.
    pub fn report(&self, min_allocations: u64) {
        print!("{}", Report::new(self.snapshot(), min_allocations));
    }

    /// Writes the same listing as [`report`][Tracker::report] into `out`.
    pub fn write_report<W: Write>(&self, min_allocations: u64, mut out: W) -> io::Result<()> {
        write!(out, "{}", Report::new(self.snapshot(), min_allocations))
    }

    /// Per-site aggregates, in the order the sites were first seen.
    pub fn snapshot(&self) -> Vec<SiteSummary> {
        let (_held, ledger) = self.enter();
        ledger.sites().iter().map(SiteSummary::from_record).collect()
    }

    /// Total bytes held by live tracked blocks.
    pub fn consumption(&self) -> usize {
        let (_held, ledger) = self.enter();
        ledger.live_bytes()
    }

    /// Number of live tracked blocks.
    pub fn live_allocations(&self) -> usize {
        let (_held, ledger) = self.enter();
        ledger.live_allocations()
    }

    /// Forgets every site and every live block.
    ///
    /// Blocks that are still live are not freed: they simply stop being tracked, which also means that freeing or
    /// reallocating one of them afterwards is treated as misuse of an unknown pointer.
    pub fn reset(&self) {
        let (_held, mut ledger) = self.enter();
        trace_event!(orphaned = ledger.live_allocations(), "ledger reset");
        ledger.clear();
    }

    /// Gets a poisoned, canary-stamped block of `size` usable bytes from the underlying allocator.
    fn carve(&self, size: usize) -> Option<*mut u8> {
        let layout = block_layout(size)?;
        // SAFETY: `layout` has a non-zero size, as it always includes the canary.
        let block = unsafe { self.allocator.alloc(layout) };
        if block.is_null() {
            return None;
        }

        // SAFETY: the block was just allocated with `layout`, which covers `size + PAD_WIDTH` bytes.
        unsafe {
            poison_fill(block, layout.size());
            stamp_canary(block, size);
        }
        Some(block)
    }

    fn register(&self, ledger: &mut Ledger, site: CallSite<'_>, block: *mut u8, size: usize) {
        if !ledger.register_at(site, block as usize, size) {
            trace_event!(
                file = site.file(),
                line = site.line(),
                "site capacity reached, allocation is untracked"
            );
        }
    }

    /// Removes `addr` from the ledger and hands its block back to the underlying allocator.
    ///
    /// An overwritten canary is reported but doesn't stop the block from being freed. Returns `false`, without doing
    /// anything, if `addr` is not a live tracked block.
    fn release(&self, ledger: &mut Ledger, addr: usize) -> bool {
        let (site, record) = match ledger.remove_by_address(addr) {
            Some(found) => found,
            None => return false,
        };

        let block = record.addr as *mut u8;
        // SAFETY: the record describes a live block of `size + PAD_WIDTH` bytes.
        if !unsafe { verify_canary(block, record.size) } {
            fatal::emit(&Fault::Overflow {
                addr,
                size: record.size,
                site: site.site().into(),
            });
        }

        if let Some(layout) = block_layout(record.size) {
            // SAFETY: the block was allocated by `self.allocator` with this very layout, and the ledger no longer
            // refers to it.
            unsafe { self.allocator.dealloc(block, layout) };
        }

        trace_event!(addr, size = record.size, "freed");
        true
    }

    /// Dumps the ledger and aborts after the underlying allocator came up empty.
    fn exhausted(&self, size: usize, site: CallSite<'_>) -> ! {
        self.report(0);
        fatal::terminate(&Fault::Exhaustion {
            requested: size,
            site: site.into(),
        })
    }
}
