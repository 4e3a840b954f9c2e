use std::{ptr, slice, sync::Arc};

// Everything in this demo goes through the process-wide tracker, which wraps the system allocator. Each allocation is
// attributed to the line it was made on, so the reports printed below point straight back at this file.
fn main() {
    // Guard the tracker with a real mutex. Passing `None` instead would leave the tracker's own internal lock as the
    // only serialization, which is fine for a single-threaded program like this one.
    debug_allocator::initialize(Some(Arc::new(
        <parking_lot::RawMutex as parking_lot::lock_api::RawMutex>::INIT,
    )));
    debug_allocator::report(0);

    // Allocate a couple of buffers, free one of them, and look at the report: the first site shows one allocation and
    // one free, the second one still holds its 800 bytes.
    let first = debug_allocator::allocate(100 * 4);
    let second = debug_allocator::allocate(200 * 4);
    debug_allocator::free(first);
    debug_allocator::report(0);

    debug_allocator::free(second);
    debug_allocator::report(0);

    // Fresh memory is never zeroed. Reading it before writing it shows the poison pattern instead.
    let third = debug_allocator::allocate(100 * 4);
    let head = unsafe { slice::from_raw_parts(third, 4) };
    println!("uninitialized bytes: {:?}", head);

    // Growing a block copies the old contents over; the tail keeps the poison fill. The new block is attributed to
    // the reallocation, not to the original allocation.
    unsafe { ptr::write_bytes(third, 0, 100 * 4) };
    let fourth = debug_allocator::allocate(200 * 4);
    let third = debug_allocator::reallocate(third, 700 * 4);
    debug_allocator::report(0);
    println!("live bytes: {}", debug_allocator::consumption());

    // Nothing has been written out of bounds, so this returns instead of aborting.
    assert!(debug_allocator::scan_for_corruption());

    debug_allocator::free(third);
    debug_allocator::free(fourth);
    debug_allocator::report(0);
    debug_allocator::reset();
}
