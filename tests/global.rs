//! The process-wide tracker is shared by everything in this binary, so it's exercised from a single test.

use std::ptr;

#[test]
fn process_wide_tracker_round_trip() {
    debug_allocator::initialize(None);
    debug_allocator::reset();

    let (block, line) = (debug_allocator::allocate(24), line!());
    assert_eq!(debug_allocator::consumption(), 24);

    let sites = debug_allocator::snapshot();
    assert_eq!(sites.len(), 1);
    assert_eq!((sites[0].file.as_str(), sites[0].line), (file!(), line));

    let block = debug_allocator::reallocate(block, 48);
    let other = debug_allocator::reallocate(ptr::null_mut(), 8);
    assert_eq!(debug_allocator::consumption(), 56);
    assert_eq!(debug_allocator::global().live_allocations(), 2);
    assert!(debug_allocator::scan_for_corruption());

    debug_allocator::report(0);
    debug_allocator::free(block);
    debug_allocator::free(other);
    assert_eq!(debug_allocator::consumption(), 0);

    debug_allocator::reset();
    assert!(debug_allocator::snapshot().is_empty());
}
