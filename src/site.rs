use std::{fmt, panic::Location};

/// Longest file name, in bytes, that a site record keeps.
pub const MAX_FILE_LEN: usize = 255;

/// Source location that a tracked allocation is attributed to.
///
/// Normally captured implicitly through `#[track_caller]`, but can be built by hand for callers that want to attribute
/// allocations to a location of their choosing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallSite<'a> {
    file: &'a str,
    line: u32,
}

impl<'a> CallSite<'a> {
    /// Creates a call site from a file name and line number.
    pub const fn new(file: &'a str, line: u32) -> Self {
        Self { file, line }
    }

    /// The call site of whoever called the current `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> CallSite<'static> {
        Location::caller().into()
    }

    /// Source file name.
    pub fn file(&self) -> &'a str {
        self.file
    }

    /// Source line number.
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl From<&'static Location<'static>> for CallSite<'static> {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for CallSite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} in file {}", self.line, self.file)
    }
}

/// Truncates `file` to at most [`MAX_FILE_LEN`] bytes without splitting a character.
pub(crate) fn truncate_file(file: &str) -> &str {
    if file.len() <= MAX_FILE_LEN {
        return file;
    }

    let mut end = MAX_FILE_LEN;
    while !file.is_char_boundary(end) {
        end -= 1;
    }
    &file[..end]
}

/// A single live block handed out by the tracker.
///
/// The tracker never owns the bytes behind `addr`; the record only remembers where the block is and how much of it
/// the caller asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AllocationRecord {
    pub addr: usize,
    pub size: usize,
}

impl AllocationRecord {
    /// Whether `addr` points inside the caller-visible part of this block, returning the offset if so.
    pub fn offset_of(&self, addr: usize) -> Option<usize> {
        addr.checked_sub(self.addr).filter(|offset| *offset < self.size)
    }
}

/// Aggregated bookkeeping for every allocation made from one call site.
#[derive(Debug)]
pub(crate) struct SiteRecord {
    pub file: Box<str>,
    pub line: u32,
    pub live: Vec<AllocationRecord>,
    pub live_bytes: usize,
    pub allocations: u64,
    pub frees: u64,
}

impl SiteRecord {
    pub fn new(file: &str, line: u32) -> Self {
        Self {
            file: truncate_file(file).into(),
            line,
            live: Vec::new(),
            live_bytes: 0,
            allocations: 0,
            frees: 0,
        }
    }

    pub fn site(&self) -> CallSite<'_> {
        CallSite::new(&self.file, self.line)
    }

    pub fn push(&mut self, record: AllocationRecord) {
        self.live_bytes += record.size;
        self.allocations += 1;
        self.live.push(record);
    }

    pub fn remove(&mut self, addr: usize) -> Option<AllocationRecord> {
        let pos = self.live.iter().position(|record| record.addr == addr)?;
        let record = self.live.swap_remove(pos);
        self.live_bytes -= record.size;
        self.frees += 1;
        Some(record)
    }

    pub fn find(&self, addr: usize) -> Option<&AllocationRecord> {
        self.live.iter().find(|record| record.addr == addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_untouched() {
        assert_eq!(truncate_file("src/main.rs"), "src/main.rs");
    }

    #[test]
    fn long_names_are_cut_on_char_boundary() {
        let ascii = "a".repeat(300);
        assert_eq!(truncate_file(&ascii).len(), MAX_FILE_LEN);

        // 'é' is two bytes wide, so byte 255 falls in the middle of a character.
        let wide = "é".repeat(200);
        let cut = truncate_file(&wide);
        assert_eq!(cut.len(), 254);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn offsets_only_inside_requested_size() {
        let record = AllocationRecord { addr: 1000, size: 10 };
        assert_eq!(record.offset_of(1000), Some(0));
        assert_eq!(record.offset_of(1009), Some(9));
        assert_eq!(record.offset_of(1010), None);
        assert_eq!(record.offset_of(999), None);
    }

    #[test]
    fn site_counters_follow_pushes_and_removes() {
        let mut site = SiteRecord::new("lib.rs", 7);
        site.push(AllocationRecord { addr: 1, size: 10 });
        site.push(AllocationRecord { addr: 2, size: 20 });
        site.push(AllocationRecord { addr: 3, size: 30 });
        assert_eq!(site.live_bytes, 60);

        assert_eq!(site.remove(1), Some(AllocationRecord { addr: 1, size: 10 }));
        assert_eq!(site.remove(1), None);
        assert_eq!(site.live_bytes, 50);
        assert_eq!(site.allocations, 3);
        assert_eq!(site.frees, 1);
        assert_eq!(site.live_bytes, site.live.iter().map(|r| r.size).sum::<usize>());
        assert!(site.find(3).is_some());
    }
}
