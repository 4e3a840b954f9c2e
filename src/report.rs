use std::fmt;

use crate::site::SiteRecord;

const RULE: &str = "----------------------------------------------";

/// Point-in-time aggregates for a single call site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteSummary {
    /// Source file of the call site, truncated to [`MAX_FILE_LEN`][crate::MAX_FILE_LEN] bytes.
    pub file: String,
    /// Source line of the call site.
    pub line: u32,
    /// Bytes currently held by live allocations from this site.
    pub live_bytes: usize,
    /// Number of live allocations from this site.
    pub live_allocations: usize,
    /// Number of allocations ever made from this site.
    pub allocations: u64,
    /// Number of allocations from this site that have since been freed or reallocated away.
    pub frees: u64,
}

impl SiteSummary {
    pub(crate) fn from_record(site: &SiteRecord) -> Self {
        Self {
            file: site.file.to_string(),
            line: site.line,
            live_bytes: site.live_bytes,
            live_allocations: site.live.len(),
            allocations: site.allocations,
            frees: site.frees,
        }
    }
}

/// Human-readable listing of call sites, as printed by [`Tracker::report`][crate::Tracker::report].
///
/// Only sites that have allocated strictly more than `min_allocations` times are listed. The layout is meant for
/// people, not for parsing.
#[derive(Clone, Debug)]
pub struct Report {
    sites: Vec<SiteSummary>,
    min_allocations: u64,
}

impl Report {
    /// Creates a report over `sites`, omitting any site with `min_allocations` or fewer allocations.
    pub fn new(sites: Vec<SiteSummary>, min_allocations: u64) -> Self {
        Self {
            sites,
            min_allocations,
        }
    }

    /// The sites that make it into the report.
    pub fn listed(&self) -> impl Iterator<Item = &SiteSummary> {
        let min = self.min_allocations;
        self.sites.iter().filter(move |site| site.allocations > min)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory report:")?;
        writeln!(f, "{}", RULE)?;
        for site in self.listed() {
            writeln!(f, "{} line: {}", site.file, site.line)?;
            writeln!(f, " - Bytes allocated: {}", site.live_bytes)?;
            writeln!(f, " - Allocations: {}", site.allocations)?;
            writeln!(f, " - Frees: {}", site.frees)?;
            writeln!(f)?;
        }
        writeln!(f, "{}", RULE)
    }
}
