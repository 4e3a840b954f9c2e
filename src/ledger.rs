use std::collections::BTreeMap;

use crate::site::{truncate_file, AllocationRecord, CallSite, SiteRecord};

/// Maximum number of distinct call sites the ledger tracks.
///
/// Allocations from any call site beyond this limit are handed out as usual but never recorded.
pub const SITE_CAPACITY: usize = 1024;

/// Per-call-site record of every live tracked allocation.
///
/// Sites are kept in the order they were first seen. Two indexes sit on top of that list: one from `(file, line)` to
/// the site's position, and one from a live block's address to the position of the site that owns it.
pub(crate) struct Ledger {
    sites: Vec<SiteRecord>,
    by_site: BTreeMap<Box<str>, BTreeMap<u32, usize>>,
    by_addr: BTreeMap<usize, usize>,
}

impl Ledger {
    pub const fn new() -> Self {
        Self {
            sites: Vec::new(),
            by_site: BTreeMap::new(),
            by_addr: BTreeMap::new(),
        }
    }

    /// Finds the position of the record for `site`, creating it if there's still room.
    pub fn find_or_create(&mut self, site: CallSite<'_>) -> Option<usize> {
        let file = truncate_file(site.file());
        if let Some(idx) = self.by_site.get(file).and_then(|lines| lines.get(&site.line())) {
            return Some(*idx);
        }

        if self.sites.len() >= SITE_CAPACITY {
            return None;
        }

        let idx = self.sites.len();
        self.sites.push(SiteRecord::new(file, site.line()));
        self.by_site
            .entry(file.into())
            .or_default()
            .insert(site.line(), idx);
        Some(idx)
    }

    /// Records a new live block against the site at `idx`.
    pub fn register(&mut self, idx: usize, addr: usize, size: usize) {
        self.sites[idx].push(AllocationRecord { addr, size });
        self.by_addr.insert(addr, idx);
    }

    /// Records a live block against `site`, returning `false` if the site could not be tracked.
    pub fn register_at(&mut self, site: CallSite<'_>, addr: usize, size: usize) -> bool {
        match self.find_or_create(site) {
            Some(idx) => {
                self.register(idx, addr, size);
                true
            }
            None => false,
        }
    }

    pub fn find_by_address(&self, addr: usize) -> Option<(&SiteRecord, AllocationRecord)> {
        let site = &self.sites[*self.by_addr.get(&addr)?];
        site.find(addr).map(|record| (site, *record))
    }

    pub fn remove_by_address(&mut self, addr: usize) -> Option<(&SiteRecord, AllocationRecord)> {
        let idx = self.by_addr.remove(&addr)?;
        let site = &mut self.sites[idx];
        let record = site.remove(addr)?;
        Some((&*site, record))
    }

    /// Finds the live block, if any, whose requested bytes contain `addr`.
    ///
    /// Returns the owning site, the block, and the offset of `addr` within it.
    pub fn find_containing(&self, addr: usize) -> Option<(&SiteRecord, AllocationRecord, usize)> {
        // Live blocks never overlap, so only the closest block starting at or below `addr` can contain it.
        let (start, idx) = self.by_addr.range(..=addr).next_back()?;
        let site = &self.sites[*idx];
        let record = *site.find(*start)?;
        record.offset_of(addr).map(|offset| (site, record, offset))
    }

    /// Drops every site and every record, without touching the blocks the records point at.
    pub fn clear(&mut self) {
        self.sites = Vec::new();
        self.by_site = BTreeMap::new();
        self.by_addr = BTreeMap::new();
    }

    pub fn sites(&self) -> &[SiteRecord] {
        &self.sites
    }

    pub fn live_bytes(&self) -> usize {
        self.sites.iter().map(|site| site.live_bytes).sum()
    }

    pub fn live_allocations(&self) -> usize {
        self.by_addr.len()
    }

    /// Iterates over every live block along with the site that owns it.
    pub fn live(&self) -> impl Iterator<Item = (&SiteRecord, &AllocationRecord)> {
        self.sites
            .iter()
            .flat_map(|site| site.live.iter().map(move |record| (site, record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_site_is_found_again() {
        let mut ledger = Ledger::new();
        let a = ledger.find_or_create(CallSite::new("a.rs", 1));
        let b = ledger.find_or_create(CallSite::new("b.rs", 1));
        let c = ledger.find_or_create(CallSite::new("a.rs", 2));
        assert_eq!(a, Some(0));
        assert_eq!(b, Some(1));
        assert_eq!(c, Some(2));
        assert_eq!(ledger.find_or_create(CallSite::new("a.rs", 1)), Some(0));
        assert_eq!(ledger.sites().len(), 3);
    }

    #[test]
    fn file_names_must_match_exactly() {
        let mut ledger = Ledger::new();
        let short = ledger.find_or_create(CallSite::new("lib.rs", 5));
        let long = ledger.find_or_create(CallSite::new("lib.rs.bak", 5));
        assert_ne!(short, long);
    }

    #[test]
    fn long_file_names_collapse_to_one_site() {
        let mut ledger = Ledger::new();
        let name = "x".repeat(400);
        let first = ledger.find_or_create(CallSite::new(&name, 9));
        let second = ledger.find_or_create(CallSite::new(&name, 9));
        assert_eq!(first, second);
        assert_eq!(ledger.sites()[0].file.len(), crate::site::MAX_FILE_LEN);
    }

    #[test]
    fn sites_beyond_capacity_are_dropped() {
        let mut ledger = Ledger::new();
        for line in 0..SITE_CAPACITY as u32 {
            assert!(ledger.find_or_create(CallSite::new("cap.rs", line)).is_some());
        }
        assert_eq!(ledger.find_or_create(CallSite::new("cap.rs", 5000)), None);
        assert!(!ledger.register_at(CallSite::new("cap.rs", 5000), 0x1000, 8));
        // Existing sites are still reachable once the ledger is full.
        assert_eq!(ledger.find_or_create(CallSite::new("cap.rs", 3)), Some(3));
        assert_eq!(ledger.live_bytes(), 0);
    }

    #[test]
    fn register_find_remove() {
        let mut ledger = Ledger::new();
        assert!(ledger.register_at(CallSite::new("r.rs", 1), 0x1000, 16));
        assert!(ledger.register_at(CallSite::new("r.rs", 1), 0x2000, 32));
        assert!(ledger.register_at(CallSite::new("r.rs", 2), 0x3000, 64));
        assert_eq!(ledger.live_bytes(), 112);
        assert_eq!(ledger.live_allocations(), 3);

        let (site, record) = ledger.find_by_address(0x2000).expect("block should be tracked");
        assert_eq!(site.line, 1);
        assert_eq!(record.size, 32);

        let (site, record) = ledger.remove_by_address(0x1000).expect("block should be tracked");
        assert_eq!((site.frees, site.live_bytes, record.size), (1, 32, 16));
        assert!(ledger.remove_by_address(0x1000).is_none());
        assert!(ledger.find_by_address(0x1000).is_none());
        assert_eq!(ledger.live_bytes(), 96);
        assert_eq!(ledger.live().count(), 2);
    }

    #[test]
    fn interior_pointers_are_located() {
        let mut ledger = Ledger::new();
        ledger.register_at(CallSite::new("i.rs", 3), 0x1000, 100);
        ledger.register_at(CallSite::new("i.rs", 4), 0x2000, 10);

        let (site, record, offset) = ledger.find_containing(0x1004).expect("inside first block");
        assert_eq!((site.line, record.addr, offset), (3, 0x1000, 4));
        assert!(ledger.find_containing(0x1000 + 100).is_none());
        assert!(ledger.find_containing(0x0fff).is_none());
        assert_eq!(ledger.find_containing(0x2009).map(|(_, _, off)| off), Some(9));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut ledger = Ledger::new();
        ledger.register_at(CallSite::new("c.rs", 1), 0x1000, 10);
        ledger.clear();
        assert!(ledger.sites().is_empty());
        assert_eq!(ledger.live_bytes(), 0);
        assert!(ledger.find_by_address(0x1000).is_none());
        assert_eq!(ledger.find_or_create(CallSite::new("c.rs", 1)), Some(0));
    }
}
