use std::collections::{BTreeSet, HashMap};

use log::debug;

/// Gelbooru refuses to paginate past this depth.
pub const DEFAULT_MAX_PAGES: u32 = 200;

/// Pagination state of one composed query.
///
/// `pages.len() <= max_pages` always holds, and `max_pages == 0` marks the
/// query as permanently unmatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCacheEntry {
    pages: BTreeSet<u32>,
    max_pages: u32,
}

impl SearchCacheEntry {
    pub fn new(max_pages: u32) -> Self {
        Self {
            pages: BTreeSet::new(),
            max_pages,
        }
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub fn pages(&self) -> &BTreeSet<u32> {
        &self.pages
    }

    pub fn is_seen(&self, page: u32) -> bool {
        self.pages.contains(&page)
    }

    pub fn is_unmatched(&self) -> bool {
        self.max_pages == 0
    }

    /// Every page below the bound has been fetched.
    pub fn is_fully_cached(&self) -> bool {
        self.pages.len() as u64 >= u64::from(self.max_pages)
    }

    /// Pages outside the current bound are ignored.
    pub fn mark_seen(&mut self, page: u32) {
        if page < self.max_pages {
            self.pages.insert(page);
        }
    }

    /// Records that `page` came back empty, so it and every later page are
    /// out of range. Only ever shrinks the bound.
    pub fn mark_exhausted_at(&mut self, page: u32) {
        if page >= self.max_pages {
            return;
        }
        debug!("Page bound lowered from {} to {}", self.max_pages, page);
        self.max_pages = page;
        self.pages.retain(|&p| p < page);
    }

    pub fn mark_unmatched(&mut self) {
        self.max_pages = 0;
        self.pages.clear();
    }
}

/// Per-query pagination state, keyed by the fully composed tag query.
#[derive(Debug, Clone)]
pub struct SearchCache {
    entries: HashMap<String, SearchCacheEntry>,
    default_max_pages: u32,
}

impl SearchCache {
    pub fn new(default_max_pages: u32) -> Self {
        Self {
            entries: HashMap::new(),
            default_max_pages,
        }
    }

    pub fn entry(&mut self, query: &str) -> &mut SearchCacheEntry {
        let max_pages = self.default_max_pages;
        self.entries
            .entry(query.to_string())
            .or_insert_with(|| SearchCacheEntry::new(max_pages))
    }

    pub fn get(&self, query: &str) -> Option<&SearchCacheEntry> {
        self.entries.get(query)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAGES)
    }
}
