use log::{debug, info, trace};
use rand::Rng;

use super::FetchError;
use super::ingest::{IngestReport, ingest_posts};
use super::page_cache::SearchCacheEntry;
use crate::booru::SearchProvider;
use crate::database::Store;

/// Posts requested per search page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Result of one page fetch attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// A new page was searched and its posts ingested
    Fetched { page: u32, report: IngestReport },
    /// The sampled page was already fetched earlier
    CacheHit { page: u32 },
    /// Every page under the bound has been fetched
    FullyCached,
}

/// Drives a single paginated search for one composed query.
pub struct PageFetcher<'a, B: ?Sized, S: ?Sized> {
    provider: &'a B,
    store: &'a S,
    page_size: u32,
    max_posts_per_page: Option<usize>,
}

impl<'a, B, S> PageFetcher<'a, B, S>
where
    B: SearchProvider + ?Sized,
    S: Store + ?Sized,
{
    pub fn new(provider: &'a B, store: &'a S, page_size: u32, max_posts_per_page: Option<usize>) -> Self {
        Self {
            provider,
            store,
            page_size,
            max_posts_per_page,
        }
    }

    /// Samples a page of `query` and ingests it for `requested`.
    ///
    /// An empty page past the first lowers the entry's bound and another page
    /// is sampled under it. The bound strictly shrinks on every retry, so the
    /// loop ends with a fetched page, a cache hit, or [`FetchError::NoMatch`]
    /// once page 0 comes back empty.
    pub fn fetch<R: Rng>(
        &self,
        entry: &mut SearchCacheEntry,
        rng: &mut R,
        requested: &str,
        query: &str,
    ) -> Result<PageOutcome, FetchError> {
        loop {
            if entry.is_unmatched() {
                return Err(FetchError::NoMatch);
            }
            if entry.is_fully_cached() {
                trace!("All {} pages of \"{}\" already fetched", entry.max_pages(), query);
                return Ok(PageOutcome::FullyCached);
            }

            // Fresh queries always start at the first page
            let page = if entry.pages().is_empty() {
                0
            } else {
                rng.gen_range(0..entry.max_pages())
            };
            if entry.is_seen(page) {
                trace!("Page {} of \"{}\" is cached", page, query);
                return Ok(PageOutcome::CacheHit { page });
            }

            debug!("Fetching page {} of \"{}\"", page, query);
            let posts = self.provider.search(query, page, self.page_size)?;
            if posts.is_empty() {
                if page == 0 {
                    info!("No posts match \"{}\"", query);
                    entry.mark_unmatched();
                    return Err(FetchError::NoMatch);
                }
                entry.mark_exhausted_at(page);
                continue;
            }

            let report = ingest_posts(self.store, requested, &posts, self.max_posts_per_page)?;
            entry.mark_seen(page);
            debug!(
                "Page {} of \"{}\": {} inserted, {} known, {} blacklisted",
                page, query, report.inserted, report.known, report.blacklisted
            );
            return Ok(PageOutcome::Fetched { page, report });
        }
    }
}
