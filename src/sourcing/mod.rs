//! Captcha image sourcing.
//!
//! [`Sourcer::fetch`] is the entry point: it samples a page of the booru
//! search for the requested character, validates the posts on it into the
//! pending pool, pops one pending image and downloads its file.

pub mod ingest;
pub mod page_cache;
pub mod page_fetcher;
pub mod query;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::booru::{BooruError, FileDownloader, SearchProvider};
use crate::database::{Store, StoreError};
use crate::models::{FetchRequest, Image};

pub use ingest::{IngestReport, PostOutcome, Rejection};
pub use page_cache::{DEFAULT_MAX_PAGES, SearchCache, SearchCacheEntry};
pub use page_fetcher::{DEFAULT_PAGE_SIZE, PageFetcher, PageOutcome};
pub use query::{GLOBAL_FILTERS, compose_query, normalize_tag};

/// Sourcing errors
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Booru error: {0}")]
    Transport(#[from] BooruError),

    /// The query has no results at all. Never escapes [`Sourcer::fetch`].
    #[error("No images match the query")]
    NoMatch,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid tag '{0}'")]
    InvalidTag(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Tunables of a [`Sourcer`].
#[derive(Debug, Clone)]
pub struct SourcerConfig {
    /// Initial page bound of every query
    pub max_pages: u32,
    pub page_size: u32,
    /// Ingest at most this many posts of each page
    pub max_posts_per_page: Option<usize>,
    /// Directory for downloaded files. `None` uses the OS temp dir.
    pub temp_directory: Option<PathBuf>,
}

impl Default for SourcerConfig {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
            max_posts_per_page: None,
            temp_directory: None,
        }
    }
}

/// A downloaded captcha candidate. Dropping it deletes the file.
#[derive(Debug)]
pub struct Fetched {
    pub file: NamedTempFile,
    pub image: Image,
}

impl Fetched {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// State guarded by the sourcing lock.
struct SourcingState {
    cache: SearchCache,
    rng: StdRng,
}

/// Sources captcha images for character tags from a booru.
///
/// All fetches are serialized behind one lock, including every network call
/// they make, so at most one booru interaction is in flight at a time.
pub struct Sourcer<B, S> {
    provider: B,
    store: S,
    config: SourcerConfig,
    state: Mutex<SourcingState>,
}

impl<B, S> Sourcer<B, S>
where
    B: SearchProvider + FileDownloader,
    S: Store,
{
    pub fn new(provider: B, store: S, config: SourcerConfig) -> Self {
        Self::with_rng(provider, store, config, StdRng::from_entropy())
    }

    /// Like [`Sourcer::new`] with a caller supplied page sampler.
    pub fn with_rng(provider: B, store: S, config: SourcerConfig, rng: StdRng) -> Self {
        let state = SourcingState {
            cache: SearchCache::new(config.max_pages),
            rng,
        };
        Self {
            provider,
            store,
            config,
            state: Mutex::new(state),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot of the pagination state of a composed query.
    pub fn cache_entry(&self, query: &str) -> Option<SearchCacheEntry> {
        self.state.lock().cache.get(query).cloned()
    }

    /// Fetches a random image of `request.tag`.
    ///
    /// `Ok(None)` means no candidate is available right now, either because
    /// the tag has no results or because the pool for it is empty. The
    /// returned file belongs to the caller.
    pub fn fetch(&self, request: &FetchRequest) -> FetchResult<Option<Fetched>> {
        let tag = normalize_tag(&request.tag)?;

        let mut state = self.state.lock();
        let SourcingState { cache, rng } = &mut *state;

        let query = compose_query(&tag);
        let fetcher = PageFetcher::new(
            &self.provider,
            &self.store,
            self.config.page_size,
            self.config.max_posts_per_page,
        );
        match fetcher.fetch(cache.entry(&query), rng, &tag, &query) {
            Ok(outcome) => debug!("Page fetch for '{}': {:?}", tag, outcome),
            Err(FetchError::NoMatch) => {
                info!("No images available for '{}'", tag);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let pending = match self.store.pop_random_pending_image(&tag) {
            Ok(pending) => pending,
            Err(StoreError::NoRows) => {
                debug!("No pending images for '{}'", tag);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let url = pending.url.clone();
        let image = Image::from_pending(pending, request.source);

        let mut file = self.temp_file()?;
        match self.provider.download(&url, file.as_file_mut()) {
            Ok(bytes) => {
                info!("Fetched {} for '{}' ({} bytes)", image.md5, tag, bytes);
                Ok(Some(Fetched { file, image }))
            }
            Err(e) => {
                // The popped record is not restored; the image is simply lost
                warn!("Failed to download {} for '{}': {}", url, tag, e);
                drop(file);
                Ok(None)
            }
        }
    }

    fn temp_file(&self) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("captchouli-");
        match &self.config.temp_directory {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)
            }
            None => builder.tempfile(),
        }
    }
}
