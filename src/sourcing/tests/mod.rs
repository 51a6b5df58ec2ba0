//! Sourcing Tests Module
//!
//! End-to-end fetch scenarios against an in-memory booru and a real SQLite
//! store.

mod concurrent_test;

use std::collections::HashMap;
use std::io::Write;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::{Sourcer, SourcerConfig};
use crate::booru::{BooruError, BooruResult, BooruTag, FileDownloader, Post, SearchProvider, TagKind};
use crate::database::SqliteStore;
use crate::models::{Md5, Rating};

pub(crate) const FILE_BYTES: &[u8] = b"\xff\xd8\xff\xe0 not really a jpeg";

/// Post served by [`FakeBooru`].
#[derive(Debug, Clone)]
pub(crate) struct FakePost {
    pub md5: String,
    pub url: String,
    pub rating: String,
    pub tags: Vec<BooruTag>,
    /// Rating and tag lookups fail like a dropped connection
    pub broken_metadata: bool,
}

impl FakePost {
    /// A valid single character still image of `character`.
    pub fn character(n: u32, character: &str) -> Self {
        Self {
            md5: format!("{:032x}", n),
            url: format!("https://img3.gelbooru.com/images/{:032x}.jpg", n),
            rating: "general".to_string(),
            tags: vec![
                BooruTag::new(character, TagKind::Character),
                BooruTag::new("solo", TagKind::General),
            ],
            broken_metadata: false,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn with_tags(mut self, tags: &[(&str, TagKind)]) -> Self {
        self.tags = tags.iter().map(|(t, k)| BooruTag::new(*t, *k)).collect();
        self
    }

    pub fn md5(&self) -> Md5 {
        Md5::from_hex(&self.md5).unwrap()
    }
}

impl Post for FakePost {
    fn hash(&self) -> BooruResult<Md5> {
        Md5::from_hex(&self.md5).map_err(|_| BooruError::InvalidHash(self.md5.clone()))
    }

    fn file_url(&self) -> &str {
        &self.url
    }

    fn rating(&self) -> BooruResult<Rating> {
        if self.broken_metadata {
            return Err(BooruError::Status { status: 503, url: self.url.clone() });
        }
        self.rating.parse().map_err(BooruError::UnknownRating)
    }

    fn tags(&self) -> BooruResult<Vec<BooruTag>> {
        if self.broken_metadata {
            return Err(BooruError::Status { status: 503, url: self.url.clone() });
        }
        Ok(self.tags.clone())
    }
}

/// In-memory booru. Pages past the configured ones are empty.
#[derive(Default)]
pub(crate) struct FakeBooru {
    /// Character tag -> pages of posts
    pages: HashMap<String, Vec<Vec<FakePost>>>,
    broken_urls: Vec<String>,
    search_fails: bool,
    /// Every (query, page) searched, in order
    pub searches: Mutex<Vec<(String, u32)>>,
}

impl FakeBooru {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(mut self, tag: &str, pages: Vec<Vec<FakePost>>) -> Self {
        self.pages.insert(tag.to_string(), pages);
        self
    }

    pub fn with_broken_url(mut self, url: &str) -> Self {
        self.broken_urls.push(url.to_string());
        self
    }

    pub fn failing() -> Self {
        Self {
            search_fails: true,
            ..Self::default()
        }
    }

    pub fn searched_pages(&self) -> Vec<u32> {
        self.searches.lock().iter().map(|(_, page)| *page).collect()
    }
}

impl SearchProvider for FakeBooru {
    type Post = FakePost;

    fn search(&self, tags: &str, page: u32, _limit: u32) -> BooruResult<Vec<FakePost>> {
        self.searches.lock().push((tags.to_string(), page));
        if self.search_fails {
            return Err(BooruError::Status { status: 502, url: "https://gelbooru.com/index.php".to_string() });
        }

        let character = tags.rsplit(' ').next().unwrap_or_default();
        Ok(self
            .pages
            .get(character)
            .and_then(|pages| pages.get(page as usize))
            .cloned()
            .unwrap_or_default())
    }
}

impl FileDownloader for FakeBooru {
    fn download(&self, url: &str, dest: &mut dyn Write) -> BooruResult<u64> {
        if self.broken_urls.iter().any(|u| u == url) {
            return Err(BooruError::Status { status: 404, url: url.to_string() });
        }
        dest.write_all(FILE_BYTES)?;
        Ok(FILE_BYTES.len() as u64)
    }
}

pub(crate) fn test_config(max_pages: u32) -> SourcerConfig {
    SourcerConfig {
        max_pages,
        ..SourcerConfig::default()
    }
}

pub(crate) fn sourcer(booru: FakeBooru, config: SourcerConfig) -> Sourcer<FakeBooru, SqliteStore> {
    let store = SqliteStore::open_in_memory().unwrap();
    Sourcer::with_rng(booru, store, config, StdRng::seed_from_u64(0x5eed))
}
