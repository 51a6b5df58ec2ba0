//! Booru search provider seam.
//!
//! The sourcing layer only talks to boorus through [`SearchProvider`] and
//! [`FileDownloader`]. [`gelbooru::GelbooruClient`] is the production
//! implementation; tests plug in in-memory fakes.

use std::io::Write;

use thiserror::Error;

use crate::models::{Md5, Rating};

pub mod gelbooru;
pub mod rate_limiter;

pub use gelbooru::{GelbooruClient, GelbooruPost};
pub use rate_limiter::{AdaptiveRateLimiter, RateLimiterConfig};

/// Transport and parse failures of a booru interaction.
#[derive(Error, Debug)]
pub enum BooruError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Invalid JSON response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid MD5 hash '{0}'")]
    InvalidHash(String),

    #[error("Unknown rating '{0}'")]
    UnknownRating(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for booru operations
pub type BooruResult<T> = Result<T, BooruError>;

/// Category of a booru tag. Only `Character` matters for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    General,
    Artist,
    Copyright,
    Character,
    Meta,
}

impl TagKind {
    /// Maps the numeric tag type used by the gelbooru/danbooru APIs.
    pub fn from_type_id(id: i64) -> Self {
        match id {
            1 => TagKind::Artist,
            3 => TagKind::Copyright,
            4 => TagKind::Character,
            5 => TagKind::Meta,
            _ => TagKind::General,
        }
    }
}

/// A single tag attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BooruTag {
    pub tag: String,
    pub kind: TagKind,
}

impl BooruTag {
    pub fn new(tag: impl Into<String>, kind: TagKind) -> Self {
        Self {
            tag: tag.into(),
            kind,
        }
    }
}

/// Post returned by a search. Rating and tag accessors may hit the network.
pub trait Post {
    fn hash(&self) -> BooruResult<Md5>;
    fn file_url(&self) -> &str;
    fn rating(&self) -> BooruResult<Rating>;
    fn tags(&self) -> BooruResult<Vec<BooruTag>>;
}

/// Paginated tag search over a booru.
pub trait SearchProvider {
    type Post: Post;

    /// Returns the posts on `page` (0-based) of the search for `tags`.
    /// An empty vector means the page is past the last result.
    fn search(&self, tags: &str, page: u32, limit: u32) -> BooruResult<Vec<Self::Post>>;
}

/// Streams a file from a booru CDN into `dest`, returning the byte count.
pub trait FileDownloader {
    fn download(&self, url: &str, dest: &mut dyn Write) -> BooruResult<u64>;
}
