//! Blocking client for the Gelbooru DAPI.

use std::collections::HashMap;
use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;

use super::{
    AdaptiveRateLimiter, BooruError, BooruResult, BooruTag, FileDownloader, Post,
    RateLimiterConfig, SearchProvider, TagKind,
};
use crate::models::{Md5, Rating};

/// Gelbooru rejects tag lookups with too many names in one request.
const TAG_LOOKUP_CHUNK: usize = 100;

const DEFAULT_TAG_CACHE_SIZE: usize = 10_000;

/// Envelope of `s=post` responses. `post` is absent on empty pages.
#[derive(Debug, Deserialize, Default)]
struct PostsResponse {
    #[serde(default)]
    post: Vec<RawPost>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct RawPost {
    #[serde(default)]
    md5: String,
    #[serde(default)]
    file_url: String,
    #[serde(default)]
    rating: String,
    #[serde(default)]
    tags: String,
}

#[derive(Debug, Deserialize, Default)]
struct TagsResponse {
    #[serde(default)]
    tag: Vec<RawTag>,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    name: String,
    #[serde(rename = "type")]
    kind: i64,
}

fn parse_posts(body: &str) -> BooruResult<Vec<RawPost>> {
    // Some mirrors answer an empty search with an empty body or `[]`
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Ok(Vec::new());
    }
    let response: PostsResponse = serde_json::from_str(trimmed)?;
    Ok(response.post)
}

fn parse_tags(body: &str) -> BooruResult<Vec<RawTag>> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Ok(Vec::new());
    }
    let response: TagsResponse = serde_json::from_str(trimmed)?;
    Ok(response.tag)
}

struct ClientInner {
    http: Client,
    api_url: String,
    limiter: AdaptiveRateLimiter,
    /// Tag name -> kind, shared by every post from this client
    tag_kinds: Mutex<LruCache<String, TagKind>>,
}

impl ClientInner {
    /// Sends a rate limited GET and fails on non-success statuses.
    fn get(&self, url: &str, query: &[(&str, String)]) -> BooruResult<Response> {
        self.limiter.wait_for_request();
        let started = Instant::now();
        let response = self.http.get(url).query(query).send()?;
        self.limiter.record_response_time(started.elapsed());

        let status = response.status();
        if !status.is_success() {
            return Err(BooruError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    fn dapi(&self, query: &[(&str, String)]) -> BooruResult<String> {
        let response = self.get(&self.api_url, query)?;
        Ok(response.text()?)
    }

    /// Resolves the kinds of `names` through the tag cache and the tag API.
    fn resolve_kinds(&self, names: &[&str]) -> BooruResult<Vec<BooruTag>> {
        resolve_tag_kinds(&self.tag_kinds, names, |chunk| {
            debug!("Looking up {} tag types", chunk.len());
            let body = self.dapi(&[
                ("page", "dapi".to_string()),
                ("s", "tag".to_string()),
                ("q", "index".to_string()),
                ("json", "1".to_string()),
                ("limit", chunk.len().to_string()),
                ("names", chunk.join(" ")),
            ])?;
            parse_tags(&body)
        })
    }
}

/// Kinds of `names` in order, calling `lookup` in chunks for names not cached yet.
///
/// A name `lookup` does not return is reported as [`TagKind::General`] and
/// left out of the cache, so it is looked up again next time.
fn resolve_tag_kinds<F>(
    cache: &Mutex<LruCache<String, TagKind>>,
    names: &[&str],
    mut lookup: F,
) -> BooruResult<Vec<BooruTag>>
where
    F: FnMut(&[&str]) -> BooruResult<Vec<RawTag>>,
{
    let mut resolved: HashMap<&str, TagKind> = HashMap::with_capacity(names.len());
    let mut missing = Vec::new();
    {
        let mut cache = cache.lock();
        for &name in names {
            match cache.get(name) {
                Some(kind) => {
                    resolved.insert(name, *kind);
                }
                None if !missing.contains(&name) => missing.push(name),
                None => {}
            }
        }
    }

    for chunk in missing.chunks(TAG_LOOKUP_CHUNK) {
        let tags = lookup(chunk)?;
        let mut cache = cache.lock();
        for tag in tags {
            let kind = TagKind::from_type_id(tag.kind);
            if let Some(&name) = chunk.iter().find(|name| **name == tag.name) {
                resolved.insert(name, kind);
            }
            cache.put(tag.name, kind);
        }
    }

    Ok(names
        .iter()
        .map(|&name| {
            let kind = resolved.get(name).copied().unwrap_or_else(|| {
                warn!("Tag '{}' has no known type, treating it as general", name);
                TagKind::General
            });
            BooruTag::new(name, kind)
        })
        .collect())
}

/// Gelbooru search provider and file downloader.
#[derive(Clone)]
pub struct GelbooruClient {
    inner: Arc<ClientInner>,
}

impl GelbooruClient {
    pub fn new(
        api_url: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
        rate: RateLimiterConfig,
    ) -> BooruResult<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        let cache_size = NonZeroUsize::new(DEFAULT_TAG_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                api_url: api_url.into(),
                limiter: AdaptiveRateLimiter::with_config(rate),
                tag_kinds: Mutex::new(LruCache::new(cache_size)),
            }),
        })
    }
}

impl SearchProvider for GelbooruClient {
    type Post = GelbooruPost;

    fn search(&self, tags: &str, page: u32, limit: u32) -> BooruResult<Vec<GelbooruPost>> {
        trace!("Searching gelbooru: tags=\"{}\" page={} limit={}", tags, page, limit);
        let body = self.inner.dapi(&[
            ("page", "dapi".to_string()),
            ("s", "post".to_string()),
            ("q", "index".to_string()),
            ("json", "1".to_string()),
            ("tags", tags.to_string()),
            ("pid", page.to_string()),
            ("limit", limit.to_string()),
        ])?;

        Ok(parse_posts(&body)?
            .into_iter()
            .map(|raw| GelbooruPost {
                raw,
                client: self.inner.clone(),
            })
            .collect())
    }
}

impl FileDownloader for GelbooruClient {
    fn download(&self, url: &str, dest: &mut dyn Write) -> BooruResult<u64> {
        let mut response = self.inner.get(url, &[])?;
        let written = response.copy_to(dest)?;
        dest.flush()?;
        Ok(written)
    }
}

/// Post from a gelbooru search. Tag kinds are resolved lazily.
pub struct GelbooruPost {
    raw: RawPost,
    client: Arc<ClientInner>,
}

impl Post for GelbooruPost {
    fn hash(&self) -> BooruResult<Md5> {
        Md5::from_hex(&self.raw.md5).map_err(|_| BooruError::InvalidHash(self.raw.md5.clone()))
    }

    fn file_url(&self) -> &str {
        &self.raw.file_url
    }

    fn rating(&self) -> BooruResult<Rating> {
        self.raw
            .rating
            .parse()
            .map_err(BooruError::UnknownRating)
    }

    fn tags(&self) -> BooruResult<Vec<BooruTag>> {
        let names: Vec<&str> = self.raw.tags.split_whitespace().collect();
        self.client.resolve_kinds(&names)
    }
}
