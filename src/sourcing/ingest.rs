//! Per-post validation and placement into the pending pool or blacklist.
//!
//! Checks run cheapest first so posts that can be rejected from local state
//! or the file URL never cost a rating or tag lookup.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, info};

use super::FetchError;
use crate::booru::{BooruTag, Post, TagKind};
use crate::database::Store;
use crate::models::{Md5, PendingImage};

/// Extensions of files usable as captcha images.
const STILL_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Why a post was permanently rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotStillImage,
    MultipleCharacters,
    CharacterMismatch(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotStillImage => write!(f, "not a still image"),
            Rejection::MultipleCharacters => write!(f, "more than one character"),
            Rejection::CharacterMismatch(found) => write!(f, "character tag '{}' does not match", found),
        }
    }
}

/// What happened to a single post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Inserted,
    /// Already stored, pending or blacklisted
    Known,
    Blacklisted(Rejection),
}

/// Tally of one page's ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub known: usize,
    pub blacklisted: usize,
}

impl IngestReport {
    fn record(&mut self, outcome: &PostOutcome) {
        match outcome {
            PostOutcome::Inserted => self.inserted += 1,
            PostOutcome::Known => self.known += 1,
            PostOutcome::Blacklisted(_) => self.blacklisted += 1,
        }
    }
}

/// True if the URL path ends in a still image extension.
pub fn is_still_image(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let Some((_, ext)) = path.rsplit_once('.') else {
        return false;
    };
    if ext.contains('/') {
        return false;
    }
    STILL_IMAGE_EXTENSIONS
        .iter()
        .any(|allowed| ext.eq_ignore_ascii_case(allowed))
}

/// Accepts posts with no character tag or exactly one that matches `requested`.
/// Tags are queried lowercase on boorus, so the comparison ignores case.
pub fn check_characters(requested: &str, tags: &[BooruTag]) -> Result<(), Rejection> {
    let mut has_character = false;
    for tag in tags.iter().filter(|t| t.kind == TagKind::Character) {
        if has_character {
            return Err(Rejection::MultipleCharacters);
        }
        if tag.tag.to_lowercase() != requested.to_lowercase() {
            return Err(Rejection::CharacterMismatch(tag.tag.clone()));
        }
        has_character = true;
    }
    Ok(())
}

/// Unique tag set of a post, always including the requested tag.
pub fn dedup_tags(requested: &str, tags: &[BooruTag]) -> BTreeSet<String> {
    let mut set: BTreeSet<String> = tags.iter().map(|t| t.tag.clone()).collect();
    set.insert(requested.to_string());
    set
}

/// Validates one post and records the verdict in `store`.
pub fn ingest_post<P, S>(store: &S, requested: &str, post: &P) -> Result<PostOutcome, FetchError>
where
    P: Post + ?Sized,
    S: Store + ?Sized,
{
    let md5 = post.hash()?;
    if store.is_in_database(&md5)? || store.is_pending_image(&md5)? {
        return Ok(PostOutcome::Known);
    }

    let url = post.file_url();
    if !is_still_image(url) {
        return blacklist(store, &md5, Rejection::NotStillImage);
    }

    // These may need a network round trip
    let rating = post.rating()?;
    let tags = post.tags()?;

    if let Err(rejection) = check_characters(requested, &tags) {
        return blacklist(store, &md5, rejection);
    }

    let image = PendingImage {
        target_tag: requested.to_string(),
        md5,
        url: url.to_string(),
        rating,
        tags: dedup_tags(requested, &tags),
    };
    store.insert_pending_image(&image)?;
    info!("Added pending image {} for '{}': {}", image.md5, requested, image.url);
    Ok(PostOutcome::Inserted)
}

fn blacklist<S: Store + ?Sized>(
    store: &S,
    md5: &Md5,
    rejection: Rejection,
) -> Result<PostOutcome, FetchError> {
    debug!("Blacklisting {}: {}", md5, rejection);
    store.blacklist_image(md5)?;
    Ok(PostOutcome::Blacklisted(rejection))
}

/// Ingests a page of posts in order. The first hash, lookup or store failure
/// aborts the rest of the page.
pub fn ingest_posts<P, S>(
    store: &S,
    requested: &str,
    posts: &[P],
    limit: Option<usize>,
) -> Result<IngestReport, FetchError>
where
    P: Post,
    S: Store + ?Sized,
{
    let mut report = IngestReport::default();
    let take = limit.unwrap_or(posts.len());
    for post in posts.iter().take(take) {
        let outcome = ingest_post(store, requested, post)?;
        report.record(&outcome);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, kind: TagKind) -> BooruTag {
        BooruTag::new(name, kind)
    }

    #[test]
    fn test_still_image_extensions() {
        assert!(is_still_image("https://img3.gelbooru.com/images/aa/bb/aabb.jpg"));
        assert!(is_still_image("https://img3.gelbooru.com/images/aa/bb/aabb.JPEG"));
        assert!(is_still_image("https://img3.gelbooru.com/images/aa/bb/aabb.png?12345"));
        assert!(!is_still_image("https://img3.gelbooru.com/images/aa/bb/aabb.gif"));
        assert!(!is_still_image("https://img3.gelbooru.com/images/aa/bb/aabb.webm"));
        assert!(!is_still_image("https://img3.gelbooru.com/images/aa/bb/png"));
        assert!(!is_still_image("https://img3.gelbooru.com/images.d/file"));
        assert!(!is_still_image(""));
    }

    #[test]
    fn test_single_matching_character_is_accepted() {
        let tags = [tag("Cirno", TagKind::Character), tag("ice", TagKind::General)];
        assert_eq!(check_characters("cirno", &tags), Ok(()));
        assert_eq!(check_characters("cirno", &[tag("ice", TagKind::General)]), Ok(()));
    }

    #[test]
    fn test_character_rejections() {
        let two = [tag("cirno", TagKind::Character), tag("hakurei_reimu", TagKind::Character)];
        assert_eq!(check_characters("cirno", &two), Err(Rejection::MultipleCharacters));

        let other = [tag("daiyousei", TagKind::Character)];
        assert_eq!(
            check_characters("cirno", &other),
            Err(Rejection::CharacterMismatch("daiyousei".to_string()))
        );
    }

    #[test]
    fn test_dedup_tags_includes_requested() {
        let tags = [
            tag("ice", TagKind::General),
            tag("ice", TagKind::General),
            tag("solo", TagKind::General),
        ];
        let set = dedup_tags("cirno", &tags);
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec!["cirno".to_string(), "ice".to_string(), "solo".to_string()]
        );
    }
}
