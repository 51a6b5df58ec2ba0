use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use super::FetchError;

/// Filters prepended to every search. Must stay consistent with the
/// single-character check applied during ingestion.
pub const GLOBAL_FILTERS: &[&str] = &[
    "solo",
    "-multiple_girls",
    "-couple",
    "-multiple_boys",
    "-monochrome",
    "-photo",
    "-objectification",
    "-cosplay",
];

const MAX_TAG_LENGTH: usize = 100;

lazy_static! {
    /// One search term that neither negates nor wildcards. Booru tags carry
    /// slashes, apostrophes and non-ASCII letters, so anything else goes.
    static ref VALID_TAG_PATTERN: Regex = Regex::new(r"^[^\s\-~*][^\s*]*$").unwrap();

    /// `rating:explicit`, `score:>10` and friends
    static ref METATAG_PATTERN: Regex = Regex::new(r"^[a-z_]+:").unwrap();
}

/// Normalizes a requested character tag, rejecting anything that is not a
/// single plain tag.
pub fn normalize_tag(tag: &str) -> Result<String, FetchError> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty()
        || tag.chars().count() > MAX_TAG_LENGTH
        || !VALID_TAG_PATTERN.is_match(&tag)
        || METATAG_PATTERN.is_match(&tag)
    {
        return Err(FetchError::InvalidTag(tag));
    }
    Ok(tag)
}

/// Builds the search string for `tag`. This string is also the page cache key.
pub fn compose_query(tag: &str) -> String {
    let mut query = GLOBAL_FILTERS.join(" ");
    query.push(' ');
    query.push_str(tag);
    debug!("Composed query \"{}\"", query);
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_character_tags() {
        assert_eq!(normalize_tag(" Cirno ").unwrap(), "cirno");
        assert_eq!(normalize_tag("hakurei_reimu").unwrap(), "hakurei_reimu");
        assert_eq!(normalize_tag("saber_(fate)").unwrap(), "saber_(fate)");
        assert_eq!(normalize_tag("jeanne_d'arc_(fate)").unwrap(), "jeanne_d'arc_(fate)");
        assert_eq!(normalize_tag("ram_(re:zero)").unwrap(), "ram_(re:zero)");
    }

    #[test]
    fn test_normalize_accepts_slashes_and_non_ascii() {
        for tag in ["ruler_(fate/apocrypha)", "nero_claudius_(fate/extra)", "flabébé", "ルーミア"] {
            assert_eq!(normalize_tag(tag).unwrap(), tag);
        }
        assert_eq!(normalize_tag("Flabébé").unwrap(), "flabébé");
        assert_eq!(normalize_tag(&"é".repeat(100)).unwrap().chars().count(), 100);
    }

    #[test]
    fn test_normalize_rejects_query_smuggling() {
        for bad in [
            "",
            "   ",
            "cirno rating:explicit",
            "-cirno",
            "cirn*",
            "~cirno",
            "rating:safe",
            "score:>10",
            "a\tb",
            "a\u{3000}b",
        ] {
            assert!(
                matches!(normalize_tag(bad), Err(FetchError::InvalidTag(_))),
                "accepted {:?}",
                bad
            );
        }
        assert!(normalize_tag(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_compose_query_prefixes_filters() {
        let query = compose_query("cirno");
        assert!(query.starts_with("solo -multiple_girls"));
        assert!(query.ends_with(" cirno"));
        assert!(query.contains("-cosplay"));
        assert_ne!(compose_query("cirno"), compose_query("hakurei_reimu"));
    }
}
