//! Records exchanged between the sourcing layer, the store and captcha assembly.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Image board an image was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Gelbooru,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Gelbooru => "gelbooru",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content rating of a post, collapsed onto three levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    #[default]
    Safe,
    Questionable,
    Explicit,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Safe => "safe",
            Rating::Questionable => "questionable",
            Rating::Explicit => "explicit",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rating {
    type Err = String;

    /// Accepts both the current gelbooru vocabulary and the legacy one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "safe" | "g" | "general" => Ok(Rating::Safe),
            "q" | "questionable" | "sensitive" => Ok(Rating::Questionable),
            "e" | "explicit" => Ok(Rating::Explicit),
            other => Err(other.to_string()),
        }
    }
}

/// MD5 content hash of a booru file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Md5(pub [u8; 16]);

impl Md5 {
    /// Parses the 32 character hex form boorus publish.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut buf = [0u8; 16];
        hex::decode_to_slice(s.trim(), &mut buf)?;
        Ok(Self(buf))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Md5 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Request for a single captcha image of a character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub tag: String,
    pub source: Source,
}

impl FetchRequest {
    pub fn new(tag: impl Into<String>, source: Source) -> Self {
        Self {
            tag: tag.into(),
            source,
        }
    }
}

/// A validated candidate that has not been handed out yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    pub target_tag: String,
    pub md5: Md5,
    pub url: String,
    pub rating: Rating,
    /// Always contains `target_tag`.
    pub tags: BTreeSet<String>,
}

/// Finalized image handed to captcha assembly together with its file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Image {
    pub rating: Rating,
    pub source: Source,
    pub md5: Md5,
    pub tags: BTreeSet<String>,
}

impl Image {
    pub fn from_pending(pending: PendingImage, source: Source) -> Self {
        Self {
            rating: pending.rating,
            source,
            md5: pending.md5,
            tags: pending.tags,
        }
    }
}
