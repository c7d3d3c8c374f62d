//! Console markers
//!
//! A marker is either a literal substring or a regular expression. Matching
//! runs on raw bytes so offsets always line up with the session buffer, even
//! when a multi-byte character is split across reads.

use regex::bytes::Regex;
use std::fmt;

use crate::error::Result;

/// Text the console session waits for
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact substring
    Literal(String),
    /// Regular expression, matched against the raw byte stream
    Regex(Regex),
}

impl Pattern {
    /// Exact substring marker
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    /// Regular-expression marker
    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    /// Byte range of the first match in `haystack`
    pub fn find(&self, haystack: &[u8]) -> Option<(usize, usize)> {
        match self {
            Pattern::Literal(text) => {
                let needle = text.as_bytes();
                if needle.is_empty() {
                    return Some((0, 0));
                }
                haystack
                    .windows(needle.len())
                    .position(|window| window == needle)
                    .map(|start| (start, start + needle.len()))
            }
            Pattern::Regex(regex) => regex.find(haystack).map(|m| (m.start(), m.end())),
        }
    }

    /// Source text of the marker
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Literal(text) => text,
            Pattern::Regex(regex) => regex.as_str(),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
