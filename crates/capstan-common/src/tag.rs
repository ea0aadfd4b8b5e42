//! Image tag sanitization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A sanitized image tag.
///
/// Tags:
/// - Contain only ASCII alphanumerics, `_`, `-` and `.`
/// - Are at most 128 characters long
///
/// Every other character of the input is replaced with `_` before the result
/// is truncated, so a tag is always a prefix of the character-mapped input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Maximum length of a tag.
    pub const MAX_LENGTH: usize = 128;

    /// Build a tag from arbitrary input, replacing invalid characters.
    #[must_use]
    pub fn sanitize(raw: &str) -> Self {
        Self(
            raw.chars()
                .map(|c| if Self::is_valid_char(c) { c } else { '_' })
                .take(Self::MAX_LENGTH)
                .collect(),
        )
    }

    /// Whether a character may appear in a tag unchanged.
    #[must_use]
    pub const fn is_valid_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
    }

    /// Get the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the tag, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}
