//! core::path
//!
//! Canonical hierarchical key paths.
//!
//! # Format
//!
//! A [`KeyPath`] is an ordered sequence of non-empty segments joined by `/`.
//! On input a single leading and a single trailing separator are tolerated;
//! the canonical form has neither. Inside a segment, `\/` is a literal slash
//! and `\\` a literal backslash.
//!
//! The empty string and `/` both parse to the root path, which has no
//! segments. Environment prefixes may be the root; keys never are.
//!
//! # Ordering
//!
//! Paths order lexicographically by segment, so `app/db` sorts before
//! `app/db/host`, which sorts before `app/dc`. Diff output relies on this.
//!
//! # Example
//!
//! ```
//! use consulkv::core::path::KeyPath;
//!
//! let base = KeyPath::parse("/prod/").unwrap();
//! let key = KeyPath::parse("prod/app/db/host").unwrap();
//!
//! assert!(base.is_prefix_of(&key));
//! assert_eq!(key.relative_to(&base).unwrap().to_string(), "app/db/host");
//! assert!(KeyPath::parse("app//host").is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::ErrorKind;

/// Separator between path segments.
pub const SEPARATOR: char = '/';

const ESCAPE: char = '\\';

/// Errors from key path construction and manipulation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    /// The input is not a well-formed key path.
    #[error("invalid key path '{path}': {reason}")]
    Invalid {
        /// The rejected input.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A path was expected to live under a base prefix but does not.
    #[error("key '{path}' is not under '{base}'")]
    NotUnderBase {
        /// The base prefix.
        base: String,
        /// The path that escaped it.
        path: String,
    },
}

impl PathError {
    /// The error kind reported to users and scripts.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PathError::Invalid { .. } => ErrorKind::InvalidPath,
            PathError::NotUnderBase { .. } => ErrorKind::NotUnderBase,
        }
    }

    fn invalid(path: &str, reason: impl Into<String>) -> Self {
        PathError::Invalid {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// A validated, canonical key path.
///
/// Immutable once constructed. Two paths are equal iff their segment
/// sequences are equal, regardless of how the input was spelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// The root path (no segments).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from already-split segments.
    ///
    /// Segments are taken literally (no escape processing) and must be
    /// non-empty.
    ///
    /// # Errors
    ///
    /// Returns `PathError::Invalid` if any segment is empty.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::invalid(
                &segments.join("/"),
                "segments cannot be empty",
            ));
        }
        Ok(Self { segments })
    }

    /// Parse a path string.
    ///
    /// # Errors
    ///
    /// Returns `PathError::Invalid` when a segment is empty (`a//b`, `//a`)
    /// or an escape sequence is malformed.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        if input.is_empty() {
            return Ok(Self::root());
        }

        let mut raw: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut chars = input.chars();
        let mut ended_with_separator = false;

        while let Some(c) = chars.next() {
            ended_with_separator = false;
            match c {
                ESCAPE => match chars.next() {
                    Some(escaped @ (SEPARATOR | ESCAPE)) => current.push(escaped),
                    Some(other) => {
                        return Err(PathError::invalid(
                            input,
                            format!("unknown escape sequence '\\{}'", other),
                        ))
                    }
                    None => return Err(PathError::invalid(input, "dangling escape character")),
                },
                SEPARATOR => {
                    raw.push(std::mem::take(&mut current));
                    ended_with_separator = true;
                }
                _ => current.push(c),
            }
        }
        raw.push(current);

        // One leading and one trailing separator are tolerated.
        if input.starts_with(SEPARATOR) {
            raw.remove(0);
        }
        if ended_with_separator && raw.last().is_some_and(String::is_empty) {
            raw.pop();
        }

        if raw.iter().any(String::is_empty) {
            return Err(PathError::invalid(input, "empty path segment"));
        }

        Ok(Self { segments: raw })
    }

    /// The path's segments, unescaped.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Alias for [`is_root`](Self::is_root), for collection-like call sites.
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// Final segment, if any.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<KeyPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// True iff every segment of `self` equals the corresponding leading
    /// segment of `other`. The root is a prefix of everything, and every
    /// path is a prefix of itself.
    pub fn is_prefix_of(&self, other: &KeyPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a == b)
    }

    /// Strip `base` from the front of `self`.
    ///
    /// # Errors
    ///
    /// Returns `PathError::NotUnderBase` if `base` is not a prefix of `self`.
    pub fn relative_to(&self, base: &KeyPath) -> Result<KeyPath, PathError> {
        if !base.is_prefix_of(self) {
            return Err(PathError::NotUnderBase {
                base: base.to_string(),
                path: self.to_string(),
            });
        }
        Ok(Self {
            segments: self.segments[base.segments.len()..].to_vec(),
        })
    }

    /// Append `relative` to `self`.
    pub fn join(&self, relative: &KeyPath) -> KeyPath {
        let mut segments = Vec::with_capacity(self.segments.len() + relative.segments.len());
        segments.extend_from_slice(&self.segments);
        segments.extend_from_slice(&relative.segments);
        Self { segments }
    }

    /// Append a single raw segment.
    ///
    /// # Errors
    ///
    /// Returns `PathError::Invalid` if `segment` is empty.
    pub fn child(&self, segment: impl Into<String>) -> Result<KeyPath, PathError> {
        let segment = segment.into();
        if segment.is_empty() {
            return Err(PathError::invalid(&self.to_string(), "segments cannot be empty"));
        }
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self { segments })
    }

    /// Build a path from a raw store key.
    ///
    /// The store has no escaping: every `/` separates segments.
    ///
    /// # Errors
    ///
    /// Returns `PathError::Invalid` if the key has an empty segment.
    pub fn from_store_key(key: &str) -> Result<Self, PathError> {
        Self::from_segments(key.split(SEPARATOR))
    }

    /// The raw store key for this path.
    ///
    /// # Errors
    ///
    /// Returns `PathError::Invalid` if a segment contains a literal
    /// separator, which the store cannot represent.
    pub fn to_store_key(&self) -> Result<String, PathError> {
        if self.segments.iter().any(|s| s.contains(SEPARATOR)) {
            return Err(PathError::invalid(
                &self.to_string(),
                "escaped separators cannot be stored",
            ));
        }
        Ok(self.segments.join("/"))
    }

    /// The raw store key with a trailing separator, for prefix queries.
    /// The root yields the empty string.
    ///
    /// # Errors
    ///
    /// Same as [`KeyPath::to_store_key`].
    pub fn to_store_prefix(&self) -> Result<String, PathError> {
        if self.is_root() {
            return Ok(String::new());
        }
        Ok(format!("{}{}", self.to_store_key()?, SEPARATOR))
    }
}

fn escape_segment(segment: &str, out: &mut String) {
    for c in segment.chars() {
        if c == SEPARATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            escape_segment(segment, &mut out);
        }
        f.write_str(&out)
    }
}

impl FromStr for KeyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl TryFrom<&str> for KeyPath {
    type Error = PathError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<KeyPath> for String {
    fn from(path: KeyPath) -> Self {
        path.to_string()
    }
}
