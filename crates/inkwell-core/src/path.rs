//! Field paths and values extracted from requests.

use crate::error::MessageError;
use std::fmt;
use std::str::FromStr;

/// Ordered sequence of field names addressing a position in a nested message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path such as `single_nested.name`
    pub fn parse(dotted: &str) -> Result<Self, MessageError> {
        if dotted.is_empty() {
            return Err(MessageError::InvalidPath(dotted.to_string()));
        }

        let mut segments = Vec::new();
        for segment in dotted.split('.') {
            if !is_ident(segment) {
                return Err(MessageError::InvalidPath(dotted.to_string()));
            }
            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if one path is a prefix of the other (or they are equal)
    pub fn shares_prefix(&self, other: &FieldPath) -> bool {
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| a == b)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_ident(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Where an extracted value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Path,
    Query,
}

/// A raw string value destined for a field of the request message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedValue {
    pub path: FieldPath,
    pub value: String,
    pub source: ValueSource,
}

impl ExtractedValue {
    pub fn from_path(path: FieldPath, value: impl Into<String>) -> Self {
        Self {
            path,
            value: value.into(),
            source: ValueSource::Path,
        }
    }

    pub fn from_query(path: FieldPath, value: impl Into<String>) -> Self {
        Self {
            path,
            value: value.into(),
            source: ValueSource::Query,
        }
    }
}
