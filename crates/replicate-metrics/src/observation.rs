//! Observation and tag types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `key:value` tag attached to an observation.
///
/// Bare tags (no `:`) are kept with an empty value and render as the key alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse a `key:value` string. Only the first `:` separates key from value.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((key, value)) => Self::new(key, value),
            None => Self::new(raw, ""),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}:{}", self.key, self.value)
        }
    }
}

/// A single gauge reading produced by a check run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Fully-qualified metric name, prefix included.
    pub name: String,
    pub value: f64,
    pub tags: Vec<Tag>,
}

impl Observation {
    /// Build a gauge observation. Tags keep the order they were given in.
    pub fn gauge(name: impl Into<String>, value: f64, tags: &[Tag]) -> Self {
        Self {
            name: name.into(),
            value,
            tags: tags.to_vec(),
        }
    }

    /// Build a 0/1 gauge from a boolean.
    pub fn flag(name: impl Into<String>, on: bool, tags: &[Tag]) -> Self {
        Self::gauge(name, if on { 1.0 } else { 0.0 }, tags)
    }

    /// Look up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}
