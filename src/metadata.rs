//! Userscript header parsing.
//!
//! Scripts carry their metadata in a comment block delimited by
//! `==UserScript==` and `==/UserScript==`:
//!
//! ```text
//! // ==UserScript==
//! // @name           IITC plugin: Draw tools
//! // @category       Draw
//! // @version        0.7.0.20170108
//! // @updateURL      https://example.com/draw-tools.meta.js
//! // @downloadURL    https://example.com/draw-tools.user.js
//! // ==/UserScript==
//! ```
//!
//! The format is line oriented. Lines that do not fit are skipped instead of
//! failing the whole parse.

use std::collections::HashMap;

/// Opening marker of the header block
pub const HEADER_START: &str = "==UserScript==";
/// Closing marker of the header block
pub const HEADER_END: &str = "==/UserScript==";

/// Parsed header: every key maps to its values in definition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: HashMap<String, Vec<String>>,
}

impl Metadata {
    /// All values recorded for `key`
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(|values| values.as_slice())
    }

    /// First value recorded for `key`
    pub fn first(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    fn push(&mut self, key: &str, value: &str) {
        self.entries
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }
}

/// Extract the header block from script text.
///
/// Returns an empty [`Metadata`] when either marker is missing or the
/// closing marker only appears before the opening one.
pub fn parse(text: &str) -> Metadata {
    let mut metadata = Metadata::default();

    let Some(start) = text.find(HEADER_START) else {
        return metadata;
    };
    let body_start = start + HEADER_START.len();
    let Some(end) = text[body_start..].find(HEADER_END) else {
        return metadata;
    };
    let header = &text[body_start..body_start + end];

    for line in header.split('\n') {
        if let Some((key, value)) = parse_line(line) {
            metadata.push(key, value);
        }
    }

    metadata
}

/// Split one header line into `(key, value)`.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let at = line.find('@')?;
    let rest = &line[at + 1..];

    // Key runs up to the first whitespace; a line ending right after the key
    // carries no value. The key must start right at the `@`, so `@ key value`
    // has an empty key and is skipped.
    let key_end = rest.find(char::is_whitespace)?;
    let key = &rest[..key_end];
    if key.is_empty() {
        return None;
    }

    let rest = rest[key_end..].trim_start_matches([' ', '\t']);
    let value_end = rest.find(['\r', '\n']).unwrap_or(rest.len());
    let value = &rest[..value_end];
    if value.is_empty() {
        return None;
    }

    Some((key, value))
}
