//! Header block parsing for the multipart wire format.
//!
//! A header block is the group of CRLF-framed lines that precedes each JPEG
//! payload (and, once per stream, the HTTP-style response preamble). Blocks
//! are parsed into an immutable [`HeaderBlock`] via an append-only
//! [`HeaderBlockBuilder`]: lines are split on the first colon, values are
//! trimmed, and the derived `Content-Length` / `Content-Type` / boundary
//! fields are extracted as lines arrive. The parser is stateless across
//! blocks; the only configuration is the optional boundary-lookup token.

use tracing::debug;

use crate::{Result, SliceError};

/// One parsed header block: an ordered, frozen list of key/value pairs plus
/// the derived fields the slicer cares about.
#[derive(Debug, Clone)]
pub struct HeaderBlock {
    entries: Vec<(String, String)>,
    content_length: Option<u64>,
    content_type: Option<String>,
    boundary: Option<String>,
}

impl HeaderBlock {
    /// Parse a complete header block.
    ///
    /// `boundary_lookup` is the token (including the leading dashes, e.g.
    /// `--myboundary`) that marks a frame delimiter line; when a line's key
    /// equals it exactly and carries no value, it is recorded as the block's
    /// boundary. Pass `None` when no boundary is configured yet, such as for
    /// the stream preamble.
    ///
    /// # Errors
    ///
    /// A `Content-Length` header whose value does not parse as a
    /// non-negative integer is a data-corruption error, not a silent skip.
    pub fn parse<S: AsRef<str>>(lines: &[S], boundary_lookup: Option<&str>) -> Result<Self> {
        let mut builder = HeaderBlockBuilder::new(boundary_lookup);
        for line in lines {
            builder.push_line(line.as_ref())?;
        }
        Ok(builder.build())
    }

    /// Number of header lines in this block.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the block holds no header lines.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The i-th key/value pair, in wire order.
    pub fn get(&self, i: usize) -> Option<(&str, &str)> {
        self.entries.get(i).map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over all key/value pairs in wire order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The declared payload length, if a `Content-Length` header was present.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The raw `Content-Type` value, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The boundary delimiter line, if the configured lookup token matched.
    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// Extract the `boundary=<token>` parameter from this block's
    /// `Content-Type`, as announced by a `multipart/x-mixed-replace`
    /// response preamble.
    pub fn multipart_boundary(&self) -> Option<&str> {
        let content_type = self.content_type()?;
        content_type.split(';').map(str::trim).find_map(|param| {
            let (name, token) = param.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("boundary") {
                return None;
            }
            let token = token.trim().trim_matches('"');
            (!token.is_empty()).then_some(token)
        })
    }
}

/// Append-only builder for [`HeaderBlock`].
#[derive(Debug)]
pub struct HeaderBlockBuilder {
    entries: Vec<(String, String)>,
    content_length: Option<u64>,
    content_type: Option<String>,
    boundary: Option<String>,
    boundary_lookup: Option<String>,
}

impl HeaderBlockBuilder {
    /// Create a builder, optionally configured with a boundary-lookup token.
    pub fn new(boundary_lookup: Option<&str>) -> Self {
        Self {
            entries: Vec::new(),
            content_length: None,
            content_type: None,
            boundary: None,
            boundary_lookup: boundary_lookup.map(str::to_owned),
        }
    }

    /// Add one header line.
    ///
    /// The line is split on the first colon: the key is everything before it
    /// (or the whole line when no colon is present), the value is the trimmed
    /// remainder (empty when there is none).
    pub fn push_line(&mut self, line: &str) -> Result<&mut Self> {
        let (key, value) = match line.find(':') {
            None => (line, ""),
            Some(pos) => (&line[..pos], line[pos + 1..].trim()),
        };

        if key.eq_ignore_ascii_case("content-length") {
            let length = value.parse::<u64>().map_err(|e| {
                SliceError::corruption_with_source(
                    format!("unparsable Content-Length value {value:?}"),
                    e,
                )
            })?;
            self.content_length = Some(length);
        } else if key.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.to_owned());
        }

        if value.is_empty() && self.boundary_lookup.as_deref() == Some(key) {
            debug!(boundary = key, "found boundary delimiter line");
            self.boundary = Some(key.to_owned());
        }

        self.entries.push((key.to_owned(), value.to_owned()));
        Ok(self)
    }

    /// Freeze the builder into an immutable [`HeaderBlock`].
    pub fn build(self) -> HeaderBlock {
        HeaderBlock {
            entries: self.entries,
            content_length: self.content_length,
            content_type: self.content_type,
            boundary: self.boundary,
        }
    }
}
