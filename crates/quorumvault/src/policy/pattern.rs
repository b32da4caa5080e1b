//! hierarchical wildcard patterns for identities and secret paths
//!
//! patterns are compiled once into segments split on `/`:
//!
//! - `name` matches that exact segment
//! - `prefix*` matches one segment starting with `prefix`
//! - `*` matches exactly one segment, except in final position where it
//!   matches one or more trailing segments
//! - `**` matches one or more trailing segments and must be final
//!
//! `spiffe://example.org/web/*` therefore covers `spiffe://example.org/web/api`
//! as well as `spiffe://example.org/web/api/v2`, but not
//! `spiffe://example.org/web` itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Prefix(String),
    One,
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(lit) => lit == segment,
            Segment::Prefix(prefix) => segment.len() > prefix.len() && segment.starts_with(prefix.as_str()),
            Segment::One => !segment.is_empty(),
        }
    }
}

/// compiled pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
    /// trailing multi-segment wildcard
    rest: bool,
}

impl Pattern {
    pub fn compile(source: &str) -> Result<Self> {
        if source.is_empty() {
            return Err(Error::InvalidParameters("empty pattern".into()));
        }

        let raw: Vec<&str> = source.split(SEPARATOR).collect();
        let last = raw.len() - 1;
        let mut segments = Vec::with_capacity(raw.len());
        let mut rest = false;

        for (i, seg) in raw.iter().enumerate() {
            match *seg {
                "**" | "*" if i == last => rest = true,
                "**" => {
                    return Err(Error::InvalidParameters(format!(
                        "`**` must be the final segment in {:?}",
                        source
                    )))
                }
                "*" => segments.push(Segment::One),
                s if s.ends_with('*') && !s[..s.len() - 1].contains('*') => {
                    segments.push(Segment::Prefix(s[..s.len() - 1].to_string()))
                }
                s if s.contains('*') => {
                    return Err(Error::InvalidParameters(format!(
                        "unsupported wildcard segment {:?} in {:?}",
                        s, source
                    )))
                }
                s => segments.push(Segment::Literal(s.to_string())),
            }
        }

        Ok(Self {
            source: source.to_string(),
            segments,
            rest,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// whether the pattern contains no wildcard at all
    pub fn is_exact(&self) -> bool {
        !self.rest
            && self
                .segments
                .iter()
                .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn matches(&self, subject: &str) -> bool {
        let parts: Vec<&str> = subject.split(SEPARATOR).collect();

        if self.rest {
            // the trailing wildcard needs at least one segment to consume;
            // an empty one means a directory form like `secrets/web/`
            if parts.len() <= self.segments.len() {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(parts.iter())
            .all(|(seg, part)| seg.matches(part))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Pattern {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Pattern::compile(&value)
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> Self {
        p.source
    }
}

impl std::str::FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pattern::compile(s)
    }
}
