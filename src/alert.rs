//! Bulletin text format.
//!
//! A bulletin is plain text: comment lines (starting with `#`) are ignored
//! wherever they appear, blank lines before the first real line are
//! skipped, the first remaining line is the title and everything after it
//! is the body.

use crate::state::Channel;
use chrono::{DateTime, Utc};

const COMMENT_MARKER: char = '#';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bulletin {
    pub title: String,
    pub body: String,
}

/// A verified bulletin ready to be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub channel: Channel,
    pub title: String,
    pub body: String,
    /// Server-side `Last-Modified` of the signature, if known.
    pub released: Option<DateTime<Utc>>,
    /// `Good signature from ...` line reported by the verifier.
    pub signer: Option<String>,
}

/// Split bulletin bytes into title and body.
///
/// Returns `None` when there is no title line at all.
pub fn parse_bulletin(bytes: &[u8]) -> Option<Bulletin> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text
        .lines()
        .filter(|line| !line.starts_with(COMMENT_MARKER));

    let title = lines.find(|line| !line.trim().is_empty())?.trim().to_string();
    let body = lines.collect::<Vec<_>>().join("\n").trim_end().to_string();

    Some(Bulletin { title, body })
}
